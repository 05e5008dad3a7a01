pub mod baker;
pub mod bundle;
pub mod common;
pub mod config;
pub mod diagnostics;
pub mod helpers;
pub mod map;
pub mod palette;
pub mod persist;
pub mod project;
pub mod sprite;
pub mod texture;
pub mod tiled;
pub mod tiles;
