// Project files: a JSON description of every resource of a build, registered
// in file order.
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use log::info;
use serde::Deserialize;

use crate::{
    bundle::{Bundle, ImageSource, TiledMapOptions},
    common::Color32,
    config::PackConfig,
    helpers::pack_rgba,
    tiles::TilesetOptions,
};

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum SpriteDef {
    Single { name: String, image: String },
    // Every file matching the pattern, named after its file stem.
    Pattern { pattern: String },
}

#[derive(Deserialize, Debug)]
pub struct MapDef {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub blank: Option<(u32, u32)>,
    #[serde(default)]
    pub tolerance: usize,
}

#[derive(Deserialize, Debug)]
pub struct TilesetDef {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    // Capacity in tiles, for tilesets filled by maps.
    #[serde(default)]
    pub blank: Option<(u32, u32)>,
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub first_tile_empty: bool,
    #[serde(default)]
    pub tileset_width: Option<u32>,
    #[serde(default)]
    pub deduplicate: bool,
    #[serde(default)]
    pub maps: Vec<MapDef>,
}

#[derive(Deserialize, Debug)]
pub struct TiledMapDef {
    pub name: String,
    // Path of the Tiled document without its .json extension.
    pub base: String,
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub tileset_width: Option<u32>,
    #[serde(default)]
    pub tileset_height: Option<u32>,
    #[serde(default)]
    pub tolerance: usize,
}

#[derive(Deserialize, Debug)]
pub struct PaletteDef {
    pub name: String,
    #[serde(default)]
    pub max_colors: usize,
    #[serde(default = "default_rows")]
    pub rows: usize,
    // One palette row per line of this image; replaces max_colors/rows.
    #[serde(default)]
    pub rows_image: Option<String>,
    // "#rrggbb" or "#rrggbbaa"
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub colors_image: Option<String>,
    #[serde(default)]
    pub sprites: Vec<SpriteDef>,
    #[serde(default)]
    pub tilesets: Vec<TilesetDef>,
    #[serde(default)]
    pub tiled_maps: Vec<TiledMapDef>,
}

fn default_rows() -> usize {
    1
}

#[derive(Deserialize, Debug)]
pub struct Project {
    #[serde(default)]
    pub config: PackConfig,
    // Output directory, relative to the project file.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub palettes: Vec<PaletteDef>,
    #[serde(skip)]
    pub dir: PathBuf,
}

pub fn parse_color(text: &str) -> Result<Color32> {
    let hex = text.strip_prefix('#').unwrap_or(text);
    ensure!(
        hex.len() == 6 || hex.len() == 8,
        "Invalid color {} (expected #rrggbb or #rrggbbaa)",
        text
    );
    let value = u32::from_str_radix(hex, 16).with_context(|| format!("Invalid color {}", text))?;
    let (rgb, a) = if hex.len() == 6 {
        (value, 0xff)
    } else {
        (value >> 8, value as u8)
    };
    Ok(pack_rgba((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8, a))
}

fn source(name: &str, image: &Option<PathBuf>, blank: Option<(u32, u32)>) -> Result<ImageSource> {
    match (image, blank) {
        (Some(path), None) => Ok(ImageSource::File(path.clone())),
        (None, Some((w, h))) => Ok(ImageSource::Blank(w, h)),
        _ => bail!("{} needs exactly one of image or blank", name),
    }
}

impl Project {
    pub fn load(path: &Path) -> Result<Self> {
        let mut project: Project = crate::persist::load_json(path)?;
        project.dir = path.parent().map(Path::to_owned).unwrap_or_default();
        Ok(project)
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.join(relative)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path(self.output.as_deref().unwrap_or("build"))
    }

    fn sprite_sources(&self, def: &SpriteDef) -> Result<Vec<(String, PathBuf)>> {
        match def {
            SpriteDef::Single { name, image } => Ok(vec![(name.clone(), self.path(image))]),
            SpriteDef::Pattern { pattern } => {
                let full = self.path(pattern);
                let mut result = vec![];
                for entry in glob::glob(&full.to_string_lossy())? {
                    let path = entry?;
                    let name = path
                        .file_stem()
                        .with_context(|| format!("No file name in {}", path.display()))?
                        .to_string_lossy()
                        .to_string();
                    result.push((name, path));
                }
                if result.is_empty() {
                    info!("No sprites match {}", full.display());
                }
                Ok(result)
            }
        }
    }

    fn register_palette(&self, bundle: &mut Bundle, def: &PaletteDef) -> Result<()> {
        match &def.rows_image {
            Some(image) => bundle
                .create_palette_from_rows(&def.name, &ImageSource::File(self.path(image)))?,
            None => bundle.create_palette(&def.name, def.max_colors, def.rows)?,
        }
        if !def.colors.is_empty() {
            let colors = def
                .colors
                .iter()
                .map(|c| parse_color(c))
                .collect::<Result<Vec<_>>>()?;
            bundle.add_colors(&def.name, &colors)?;
        }
        if let Some(image) = &def.colors_image {
            bundle.add_colors_from_image(&def.name, &ImageSource::File(self.path(image)))?;
        }

        for sprite in &def.sprites {
            for (name, path) in self.sprite_sources(sprite)? {
                bundle.create_sprite(&def.name, &name, &ImageSource::File(path))?;
            }
        }

        for tileset in &def.tilesets {
            let image = tileset.image.as_deref().map(|i| self.path(i));
            let opts = TilesetOptions {
                first_tile_empty: tileset.first_tile_empty,
                tileset_width: tileset.tileset_width,
                deduplicate: tileset.deduplicate,
            };
            bundle.create_tileset(
                &def.name,
                &tileset.name,
                &source(&tileset.name, &image, tileset.blank)?,
                tileset.tile_width,
                tileset.tile_height,
                &opts,
            )?;
            for map in &tileset.maps {
                let image = map.image.as_deref().map(|i| self.path(i));
                bundle.create_map(
                    &tileset.name,
                    &map.name,
                    &source(&map.name, &image, map.blank)?,
                    map.tolerance,
                )?;
            }
        }

        for tiled in &def.tiled_maps {
            let opts = TiledMapOptions {
                tile_width: tiled.tile_width,
                tile_height: tiled.tile_height,
                tileset_width: tiled.tileset_width,
                tileset_height: tiled.tileset_height,
                tolerance: tiled.tolerance,
            };
            bundle.tiled_map(&def.name, &tiled.name, &self.path(&tiled.base), &opts)?;
        }
        Ok(())
    }

    /// Registers every resource, in file order, into a new bundle.
    pub fn build(&self) -> Result<Bundle> {
        let mut bundle = Bundle::new(self.config.clone())?;
        for def in &self.palettes {
            info!("Processing palette {}", def.name);
            self.register_palette(&mut bundle, def)
                .with_context(|| format!("In palette {}", def.name))?;
        }
        Ok(bundle)
    }
}
