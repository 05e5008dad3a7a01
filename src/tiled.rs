// Tiled JSON maps (.json/.tmj): the interchange format maps are authored in.
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use itertools::iproduct;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value};

use crate::{
    common::{encode_cell, TileIdx, CELL_TILE_MASK, MAX_ADDRESSABLE_TILES},
    diagnostics::{Diagnostics, Warning},
    map::Map,
    palette::Palette,
    persist::{load_json, load_png, save_json, save_png},
    texture::PixelBuffer,
    tiles::{Tileset, TilesetOptions},
};

// Tiled stores flip/rotation flags in the top bits of every gid.
const GID_FLAG_MASK: u32 = 0xf000_0000;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TiledTileset {
    #[serde(default)]
    pub name: String,
    pub firstgid: u32,
    #[serde(default)]
    pub tilewidth: u32,
    #[serde(default)]
    pub tileheight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imagewidth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imageheight: Option<u32>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum LayerData {
    Gids(Vec<u32>),
    Encoded(String),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TiledLayer {
    pub name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<LayerData>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

impl TiledLayer {
    /// Tile gids in row-major order. Only CSV layers (plain integer arrays) are readable.
    pub fn gids(&self) -> Result<&[u32]> {
        if let Some(encoding) = &self.encoding {
            ensure!(
                encoding == "csv",
                "Only CSV encoding is supported (layer {} uses {})",
                self.name,
                encoding
            );
        }
        let gids = match &self.data {
            Some(LayerData::Gids(gids)) => gids,
            Some(LayerData::Encoded(_)) => {
                bail!("Only CSV encoding is supported (layer {} is encoded)", self.name)
            }
            None => bail!("Layer {} has no tile data", self.name),
        };
        ensure!(
            gids.len() == self.width as usize * self.height as usize,
            "Layer {} has {} tiles, expected {}x{}",
            self.name,
            gids.len(),
            self.width,
            self.height
        );
        Ok(gids)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TiledMap {
    pub width: u32,
    pub height: u32,
    pub tilewidth: u32,
    pub tileheight: u32,
    #[serde(default)]
    pub tilesets: Vec<TiledTileset>,
    #[serde(default)]
    pub layers: Vec<TiledLayer>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateTilesetOptions {
    // Overrides the firstgid read from the document.
    pub first_tile: Option<u32>,
    // Also rewrite the tileset entry to match the written image.
    pub update_header: bool,
}

/// A Tiled map loaded from disk, remembering where it came from so that
/// tileset images resolve relative to it.
#[derive(Clone, Debug)]
pub struct TiledDocument {
    pub path: PathBuf,
    pub map: TiledMap,
}

impl TiledDocument {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(TiledDocument {
            path: path.to_owned(),
            map: load_json(path)?,
        })
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new(""))
    }

    pub fn tileset(&self, name: &str) -> Result<&TiledTileset> {
        self.map
            .tilesets
            .iter()
            .find(|t| t.name == name)
            .with_context(|| format!("Tileset {} not found in {}", name, self.path.display()))
    }

    fn tileset_mut(&mut self, name: &str) -> Result<&mut TiledTileset> {
        let path = self.path.display().to_string();
        self.map
            .tilesets
            .iter_mut()
            .find(|t| t.name == name)
            .with_context(|| format!("Tileset {} not found in {}", name, path))
    }

    pub fn layer(&self, name: &str) -> Result<&TiledLayer> {
        self.map
            .layers
            .iter()
            .find(|l| l.name == name)
            .with_context(|| format!("Map layer {} not found in {}", name, self.path.display()))
    }

    fn layer_mut(&mut self, name: &str) -> Result<&mut TiledLayer> {
        let path = self.path.display().to_string();
        self.map
            .layers
            .iter_mut()
            .find(|l| l.name == name)
            .with_context(|| format!("Map layer {} not found in {}", name, path))
    }

    fn first_tile(&self, tileset: &str, first_tile: Option<u32>) -> Result<u32> {
        match first_tile {
            Some(first) => Ok(first),
            None => Ok(self.tileset(tileset)?.firstgid),
        }
    }

    /// Builds a tileset from the image a tileset entry points to. Tiles keep
    /// their grid order so that gids map straight to tile indices.
    pub fn read_tileset(
        &self,
        name: &str,
        palette: &mut Palette,
        opts: &TilesetOptions,
        diag: &mut Diagnostics,
    ) -> Result<Tileset> {
        let entry = self.tileset(name)?;
        let image = entry.image.as_ref().with_context(|| {
            format!(
                "Tileset {} in {} has no image (external tilesets are not supported)",
                name,
                self.path.display()
            )
        })?;
        let image = load_png(&self.dir().join(image))?;
        Tileset::from_image(
            &entry.name,
            &image,
            entry.tilewidth,
            entry.tileheight,
            palette,
            opts,
            diag,
        )
    }

    /// Reads layer `layer_name` as a map over `tileset`. Gids below the
    /// tileset's first gid (including empty cells) become tile 0.
    pub fn read_map(
        &self,
        layer_name: &str,
        tileset: &Tileset,
        first_tile: Option<u32>,
        diag: &mut Diagnostics,
    ) -> Result<Map> {
        let first_tile = self.first_tile(&tileset.name, first_tile)?;
        let layer = self.layer(layer_name)?;
        let gids = layer.gids()?;
        let mut map = Map::blank(layer_name, layer.width, layer.height, tileset)?;

        for (k, (y, x)) in iproduct!(0..layer.height, 0..layer.width).enumerate() {
            let tile: TileIdx = (gids[k] & !GID_FLAG_MASK).saturating_sub(first_tile);
            if tile as usize >= MAX_ADDRESSABLE_TILES {
                diag.warn_once(Warning::TileRangeExceeded {
                    map: layer_name.to_string(),
                    tileset: tileset.name.clone(),
                });
            }
            let row = tileset.tile(tile).map_or(0, |t| t.palette_row);
            let cell = encode_cell(tile & CELL_TILE_MASK, row)
                .with_context(|| format!("Map {} at ({}, {})", layer_name, x, y))?;
            map.set_cell(x, y, cell)?;
        }
        info!(
            "Read map {} ({}x{}) from {}",
            layer_name,
            layer.width,
            layer.height,
            self.path.display()
        );
        Ok(map)
    }

    /// Replaces layer `layer_name` with the contents of `map`.
    pub fn update_map(&mut self, layer_name: &str, map: &Map, first_tile: Option<u32>) -> Result<()> {
        let first_tile = self.first_tile(&map.tileset, first_tile)?;
        let layer = self.layer_mut(layer_name)?;
        layer.name = map.name.clone();
        layer.width = map.width;
        layer.height = map.height;
        layer.encoding = None;
        layer.data = Some(LayerData::Gids(
            map.cells().pixels().iter().map(|&c| c + first_tile).collect(),
        ));
        Ok(())
    }

    /// Writes `<name>-til.png` next to the document with the tileset's tiles
    /// rendered in row 0 of `palette`.
    pub fn update_tileset(
        &mut self,
        name: &str,
        tileset: &Tileset,
        palette: &Palette,
        opts: &UpdateTilesetOptions,
    ) -> Result<()> {
        let first_tile = self.first_tile(name, opts.first_tile)?;
        let file_name = format!("{}-til.png", name);
        let image = tileset_to_true_color(tileset, palette)?;
        save_png(&self.dir().join(&file_name), &image)?;

        if opts.update_header {
            let entry = self.tileset_mut(name)?;
            entry.firstgid = first_tile;
            entry.name = tileset.name.clone();
            entry.tilewidth = tileset.tile_width;
            entry.tileheight = tileset.tile_height;
            entry.image = Some(file_name);
            entry.imagewidth = Some(image.width());
            entry.imageheight = Some(image.height());
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        save_json(&self.path, &self.map)
    }

    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        self.path = path.to_owned();
        self.save()
    }
}

/// Renders a tileset's used area as a true-color image through row 0 of `palette`.
pub fn tileset_to_true_color(tileset: &Tileset, palette: &Palette) -> Result<PixelBuffer> {
    let mut indexed = PixelBuffer::new(tileset.used_width(), tileset.used_height(), 16)?;
    tileset.copy_to(&mut indexed, 0, 0)?;
    let colors = palette.row(0);
    let mut result = PixelBuffer::new(indexed.width(), indexed.height(), 32)?;
    for (y, x) in iproduct!(0..indexed.height(), 0..indexed.width()) {
        let idx = indexed.get(x as i64, y as i64) as usize;
        result.set(x, y, colors.get(idx).copied().unwrap_or(0))?;
    }
    Ok(result)
}

/// Writes `<base>-til.png` and a fresh `<base>.json` holding `map` as its
/// only layer, so it can be edited in Tiled.
pub fn export(base: &Path, map: &Map, tileset: &Tileset, palette: &Palette) -> Result<TiledDocument> {
    ensure!(
        palette.num_rows() == 1,
        "Only single-palette maps can be exported (map {}, palette {} has {} rows)",
        map.name,
        palette.name,
        palette.num_rows()
    );
    let base_name = base
        .file_name()
        .context("Export path has no file name")?
        .to_string_lossy()
        .to_string();
    let image_name = format!("{}-til.png", base_name);
    let image = tileset_to_true_color(tileset, palette)?;
    save_png(&base.with_file_name(&image_name), &image)?;

    let extra = |value: Value| match value {
        Value::Object(fields) => fields,
        _ => JsonMap::new(),
    };
    let document = TiledDocument {
        path: base.with_file_name(format!("{}.json", base_name)),
        map: TiledMap {
            width: map.width,
            height: map.height,
            tilewidth: tileset.tile_width,
            tileheight: tileset.tile_height,
            tilesets: vec![TiledTileset {
                name: tileset.name.clone(),
                firstgid: 1,
                tilewidth: tileset.tile_width,
                tileheight: tileset.tile_height,
                image: Some(image_name),
                imagewidth: Some(image.width()),
                imageheight: Some(image.height()),
                extra: extra(json!({
                    "columns": tileset.tiles_wide,
                    "tilecount": tileset.tiles().len(),
                    "margin": 0,
                    "spacing": 0,
                })),
            }],
            layers: vec![TiledLayer {
                name: map.name.clone(),
                width: map.width,
                height: map.height,
                encoding: None,
                data: Some(LayerData::Gids(
                    map.cells().pixels().iter().map(|&c| c + 1).collect(),
                )),
                extra: extra(json!({
                    "id": 1,
                    "type": "tilelayer",
                    "opacity": 1,
                    "visible": true,
                    "x": 0,
                    "y": 0,
                })),
            }],
            extra: extra(json!({
                "type": "map",
                "version": "1.10",
                "orientation": "orthogonal",
                "renderorder": "right-down",
                "infinite": false,
                "nextlayerid": 2,
                "nextobjectid": 1,
            })),
        },
    };
    document.save()?;
    Ok(document)
}
