// Registration of named resources and the packing pass that lays them out in
// the sprite, map and palette atlases.
use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use hashbrown::HashMap;
use itertools::iproduct;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    baker::{Baker, Placement},
    common::Color32,
    config::{ColorMode, PackConfig},
    diagnostics::Diagnostics,
    map::Map,
    palette::{Palette, PalettePlacement},
    persist::{encode_texture, load_png, to_json_bytes, write_file},
    sprite::Sprite,
    texture::PixelBuffer,
    tiled::{export, TiledDocument},
    tiles::{Tileset, TilesetOptions},
};

pub const MANIFEST_FILE: &str = "game.json";
pub const SPRITES_FILE: &str = "sprites.png";
pub const MAPS_FILE: &str = "maps.png";
pub const PALETTES_FILE: &str = "palettes.png";
pub const SAMPLE_FILE: &str = "sample.png";

// Colors available to the throwaway palette used when converting a map image for Tiled.
const CONVERSION_PALETTE_COLORS: usize = 65536;

/// Where the pixels of a sprite, tileset or map come from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    File(PathBuf),
    Buffer(PixelBuffer),
    /// Empty resource of the given size: tiles for a tileset, cells for a map.
    Blank(u32, u32),
}

enum Loaded {
    Image(PixelBuffer),
    Blank(u32, u32),
}

impl ImageSource {
    fn load(&self) -> Result<Loaded> {
        match self {
            ImageSource::File(path) => Ok(Loaded::Image(load_png(path)?)),
            ImageSource::Buffer(buf) => {
                ensure!(buf.depth() == 32, "Source images must be 32bpp true color");
                Ok(Loaded::Image(buf.clone()))
            }
            ImageSource::Blank(w, h) => Ok(Loaded::Blank(*w, *h)),
        }
    }

    fn load_image(&self) -> Result<PixelBuffer> {
        match self.load()? {
            Loaded::Image(image) => Ok(image),
            Loaded::Blank(..) => bail!("An image is required here, not a blank source"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ManifestInfo {
    #[serde(rename = "paletteBpp")]
    pub palette_bpp: u32,
}

/// Sprite or tileset record; tilesets also carry tile size and count.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpriteRecord {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub th: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<u32>,
    pub hicol: ColorMode,
    pub pal: String,
}

impl SpriteRecord {
    pub fn placement(&self) -> Placement {
        Placement {
            x: self.x,
            y: self.y,
            w: self.w,
            h: self.h,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MapRecord {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub til: String,
    pub pal: String,
}

/// Index of every packed resource, written as `game.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Manifest {
    pub pals: BTreeMap<String, PalettePlacement>,
    pub sprites: BTreeMap<String, SpriteRecord>,
    pub maps: BTreeMap<String, MapRecord>,
    pub data: BTreeMap<String, Value>,
    pub info: ManifestInfo,
}

/// Output of a successful packing pass, fully encoded in memory.
pub struct PackedBundle {
    pub manifest: Manifest,
    pub sprite_atlas: PixelBuffer,
    pub map_atlas: PixelBuffer,
    pub palette_atlas: PixelBuffer,
    files: Vec<(&'static str, Vec<u8>)>,
}

impl PackedBundle {
    /// Encoded files by name: the manifest and atlases, plus the sample image in debug mode.
    pub fn files(&self) -> &[(&'static str, Vec<u8>)] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        info!("Writing game data to {}", dir.display());
        for (name, bytes) in &self.files {
            write_file(&dir.join(name), bytes)?;
        }
        Ok(())
    }
}

struct SpriteEntry {
    sprite: Sprite,
    palette: usize,
}

struct TilesetEntry {
    tileset: Tileset,
    palette: usize,
}

struct MapEntry {
    map: Map,
    tileset: usize,
}

#[derive(Clone, Debug)]
pub struct TiledMapOptions {
    pub tile_width: u32,
    pub tile_height: u32,
    // Capacity of the tileset built when the map has to be converted from an image.
    pub tileset_width: Option<u32>,
    pub tileset_height: Option<u32>,
    pub tolerance: usize,
}

/// All registered resources of one build, in registration order.
pub struct Bundle {
    config: PackConfig,
    palettes: Vec<Palette>,
    sprites: Vec<SpriteEntry>,
    tilesets: Vec<TilesetEntry>,
    maps: Vec<MapEntry>,
    palette_idx: HashMap<String, usize>,
    tileset_idx: HashMap<String, usize>,
    diagnostics: Diagnostics,
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path: OsString = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

impl Bundle {
    pub fn new(config: PackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Bundle {
            config,
            palettes: vec![],
            sprites: vec![],
            tilesets: vec![],
            maps: vec![],
            palette_idx: HashMap::new(),
            tileset_idx: HashMap::new(),
            diagnostics: Diagnostics::new(),
        })
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn palettes(&self) -> &[Palette] {
        &self.palettes
    }

    pub fn palette_named(&self, name: &str) -> Option<&Palette> {
        self.palette_idx.get(name).map(|&i| &self.palettes[i])
    }

    pub fn tileset_named(&self, name: &str) -> Option<&Tileset> {
        self.tileset_idx.get(name).map(|&i| &self.tilesets[i].tileset)
    }

    pub fn sprite_named(&self, name: &str) -> Option<&Sprite> {
        self.sprites
            .iter()
            .find(|e| e.sprite.name == name)
            .map(|e| &e.sprite)
    }

    pub fn map_named(&self, name: &str) -> Option<&Map> {
        self.maps.iter().find(|e| e.map.name == name).map(|e| &e.map)
    }

    fn palette_index(&self, name: &str) -> Result<usize> {
        self.palette_idx
            .get(name)
            .copied()
            .with_context(|| format!("Palette {} is not defined", name))
    }

    fn tileset_index(&self, name: &str) -> Result<usize> {
        self.tileset_idx
            .get(name)
            .copied()
            .with_context(|| format!("Tileset {} is not defined", name))
    }

    // Sprites and tilesets share the manifest's sprite table.
    fn check_sprite_name(&self, name: &str) -> Result<()> {
        ensure!(!name.is_empty(), "Resource names can't be empty");
        ensure!(
            self.sprite_named(name).is_none() && !self.tileset_idx.contains_key(name),
            "A sprite or tileset named {} already exists",
            name
        );
        Ok(())
    }

    fn push_palette(&mut self, palette: Palette) -> Result<usize> {
        ensure!(!palette.name.is_empty(), "Resource names can't be empty");
        ensure!(
            !self.palette_idx.contains_key(&palette.name),
            "Palette {} already exists",
            palette.name
        );
        let idx = self.palettes.len();
        self.palette_idx.insert(palette.name.clone(), idx);
        self.palettes.push(palette);
        Ok(idx)
    }

    /// `max_colors == 0` uses the color mode's row size.
    pub fn create_palette(&mut self, name: &str, max_colors: usize, rows: usize) -> Result<()> {
        let limit = self.config.color_mode.colors_per_row();
        ensure!(
            max_colors <= limit,
            "Palette {} can't hold {} colors per row (max {})",
            name,
            max_colors,
            limit
        );
        let palette = Palette::new(name, max_colors, rows, &self.config)?;
        self.push_palette(palette)?;
        Ok(())
    }

    /// Creates a multi-row palette, one row per line of the source image.
    pub fn create_palette_from_rows(&mut self, name: &str, source: &ImageSource) -> Result<()> {
        let image = source.load_image()?;
        let palette = Palette::from_image_rows(name, &image, &self.config)?;
        self.push_palette(palette)?;
        Ok(())
    }

    pub fn add_colors(&mut self, palette: &str, colors: &[Color32]) -> Result<()> {
        let idx = self.palette_index(palette)?;
        self.palettes[idx].add_colors(colors, 0)
    }

    pub fn add_colors_from_image(&mut self, palette: &str, source: &ImageSource) -> Result<()> {
        let idx = self.palette_index(palette)?;
        let image = source.load_image()?;
        self.palettes[idx].add_colors_from_image(&image)
    }

    pub fn create_sprite(&mut self, palette: &str, name: &str, source: &ImageSource) -> Result<()> {
        let pal = self.palette_index(palette)?;
        self.check_sprite_name(name)?;
        let image = match source.load()? {
            Loaded::Image(image) => image,
            Loaded::Blank(..) => bail!("Blank sprites are not supported (sprite {})", name),
        };
        let sprite = Sprite::from_image(name, &image, &mut self.palettes[pal], &mut self.diagnostics)
            .with_context(|| format!("Processing sprite {}", name))?;
        self.sprites.push(SpriteEntry {
            sprite,
            palette: pal,
        });
        Ok(())
    }

    pub fn create_tileset(
        &mut self,
        palette: &str,
        name: &str,
        source: &ImageSource,
        tile_width: u32,
        tile_height: u32,
        opts: &TilesetOptions,
    ) -> Result<()> {
        let pal = self.palette_index(palette)?;
        self.check_sprite_name(name)?;
        let tileset = match source.load()? {
            Loaded::Blank(w, h) => {
                Tileset::blank(name, tile_width, tile_height, w, h, opts.first_tile_empty)?
            }
            Loaded::Image(image) => Tileset::from_image(
                name,
                &image,
                tile_width,
                tile_height,
                &mut self.palettes[pal],
                opts,
                &mut self.diagnostics,
            )
            .with_context(|| format!("Processing tileset {}", name))?,
        };
        self.add_tileset(palette, tileset)
    }

    /// Registers an already built tileset.
    pub fn add_tileset(&mut self, palette: &str, tileset: Tileset) -> Result<()> {
        let pal = self.palette_index(palette)?;
        self.check_sprite_name(&tileset.name)?;
        self.tileset_idx
            .insert(tileset.name.clone(), self.tilesets.len());
        self.tilesets.push(TilesetEntry {
            tileset,
            palette: pal,
        });
        Ok(())
    }

    /// Creates a map over `tileset`; image sources grow the tileset (and its
    /// palette) with every tile they use.
    pub fn create_map(
        &mut self,
        tileset: &str,
        name: &str,
        source: &ImageSource,
        tolerance: usize,
    ) -> Result<()> {
        let til = self.tileset_index(tileset)?;
        let entry = &mut self.tilesets[til];
        let map = match source.load()? {
            Loaded::Blank(w, h) => Map::blank(name, w, h, &entry.tileset)?,
            Loaded::Image(image) => Map::from_image(
                name,
                &image,
                &mut entry.tileset,
                &mut self.palettes[entry.palette],
                tolerance,
                &mut self.diagnostics,
            )
            .with_context(|| format!("Processing map {}", name))?,
        };
        self.add_map(map)
    }

    /// Registers an already built map; its tileset must be registered.
    pub fn add_map(&mut self, map: Map) -> Result<()> {
        ensure!(!map.name.is_empty(), "Resource names can't be empty");
        ensure!(
            self.map_named(&map.name).is_none(),
            "Map {} already exists",
            map.name
        );
        let tileset = self.tileset_index(&map.tileset)?;
        self.maps.push(MapEntry { map, tileset });
        Ok(())
    }

    /// Imports `<base>.json` (a Tiled map) as tileset and map `name`, bound to
    /// `palette`. When the document doesn't exist yet it is first generated
    /// from `<base>.png`.
    pub fn tiled_map(
        &mut self,
        palette: &str,
        name: &str,
        base: &Path,
        opts: &TiledMapOptions,
    ) -> Result<()> {
        let pal = self.palette_index(palette)?;
        let document_path = with_suffix(base, ".json");

        if !document_path.exists() {
            let image_path = with_suffix(base, ".png");
            info!(
                "Tiled map {} not found, creating from {}",
                document_path.display(),
                image_path.display()
            );
            ensure!(
                image_path.exists(),
                "Map {} not found, neither an image to build from, {}",
                document_path.display(),
                image_path.display()
            );
            let (Some(wide), Some(tall)) = (opts.tileset_width, opts.tileset_height) else {
                bail!(
                    "Map {} not found, specify tileset_width and tileset_height to build a tileset",
                    document_path.display()
                );
            };
            let mut scratch_palette = Palette::new(name, CONVERSION_PALETTE_COLORS, 1, &self.config)?;
            let mut scratch_diag = Diagnostics::new();
            let mut tileset = Tileset::blank(name, opts.tile_width, opts.tile_height, wide, tall, false)?;
            let map = Map::from_image(
                name,
                &load_png(&image_path)?,
                &mut tileset,
                &mut scratch_palette,
                opts.tolerance,
                &mut scratch_diag,
            )?;
            export(base, &map, &tileset, &scratch_palette)?;
        }

        let document = TiledDocument::load(&document_path)?;
        let tileset = document.read_tileset(
            name,
            &mut self.palettes[pal],
            &TilesetOptions::default(),
            &mut self.diagnostics,
        )?;
        let map = document.read_map(name, &tileset, None, &mut self.diagnostics)?;
        self.add_tileset(palette, tileset)?;
        self.add_map(map)
    }

    /// The palette of the sprite or tileset covering texel (`x`, `y`) of the sprite atlas.
    pub fn find_palette_at(&self, manifest: &Manifest, x: u32, y: u32) -> Option<&Palette> {
        manifest
            .sprites
            .values()
            .find(|record| record.placement().contains(x, y))
            .and_then(|record| self.palette_named(&record.pal))
    }

    fn bake_palettes(&self, atlas: &mut PixelBuffer) -> Result<BTreeMap<String, PalettePlacement>> {
        let mut placements = BTreeMap::new();
        let mut y = 0;
        for palette in &self.palettes {
            let rows = palette.num_rows() as u32;
            if y + rows > atlas.height() {
                bail!(
                    "Too many palettes, failed while adding {} (max {})",
                    palette.name,
                    atlas.height()
                );
            }
            placements.insert(palette.name.clone(), palette.bake_into(atlas, 0, y)?);
            y += rows;
        }
        info!(
            "Palette usage: {:.2}%",
            100.0 * y as f64 / atlas.height() as f64
        );
        Ok(placements)
    }

    fn bake_sprites(&self, atlas: &mut PixelBuffer, alignment: u32) -> Result<BTreeMap<String, SpriteRecord>> {
        let mut records = BTreeMap::new();
        let hicol = self.config.color_mode;
        let mut baker = Baker::new(atlas, alignment);

        for entry in &self.sprites {
            let s = &entry.sprite;
            let p = baker.bake(s.width, s.height, &s.name, |dest, x, y| s.copy_to(dest, x, y))?;
            debug!("Sprite {} at ({}, {})", s.name, p.x, p.y);
            records.insert(
                s.name.clone(),
                SpriteRecord {
                    x: p.x,
                    y: p.y,
                    w: p.w,
                    h: p.h,
                    tw: None,
                    th: None,
                    tiles: None,
                    hicol,
                    pal: self.palettes[entry.palette].name.clone(),
                },
            );
        }

        for entry in &self.tilesets {
            let t = &entry.tileset;
            let p = baker.bake(t.used_width(), t.used_height(), &t.name, |dest, x, y| {
                t.copy_to(dest, x, y)
            })?;
            debug!("Tileset {} at ({}, {})", t.name, p.x, p.y);
            records.insert(
                t.name.clone(),
                SpriteRecord {
                    x: p.x,
                    y: p.y,
                    w: p.w,
                    h: p.h,
                    tw: Some(t.tile_width),
                    th: Some(t.tile_height),
                    tiles: Some(t.tiles().len() as u32),
                    hicol,
                    pal: self.palettes[entry.palette].name.clone(),
                },
            );
        }

        info!("Sprite usage: {:.2}%", 100.0 * baker.memory_usage());
        Ok(records)
    }

    fn bake_maps(&self, atlas: &mut PixelBuffer, alignment: u32) -> Result<BTreeMap<String, MapRecord>> {
        let mut records = BTreeMap::new();
        let mut baker = Baker::new(atlas, alignment);
        for entry in &self.maps {
            let m = &entry.map;
            let tileset = &self.tilesets[entry.tileset];
            let p = baker.bake(m.width, m.height, &m.name, |dest, x, y| m.copy_to(dest, x, y))?;
            debug!("Map {} at ({}, {})", m.name, p.x, p.y);
            records.insert(
                m.name.clone(),
                MapRecord {
                    x: p.x,
                    y: p.y,
                    w: p.w,
                    h: p.h,
                    til: tileset.tileset.name.clone(),
                    pal: self.palettes[tileset.palette].name.clone(),
                },
            );
        }
        info!("Map usage: {:.2}%", 100.0 * baker.memory_usage());
        Ok(records)
    }

    /// Renders the sprite atlas through row 0 of the palette each region is
    /// bound to (the first palette outside of any region).
    pub fn sample_image(&self, manifest: &Manifest, sprite_atlas: &PixelBuffer) -> Result<PixelBuffer> {
        let (width, height) = (sprite_atlas.width(), sprite_atlas.height());
        let mut owners: Vec<Option<&Palette>> = vec![self.palettes.first(); width as usize * height as usize];
        for record in manifest.sprites.values() {
            let palette = self.palette_named(&record.pal);
            for (y, x) in iproduct!(record.y..record.y + record.h, record.x..record.x + record.w) {
                if x < width && y < height {
                    owners[(y * width + x) as usize] = palette.or(self.palettes.first());
                }
            }
        }

        let mut result = PixelBuffer::new(width, height, 32)?;
        for (y, x) in iproduct!(0..height, 0..width) {
            let texel = sprite_atlas.get(x as i64, y as i64) as usize;
            let color = owners[(y * width + x) as usize]
                .and_then(|palette| palette.row(0).get(texel).copied())
                .unwrap_or(0);
            result.set(x, y, color)?;
        }
        Ok(result)
    }

    /// Lays every resource out in its atlas and encodes the result. Nothing is
    /// written to disk; any failure leaves no partial output.
    pub fn pack(&self) -> Result<PackedBundle> {
        let sprite_geom = self.config.sprite_atlas();
        let map_geom = self.config.map_atlas();
        let palette_geom = self.config.palette_atlas();
        let mut sprite_atlas = PixelBuffer::new(sprite_geom.width, sprite_geom.height, sprite_geom.depth)?;
        let mut map_atlas = PixelBuffer::new(map_geom.width, map_geom.height, map_geom.depth)?;
        let mut palette_atlas = PixelBuffer::new(palette_geom.width, palette_geom.height, palette_geom.depth)?;

        let pals = self.bake_palettes(&mut palette_atlas)?;
        let sprites = self.bake_sprites(&mut sprite_atlas, sprite_geom.alignment)?;
        let maps = self.bake_maps(&mut map_atlas, map_geom.alignment)?;
        let manifest = Manifest {
            pals,
            sprites,
            maps,
            data: BTreeMap::new(),
            info: ManifestInfo {
                palette_bpp: self.config.palette_bpp,
            },
        };

        let mut files = vec![
            (MANIFEST_FILE, to_json_bytes(&manifest)?),
            (SPRITES_FILE, encode_texture(&sprite_atlas)?),
            (MAPS_FILE, encode_texture(&map_atlas)?),
            (PALETTES_FILE, encode_texture(&palette_atlas)?),
        ];
        if self.config.debug {
            info!("Rendering {}", SAMPLE_FILE);
            let sample = self.sample_image(&manifest, &sprite_atlas)?;
            files.push((SAMPLE_FILE, encode_texture(&sample)?));
        }

        Ok(PackedBundle {
            manifest,
            sprite_atlas,
            map_atlas,
            palette_atlas,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{diagnostics::Warning, helpers::pack_rgba};

    const RED: u32 = 0xff00_00ff;
    const GREEN: u32 = 0xff00_ff00;

    fn solid(w: u32, h: u32, color: u32) -> ImageSource {
        let mut buf = PixelBuffer::new(w, h, 32).unwrap();
        for (y, x) in iproduct!(0..h, 0..w) {
            buf.set(x, y, color).unwrap();
        }
        ImageSource::Buffer(buf)
    }

    fn bundle() -> Bundle {
        Bundle::new(PackConfig::default()).unwrap()
    }

    #[test]
    fn resources_need_a_registered_binding() {
        let mut b = bundle();
        assert!(b.create_sprite("nope", "s", &solid(8, 8, RED)).is_err());
        assert!(b.create_map("nope", "m", &ImageSource::Blank(4, 4), 0).is_err());
        b.create_palette("p", 0, 1).unwrap();
        assert!(b.create_palette("p", 0, 1).is_err());
    }

    #[test]
    fn sprite_and_tileset_names_are_unique() {
        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        b.create_sprite("p", "hero", &solid(8, 8, RED)).unwrap();
        assert!(b.create_sprite("p", "hero", &solid(8, 8, RED)).is_err());
        assert!(b
            .create_tileset("p", "hero", &ImageSource::Blank(1, 1), 8, 8, &TilesetOptions::default())
            .is_err());
    }

    #[test]
    fn blank_sprites_are_rejected() {
        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        assert!(b.create_sprite("p", "s", &ImageSource::Blank(8, 8)).is_err());
    }

    #[test]
    fn lo_color_palettes_are_capped_at_16_colors() {
        let mut b = bundle();
        assert!(b.create_palette("p", 32, 1).is_err());
    }

    #[test]
    fn pack_places_resources_and_fills_manifest() {
        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        b.create_sprite("p", "a", &solid(10, 10, RED)).unwrap();
        b.create_sprite("p", "b", &solid(10, 10, GREEN)).unwrap();
        b.create_tileset("p", "tiles", &ImageSource::Blank(4, 4), 8, 8, &TilesetOptions::default())
            .unwrap();
        b.create_map("tiles", "level", &solid(16, 8, RED), 0).unwrap();

        let packed = b.pack().unwrap();
        let m = &packed.manifest;
        assert_eq!(m.pals["p"], PalettePlacement { y: 0, w: 3, h: 1 });
        assert_eq!((m.sprites["a"].x, m.sprites["a"].y), (0, 0));
        // 10 texels rounded up to the 8-texel alignment.
        assert_eq!((m.sprites["b"].x, m.sprites["b"].y), (16, 0));
        let tiles = &m.sprites["tiles"];
        assert_eq!((tiles.tw, tiles.th, tiles.tiles), (Some(8), Some(8), Some(1)));
        assert_eq!((tiles.x, tiles.w, tiles.h), (32, 8, 8));
        assert_eq!(m.maps["level"].til, "tiles");
        assert_eq!(m.maps["level"].pal, "p");
        assert_eq!((m.maps["level"].w, m.maps["level"].h), (2, 1));

        assert_eq!(packed.sprite_atlas.get(0, 0), 1);
        assert_eq!(packed.sprite_atlas.get(16, 0), 2);
        assert_eq!(packed.palette_atlas.get(2, 0), GREEN);
        assert!(packed.file(SAMPLE_FILE).is_none());
        assert_eq!(packed.files().len(), 4);
    }

    #[test]
    fn manifest_json_uses_runtime_field_names() {
        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        b.create_sprite("p", "a", &solid(2, 2, RED)).unwrap();
        let packed = b.pack().unwrap();
        let json: Value = serde_json::from_slice(packed.file(MANIFEST_FILE).unwrap()).unwrap();
        assert_eq!(json["info"]["paletteBpp"], 4);
        assert_eq!(json["sprites"]["a"]["hicol"], 0);
        assert_eq!(json["sprites"]["a"]["pal"], "p");
        assert!(json["sprites"]["a"].get("tw").is_none());
        assert_eq!(json["pals"]["p"]["h"], 1);
        assert!(json["data"].as_object().unwrap().is_empty());
    }

    #[test]
    fn too_many_palette_rows_fail() {
        let mut b = Bundle::new(PackConfig {
            color_mode: ColorMode::Hi,
            ..Default::default()
        })
        .unwrap();
        b.create_palette("big", 0, 60).unwrap();
        b.create_palette("more", 0, 5).unwrap();
        let err = b.pack().err().unwrap();
        assert!(err.to_string().contains("more"));
    }

    #[test]
    fn exhausted_sprite_atlas_aborts_pack() {
        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        b.create_sprite("p", "huge", &solid(16, 600, RED)).unwrap();
        let err = b.pack().err().unwrap();
        assert!(err.to_string().contains("huge"));
    }

    #[test]
    fn full_palette_warns_once_and_still_packs() {
        let mut b = bundle();
        b.create_palette("p", 3, 1).unwrap();
        let mut img = PixelBuffer::new(4, 1, 32).unwrap();
        for x in 0..4 {
            img.set(x, 0, pack_rgba(0x10 * (x as u8 + 1), 0, 0, 0xff)).unwrap();
        }
        b.create_sprite("p", "a", &ImageSource::Buffer(img.clone())).unwrap();
        b.create_sprite("p", "b", &ImageSource::Buffer(img)).unwrap();
        assert_eq!(
            b.diagnostics().warnings(),
            &[Warning::PaletteFull {
                palette: "p".to_string(),
                max_colors: 3
            }]
        );
        assert!(b.pack().is_ok());
    }

    #[test]
    fn sample_image_uses_region_palettes() {
        let mut b = Bundle::new(PackConfig {
            debug: true,
            ..Default::default()
        })
        .unwrap();
        b.create_palette("reds", 0, 1).unwrap();
        b.create_palette("greens", 0, 1).unwrap();
        b.create_sprite("reds", "r", &solid(8, 1, RED)).unwrap();
        b.create_sprite("greens", "g", &solid(8, 1, GREEN)).unwrap();
        let packed = b.pack().unwrap();
        assert!(packed.file(SAMPLE_FILE).is_some());

        let sample = b.sample_image(&packed.manifest, &packed.sprite_atlas).unwrap();
        assert_eq!(sample.get(0, 0), RED);
        assert_eq!(sample.get(8, 0), GREEN);
        // Outside of any region texel 0 maps to the first palette's transparent entry.
        assert_eq!(sample.get(100, 100), 0);
        assert_eq!(
            b.find_palette_at(&packed.manifest, 9, 0).map(|p| p.name.as_str()),
            Some("greens")
        );
        assert!(b.find_palette_at(&packed.manifest, 9, 1).is_none());
    }

    #[test]
    fn tiled_map_converts_missing_document_from_image() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("level");
        let mut image = PixelBuffer::new(4, 2, 32).unwrap();
        for (y, x) in iproduct!(0..2, 0..2) {
            image.set(x, y, RED).unwrap();
            image.set(x + 2, y, GREEN).unwrap();
        }
        crate::persist::save_png(&with_suffix(&base, ".png"), &image).unwrap();

        let mut b = bundle();
        b.create_palette("p", 0, 1).unwrap();
        let opts = TiledMapOptions {
            tile_width: 2,
            tile_height: 2,
            tileset_width: Some(4),
            tileset_height: Some(4),
            tolerance: 0,
        };
        b.tiled_map("p", "level", &base, &opts).unwrap();
        assert!(with_suffix(&base, ".json").exists());

        let map = b.map_named("level").unwrap();
        assert_eq!((map.width, map.height), (2, 1));
        assert_eq!((map.cell(0, 0), map.cell(1, 0)), (0, 1));
        assert_eq!(b.tileset_named("level").unwrap().tiles().len(), 2);
        assert_eq!(b.palette_named("p").unwrap().row(0), &[0, RED, GREEN]);

        // A second bundle reads the document that now exists.
        let mut again = bundle();
        again.create_palette("p", 0, 1).unwrap();
        again
            .tiled_map("p", "level", &base, &TiledMapOptions { tileset_width: None, ..opts })
            .unwrap();
        assert_eq!(again.map_named("level").unwrap().cells(), map.cells());
    }
}
