// Fixed-size tiles quantized against a palette, and tilesets that deduplicate them.
use anyhow::{bail, ensure, Context, Result};
use hashbrown::{Equivalent, HashMap};
use itertools::iproduct;
use log::debug;

use crate::{
    common::{ColorIdx, PaletteRow, TileIdx},
    diagnostics::{Diagnostics, Warning},
    palette::Palette,
    texture::PixelBuffer,
};

// Owned key of the exact-match index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TileKey {
    width: u32,
    height: u32,
    pixels: Vec<ColorIdx>,
}

// Borrowed form of `TileKey`, hashing identically so lookups don't copy pixels.
#[derive(Hash)]
struct TileKeyRef<'a> {
    width: u32,
    height: u32,
    pixels: &'a [ColorIdx],
}

impl Equivalent<TileKey> for TileKeyRef<'_> {
    fn equivalent(&self, key: &TileKey) -> bool {
        self.width == key.width && self.height == key.height && self.pixels == &key.pixels[..]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    pub width: u32,
    pub height: u32,
    pub palette_row: PaletteRow,
    pub pixels: Vec<ColorIdx>,
}

fn record(diag: &mut Diagnostics, palette: &Palette, degraded: bool) {
    if degraded {
        diag.warn_once(Warning::PaletteFull {
            palette: palette.name.clone(),
            max_colors: palette.max_colors(),
        });
    }
}

/// Quantizes every texel of a true-color `image` into `row`, allowing the row to grow.
pub(crate) fn quantize_image(
    image: &PixelBuffer,
    palette: &mut Palette,
    row: PaletteRow,
    diag: &mut Diagnostics,
) -> Result<Vec<ColorIdx>> {
    let mut out = Vec::with_capacity(image.pixels().len());
    for &pixel in image.pixels() {
        let q = palette.quantize(pixel, true, row)?;
        record(diag, palette, q.degraded);
        out.push(q.index.context("palette lookup with creation returned no index")?);
    }
    Ok(out)
}

impl Tile {
    pub fn filled_with_zero(width: u32, height: u32) -> Self {
        Tile {
            width,
            height,
            palette_row: 0,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Quantizes a true-color region. With a multi-row palette the row is
    /// picked first: the one where the fewest pixels lack an exact match
    /// (lowest row wins ties). Distance between colors is not considered.
    pub fn from_image(image: &PixelBuffer, palette: &mut Palette, diag: &mut Diagnostics) -> Result<Self> {
        let mut row = 0;
        if palette.num_rows() > 1 {
            let mut mistakes = vec![0usize; palette.num_rows()];
            for &pixel in image.pixels() {
                for (r, count) in mistakes.iter_mut().enumerate() {
                    if palette.quantize(pixel, false, r as PaletteRow)?.index.is_none() {
                        *count += 1;
                    }
                }
            }
            let mut best_mistakes = mistakes[0];
            for (r, &count) in mistakes.iter().enumerate() {
                if count < best_mistakes {
                    row = r as PaletteRow;
                    best_mistakes = count;
                }
            }
        }
        Ok(Tile {
            width: image.width(),
            height: image.height(),
            palette_row: row,
            pixels: quantize_image(image, palette, row, diag)?,
        })
    }

    /// Same size, and at most `tolerance` differing pixels.
    pub fn equals(&self, other: &Tile, tolerance: usize) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let mut remaining = tolerance;
        for (a, b) in self.pixels.iter().zip(&other.pixels) {
            if a != b {
                if remaining == 0 {
                    return false;
                }
                remaining -= 1;
            }
        }
        true
    }

    pub fn get(&self, x: u32, y: u32) -> ColorIdx {
        self.pixels[(y * self.width + x) as usize]
    }

    fn key(&self) -> TileKeyRef<'_> {
        TileKeyRef {
            width: self.width,
            height: self.height,
            pixels: &self.pixels,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TilesetOptions {
    // Tile 0 is reserved as an all-transparent tile.
    pub first_tile_empty: bool,
    // Overrides how many tiles wide the tileset is laid out in the atlas.
    pub tileset_width: Option<u32>,
    // Reuse identical tiles instead of keeping one tile per grid cell.
    // Off by default: interchange documents address tiles by grid position.
    pub deduplicate: bool,
}

#[derive(Clone, Debug)]
pub struct Tileset {
    pub name: String,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_wide: u32,
    pub tiles_tall: u32,
    tiles: Vec<Tile>,
    // Exact-match index for tolerance 0; maps pixel content to the first tile holding it.
    lookup: HashMap<TileKey, TileIdx>,
}

impl Tileset {
    pub fn blank(
        name: &str,
        tile_width: u32,
        tile_height: u32,
        tiles_wide: u32,
        tiles_tall: u32,
        first_tile_empty: bool,
    ) -> Result<Self> {
        ensure!(
            tiles_wide as u64 * tiles_tall as u64 >= 1,
            "At least one tile required in tileset {}",
            name
        );
        ensure!(
            tile_width > 0 && tile_height > 0,
            "Tileset {} has an empty tile size",
            name
        );
        let mut result = Tileset {
            name: name.to_string(),
            tile_width,
            tile_height,
            tiles_wide,
            tiles_tall,
            tiles: vec![],
            lookup: HashMap::new(),
        };
        if first_tile_empty {
            result.add_tile(Tile::filled_with_zero(tile_width, tile_height))?;
        }
        Ok(result)
    }

    /// Slices `image` into tiles in row-major order. Unless `opts.deduplicate`
    /// is set every tile is kept, even repeated ones, so tile `k` is the
    /// `k`-th grid cell of the image.
    pub fn from_image(
        name: &str,
        image: &PixelBuffer,
        tile_width: u32,
        tile_height: u32,
        palette: &mut Palette,
        opts: &TilesetOptions,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        ensure!(
            tile_width > 0 && tile_height > 0,
            "Tileset {} has an empty tile size",
            name
        );
        ensure!(
            image.width() % tile_width == 0 || image.height() % tile_height == 0,
            "Undividable tileset {}x{} by {}x{}",
            image.width(),
            image.height(),
            tile_width,
            tile_height
        );
        let tiles_wide = image.width().div_ceil(tile_width);
        let tiles_tall = image.height().div_ceil(tile_height);
        let total = tiles_wide * tiles_tall;
        let (layout_wide, layout_tall) = match opts.tileset_width {
            Some(w) if w > 0 => (w, total.div_ceil(w)),
            _ => (tiles_wide, tiles_tall),
        };
        let mut result = Tileset::blank(
            name,
            tile_width,
            tile_height,
            layout_wide,
            layout_tall,
            opts.first_tile_empty,
        )?;
        // Reserving tile 0 takes one slot of the layout.
        if opts.first_tile_empty {
            result.tiles_tall = (total + 1).div_ceil(layout_wide);
        }

        for (y, x) in iproduct!(0..tiles_tall, 0..tiles_wide) {
            let region = image.subregion(
                (x * tile_width) as i64,
                (y * tile_height) as i64,
                tile_width,
                tile_height,
            );
            if opts.deduplicate {
                result.find_or_add_tile(&region, palette, 0, diag)?;
            } else {
                let tile = Tile::from_image(&region, palette, diag)?;
                result.add_tile(tile)?;
            }
        }
        debug!(
            "Tileset {}: {} tiles from {}x{} image",
            name,
            result.tiles.len(),
            image.width(),
            image.height()
        );
        Ok(result)
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles_wide as usize * self.tiles_tall as usize
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, idx: TileIdx) -> Option<&Tile> {
        self.tiles.get(idx as usize)
    }

    pub fn add_tile(&mut self, tile: Tile) -> Result<TileIdx> {
        if self.tiles.len() >= self.max_tiles() {
            bail!(
                "Max {} tiles reached for tileset {}",
                self.max_tiles(),
                self.name
            );
        }
        let idx = self.tiles.len() as TileIdx;
        if !self.lookup.contains_key(&tile.key()) {
            let key = TileKey {
                width: tile.width,
                height: tile.height,
                pixels: tile.pixels.clone(),
            };
            self.lookup.insert(key, idx);
        }
        self.tiles.push(tile);
        Ok(idx)
    }

    /// Returns the first stored tile matching `region` within `tolerance`
    /// differing pixels, adding a new one when none does, together with the
    /// palette row `region` resolved to. A stored tile is shared across rows,
    /// so that row can differ from the stored tile's own.
    pub fn find_or_add_tile(
        &mut self,
        region: &PixelBuffer,
        palette: &mut Palette,
        tolerance: usize,
        diag: &mut Diagnostics,
    ) -> Result<(TileIdx, PaletteRow)> {
        let tile = Tile::from_image(region, palette, diag)?;
        let row = tile.palette_row;

        let found = if tolerance == 0 {
            self.lookup.get(&tile.key()).copied()
        } else {
            self.tiles
                .iter()
                .position(|t| tile.equals(t, tolerance))
                .map(|idx| idx as TileIdx)
        };
        match found {
            Some(idx) => Ok((idx, row)),
            None => Ok((self.add_tile(tile)?, row)),
        }
    }

    /// Top-left corner of tile `idx` inside the tileset's atlas region.
    pub fn tile_position(&self, idx: TileIdx) -> (u32, u32) {
        (
            (idx % self.tiles_wide) * self.tile_width,
            (idx / self.tiles_wide) * self.tile_height,
        )
    }

    pub fn used_width(&self) -> u32 {
        (self.tiles.len() as u32).min(self.tiles_wide) * self.tile_width
    }

    pub fn used_height(&self) -> u32 {
        (self.tiles.len() as u32).div_ceil(self.tiles_wide) * self.tile_height
    }

    /// Writes the used tiles' palette indices into `dest` at (`x`, `y`).
    pub fn copy_to(&self, dest: &mut PixelBuffer, x: u32, y: u32) -> Result<()> {
        for (k, tile) in self.tiles.iter().enumerate() {
            let (tx, ty) = self.tile_position(k as TileIdx);
            for (j, i) in iproduct!(0..self.tile_height, 0..self.tile_width) {
                dest.set(x + tx + i, y + ty + j, tile.get(i, j))?;
            }
        }
        Ok(())
    }
}
