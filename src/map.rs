use anyhow::{Context, Result};
use itertools::iproduct;
use log::debug;

use crate::{
    common::{decode_cell, encode_cell, Cell, TileIdx, MAX_ADDRESSABLE_TILES},
    diagnostics::{Diagnostics, Warning},
    palette::Palette,
    texture::PixelBuffer,
    tiles::Tileset,
};

/// Grid of 16-bit cells, each `tile index | palette row << 13`.
#[derive(Clone, Debug)]
pub struct Map {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub tileset: String,
    cells: PixelBuffer,
}

impl Map {
    pub fn blank(name: &str, width: u32, height: u32, tileset: &Tileset) -> Result<Self> {
        Ok(Map {
            name: name.to_string(),
            width,
            height,
            tileset: tileset.name.clone(),
            cells: PixelBuffer::new(width, height, 16)?,
        })
    }

    /// Cuts `image` into tileset-sized cells, adding unseen tiles to the
    /// tileset (and their colors to `palette`).
    pub fn from_image(
        name: &str,
        image: &PixelBuffer,
        tileset: &mut Tileset,
        palette: &mut Palette,
        tolerance: usize,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let (tw, th) = (tileset.tile_width, tileset.tile_height);
        let mut map = Map::blank(
            name,
            image.width().div_ceil(tw),
            image.height().div_ceil(th),
            tileset,
        )?;

        for (j, i) in iproduct!(0..map.height, 0..map.width) {
            let region = image.subregion((i * tw) as i64, (j * th) as i64, tw, th);
            let (tile, row) = tileset.find_or_add_tile(&region, palette, tolerance, diag)?;
            let cell = encode_cell(tile, row)
                .with_context(|| format!("Map {} at ({}, {})", name, i, j))?;
            map.set_cell(i, j, cell)?;
        }

        if tileset.tiles().len() >= MAX_ADDRESSABLE_TILES {
            diag.warn_once(Warning::TileRangeExceeded {
                map: name.to_string(),
                tileset: tileset.name.clone(),
            });
        }
        debug!(
            "Map {}: {}x{} cells, tileset {} now has {} tiles",
            name,
            map.width,
            map.height,
            tileset.name,
            tileset.tiles().len()
        );
        Ok(map)
    }

    pub fn cell(&self, x: u32, y: u32) -> Cell {
        self.cells.get(x as i64, y as i64)
    }

    pub fn tile_at(&self, x: u32, y: u32) -> TileIdx {
        decode_cell(self.cell(x, y)).0
    }

    pub fn set_cell(&mut self, x: u32, y: u32, cell: Cell) -> Result<()> {
        self.cells.set(x, y, cell)
    }

    pub fn cells(&self) -> &PixelBuffer {
        &self.cells
    }

    pub fn copy_to(&self, dest: &mut PixelBuffer, x: u32, y: u32) -> Result<()> {
        dest.blit(&self.cells, x, y)
    }
}
