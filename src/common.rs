use anyhow::{ensure, Result};

pub type Color32 = u32; // Packed RGBA, r in the low byte (r | g << 8 | b << 16 | a << 24)
pub type ColorIdx = u32; // Index into one palette row
pub type PaletteRow = u32; // Row of a multi-row palette
pub type TileIdx = u32; // Index into a tileset's tile list
pub type Cell = u32; // 16-bit map cell: tile index | palette row << 13

pub const CELL_PALETTE_SHIFT: u32 = 13;
pub const CELL_TILE_MASK: u32 = (1 << CELL_PALETTE_SHIFT) - 1;

// The runtime addresses at most this many tiles per map.
pub const MAX_ADDRESSABLE_TILES: usize = 4096;

// Rows addressable by the 3 bits above the tile index of a 16-bit cell.
pub const MAX_CELL_PALETTE_ROWS: u32 = 1 << (16 - CELL_PALETTE_SHIFT);

pub fn encode_cell(tile: TileIdx, row: PaletteRow) -> Result<Cell> {
    ensure!(
        tile <= CELL_TILE_MASK,
        "Tile {} does not fit in a map cell (max {})",
        tile,
        CELL_TILE_MASK
    );
    ensure!(
        row < MAX_CELL_PALETTE_ROWS,
        "Palette row {} does not fit in a map cell (max {})",
        row,
        MAX_CELL_PALETTE_ROWS - 1
    );
    Ok(tile | row << CELL_PALETTE_SHIFT)
}

pub fn decode_cell(cell: Cell) -> (TileIdx, PaletteRow) {
    (cell & CELL_TILE_MASK, cell >> CELL_PALETTE_SHIFT)
}
