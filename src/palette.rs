use anyhow::{bail, ensure, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    common::{Color32, ColorIdx, PaletteRow},
    config::PackConfig,
    helpers::{alpha, rgb_distance},
    texture::PixelBuffer,
};

/// Reduces every component of `c` (alpha included) to `bits` bits of
/// precision, replicating the high bits into the low ones so that full
/// intensity stays 0xff.
pub fn posterize(c: Color32, bits: u32) -> Color32 {
    match bits {
        2 => {
            let mut hi = (c >> 6 & 0x0101_0101) | (c >> 7 & 0x0101_0101);
            hi |= hi << 1;
            let c = c >> 6 & 0x0303_0303;
            hi | hi << 2 | c << 4 | c << 6
        }
        3 => {
            let hi = c >> 6 & 0x0303_0303;
            let c = c >> 5 & 0x0707_0707;
            c | c << 5 | c << 2 | hi
        }
        4 => {
            let c = c >> 4 & 0x0f0f_0f0f;
            c | c << 4
        }
        5 => {
            let hi = c >> 5 & 0x0707_0707;
            let c = c >> 3 & 0x1f1f_1f1f;
            c << 3 | hi
        }
        _ => c,
    }
}

/// Outcome of a palette lookup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Quantized {
    /// `None` only when creation was disallowed and no exact match exists.
    pub index: Option<ColorIdx>,
    /// Set when the row was full and the nearest color was used instead.
    pub degraded: bool,
}

/// Where a palette landed in the palette atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalettePlacement {
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Clone, Debug)]
pub struct Palette {
    pub name: String,
    // Colors in destination format; index 0 of each row is transparent.
    rows: Vec<Vec<Color32>>,
    max_colors: usize,
    palette_bpp: u32,
}

impl Palette {
    /// `max_colors == 0` picks the color mode's default row size.
    pub fn new(name: &str, max_colors: usize, num_rows: usize, config: &PackConfig) -> Result<Self> {
        ensure!(num_rows >= 1, "Palette {} needs at least one row", name);
        let max_colors = match max_colors {
            0 => config.color_mode.colors_per_row(),
            n => n,
        };
        ensure!(
            max_colors >= 2,
            "Palette {} must allow at least one color besides transparency",
            name
        );
        Ok(Palette {
            name: name.to_string(),
            rows: vec![vec![0]; num_rows],
            max_colors,
            palette_bpp: config.palette_bpp,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn max_colors(&self) -> usize {
        self.max_colors
    }

    pub fn row(&self, row: PaletteRow) -> &[Color32] {
        &self.rows[row as usize]
    }

    pub fn to_destination_format(&self, color: Color32) -> Color32 {
        posterize(color, self.palette_bpp)
    }

    fn check_row(&self, row: PaletteRow) -> Result<()> {
        ensure!(
            (row as usize) < self.rows.len(),
            "Invalid row {} for palette {} (0-{})",
            row,
            self.name,
            self.rows.len() - 1
        );
        Ok(())
    }

    /// Finds `color` in `row`. Any fully transparent color matches index 0.
    pub fn quantize(&mut self, color: Color32, allow_create: bool, row: PaletteRow) -> Result<Quantized> {
        self.check_row(row)?;
        let max_colors = self.max_colors;
        let color = self.to_destination_format(color);
        let colors = &mut self.rows[row as usize];

        let transparent = alpha(color) == 0;
        let found = colors
            .iter()
            .position(|&c| c == color || (transparent && alpha(c) == 0));
        if found.is_some() || !allow_create {
            return Ok(Quantized {
                index: found.map(|i| i as ColorIdx),
                degraded: false,
            });
        }

        if colors.len() < max_colors {
            colors.push(color);
            return Ok(Quantized {
                index: Some((colors.len() - 1) as ColorIdx),
                degraded: false,
            });
        }

        // Full: approximate (index 0 is excluded as it's transparent).
        let mut best = u32::MAX;
        let mut best_idx = 1;
        for (i, &c) in colors.iter().enumerate().skip(1) {
            let diff = rgb_distance(color, c);
            if diff < best {
                best = diff;
                best_idx = i;
            }
        }
        Ok(Quantized {
            index: Some(best_idx as ColorIdx),
            degraded: true,
        })
    }

    /// Appends authored colors to `row`. They must be opaque (non-zero alpha).
    pub fn add_colors(&mut self, colors: &[Color32], row: PaletteRow) -> Result<()> {
        self.check_row(row)?;
        let current = self.rows[row as usize].len();
        if colors.len() + current > self.max_colors {
            bail!(
                "Can't add {} colors to palette {}, would extend {}",
                colors.len(),
                self.name,
                self.max_colors
            );
        }
        let converted: Vec<Color32> = colors
            .iter()
            .map(|&c| self.to_destination_format(c))
            .collect();
        // Checked after conversion: a faint alpha can posterize down to zero.
        if let Some((c, _)) = colors.iter().zip(&converted).find(|(_, &d)| alpha(d) == 0) {
            bail!(
                "Can't add color {:#010x} to palette {}: alpha needs to be non-zero",
                c,
                self.name
            );
        }
        self.rows[row as usize].extend(converted);
        Ok(())
    }

    /// Adds every distinct opaque color of `image` (in scan order) to row 0.
    pub fn add_colors_from_image(&mut self, image: &PixelBuffer) -> Result<()> {
        let mut colors: Vec<Color32> = vec![];
        image.for_each_pixel(|c, _, _| {
            if alpha(c) > 0 && !colors.contains(&c) {
                colors.push(c);
            }
        });
        self.add_colors(&colors, 0)
    }

    /// Builds a multi-row palette from an image: one row per image line.
    pub fn from_image_rows(name: &str, image: &PixelBuffer, config: &PackConfig) -> Result<Self> {
        let mut palette = Palette::new(name, 0, image.height().max(1) as usize, config)?;
        ensure!(
            (image.width() as usize) < palette.max_colors,
            "Too many colors for multipalette {} (max {}, has {})",
            name,
            palette.max_colors - 1,
            image.width()
        );
        let mut result = Ok(());
        image.for_each_pixel(|c, _, y| {
            if result.is_ok() {
                result = palette.quantize(c, true, y).map(|_| ());
            }
        });
        result?;
        debug!("Palette {}: {} rows from image", name, palette.num_rows());
        Ok(palette)
    }

    /// Writes each row on its own line starting at (`x`, `y`).
    pub fn bake_into(&self, dest: &mut PixelBuffer, x: u32, y: u32) -> Result<PalettePlacement> {
        for (r, colors) in self.rows.iter().enumerate() {
            if x as usize + colors.len() > dest.width() as usize {
                bail!(
                    "Too many colors in palette {} to fit in {} texture",
                    self.name,
                    dest.width()
                );
            }
            for (i, &c) in colors.iter().enumerate() {
                dest.set(x + i as u32, y + r as u32, c)?;
            }
        }

        if self.rows.len() == 1 {
            Ok(PalettePlacement {
                y,
                w: self.rows[0].len() as u32,
                h: 1,
            })
        } else {
            Ok(PalettePlacement {
                y,
                w: self.max_colors as u32,
                h: self.rows.len() as u32,
            })
        }
    }
}
