// Shelf packing of resources into a fixed-size atlas: items go left to right
// along a line, and a new line starts below the tallest item of the previous
// one when the current line runs out of width.
use anyhow::{bail, Result};

use crate::{helpers::align_up, texture::PixelBuffer};

/// One resource's position inside an atlas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Placement {
    pub fn overlaps(&self, other: &Placement) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

pub struct Baker<'a> {
    atlas: &'a mut PixelBuffer,
    line_x: u32,
    line_y: u32,
    line_height: u32,
    // Texels to align each placement to, so it starts on a whole packed RGBA pixel.
    alignment: u32,
}

impl<'a> Baker<'a> {
    pub fn new(atlas: &'a mut PixelBuffer, alignment: u32) -> Self {
        Baker {
            atlas,
            line_x: 0,
            line_y: 0,
            line_height: 0,
            alignment,
        }
    }

    fn remaining_x(&self) -> u32 {
        self.atlas.width().saturating_sub(self.line_x)
    }

    fn remaining_y(&self) -> u32 {
        self.atlas.height().saturating_sub(self.line_y)
    }

    fn start_new_line(&mut self) {
        self.line_x = 0;
        self.line_y += self.line_height;
        self.line_height = 0;
    }

    /// Reserves a `w`x`h` area and lets `write` fill it at the returned position.
    pub fn bake<F>(&mut self, w: u32, h: u32, name: &str, write: F) -> Result<Placement>
    where
        F: FnOnce(&mut PixelBuffer, u32, u32) -> Result<()>,
    {
        if self.remaining_x() < w {
            self.start_new_line();
        }
        if self.remaining_y() < h || self.remaining_x() < w {
            bail!(
                "Not enough space to add {} of {}x{} to the {}x{} atlas (now at {}, {})",
                name,
                w,
                h,
                self.atlas.width(),
                self.atlas.height(),
                self.line_x,
                self.line_y
            );
        }

        let (x, y) = (self.line_x, self.line_y);
        write(&mut *self.atlas, x, y)?;

        self.line_x += w;
        self.line_height = self.line_height.max(h);
        self.line_x = align_up(self.line_x, self.alignment);
        Ok(Placement { x, y, w, h })
    }

    /// Fraction of the atlas consumed so far, between 0 (empty) and 1 (full).
    pub fn memory_usage(&self) -> f64 {
        let (width, height) = (self.atlas.width() as f64, self.atlas.height() as f64);
        let usage_x = self.line_x.min(self.atlas.width()) as f64 / width;
        self.line_y as f64 / height + usage_x * (self.line_height as f64 / height)
    }
}
