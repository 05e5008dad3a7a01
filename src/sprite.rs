use anyhow::Result;
use log::debug;

use crate::{
    diagnostics::Diagnostics, palette::Palette, texture::PixelBuffer, tiles::quantize_image,
};

/// A single quantized image: a tileset with one tile and no deduplication.
#[derive(Clone, Debug)]
pub struct Sprite {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pixels: Vec<u32>,
}

impl Sprite {
    pub fn from_image(name: &str, image: &PixelBuffer, palette: &mut Palette, diag: &mut Diagnostics) -> Result<Self> {
        debug!("Sprite {}: {}x{}", name, image.width(), image.height());
        Ok(Sprite {
            name: name.to_string(),
            width: image.width(),
            height: image.height(),
            pixels: quantize_image(image, palette, 0, diag)?,
        })
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn copy_to(&self, dest: &mut PixelBuffer, x: u32, y: u32) -> Result<()> {
        for (k, &p) in self.pixels.iter().enumerate() {
            let k = k as u32;
            dest.set(x + k % self.width, y + k / self.width, p)?;
        }
        Ok(())
    }
}
