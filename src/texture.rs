// Generic 2D buffer of logical texels at a fixed bit depth, plus the bit-packed
// RGBA layout the runtime fetches textures with.
use anyhow::{bail, ensure, Result};
use itertools::iproduct;

pub const SUPPORTED_DEPTHS: [u32; 4] = [4, 8, 16, 32];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    depth: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, depth: u32) -> Result<Self> {
        ensure!(
            SUPPORTED_DEPTHS.contains(&depth),
            "Invalid bit depth {} (expected 4, 8, 16 or 32)",
            depth
        );
        Ok(PixelBuffer {
            width,
            height,
            depth,
            pixels: vec![0; width as usize * height as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64
    }

    /// Out-of-range reads are 0, which is both black and the transparent index.
    pub fn get(&self, x: i64, y: i64) -> u32 {
        if !self.in_bounds(x, y) {
            return 0;
        }
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: u32) -> Result<()> {
        if self.depth < 32 && value >> self.depth != 0 {
            bail!(
                "{} too big to be written to a {}bpp texture",
                value,
                self.depth
            );
        }
        ensure!(
            x < self.width && y < self.height,
            "Pixel ({}, {}) outside of {}x{} texture",
            x,
            y,
            self.width,
            self.height
        );
        self.pixels[y as usize * self.width as usize + x as usize] = value;
        Ok(())
    }

    /// Independent copy of a region; cells outside the source read as 0.
    pub fn subregion(&self, x: i64, y: i64, width: u32, height: u32) -> PixelBuffer {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for (j, i) in iproduct!(0..height as i64, 0..width as i64) {
            pixels.push(self.get(x + i, y + j));
        }
        PixelBuffer {
            width,
            height,
            depth: self.depth,
            pixels,
        }
    }

    /// Copies every texel of `src` to (`x`, `y`) in this buffer.
    pub fn blit(&mut self, src: &PixelBuffer, x: u32, y: u32) -> Result<()> {
        for (j, i) in iproduct!(0..src.height, 0..src.width) {
            self.set(x + i, y + j, src.get(i as i64, j as i64))?;
        }
        Ok(())
    }

    /// Interprets an RGBA8 byte stream as one 32-bit texel per pixel.
    pub fn from_true_color(width: u32, height: u32, rgba: &[u8]) -> Result<Self> {
        Self::unpack(width, height, 32, rgba)
    }

    /// Inverse of `pack`: `image_width` is the width of the RGBA image, the
    /// resulting buffer is `image_width * 32 / depth` texels wide.
    pub fn unpack(image_width: u32, height: u32, depth: u32, rgba: &[u8]) -> Result<Self> {
        ensure!(SUPPORTED_DEPTHS.contains(&depth), "Invalid bit depth {}", depth);
        let expected = image_width as usize * height as usize * 4;
        ensure!(
            rgba.len() == expected,
            "RGBA data has {} bytes, expected {} for {}x{}",
            rgba.len(),
            expected,
            image_width,
            height
        );
        let mut result = PixelBuffer::new(image_width * (32 / depth), height, depth)?;
        result.pixels = match depth {
            4 => rgba
                .iter()
                .flat_map(|&b| [(b >> 4) as u32, (b & 0xf) as u32])
                .collect(),
            8 => rgba.iter().map(|&b| b as u32).collect(),
            16 => rgba
                .chunks_exact(2)
                .map(|c| c[0] as u32 | (c[1] as u32) << 8)
                .collect(),
            _ => rgba
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        };
        Ok(result)
    }

    /// Width of the RGBA image `pack` produces.
    pub fn packed_width(&self) -> Result<u32> {
        let bits = self.width as u64 * self.depth as u64;
        ensure!(
            bits % 32 == 0,
            "{}x{} texture at {}bpp does not pack into whole RGBA pixels",
            self.width,
            self.height,
            self.depth
        );
        Ok((bits / 32) as u32)
    }

    /// Packs `32 / depth` texels into each RGBA pixel. 4bpp texels go two per
    /// byte, high nibble first; wider texels are stored little-endian.
    pub fn pack(&self) -> Result<Vec<u8>> {
        self.packed_width()?;
        let mut out = Vec::with_capacity(self.pixels.len() * self.depth as usize / 8);
        match self.depth {
            4 => {
                for pair in self.pixels.chunks_exact(2) {
                    out.push(((pair[0] & 0xf) << 4 | (pair[1] & 0xf)) as u8);
                }
            }
            8 => out.extend(self.pixels.iter().map(|&p| p as u8)),
            16 => {
                for &p in &self.pixels {
                    out.extend_from_slice(&(p as u16).to_le_bytes());
                }
            }
            _ => {
                for &p in &self.pixels {
                    out.extend_from_slice(&p.to_le_bytes());
                }
            }
        }
        Ok(out)
    }

    pub fn for_each_pixel(&self, mut f: impl FnMut(u32, u32, u32)) {
        for (y, x) in iproduct!(0..self.height, 0..self.width) {
            f(self.pixels[(y * self.width + x) as usize], x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_unsupported_depth() {
        assert!(PixelBuffer::new(4, 4, 12).is_err());
        assert!(PixelBuffer::new(4, 4, 4).is_ok());
    }

    #[test]
    fn new_buffer_is_zeroed() {
        let buf = PixelBuffer::new(3, 2, 8).unwrap();
        assert!(buf.pixels().iter().all(|&p| p == 0));
        assert_eq!(buf.pixels().len(), 6);
    }

    #[test]
    fn out_of_range_reads_are_zero() {
        let mut buf = PixelBuffer::new(2, 2, 8).unwrap();
        buf.set(1, 1, 7).unwrap();
        assert_eq!(buf.get(1, 1), 7);
        assert_eq!(buf.get(-1, 0), 0);
        assert_eq!(buf.get(2, 1), 0);
        assert_eq!(buf.get(0, 99), 0);
    }

    #[test]
    fn set_rejects_values_wider_than_depth() {
        let mut buf = PixelBuffer::new(2, 2, 4).unwrap();
        assert!(buf.set(0, 0, 15).is_ok());
        assert!(buf.set(0, 0, 16).is_err());
        let mut wide = PixelBuffer::new(1, 1, 32).unwrap();
        assert!(wide.set(0, 0, u32::MAX).is_ok());
    }

    #[test]
    fn subregion_copies_and_pads_with_zero() {
        let mut buf = PixelBuffer::new(3, 3, 8).unwrap();
        for (y, x) in iproduct!(0..3, 0..3) {
            buf.set(x, y, y * 3 + x + 1).unwrap();
        }
        let sub = buf.subregion(1, 1, 3, 3);
        assert_eq!(sub.depth(), 8);
        assert_eq!(sub.pixels(), &[5, 6, 0, 8, 9, 0, 0, 0, 0]);

        // Writing to the copy leaves the source alone.
        let mut sub = sub;
        sub.set(0, 0, 42).unwrap();
        assert_eq!(buf.get(1, 1), 5);
    }

    #[test]
    fn depth4_packs_high_nibble_first() {
        let mut buf = PixelBuffer::new(8, 1, 4).unwrap();
        for x in 0..8 {
            buf.set(x, 0, x + 1).unwrap();
        }
        assert_eq!(buf.packed_width().unwrap(), 1);
        assert_eq!(buf.pack().unwrap(), vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn depth16_packs_little_endian() {
        let mut buf = PixelBuffer::new(2, 1, 16).unwrap();
        buf.set(0, 0, 0x1234).unwrap();
        buf.set(1, 0, 0xABCD).unwrap();
        assert_eq!(buf.pack().unwrap(), vec![0x34, 0x12, 0xCD, 0xAB]);
    }

    #[test]
    fn pack_requires_whole_output_pixels() {
        let buf = PixelBuffer::new(3, 1, 8).unwrap();
        assert!(buf.pack().is_err());
    }

    #[test]
    fn true_color_decode_matches_byte_order() {
        let buf = PixelBuffer::from_true_color(1, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.get(0, 0), 0x0403_0201);
        assert_eq!(buf.pack().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn pack_then_unpack_restores_texels() {
        for depth in [4u32, 8, 16] {
            let mut buf = PixelBuffer::new(16, 3, depth).unwrap();
            let max = if depth == 16 { 0xffff } else { (1 << depth) - 1 };
            for (y, x) in iproduct!(0..3, 0..16) {
                buf.set(x, y, (x * 7 + y * 13) % (max + 1)).unwrap();
            }
            let packed = buf.pack().unwrap();
            let width = buf.packed_width().unwrap();
            let restored = PixelBuffer::unpack(width, 3, depth, &packed).unwrap();
            assert_eq!(restored, buf, "depth {}", depth);
        }
    }
}
