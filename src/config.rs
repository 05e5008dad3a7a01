use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Texel depth of the sprite atlas. Serialized as the manifest's `hicol` flag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ColorMode {
    /// 4-bit texels, 16 colors per palette row.
    #[default]
    Lo = 0,
    /// 8-bit texels, 256 colors per palette row.
    Hi = 1,
}

impl ColorMode {
    pub fn texel_depth(self) -> u32 {
        match self {
            ColorMode::Lo => 4,
            ColorMode::Hi => 8,
        }
    }

    pub fn colors_per_row(self) -> usize {
        match self {
            ColorMode::Lo => 16,
            ColorMode::Hi => 256,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AtlasGeometry {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub alignment: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub color_mode: ColorMode,
    // Bits per RGB component kept by the palettes (2, 3, 4, 5 or 8).
    pub palette_bpp: u32,
    pub compact: bool,
    pub debug: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        PackConfig {
            color_mode: ColorMode::Lo,
            palette_bpp: 4,
            compact: true,
            debug: false,
        }
    }
}

impl PackConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            [2, 3, 4, 5, 8].contains(&self.palette_bpp),
            "Unsupported palette_bpp {} (expected 2, 3, 4, 5 or 8)",
            self.palette_bpp
        );
        Ok(())
    }

    pub fn sprite_atlas(&self) -> AtlasGeometry {
        let (width, height) = match (self.compact, self.color_mode) {
            (true, ColorMode::Lo) => (2048, 512),
            (true, ColorMode::Hi) => (1024, 512),
            (false, ColorMode::Lo) => (8192, 1024),
            (false, ColorMode::Hi) => (4096, 1024),
        };
        let depth = self.color_mode.texel_depth();
        AtlasGeometry {
            width,
            height,
            depth,
            alignment: 32 / depth,
        }
    }

    pub fn map_atlas(&self) -> AtlasGeometry {
        let (width, height) = if self.compact { (512, 512) } else { (2048, 1024) };
        AtlasGeometry {
            width,
            height,
            depth: 16,
            alignment: 2,
        }
    }

    pub fn palette_atlas(&self) -> AtlasGeometry {
        let (width, height) = match self.color_mode {
            ColorMode::Lo => (16, 256),
            ColorMode::Hi => (256, 64),
        };
        AtlasGeometry {
            width,
            height,
            depth: 32,
            alignment: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_compact_lo_color() {
        let config = PackConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sprite_atlas().width, 2048);
        assert_eq!(config.sprite_atlas().depth, 4);
        assert_eq!(config.sprite_atlas().alignment, 8);
        assert_eq!(config.map_atlas().width, 512);
        assert_eq!(config.palette_atlas().height, 256);
    }

    #[test]
    fn hi_color_full_size_geometry() {
        let config = PackConfig {
            color_mode: ColorMode::Hi,
            compact: false,
            ..Default::default()
        };
        let sprites = config.sprite_atlas();
        assert_eq!((sprites.width, sprites.height, sprites.depth), (4096, 1024, 8));
        assert_eq!(sprites.alignment, 4);
        assert_eq!(config.map_atlas().width, 2048);
        assert_eq!(config.palette_atlas().width, 256);
    }

    #[test]
    fn invalid_palette_bpp_is_rejected() {
        let config = PackConfig {
            palette_bpp: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: PackConfig = serde_json::from_str(r#"{"color_mode": 1}"#).unwrap();
        assert_eq!(config.color_mode, ColorMode::Hi);
        assert_eq!(config.palette_bpp, 4);
        assert!(config.compact);
    }
}
