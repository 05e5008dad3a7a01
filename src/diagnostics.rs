use std::fmt::Display;

use log::warn;

/// Degraded-but-non-fatal conditions met while building resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Warning {
    // A palette row was full; colors were approximated to their nearest entry.
    PaletteFull { palette: String, max_colors: usize },
    // A map references tiles beyond what the runtime can address.
    TileRangeExceeded { map: String, tileset: String },
}

impl Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::PaletteFull {
                palette,
                max_colors,
            } => write!(f, "Max {} colors exceeded in {}", max_colors, palette),
            Warning::TileRangeExceeded { map, tileset } => {
                write!(f, "More than 4096 tiles in map {} (tileset {})", map, tileset)
            }
        }
    }
}

/// Collects warnings, keeping only the first occurrence of each.
#[derive(Default, Debug)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `warning` and logs it, unless an identical one was already seen.
    /// Returns whether it was new.
    pub fn warn_once(&mut self, warning: Warning) -> bool {
        if self.warnings.contains(&warning) {
            return false;
        }
        warn!("{}", warning);
        self.warnings.push(warning);
        true
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
