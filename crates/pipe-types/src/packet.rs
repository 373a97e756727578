use serde::{Deserialize, Serialize};

/// Kind of payload an output stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    Pixel,
    Semantic,
}

/// Pixel layouts the runner understands. Raw values match the graph
/// library ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb,
    Rgba,
    Gray,
    Nir,
    NirDepth,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Gray => 1,
            PixelFormat::Nir => 1,
            PixelFormat::NirDepth => 2,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            PixelFormat::Rgb => 0,
            PixelFormat::Rgba => 1,
            PixelFormat::Gray => 2,
            PixelFormat::Nir => 3,
            PixelFormat::NirDepth => 4,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PixelFormat::Rgb),
            1 => Some(PixelFormat::Rgba),
            2 => Some(PixelFormat::Gray),
            3 => Some(PixelFormat::Nir),
            4 => Some(PixelFormat::NirDepth),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_raw_round_trip() {
        for f in [
            PixelFormat::Rgb,
            PixelFormat::Rgba,
            PixelFormat::Gray,
            PixelFormat::Nir,
            PixelFormat::NirDepth,
        ] {
            assert_eq!(PixelFormat::from_raw(f.as_raw()), Some(f));
        }
        assert_eq!(PixelFormat::from_raw(99), None);
    }
}
