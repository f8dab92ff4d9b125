use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest value representable as packed 24-bit RGB.
pub const MAX_PACKED_RGB: u32 = 0xFF_FFFF;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ColorError {
    #[error("Color value {0:#x} exceeds 24-bit RGB range")]
    OutOfRange(u32),
    #[error("Invalid color literal '{0}' (expected #rrggbb, 0xrrggbb or a decimal integer)")]
    InvalidLiteral(String),
}

/// A 24-bit packed RGB color (`0xRRGGBB`), without alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Color(u32);

/// Palette handed out by the color assigner unless configured otherwise.
pub const DEFAULT_PALETTE: [Color; 10] = [
    Color(0x1f77b4),
    Color(0xff7f0e),
    Color(0x2ca02c),
    Color(0xd62728),
    Color(0x9467bd),
    Color(0x8c564b),
    Color(0xe377c2),
    Color(0x7f7f7f),
    Color(0xbcbd22),
    Color(0x17becf),
];

impl Color {
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub fn new(packed: u32) -> Result<Self, ColorError> {
        if packed > MAX_PACKED_RGB {
            return Err(ColorError::OutOfRange(packed));
        }
        Ok(Self(packed))
    }

    pub fn packed(self) -> u32 {
        self.0
    }

    pub fn channels(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

impl TryFrom<u32> for Color {
    type Error = ColorError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Color> for u32 {
    fn from(color: Color) -> Self {
        color.0
    }
}

impl FromStr for Color {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ColorError::InvalidLiteral(s.to_string());

        let packed = if let Some(hex) = trimmed.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(invalid());
            }
            u32::from_str_radix(hex, 16).map_err(|_| invalid())?
        } else if let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16).map_err(|_| invalid())?
        } else {
            trimmed.parse::<u32>().map_err(|_| invalid())?
        };

        Self::new(packed)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_values_above_24_bits() {
        assert_eq!(Color::new(0x1000000), Err(ColorError::OutOfRange(0x1000000)));
        assert!(Color::new(MAX_PACKED_RGB).is_ok());
    }

    #[test]
    fn from_rgb_packs_channels_in_order() {
        let color = Color::from_rgb(0x12, 0x34, 0x56);
        assert_eq!(color.packed(), 0x123456);
        assert_eq!(color.channels(), (0x12, 0x34, 0x56));
    }

    #[test]
    fn parses_hex_and_decimal_literals() {
        assert_eq!("#ff7f0e".parse::<Color>().unwrap().packed(), 0xff7f0e);
        assert_eq!("0x00FF00".parse::<Color>().unwrap().packed(), 0x00ff00);
        assert_eq!("255".parse::<Color>().unwrap().packed(), 255);
    }

    #[test]
    fn rejects_malformed_literals() {
        assert!(matches!(
            "#fff".parse::<Color>(),
            Err(ColorError::InvalidLiteral(_))
        ));
        assert!(matches!(
            "teal".parse::<Color>(),
            Err(ColorError::InvalidLiteral(_))
        ));
        assert!(matches!(
            "0x1000000".parse::<Color>(),
            Err(ColorError::OutOfRange(_))
        ));
    }

    #[test]
    fn serde_uses_plain_integers_and_validates_range() {
        let json = serde_json::to_string(&Color::from_rgb(0, 0, 255)).unwrap();
        assert_eq!(json, "255");

        let parsed: Color = serde_json::from_str("16711680").unwrap();
        assert_eq!(parsed.packed(), 0xff0000);

        assert!(serde_json::from_str::<Color>("16777216").is_err());
    }

    #[test]
    fn display_is_lowercase_hex() {
        assert_eq!(Color::from_rgb(0xAB, 0xCD, 0xEF).to_string(), "#abcdef");
    }
}
