use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// A colour as sent to the lamp, 8 bits per channel.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

pub const BLACK: Rgb = Rgb::new(0, 0, 0);
pub const WHITE: Rgb = Rgb::new(255, 255, 255);

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Rgb { red, green, blue }
    }

    pub fn from_hex(hex: &str) -> Result<Rgb, ColorConversionError> {
        let (red, green, blue) = hex_to_rgb(hex)?;
        Ok(Rgb::new(red, green, blue))
    }

    /// Builds a colour from hue, saturation and value, all in `0.0..=1.0`.
    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Rgb {
        let (r, g, b) = hsv_to_rgb(hue, saturation, value);
        Rgb::new(to_channel(r * 255.0), to_channel(g * 255.0), to_channel(b * 255.0))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }

    /// Returns hue, saturation and value, all in `0.0..=1.0`.
    pub fn to_hsv(self) -> (f64, f64, f64) {
        rgb_to_hsv(self.red as f64 / 255.0, self.green as f64 / 255.0, self.blue as f64 / 255.0)
    }

    /// Dims the colour by a brightness on the lamp's 0-1000 scale.
    pub fn scaled(self, brightness: u16) -> Rgb {
        let factor = brightness.min(1000) as f64 / 1000.0;
        Rgb::new(
            to_channel(self.red as f64 * factor),
            to_channel(self.green as f64 * factor),
            to_channel(self.blue as f64 * factor),
        )
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ColorConversionError {
    #[error("invalid hexadecimal value '{0}'")]
    InvalidHexFormat(String),
}

fn hex_to_rgb(hex: &str) -> Result<(u8, u8, u8), ColorConversionError> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(ColorConversionError::InvalidHexFormat(hex.to_string()));
    }

    let red = u8::from_str_radix(&hex[0..2], 16).map_err(|_| ColorConversionError::InvalidHexFormat(hex.to_string()))?;
    let green = u8::from_str_radix(&hex[2..4], 16).map_err(|_| ColorConversionError::InvalidHexFormat(hex.to_string()))?;
    let blue = u8::from_str_radix(&hex[4..6], 16).map_err(|_| ColorConversionError::InvalidHexFormat(hex.to_string()))?;

    Ok((red, green, blue))
}

// Truncates like the lamp firmware expects, 254.9 becomes 254
fn to_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let value = max;
    if min == max {
        return (0.0, 0.0, value);
    }

    let range = max - min;
    let saturation = range / max;
    let rc = (max - r) / range;
    let gc = (max - g) / range;
    let bc = (max - b) / range;

    let hue = if r == max {
        bc - gc
    } else if g == max {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };

    ((hue / 6.0).rem_euclid(1.0), saturation, value)
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (f64, f64, f64) {
    if saturation == 0.0 {
        return (value, value, value);
    }

    let sector = (hue * 6.0).floor();
    let fraction = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * fraction);
    let t = value * (1.0 - saturation * (1.0 - fraction));

    match (sector as i64).rem_euclid(6) {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    }
}
