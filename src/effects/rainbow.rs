use crate::domain::{Command, Rgb};
use crate::effects::effect::{Effect, EffectError, Tick, seconds, validate_speed_and_brightness};
use crate::effects::effect_registry::register_effect;
use effect_macros::register_effect;
use serde::Deserialize;
use std::any::Any;

const HUE_STEP: f64 = 0.005;

/// Sweeps the hue through `hue_min..=hue_max`, or cycles through custom colour stops when any are given.
///
/// The snake case names (`h_min`, `h_max`, `use_custom`) of older clients are accepted too.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
#[register_effect]
pub struct Rainbow {
    speed: f64,
    brightness: u16,
    #[serde(alias = "h_min")]
    hue_min: f64,
    #[serde(alias = "h_max")]
    hue_max: f64,
    colors: Vec<String>,
    /// `false` keeps the hue sweep even when colour stops are given.
    #[serde(alias = "use_custom")]
    use_custom: Option<bool>,
    // Sweep position, reset by `start`
    #[serde(skip)]
    hue: f64,
    #[serde(skip)]
    index: usize,
}

impl Default for Rainbow {
    fn default() -> Self {
        Rainbow::new(50.0, 1000, 0.0, 1.0)
    }
}

impl Rainbow {
    pub fn new(speed: f64, brightness: u16, hue_min: f64, hue_max: f64) -> Rainbow {
        Rainbow {
            speed,
            brightness,
            hue_min,
            hue_max,
            colors: Vec::new(),
            use_custom: None,
            hue: 0.0,
            index: 0,
        }
    }

    #[cfg(test)]
    pub fn with_colors(mut self, colors: Vec<String>) -> Rainbow {
        self.colors = colors;
        self
    }

    #[cfg(test)]
    pub fn with_use_custom(mut self, use_custom: bool) -> Rainbow {
        self.use_custom = Some(use_custom);
        self
    }

    fn stops(&self) -> &[String] {
        match self.use_custom {
            Some(false) => &[],
            _ => &self.colors,
        }
    }

    fn delay(&self) -> f64 {
        (0.2 - self.speed / 600.0).max(0.01)
    }

    fn next_stop(&mut self) -> Option<Rgb> {
        let stops = self.stops();
        let hex = stops.get(self.index)?;
        let colour = Rgb::from_hex(hex).ok()?;
        self.index = (self.index + 1) % stops.len();
        Some(colour)
    }
}

impl Effect for Rainbow {
    fn kind(&self) -> &'static str {
        "rainbow"
    }

    fn validate(&self) -> Result<(), EffectError> {
        validate_speed_and_brightness(self.speed, self.brightness)?;
        let in_range = |hue: f64| (0.0..=1.0).contains(&hue);
        if !in_range(self.hue_min) || !in_range(self.hue_max) || self.hue_min >= self.hue_max {
            return Err(EffectError::InvalidHueRange {
                min: self.hue_min,
                max: self.hue_max,
            });
        }
        if let Some(invalid) = self.colors.iter().find(|hex| Rgb::from_hex(hex).is_err()) {
            return Err(EffectError::InvalidColour(invalid.clone()));
        }
        Ok(())
    }

    fn start(&mut self) -> Vec<Command> {
        self.hue = self.hue_min;
        self.index = 0;
        Vec::new()
    }

    fn tick(&mut self) -> Tick {
        // Custom stops are held ten times longer than a hue step
        if let Some(colour) = self.next_stop() {
            return Tick::colour(colour.scaled(self.brightness), seconds(self.delay() * 10.0));
        }

        self.hue += HUE_STEP;
        if self.hue > self.hue_max {
            self.hue = self.hue_min;
        }
        let colour = Rgb::from_hsv(self.hue, 1.0, 1.0).scaled(self.brightness);
        Tick::colour(colour, seconds(self.delay()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
