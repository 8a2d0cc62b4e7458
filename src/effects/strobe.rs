use crate::domain::color::{BLACK, WHITE};
use crate::domain::{Command, Rgb};
use crate::effects::effect::{Effect, EffectError, PARTY_COLOURS, Tick, seconds, validate_speed_and_brightness};
use crate::effects::effect_registry::register_effect;
use effect_macros::register_effect;
use rand::Rng;
use serde::Deserialize;
use std::any::Any;
use std::time::Duration;

/// Length of each on and off phase.
fn phase_delay(speed: f64) -> Duration {
    seconds((0.6 - speed / 100.0 * 0.55).max(0.05))
}

/// Flashes random party colours, white included, with black in between.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
#[register_effect]
pub struct Strobe {
    speed: f64,
    brightness: u16,
    #[serde(skip)]
    lit: bool,
    #[serde(skip)]
    last: Option<Rgb>,
}

impl Default for Strobe {
    fn default() -> Self {
        Strobe::new(50.0, 1000)
    }
}

impl Strobe {
    pub fn new(speed: f64, brightness: u16) -> Strobe {
        Strobe {
            speed,
            brightness,
            lit: false,
            last: None,
        }
    }
}

impl Effect for Strobe {
    fn kind(&self) -> &'static str {
        "strobe"
    }

    fn validate(&self) -> Result<(), EffectError> {
        validate_speed_and_brightness(self.speed, self.brightness)
    }

    fn tick(&mut self) -> Tick {
        self.lit = !self.lit;
        if !self.lit {
            return Tick::colour(BLACK, phase_delay(self.speed));
        }

        // One slot past the palette stands for white
        let choice = rand::thread_rng().gen_range(0..=PARTY_COLOURS.len());
        let colour = PARTY_COLOURS.get(choice).copied().unwrap_or(WHITE).scaled(self.brightness);
        self.last = Some(colour);
        Tick::colour(colour, phase_delay(self.speed))
    }

    /// Leaves the lamp lit rather than dark when stopped during an off phase.
    fn stop(&mut self) -> Vec<Command> {
        match self.last {
            Some(colour) if !self.lit => vec![Command::set_colour(colour)],
            _ => Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
#[register_effect]
pub struct WhiteStrobe {
    speed: f64,
    brightness: u16,
    #[serde(skip)]
    lit: bool,
}

impl Default for WhiteStrobe {
    fn default() -> Self {
        WhiteStrobe::new(50.0, 1000)
    }
}

impl WhiteStrobe {
    pub fn new(speed: f64, brightness: u16) -> WhiteStrobe {
        WhiteStrobe {
            speed,
            brightness,
            lit: false,
        }
    }
}

impl Effect for WhiteStrobe {
    fn kind(&self) -> &'static str {
        "white_strobe"
    }

    fn validate(&self) -> Result<(), EffectError> {
        validate_speed_and_brightness(self.speed, self.brightness)
    }

    fn tick(&mut self) -> Tick {
        self.lit = !self.lit;
        let colour = if self.lit { WHITE.scaled(self.brightness) } else { BLACK };
        Tick::colour(colour, phase_delay(self.speed))
    }

    fn stop(&mut self) -> Vec<Command> {
        if self.lit {
            return Vec::new();
        }
        vec![Command::set_colour(WHITE.scaled(self.brightness))]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
