use crate::effects::effect::{Effect, EffectError, PARTY_COLOURS, Tick, seconds, validate_speed_and_brightness};
use crate::effects::effect_registry::register_effect;
use effect_macros::register_effect;
use rand::Rng;
use serde::Deserialize;
use std::any::Any;

/// Party mode: a random party colour every tick, never the same one twice in a row.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
#[register_effect]
pub struct Blinker {
    speed: f64,
    brightness: u16,
    #[serde(skip)]
    last: Option<usize>,
}

impl Default for Blinker {
    fn default() -> Self {
        Blinker::new(50.0, 1000)
    }
}

impl Blinker {
    pub fn new(speed: f64, brightness: u16) -> Blinker {
        Blinker {
            speed,
            brightness,
            last: None,
        }
    }

    fn next_index(&mut self) -> usize {
        let mut rng = rand::thread_rng();
        let index = match self.last {
            // Drawing from the other slots and skipping over the last one keeps the choice uniform
            Some(last) => {
                let drawn = rng.gen_range(0..PARTY_COLOURS.len() - 1);
                if drawn >= last { drawn + 1 } else { drawn }
            }
            None => rng.gen_range(0..PARTY_COLOURS.len()),
        };
        self.last = Some(index);
        index
    }
}

impl Effect for Blinker {
    fn kind(&self) -> &'static str {
        "blinker"
    }

    fn validate(&self) -> Result<(), EffectError> {
        validate_speed_and_brightness(self.speed, self.brightness)
    }

    fn tick(&mut self) -> Tick {
        let colour = PARTY_COLOURS[self.next_index()].scaled(self.brightness);
        Tick::colour(colour, seconds((1.0 - self.speed / 100.0 * 0.95).max(0.05)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
