use crate::domain::{Command, Rgb};
use crate::effects::effect_registry::{EFFECT_REGISTRY, known_effects};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

pub const MIN_SPEED: f64 = 1.0;
pub const MAX_SPEED: f64 = 100.0;
pub const MAX_BRIGHTNESS: u16 = 1000;

pub(in crate::effects) const PARTY_COLOURS: [Rgb; 8] = [
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 255, 255),
    Rgb::new(255, 0, 255),
    Rgb::new(255, 128, 0),
    Rgb::new(128, 0, 255),
];

#[derive(Error, Debug, PartialEq)]
pub enum EffectError {
    #[error("missing field 'type'")]
    MissingType,
    #[error("unknown effect type '{kind}', known types: {known}")]
    UnknownKind { kind: String, known: String },
    #[error("invalid parameters for effect '{kind}': {reason}")]
    InvalidParameters { kind: String, reason: String },
    #[error("speed {0} is outside 1..=100")]
    SpeedOutOfRange(f64),
    #[error("brightness {0} is outside 0..=1000")]
    BrightnessOutOfRange(u16),
    #[error("hue range {min}..{max} is not within 0..=1")]
    InvalidHueRange { min: f64, max: f64 },
    #[error("invalid colour '{0}'")]
    InvalidColour(String),
}

/// What an effect wants sent now and how long to wait before its next tick.
#[derive(Debug, Clone)]
pub struct Tick {
    pub commands: Vec<Command>,
    pub delay: Duration,
}

impl Tick {
    pub fn colour(colour: Rgb, delay: Duration) -> Tick {
        Tick {
            commands: vec![Command::set_colour(colour)],
            delay,
        }
    }
}

/// An animation that produces lamp commands. Effects know nothing about the dispatcher, the runner submits
/// what they return.
pub trait Effect: Debug + Send + Sync {
    fn kind(&self) -> &'static str;

    fn validate(&self) -> Result<(), EffectError>;

    fn start(&mut self) -> Vec<Command> {
        Vec::new()
    }

    fn tick(&mut self) -> Tick;

    fn stop(&mut self) -> Vec<Command> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Builds an effect from `{"type": "...", ...parameters}` and validates its parameters.
pub fn effect_from_value(value: &Value) -> Result<Box<dyn Effect>, EffectError> {
    let kind = value.get("type").and_then(|v| v.as_str()).ok_or(EffectError::MissingType)?;

    let factory = EFFECT_REGISTRY.read().unwrap_or_else(PoisonError::into_inner).get(kind).copied();
    let build = factory.ok_or_else(|| EffectError::UnknownKind {
        kind: kind.to_string(),
        known: known_effects().join(", "),
    })?;

    let effect = build(value)?;
    effect.validate()?;
    Ok(effect)
}

impl<'de> Deserialize<'de> for Box<dyn Effect> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        effect_from_value(&value).map_err(serde::de::Error::custom)
    }
}

pub(in crate::effects) fn validate_speed_and_brightness(speed: f64, brightness: u16) -> Result<(), EffectError> {
    if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
        return Err(EffectError::SpeedOutOfRange(speed));
    }
    if brightness > MAX_BRIGHTNESS {
        return Err(EffectError::BrightnessOutOfRange(brightness));
    }
    Ok(())
}

pub(in crate::effects) fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value)
}
