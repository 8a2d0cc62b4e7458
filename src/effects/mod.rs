pub mod blinker;
pub mod effect;
pub mod effect_registry;
pub mod rainbow;
pub mod runner;
pub mod strobe;

pub use effect::{Effect, EffectError};
pub use runner::{EffectDefaults, EffectRunner};
