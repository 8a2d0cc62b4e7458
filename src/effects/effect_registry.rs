use crate::effects::effect::{Effect, EffectError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

type EffectFactory = fn(&Value) -> Result<Box<dyn Effect>, EffectError>;

pub(in crate::effects) static EFFECT_REGISTRY: LazyLock<RwLock<HashMap<String, EffectFactory>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

pub(in crate::effects) fn register_effect<T: Effect + Default + DeserializeOwned + 'static>() {
    let kind = T::default().kind().to_owned();
    EFFECT_REGISTRY.write().unwrap_or_else(PoisonError::into_inner).insert(kind, |json| {
        let effect = serde_json::from_value::<T>(json.clone()).map_err(|e| EffectError::InvalidParameters {
            kind: T::default().kind().to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(effect))
    });
}

pub fn known_effects() -> Vec<String> {
    let registry = EFFECT_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    let mut kinds: Vec<String> = registry.keys().cloned().collect();
    kinds.sort();
    kinds
}
