use crate::domain::command::DpValue;
use crate::domain::data_points::DataPoints;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The settings a lamp reported, limited to the data points it actually included.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LampStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i64>,
}

impl LampStatus {
    pub fn from_dps(dps: &BTreeMap<u16, DpValue>, data_points: &DataPoints) -> LampStatus {
        let integer = |dp: u16| match dps.get(&dp) {
            Some(DpValue::Integer(value)) => Some(*value),
            _ => None,
        };

        LampStatus {
            power: match dps.get(&data_points.power) {
                Some(DpValue::Boolean(on)) => Some(*on),
                _ => None,
            },
            mode: match dps.get(&data_points.mode) {
                Some(DpValue::Text(mode)) => Some(mode.clone()),
                _ => None,
            },
            brightness: integer(data_points.brightness),
            temperature: integer(data_points.temperature),
        }
    }
}

impl Display for LampStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(on) = self.power {
            parts.push(format!("power {}", if on { "on" } else { "off" }));
        }
        if let Some(mode) = &self.mode {
            parts.push(format!("mode {}", mode));
        }
        if let Some(brightness) = self.brightness {
            parts.push(format!("brightness {}", brightness));
        }
        if let Some(temperature) = self.temperature {
            parts.push(format!("temperature {}", temperature));
        }

        if parts.is_empty() {
            f.write_str("no settings reported")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}
