use serde::Deserialize;

/// Data point identifiers of the lamp, as paired. The defaults match the common Tuya RGB+CCT bulb layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataPoints {
    pub power: u16,
    pub mode: u16,
    pub brightness: u16,
    pub temperature: u16,
    pub colour: u16,
    pub scene: u16,
}

impl Default for DataPoints {
    fn default() -> Self {
        DataPoints {
            power: 20,
            mode: 21,
            brightness: 22,
            temperature: 23,
            colour: 24,
            scene: 25,
        }
    }
}
