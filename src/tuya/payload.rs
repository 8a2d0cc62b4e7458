use crate::domain::{Command, DataPoints, DpValue, Payload, Rgb};
use crate::tuya::protocol::ProtocolVersion;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub type Dps = Map<String, Value>;

/// Data points a command writes.
pub fn command_dps(command: &Command, data_points: &DataPoints) -> Dps {
    let mut dps = Dps::new();
    match command.payload() {
        Payload::Colour(colour) => {
            dps.insert(data_points.mode.to_string(), json!("colour"));
            dps.insert(data_points.colour.to_string(), json!(colour_hex(*colour)));
        }
        Payload::Value { dp, value } => {
            dps.insert(dp.to_string(), dp_value(value));
        }
        Payload::Power(on) => {
            dps.insert(data_points.power.to_string(), json!(on));
        }
        Payload::None => {
            dps.insert(data_points.power.to_string(), json!(false));
        }
        Payload::Raw(values) => {
            dps.extend(values.iter().map(|(dp, value)| (dp.to_string(), dp_value(value))));
        }
    }
    dps
}

/// Reported data points with numeric ids and values the domain understands, everything else is dropped.
pub fn typed_dps(dps: &Dps) -> BTreeMap<u16, DpValue> {
    dps.iter()
        .filter_map(|(dp, value)| {
            let dp = dp.parse().ok()?;
            let value = serde_json::from_value(value.clone()).ok()?;
            Some((dp, value))
        })
        .collect()
}

fn dp_value(value: &DpValue) -> Value {
    match value {
        DpValue::Boolean(value) => json!(value),
        DpValue::Integer(value) => json!(value),
        DpValue::Text(value) => json!(value),
    }
}

/// HSV as `HHHHSSSSVVVV`, hue in degrees and saturation/value in 0..=1000.
pub fn colour_hex(colour: Rgb) -> String {
    let (hue, saturation, value) = colour.to_hsv();
    format!(
        "{:04x}{:04x}{:04x}",
        (hue * 360.0) as u16,
        (saturation * 1000.0) as u16,
        (value * 1000.0) as u16
    )
}

pub fn control(version: ProtocolVersion, device_id: &str, dps: Dps) -> Vec<u8> {
    let body = match version {
        ProtocolVersion::V33 => json!({
            "devId": device_id,
            "uid": device_id,
            "t": timestamp().to_string(),
            "dps": dps,
        }),
        _ => json!({
            "protocol": 5,
            "t": timestamp(),
            "data": { "dps": dps },
        }),
    };
    body.to_string().into_bytes()
}

pub fn query(version: ProtocolVersion, device_id: &str) -> Vec<u8> {
    match version {
        ProtocolVersion::V33 => json!({
            "gwId": device_id,
            "devId": device_id,
            "uid": device_id,
            "t": timestamp().to_string(),
        })
        .to_string()
        .into_bytes(),
        _ => b"{}".to_vec(),
    }
}

pub fn heartbeat(version: ProtocolVersion, device_id: &str) -> Vec<u8> {
    match version {
        ProtocolVersion::V33 => json!({ "gwId": device_id, "devId": device_id }).to_string().into_bytes(),
        _ => b"{}".to_vec(),
    }
}

/// Extracts the data points of a status or control reply. Both the flat and the `data` wrapped layout occur.
pub fn reply_dps(payload: &Value) -> Option<&Dps> {
    payload
        .get("dps")
        .or_else(|| payload.get("data").and_then(|data| data.get("dps")))
        .and_then(Value::as_object)
}

fn timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(Rgb::new(255, 0, 0), "000003e803e8")]
    #[case(Rgb::new(0, 255, 0), "007803e803e8")]
    #[case(Rgb::new(0, 0, 255), "00f003e803e8")]
    #[case(Rgb::new(255, 255, 255), "0000000003e8")]
    #[case(Rgb::new(0, 0, 0), "000000000000")]
    fn encodes_colours_as_hsv_hex(#[case] colour: Rgb, #[case] expected: &str) {
        assert_eq!(colour_hex(colour), expected);
    }

    #[test]
    fn maps_commands_onto_data_points() {
        let data_points = DataPoints::default();

        assert_eq!(
            Value::Object(command_dps(&Command::set_colour(Rgb::new(255, 0, 0)), &data_points)),
            json!({"21": "colour", "24": "000003e803e8"})
        );
        assert_eq!(
            Value::Object(command_dps(&Command::set_value(22, DpValue::Integer(500)).unwrap(), &data_points)),
            json!({"22": 500})
        );
        assert_eq!(
            Value::Object(command_dps(&Command::set_power(true, Priority::Urgent), &data_points)),
            json!({"20": true})
        );
        assert_eq!(Value::Object(command_dps(&Command::turn_off(), &data_points)), json!({"20": false}));

        let raw = Command::raw(BTreeMap::from([
            (21, DpValue::Text("scene".to_string())),
            (25, DpValue::Text("000e0d".to_string())),
        ]))
        .unwrap();
        assert_eq!(
            Value::Object(command_dps(&raw, &data_points)),
            json!({"21": "scene", "25": "000e0d"})
        );
    }

    #[test]
    fn builds_v33_control_payloads() {
        let payload: Value = serde_json::from_slice(&control(ProtocolVersion::V33, "abc", Dps::new())).unwrap();

        assert_eq!(payload["devId"], "abc");
        assert_eq!(payload["uid"], "abc");
        assert!(payload["t"].is_string());
        assert_eq!(payload["dps"], json!({}));
    }

    #[test]
    fn builds_v34_control_payloads() {
        let mut dps = Dps::new();
        dps.insert("20".to_string(), json!(true));

        let payload: Value = serde_json::from_slice(&control(ProtocolVersion::V34, "abc", dps)).unwrap();

        assert_eq!(payload["protocol"], 5);
        assert!(payload["t"].is_u64());
        assert_eq!(payload["data"], json!({"dps": {"20": true}}));
    }

    #[test]
    fn queries_newer_devices_with_an_empty_object() {
        assert_eq!(query(ProtocolVersion::V35, "abc"), b"{}");
        assert_eq!(heartbeat(ProtocolVersion::V34, "abc"), b"{}");
        let v33: Value = serde_json::from_slice(&query(ProtocolVersion::V33, "abc")).unwrap();
        assert_eq!(v33["gwId"], "abc");
    }

    #[test]
    fn reads_dps_from_both_reply_layouts() {
        let flat = json!({"devId": "abc", "dps": {"20": true}});
        let wrapped = json!({"protocol": 4, "data": {"dps": {"22": 10}}});

        assert_eq!(reply_dps(&flat).unwrap().get("20"), Some(&json!(true)));
        assert_eq!(reply_dps(&wrapped).unwrap().get("22"), Some(&json!(10)));
        assert_eq!(reply_dps(&json!({})), None);
    }

    #[test]
    fn keeps_only_typed_numeric_dps() {
        let dps = json!({"20": true, "21": "white", "22": 500, "25": 1.5, "note": "x"});

        let typed = typed_dps(dps.as_object().unwrap());

        assert_eq!(
            typed,
            BTreeMap::from([
                (20, DpValue::Boolean(true)),
                (21, DpValue::Text("white".to_string())),
                (22, DpValue::Integer(500)),
            ])
        );
    }
}
