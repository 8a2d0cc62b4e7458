use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

pub const SESS_KEY_NEG_START: u32 = 0x03;
pub const SESS_KEY_NEG_RESP: u32 = 0x04;
pub const SESS_KEY_NEG_FINISH: u32 = 0x05;
pub const CONTROL: u32 = 0x07;
pub const STATUS: u32 = 0x08;
pub const HEART_BEAT: u32 = 0x09;
pub const DP_QUERY: u32 = 0x0a;
pub const CONTROL_NEW: u32 = 0x0d;
pub const DP_QUERY_NEW: u32 = 0x10;

/// Commands sent without the `3.x` version header.
const NO_HEADER_COMMANDS: [u32; 7] = [
    DP_QUERY,
    DP_QUERY_NEW,
    HEART_BEAT,
    SESS_KEY_NEG_START,
    SESS_KEY_NEG_RESP,
    SESS_KEY_NEG_FINISH,
    STATUS,
];

pub const VERSION_HEADER_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    #[default]
    V33,
    V34,
    V35,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V33 => "3.3",
            ProtocolVersion::V34 => "3.4",
            ProtocolVersion::V35 => "3.5",
        }
    }

    /// `3.x` followed by 12 zero bytes.
    pub fn header(&self) -> [u8; VERSION_HEADER_LEN] {
        let mut header = [0u8; VERSION_HEADER_LEN];
        header[..3].copy_from_slice(self.as_str().as_bytes());
        header
    }

    pub fn negotiates_session_key(&self) -> bool {
        !matches!(self, ProtocolVersion::V33)
    }

    pub fn control_command(&self) -> u32 {
        match self {
            ProtocolVersion::V33 => CONTROL,
            _ => CONTROL_NEW,
        }
    }

    pub fn query_command(&self) -> u32 {
        match self {
            ProtocolVersion::V33 => DP_QUERY,
            _ => DP_QUERY_NEW,
        }
    }

    pub fn needs_header(&self, cmd: u32) -> bool {
        !NO_HEADER_COMMANDS.contains(&cmd)
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unsupported protocol version '{0}', expected 3.3, 3.4 or 3.5")]
pub struct UnsupportedVersion(String);

impl FromStr for ProtocolVersion {
    type Err = UnsupportedVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3.3" => Ok(ProtocolVersion::V33),
            "3.4" => Ok(ProtocolVersion::V34),
            "3.5" => Ok(ProtocolVersion::V35),
            other => Err(UnsupportedVersion(other.to_string())),
        }
    }
}

/// Accepts both `version = "3.4"` and `version = 3.4`.
impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a protocol version such as \"3.3\" or 3.4")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse().map_err(E::custom)
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                format!("{:.1}", value).parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

pub const LOCAL_KEY_LEN: usize = 16;

/// The 16 character secret a lamp was paired with. Its ASCII bytes are the AES key.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalKey([u8; LOCAL_KEY_LEN]);

impl LocalKey {
    pub fn as_bytes(&self) -> &[u8; LOCAL_KEY_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Only ever constructed from a str
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("local key must be 16 bytes, got {0}")]
pub struct InvalidLocalKey(usize);

impl FromStr for LocalKey {
    type Err = InvalidLocalKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; LOCAL_KEY_LEN] = s.as_bytes().try_into().map_err(|_| InvalidLocalKey(s.len()))?;
        Ok(LocalKey(bytes))
    }
}

impl Debug for LocalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalKey({}***)", self.as_str().chars().take(2).collect::<String>())
    }
}

impl<'de> Deserialize<'de> for LocalKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("3.3"), ProtocolVersion::V33)]
    #[case(json!("3.4"), ProtocolVersion::V34)]
    #[case(json!(3.5), ProtocolVersion::V35)]
    #[case(json!(3.4), ProtocolVersion::V34)]
    fn deserializes_versions(#[case] value: serde_json::Value, #[case] expected: ProtocolVersion) {
        assert_eq!(serde_json::from_value::<ProtocolVersion>(value).unwrap(), expected);
    }

    #[test]
    fn rejects_unsupported_versions() {
        assert!(serde_json::from_value::<ProtocolVersion>(json!("3.1")).is_err());
    }

    #[test]
    fn builds_the_version_header() {
        let header = ProtocolVersion::V34.header();
        assert_eq!(&header[..3], b"3.4");
        assert!(header[3..].iter().all(|byte| *byte == 0));
    }

    #[rstest]
    #[case(CONTROL, true)]
    #[case(CONTROL_NEW, true)]
    #[case(DP_QUERY, false)]
    #[case(HEART_BEAT, false)]
    #[case(SESS_KEY_NEG_START, false)]
    fn decides_which_commands_carry_the_header(#[case] cmd: u32, #[case] expected: bool) {
        assert_eq!(ProtocolVersion::V33.needs_header(cmd), expected);
    }

    #[test]
    fn parses_local_keys() {
        let key: LocalKey = "0123456789abcdef".parse().unwrap();
        assert_eq!(key.as_bytes(), b"0123456789abcdef");
        assert_eq!(format!("{:?}", key), "LocalKey(01***)");
        assert_eq!("short".parse::<LocalKey>().unwrap_err(), InvalidLocalKey(5));
    }
}
