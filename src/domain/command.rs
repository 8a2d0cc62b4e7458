use crate::domain::color::Rgb;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use thiserror::Error;

/// Upper bound of integer data point values (brightness, temperature, ...).
pub const MAX_DP_VALUE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SetColour,
    SetValue,
    SetPower,
    TurnOff,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DpValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl Display for DpValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DpValue::Boolean(value) => write!(f, "{}", value),
            DpValue::Integer(value) => write!(f, "{}", value),
            DpValue::Text(value) => write!(f, "'{}'", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Colour(Rgb),
    Value { dp: u16, value: DpValue },
    Power(bool),
    Raw(BTreeMap<u16, DpValue>),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
}

/// Identity under which queued normal-priority commands are merged, latest write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflationKey {
    Colour,
    Value(u16),
    Power,
}

/// A single unit of work for the lamp. Commands are validated on construction and never change afterwards.
#[derive(Debug, Clone)]
pub struct Command {
    kind: CommandKind,
    payload: Payload,
    priority: Priority,
    submitted_at: Instant,
}

impl Command {
    pub fn new(kind: CommandKind, payload: Payload, priority: Priority) -> Result<Command, CommandError> {
        validate(kind, &payload)?;
        Ok(Command {
            kind,
            payload,
            priority,
            submitted_at: Instant::now(),
        })
    }

    pub fn set_colour(colour: Rgb) -> Command {
        Command {
            kind: CommandKind::SetColour,
            payload: Payload::Colour(colour),
            priority: Priority::Normal,
            submitted_at: Instant::now(),
        }
    }

    pub fn set_value(dp: u16, value: DpValue) -> Result<Command, CommandError> {
        Command::new(CommandKind::SetValue, Payload::Value { dp, value }, Priority::Normal)
    }

    pub fn set_power(on: bool, priority: Priority) -> Command {
        Command {
            kind: CommandKind::SetPower,
            payload: Payload::Power(on),
            priority,
            submitted_at: Instant::now(),
        }
    }

    /// Always urgent, purges pending colour and value updates when submitted.
    pub fn turn_off() -> Command {
        Command {
            kind: CommandKind::TurnOff,
            payload: Payload::None,
            priority: Priority::Urgent,
            submitted_at: Instant::now(),
        }
    }

    pub fn raw(dps: BTreeMap<u16, DpValue>) -> Result<Command, CommandError> {
        Command::new(CommandKind::Raw, Payload::Raw(dps), Priority::Normal)
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_urgent(&self) -> bool {
        self.priority == Priority::Urgent
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn conflation_key(&self) -> Option<ConflationKey> {
        match (&self.kind, &self.payload) {
            (CommandKind::SetColour, _) => Some(ConflationKey::Colour),
            (CommandKind::SetValue, Payload::Value { dp, .. }) => Some(ConflationKey::Value(*dp)),
            (CommandKind::SetPower | CommandKind::TurnOff, _) => Some(ConflationKey::Power),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Payload::Colour(colour) => write!(f, "colour {}", colour),
            Payload::Value { dp, value } => write!(f, "dp {} = {}", dp, value),
            Payload::Power(true) => write!(f, "power on"),
            Payload::Power(false) => write!(f, "power off"),
            Payload::Raw(dps) => write!(f, "raw {} dp(s)", dps.len()),
            Payload::None => write!(f, "turn off"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("payload {payload} does not match command kind {kind:?}")]
    PayloadMismatch { kind: CommandKind, payload: String },
    #[error("value {value} for dp {dp} is outside 0..=1000")]
    OutOfRange { dp: u16, value: i64 },
    #[error("raw command without data points")]
    EmptyRaw,
    #[error("the dispatcher is shut down")]
    ShutDown,
}

fn validate(kind: CommandKind, payload: &Payload) -> Result<(), CommandError> {
    match (kind, payload) {
        (CommandKind::SetColour, Payload::Colour(_)) => Ok(()),
        (CommandKind::SetValue, Payload::Value { dp, value }) => validate_value(*dp, value),
        (CommandKind::SetPower, Payload::Power(_)) => Ok(()),
        (CommandKind::TurnOff, Payload::None) => Ok(()),
        (CommandKind::Raw, Payload::Raw(dps)) if dps.is_empty() => Err(CommandError::EmptyRaw),
        (CommandKind::Raw, Payload::Raw(dps)) => dps.iter().try_for_each(|(dp, value)| validate_value(*dp, value)),
        (kind, payload) => Err(CommandError::PayloadMismatch {
            kind,
            payload: format!("{:?}", payload),
        }),
    }
}

fn validate_value(dp: u16, value: &DpValue) -> Result<(), CommandError> {
    match value {
        DpValue::Integer(value) if !(0..=MAX_DP_VALUE).contains(value) => Err(CommandError::OutOfRange { dp, value: *value }),
        _ => Ok(()),
    }
}
