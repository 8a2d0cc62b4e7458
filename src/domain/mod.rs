pub mod color;
pub mod command;
pub mod connection_state;
pub mod data_points;
pub mod device;
pub mod lamp_status;

pub use color::Rgb;
pub use command::{Command, CommandError, CommandKind, DpValue, Payload, Priority};
pub use connection_state::ConnectionState;
pub use data_points::DataPoints;
pub use device::{ConnectError, Device, RefreshError, SendError};
pub use lamp_status::LampStatus;
