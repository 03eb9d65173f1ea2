//! Control-plane half of the kiosklink protocol engine.
//!
//! [`ControlChannel`] keeps one reliable connection to the remote device and
//! hides reconnect churn; [`CommandDispatcher`] sits on top of it, minting a
//! correlation id per command and settling each command's callback exactly
//! once: by response, timeout, or immediate send failure.

pub mod channel;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod timeout;

pub use channel::{ChannelConfig, ControlChannel, EndReason, ReceiveEnd};
pub use command::{
    registration_message, Command, CommandId, CommandResult, Params, CONNECTION_LOST_MESSAGE,
    DEFAULT_LOG_LINES, TIMEOUT_MESSAGE,
};
pub use dispatcher::{CommandCallback, CommandDispatcher, CommandSink, DispatcherConfig};
pub use error::{ControlError, Result};
pub use inbound::{parse_inbound, DeviceEvent, Inbound};
pub use kiosklink_transport::ConnectionState;
pub use timeout::TimeoutWheel;
