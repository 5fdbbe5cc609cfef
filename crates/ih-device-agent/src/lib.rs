//! IoT hub device client: authenticated device sessions over AMQP.
//!
//! A `DeviceSession` authenticates with a CBS put-token, opens the
//! device's event sender and device-bound receiver, renews its token on a
//! timer, and fans inbound messages out to registered observers.

pub mod broadcaster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod renewal;
pub mod session;

pub use broadcaster::{ChannelObserver, MessageBroadcaster, Notification, Observer, Subscription};
pub use config::DeviceConfig;
pub use error::{DeviceError, DeviceResult, SessionClosedError};
pub use identity::DeviceIdentity;
pub use session::{DeviceSession, SessionOptions, SessionState, connect_device};
