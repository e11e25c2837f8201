//! feynman-server: event delivery to the single remote viewer.
//! Multi-producer event channel, WebSocket broadcast server and best-effort
//! viewer launch.

pub mod channel;
pub mod error;
pub mod server;
pub mod viewer;

pub use channel::{DEFAULT_CHANNEL_CAPACITY, EventReceiver, EventSender, channel};
pub use error::ServerError;
pub use server::{BroadcastServer, DEFAULT_ADDR, ws_url};
pub use viewer::{launch_viewer, viewer_target};
