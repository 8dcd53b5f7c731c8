pub mod api;
pub mod handler;
pub mod protocol;
pub mod rate_limiter;
pub mod registry;
pub mod web_server;

pub use protocol::{ClientMessage, CloseCode, ProtocolError, ServerMessage};
pub use rate_limiter::{ConnectionLimits, MessageThrottle};
pub use registry::{ConnectionRegistry, Registration};
pub use web_server::{router, serve, AppState};
