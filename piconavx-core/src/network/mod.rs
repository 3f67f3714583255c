pub mod connection;
pub mod server;
pub mod session;

pub use connection::{Connection, ConnectionEvent, ConnectionInfo, Outbox, Snapshots};
pub use server::{Server, ServerEvent};
pub use session::ReadTimeouts;
