mod pool;
mod reconnect;
mod session;

pub use pool::{ConnectionPool, PooledConnection};
pub use reconnect::{Liveness, ReconnectPolicy};
pub use session::Session;
