//! Counter store implementations.

mod connection;
mod local;
mod remote;

pub use connection::LazyConnection;
pub use local::{LocalStore, Value, DEFAULT_CAPACITY};
pub use remote::{RemoteParams, RemoteStore};
