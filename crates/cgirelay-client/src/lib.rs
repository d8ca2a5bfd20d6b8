pub mod connection;
pub mod connector;

pub use connection::WorkerConnection;
pub use connector::{ConnectConfig, Connector};
