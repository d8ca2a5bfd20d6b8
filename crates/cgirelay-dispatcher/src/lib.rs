//! cgirelay Dispatcher
//!
//! This crate routes CGI requests to long-lived workers and administers the
//! worker fleet.
//!
//! - [`Dispatcher`]: classifies a request, locates or starts its worker and
//!   streams the response back
//! - [`LoadBalancer`]: picks the worker instance for a new session
//! - [`Spawner`]: starts workers ([`ProcessSpawner`] in production)
//! - [`FleetAdmin`]: batch commands over every registered worker

pub mod dispatcher;
pub mod fallback;
pub mod fleet;
pub mod load_balancer;
pub mod request;
pub mod spawner;

pub use dispatcher::{DispatchConfig, Dispatcher, Located, Outcome};
pub use fallback::{escape_html, no_handler_page};
pub use fleet::{EntryOutcome, FleetAdmin, FleetCommand, FleetEntry, FleetReport};
pub use load_balancer::{LoadBalanceConfig, LoadBalancePolicy, LoadBalancer, Selection, SelectionKind};
pub use request::{CgiRequest, SERVER_ENV_VARS};
pub use spawner::{ProcessSpawner, SpawnRequest, Spawner};
