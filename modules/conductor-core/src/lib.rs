pub mod config;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod mover;
pub mod router;
pub mod routes;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::Config;
pub use demo::{DemoRunner, DemoStation};
pub use dispatcher::Dispatcher;
pub use error::RouterError;
pub use messages::{ErrorCode, ResponseEvent, RouterCommand, RouterResponse};
pub use mover::{ImageRegistry, RegistryMover};
pub use router::TrainRouter;
pub use routes::{RouteStore, VaultRouteStore};
pub use state::{RedisStateStore, TrainStateStore};
pub use types::{Project, Route, RouteType, TrainStatus};
