pub mod error;
pub mod executor;
pub mod handler;
pub mod server;
pub mod worker;

pub use error::WorkerError;
pub use executor::{ArgValue, BoundTask};
pub use handler::{HandlerRegistry, TaskHandler};
pub use server::Server;
pub use worker::Worker;
