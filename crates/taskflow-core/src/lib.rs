mod config;
mod error;
mod result;
mod signature;
mod state;
mod workflow;

pub mod retry;

pub use config::{AmqpConfig, Config};
pub use error::{Result, TaskflowError};
pub use result::{human_readable_results, TaskResult};
pub use signature::{Arg, Signature};
pub use state::{TaskState, TaskStateInfo};
pub use workflow::{chain, Chord, Group};
