pub mod config;
pub mod error;
pub mod events;
pub mod exchange;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventLevel, EventSink, TracingSink, WorkflowEvent};
pub use exchange::{ExchangeClient, Rejection, RejectionKind, Reply};
pub use types::*;
