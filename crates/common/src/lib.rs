//! Shared building blocks for the Mirage redirect server.
//!
//! - [`errors`]: the error taxonomy every component reports through
//! - [`cancel`]: cancellation of backing-store calls
//! - [`ids`]: lease owner and version identifiers
//! - [`observability`]: tracing subscriber setup

pub mod cancel;
pub mod errors;
pub mod ids;
pub mod observability;

pub use cancel::run_cancellable;
pub use errors::{MirageError, MirageResult};
pub use ids::{OwnerId, RecordVersion};
pub use observability::{init_tracing, LogFormat};

pub use tokio_util::sync::CancellationToken;
