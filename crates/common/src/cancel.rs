//! Cancellation helpers for backing-store calls.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::errors::MirageError;

/// Run `fut` unless `cancel` fires first.
///
/// When the token fires the future is dropped, abandoning whatever partial
/// work it had in flight, and [`MirageError::Cancelled`] is returned.
pub async fn run_cancellable<F, T, E>(cancel: &CancellationToken, fut: F) -> Result<T, MirageError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<MirageError>,
{
    if cancel.is_cancelled() {
        return Err(MirageError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MirageError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}
