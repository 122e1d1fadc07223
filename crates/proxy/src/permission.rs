//! On-demand TLS permission
//!
//! A certificate is only issued for names that have a redirect rule, which
//! keeps arbitrary hostnames pointed at the proxy from triggering issuance.

use std::sync::Arc;

use mirage_common::{run_cancellable, CancellationToken, MirageError, MirageResult};
use tracing::{debug, warn};

use crate::kv::{Consistency, KvBackend};

/// Decides whether a certificate may be issued for a name
pub struct CertificatePermission {
    backend: Arc<dyn KvBackend>,
    table: String,
}

impl CertificatePermission {
    pub fn new(backend: Arc<dyn KvBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
        }
    }

    /// Allow issuance for `name` if the redirect table has a rule for it
    ///
    /// # Errors
    ///
    /// [`MirageError::PermissionDenied`] when there is no rule or the lookup
    /// fails; [`MirageError::Cancelled`] if `cancel` fires first.
    pub async fn certificate_allowed(&self, name: &str, cancel: &CancellationToken) -> MirageResult<()> {
        let lookup = run_cancellable(
            cancel,
            self.backend.get_item(&self.table, name, Consistency::Eventual),
        )
        .await;

        match lookup {
            Ok(Some(_)) => {
                debug!(name = %name, "Certificate issuance permitted");
                Ok(())
            }
            Ok(None) => {
                debug!(name = %name, "Certificate issuance denied, no redirect configured");
                Err(MirageError::PermissionDenied(name.to_string()))
            }
            Err(MirageError::Cancelled) => Err(MirageError::Cancelled),
            Err(e) => {
                warn!(name = %name, error = %e, "Certificate permission lookup failed");
                Err(MirageError::PermissionDenied(format!(
                    "{} (error looking up: {})",
                    name, e
                )))
            }
        }
    }
}

impl std::fmt::Debug for CertificatePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificatePermission")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
