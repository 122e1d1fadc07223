//! Mirage Proxy Library
//!
//! Hostname-keyed redirects and durable TLS artifact storage for a reverse
//! proxy host, over a shared key-value backend.
//!
//! - **Object Storage**: a `/`-separated namespace over a flat table
//! - **Lease Locks**: certificate issuance serialized across instances
//! - **Redirects**: cached per-hostname rules with ordered path rewrites
//! - **Permission**: on-demand TLS limited to configured hostnames
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mirage_config::MirageConfig;
//! use mirage_proxy::{kv::MemoryBackend, MirageApp};
//!
//! let app = MirageApp::new(MirageConfig::default(), Arc::new(MemoryBackend::new()))?;
//! app.start();
//!
//! let cancel = CancellationToken::new();
//! app.locks().lock("example.com", &cancel).await?;
//! app.storage().store("certificates/example.com.crt", pem, &cancel).await?;
//! app.locks().unlock("example.com", &cancel).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod app;
pub mod kv;
pub mod lock;
pub mod permission;
pub mod redirect;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Backend
pub use kv::{KvBackend, KvError, MemoryBackend};

// Object storage
pub use storage::{KeyInfo, ObjectStore};

// Locks
pub use lock::{LeaseHandle, LockClient, LockManager};

// Redirects
pub use redirect::{
    Dispatch, MirageHandler, RedirectCache, RedirectKind, RedirectResolver, RedirectRule,
    RedirectStatus, Rewrite,
};

// Permission
pub use permission::CertificatePermission;

// Application
pub use app::MirageApp;
