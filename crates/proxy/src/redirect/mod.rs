//! Hostname redirects
//!
//! Control flow for one request:
//!
//! 1. [`MirageHandler`] extracts the hostname
//! 2. [`RedirectResolver`] consults the [`RedirectCache`], reading the
//!    redirect table on a miss
//! 3. [`rewrite::evaluate`] rewrites the request path with the rule's
//!    rewrite chain
//! 4. The handler answers with a redirect, a proxy target, or passes the
//!    request on

mod cache;
mod handler;
mod resolver;
pub mod rewrite;
mod rule;

pub use cache::RedirectCache;
pub use handler::{split_host, Dispatch, MirageHandler, PURGE_CACHE_PARAM, SERVER_NAME};
pub use resolver::RedirectResolver;
pub use rule::{
    Directive, RedirectKind, RedirectRule, RedirectStatus, Rewrite, RewritePattern, RuleError,
};
