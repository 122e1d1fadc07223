//! Request dispatch
//!
//! Turns an inbound request into a redirect response, a proxy target or a
//! pass-through to the next handler. Rule problems never reach the client:
//! they are logged and the request passes through.

use std::sync::Arc;

use http::header::{LOCATION, SERVER};
use http::request::Parts;
use http::{HeaderValue, Response};
use mirage_common::CancellationToken;
use tracing::{debug, warn};

use super::resolver::RedirectResolver;
use super::rule::Directive;

/// Value of the `Server` header on responses produced here
pub const SERVER_NAME: &str = "mirage";

/// Query parameter that forces a fresh rule lookup
pub const PURGE_CACHE_PARAM: &str = "purge_cache";

/// Outcome of [`MirageHandler::handle`]
#[derive(Debug)]
pub enum Dispatch {
    /// Send this response
    Redirect(Response<()>),
    /// Forward the request to `location`
    Proxy { location: String },
    /// No applicable rule; hand the request to the next handler
    PassThrough,
}

/// Strip an optional `:port` from a `Host` value
///
/// Bracketed IPv6 literals lose their brackets when a port is present;
/// values that cannot be split are returned unchanged.
pub fn split_host(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((address, port)) if port.starts_with(':') => address,
            _ => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, _port)) if !name.contains(':') => name,
        _ => host,
    }
}

fn wants_purge(parts: &Parts) -> bool {
    parts.uri.query().is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == PURGE_CACHE_PARAM)
    })
}

fn request_host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
}

/// Redirect request handler
#[derive(Debug, Clone)]
pub struct MirageHandler {
    resolver: Arc<RedirectResolver>,
}

impl MirageHandler {
    pub fn new(resolver: Arc<RedirectResolver>) -> Self {
        Self { resolver }
    }

    pub async fn handle(&self, parts: &Parts, cancel: &CancellationToken) -> Dispatch {
        let Some(host) = request_host(parts) else {
            debug!("Request has no host");
            return Dispatch::PassThrough;
        };
        let hostname = split_host(host);

        let Some(rule) = self
            .resolver
            .resolve(hostname, wants_purge(parts), cancel)
            .await
        else {
            return Dispatch::PassThrough;
        };

        let directive = match rule.directive(parts.uri.path()) {
            Ok(directive) => directive,
            Err(e) => {
                warn!(hostname = %hostname, error = %e, "Unusable redirect rule");
                return Dispatch::PassThrough;
            }
        };

        match directive {
            Directive::Redirect { location, status } => {
                let Ok(location_value) = HeaderValue::from_str(&location) else {
                    warn!(hostname = %hostname, location = %location, "Redirect location is not a valid header");
                    return Dispatch::PassThrough;
                };

                let mut response = Response::new(());
                *response.status_mut() = status;
                response.headers_mut().insert(LOCATION, location_value);
                response
                    .headers_mut()
                    .insert(SERVER, HeaderValue::from_static(SERVER_NAME));

                debug!(
                    hostname = %hostname,
                    location = %location,
                    status = status.as_u16(),
                    "Redirecting"
                );
                Dispatch::Redirect(response)
            }
            Directive::Proxy { location } => {
                debug!(hostname = %hostname, location = %location, "Proxying");
                Dispatch::Proxy { location }
            }
        }
    }
}
