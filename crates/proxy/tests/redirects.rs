//! End-to-end redirect handling through a fully wired app.

use std::sync::Arc;

use http::header::LOCATION;
use http::request::Parts;
use http::{Request, StatusCode};
use mirage_common::{CancellationToken, MirageError};
use mirage_config::MirageConfig;
use mirage_proxy::{
    Dispatch, KvBackend, MemoryBackend, MirageApp, RedirectKind, RedirectRule, RedirectStatus,
    Rewrite,
};
use serde_json::json;

async fn app_with(rules: &[RedirectRule]) -> (Arc<MemoryBackend>, MirageApp) {
    let backend = Arc::new(MemoryBackend::new());
    let app = MirageApp::new(MirageConfig::default(), backend.clone()).unwrap();
    for rule in rules {
        backend
            .put_item(&app.config().app.table, &rule.hostname, rule.to_document(), &[])
            .await
            .unwrap();
    }
    (backend, app)
}

fn request(uri: &str, host: &str) -> Parts {
    Request::builder()
        .uri(uri)
        .header("host", host)
        .body(())
        .unwrap()
        .into_parts()
        .0
}

fn redirect_target(dispatch: Dispatch) -> (StatusCode, String) {
    match dispatch {
        Dispatch::Redirect(response) => (
            response.status(),
            response.headers()[LOCATION].to_str().unwrap().to_string(),
        ),
        other => panic!("expected a redirect, got {:?}", other),
    }
}

#[tokio::test]
async fn rewrite_chain_builds_location() {
    let rule = RedirectRule::new("old.example.com", "new.example.com")
        .with_rewrite(Rewrite::new("^/(.*)$", "/pfx/$1", false))
        .with_rewrite(Rewrite::new("bar", "baz", true));
    let (_backend, app) = app_with(&[rule]).await;
    let cancel = CancellationToken::new();

    let (status, location) =
        redirect_target(app.handler().handle(&request("/foo/bar", "old.example.com"), &cancel).await);
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location, "https://new.example.com/pfx/foo/baz");

    // First rewrite does not match; nothing else is applied
    let rule = RedirectRule::new("plain.example.com", "new.example.com")
        .with_status(RedirectStatus::Permanent)
        .with_rewrite(Rewrite::new("^/only$", "/x", true));
    let (_backend, app) = app_with(&[rule]).await;
    let (status, location) = redirect_target(
        app.handler()
            .handle(&request("/other", "plain.example.com"), &cancel)
            .await,
    );
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(location, "https://new.example.com");
}

#[tokio::test]
async fn unknown_enum_values_fall_back_to_defaults() {
    let (backend, app) = app_with(&[]).await;
    let cancel = CancellationToken::new();
    let mut document = serde_json::Map::new();
    document.insert("Hostname".to_string(), json!("legacy.example.com"));
    document.insert("Location".to_string(), json!("example.com"));
    document.insert("Type".to_string(), json!("Teleport"));
    document.insert("Status".to_string(), json!("Eventually"));
    backend
        .put_item(&app.config().app.table, "legacy.example.com", document, &[])
        .await
        .unwrap();

    let rule = app
        .resolver()
        .fetch("legacy.example.com", &cancel)
        .await
        .unwrap();
    assert_eq!(rule.kind, RedirectKind::Redirect);
    assert_eq!(rule.status, RedirectStatus::Temporary);

    let (status, location) = redirect_target(
        app.handler()
            .handle(&request("/", "legacy.example.com"), &cancel)
            .await,
    );
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location, "https://example.com");
}

#[tokio::test]
async fn resolved_rules_are_cached_until_purged() {
    let (backend, app) = app_with(&[RedirectRule::new("a.example.com", "first.com")]).await;
    let cancel = CancellationToken::new();
    let table = app.config().app.table.clone();

    redirect_target(app.handler().handle(&request("/", "a.example.com"), &cancel).await);
    assert!(app.cache().get("a.example.com").is_some());

    backend
        .put_item(
            &table,
            "a.example.com",
            RedirectRule::new("a.example.com", "second.com").to_document(),
            &[],
        )
        .await
        .unwrap();

    // Served from the cache even with the backend offline
    backend.set_offline(true);
    let (_, location) =
        redirect_target(app.handler().handle(&request("/", "a.example.com"), &cancel).await);
    assert_eq!(location, "https://first.com");

    backend.set_offline(false);
    let (_, location) = redirect_target(
        app.handler()
            .handle(&request("/?purge_cache=1", "a.example.com"), &cancel)
            .await,
    );
    assert_eq!(location, "https://second.com");
}

#[tokio::test]
async fn lookup_failures_pass_through() {
    let (backend, app) = app_with(&[RedirectRule::new("a.example.com", "first.com")]).await;
    let cancel = CancellationToken::new();
    backend.set_offline(true);

    assert!(matches!(
        app.handler().handle(&request("/", "a.example.com"), &cancel).await,
        Dispatch::PassThrough
    ));
    assert!(app.cache().is_empty());
}

#[tokio::test]
async fn proxy_rules_return_target() {
    let rule = RedirectRule::new("api.example.com", "internal.example.com")
        .with_kind(RedirectKind::Proxy)
        .with_rewrite(Rewrite::new("^/v1/", "/", true));
    let (_backend, app) = app_with(&[rule]).await;

    let dispatch = app
        .handler()
        .handle(&request("/v1/users", "api.example.com:8443"), &CancellationToken::new())
        .await;
    assert!(matches!(
        dispatch,
        Dispatch::Proxy { location } if location == "https://internal.example.com/users"
    ));
}

#[tokio::test]
async fn certificate_permission_follows_redirect_table() {
    let (backend, app) = app_with(&[RedirectRule::new("www.example.com", "example.com")]).await;
    let cancel = CancellationToken::new();

    assert!(app
        .permission()
        .certificate_allowed("www.example.com", &cancel)
        .await
        .is_ok());
    assert_eq!(
        app.permission()
            .certificate_allowed("attacker.example.net", &cancel)
            .await,
        Err(MirageError::PermissionDenied("attacker.example.net".to_string()))
    );

    backend.set_offline(true);
    assert!(matches!(
        app.permission()
            .certificate_allowed("www.example.com", &cancel)
            .await,
        Err(MirageError::PermissionDenied(_))
    ));
}
