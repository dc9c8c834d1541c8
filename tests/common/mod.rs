#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;

use tokenmgr::clock::MockClock;
use tokenmgr::config::Config;
use tokenmgr::identity::TrustedHeaderProvider;
use tokenmgr::manager::{TokenManager, TokenPolicy};
use tokenmgr::secrets::TokenSecrets;
use tokenmgr::store::memory::MemoryStore;
use tokenmgr::AppState;

pub const IDP_KEY: &str = "test-idp-key";
pub const ADMIN: &str = "u-admin";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub clock: Arc<MockClock>,
}

pub fn test_app() -> TestApp {
    test_app_with(TokenPolicy::default())
}

pub fn test_app_with(policy: TokenPolicy) -> TestApp {
    let store = MemoryStore::new();
    let clock = Arc::new(MockClock::default());
    let config = Config {
        admin_principals: vec![ADMIN.to_string()],
        idp_key: Some(IDP_KEY.to_string()),
        cookie_secure: false,
        ..Config::default()
    };
    let manager = TokenManager::new(
        Arc::new(store.clone()),
        Arc::new(TokenSecrets::new()),
        clock.clone(),
        policy,
    );
    let state = Arc::new(AppState::with_parts(
        Arc::new(manager),
        Arc::new(TrustedHeaderProvider::new(Some(IDP_KEY.to_string()))),
        config,
    ));
    TestApp {
        router: tokenmgr::api::app(state.clone()),
        state,
        store,
        clock,
    }
}

pub fn login_request(user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v3/tokens/login")
        .header("content-type", "application/json")
        .header("x-idp-key", IDP_KEY)
        .header("x-remote-user", user)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed(method: &str, uri: &str, bearer: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", bearer));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn read_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
