//! Mock control plane shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use platform_component::{Identity, RegistrationRequest, Role, CONNECT_PATH};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const TOKEN: &str = "asdf";
pub const MEMORY_SERVER: &str = "memory://local";

/// Component data the mock control plane expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestData {
    #[serde(rename = "Test")]
    pub test: String,
    #[serde(rename = "Ing")]
    pub ing: i64,
}

impl TestData {
    pub fn valid() -> Self {
        Self {
            test: "testing".to_string(),
            ing: -1,
        }
    }

    pub fn wrong() -> Self {
        Self {
            test: "wrong".to_string(),
            ing: -1,
        }
    }
}

/// Config the mock control plane hands back.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlatformConfig {
    #[serde(rename = "Bucket")]
    pub bucket: String,
}

/// How the mock answers a valid request.
#[derive(Debug, Clone)]
pub enum Reply {
    Normal,
    NoConfig,
    EmptyServer,
    MalformedEnvelope,
    MalformedConfig,
    Slow(Duration),
}

pub struct ControlPlane {
    pub url: String,
    reply: Reply,
    nkeys: Mutex<Vec<String>>,
}

impl ControlPlane {
    /// Public keys of every request that passed validation.
    pub fn registered_keys(&self) -> Vec<String> {
        self.nkeys.lock().unwrap().clone()
    }
}

/// Start a mock control plane on an ephemeral port.
pub async fn start_control_plane(reply: Reply) -> Arc<ControlPlane> {
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let state = Arc::new(ControlPlane {
        url: format!("http://{}", local_addr),
        reply,
        nkeys: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route(&format!("/{}", CONNECT_PATH), post(connect))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    state
}

/// An address nothing is listening on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", local_addr)
}

async fn connect(
    State(state): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("bearer {}", TOKEN))
        .unwrap_or(false);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid token".to_string());
    }

    let request: RegistrationRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()),
    };
    if Identity::from_public(&request.nkey_public, Role::User).is_err() {
        return (StatusCode::BAD_REQUEST, "invalid nkey".to_string());
    }

    let data: TestData = match request.data.as_ref().map(|d| d.decode()) {
        Some(Ok(data)) => data,
        _ => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to unmarshal test config".to_string(),
            )
        }
    };
    if data.test != "testing" || data.ing != -1 {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected platform config".to_string(),
        );
    }

    state.nkeys.lock().unwrap().push(request.nkey_public.clone());

    let body = match &state.reply {
        Reply::Normal => json!({
            "jwt": "JWT123",
            "account": "CACCOUNT",
            "server": MEMORY_SERVER,
            "config": {"Bucket": "bucket"},
        })
        .to_string(),
        Reply::NoConfig => json!({
            "jwt": "JWT123",
            "account": "CACCOUNT",
            "server": MEMORY_SERVER,
        })
        .to_string(),
        Reply::EmptyServer => json!({
            "jwt": "JWT123",
            "account": "CACCOUNT",
            "server": "",
        })
        .to_string(),
        Reply::MalformedEnvelope => r#"{"jwt": "JWT123", "account": "#.to_string(),
        Reply::MalformedConfig => json!({
            "jwt": "JWT123",
            "account": "CACCOUNT",
            "server": MEMORY_SERVER,
            "config": {"Bucket": 7},
        })
        .to_string(),
        Reply::Slow(delay) => {
            tokio::time::sleep(*delay).await;
            json!({"jwt": "JWT123", "account": "CACCOUNT", "server": MEMORY_SERVER}).to_string()
        }
    };

    (StatusCode::OK, body)
}
