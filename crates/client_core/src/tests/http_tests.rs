use super::*;
use crate::{EphemeralSessionStore, SessionController};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use shared::{domain::ServerId, protocol::AuthAction};
use std::{collections::HashMap, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct MockBackendState {
    fail_directory: Arc<Mutex<bool>>,
    reject_auth: Arc<Mutex<bool>>,
    reject_connect: Arc<Mutex<Option<String>>>,
    omit_plain_config: Arc<Mutex<bool>>,
    disconnect_requests: Arc<Mutex<Vec<Value>>>,
}

async fn mock_servers(State(state): State<MockBackendState>) -> impl IntoResponse {
    if *state.fail_directory.lock().await {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "db down"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "servers": [
                {
                    "id": "1",
                    "country": "France",
                    "city": "Paris",
                    "flag": "🇫🇷",
                    "load": 39,
                    "ping": 18,
                    "serverName": "fr-par-01",
                    "ipAddress": "62.210.84.99",
                    "port": 1194,
                    "protocol": "OpenVPN"
                }
            ]
        })),
    )
}

async fn mock_auth(
    State(state): State<MockBackendState>,
    Json(_body): Json<Value>,
) -> impl IntoResponse {
    if *state.reject_auth.lock().await {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "message": "invalid email or password"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "user": {
                "id": 7,
                "email": "alice@example.com",
                "username": "alice",
                "subscription_tier": "premium"
            },
            "message": "signed in"
        })),
    )
}

async fn mock_tunnel(
    State(state): State<MockBackendState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    match body["action"].as_str() {
        Some("connect") => {
            if let Some(reason) = state.reject_connect.lock().await.clone() {
                return (StatusCode::NOT_FOUND, Json(json!({"error": reason})));
            }
            let config = "client\ndev tun\ncipher AES-256-GCM\n";
            let mut payload = json!({
                "success": true,
                "connectionId": ConnectionId::random().to_string(),
                "vpnIp": "10.8.77.5",
                "serverName": "fr-par-01",
                "configBase64": STANDARD.encode(config.as_bytes()),
                "downloadFilename": "securevpn-paris.ovpn"
            });
            if !*state.omit_plain_config.lock().await {
                payload["config"] = json!(config);
            }
            (StatusCode::OK, Json(payload))
        }
        Some("disconnect") => {
            state.disconnect_requests.lock().await.push(body);
            // The caller is expected to ignore this entirely.
            (StatusCode::NOT_FOUND, Json(json!({"error": "connection not found"})))
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "unknown action"}))),
    }
}

async fn mock_logs(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
    assert_eq!(query.get("userId").map(String::as_str), Some("7"));
    Json(json!({
        "success": true,
        "logs": [
            {"timestamp": "14:32:18", "event": "Connected", "details": "Secure link established (AES-256-GCM)"},
            {"timestamp": "14:32:15", "event": "Connecting...", "details": "Initializing OpenVPN to Paris"}
        ]
    }))
}

async fn spawn_backend() -> anyhow::Result<(String, MockBackendState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MockBackendState::default();
    let app = Router::new()
        .route("/servers", get(mock_servers))
        .route("/auth", post(mock_auth))
        .route("/tunnel", post(mock_tunnel))
        .route("/logs", get(mock_logs))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn control_plane_for(base: &str) -> HttpControlPlane {
    HttpControlPlane::new(Endpoints::from_base(base).expect("endpoints"))
}

fn login_request() -> AuthRequest {
    AuthRequest {
        action: AuthAction::Login,
        email: "alice@example.com".to_string(),
        password: "pw".to_string(),
        username: None,
    }
}

#[tokio::test]
async fn fetch_servers_parses_directory_payload() {
    let (base, _state) = spawn_backend().await.expect("spawn backend");
    let plane = control_plane_for(&base);

    let servers = plane.fetch_servers().await.expect("servers");
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, ServerId::new("1"));
    assert_eq!(servers[0].ping_ms, 18);
    assert_eq!(servers[0].address.as_deref(), Some("62.210.84.99"));
    assert_eq!(servers[0].port, Some(1194));
}

#[tokio::test]
async fn fetch_servers_surfaces_transport_failure() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    *state.fail_directory.lock().await = true;
    let plane = control_plane_for(&base);

    plane.fetch_servers().await.expect_err("500 must fail");
}

#[tokio::test]
async fn authenticate_rejection_carries_service_message() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    *state.reject_auth.lock().await = true;
    let plane = control_plane_for(&base);

    let err = plane
        .authenticate(login_request())
        .await
        .expect_err("rejected");
    assert!(err.to_string().contains("invalid email or password"));
}

#[tokio::test]
async fn open_tunnel_decodes_base64_config_when_plain_config_is_absent() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    *state.omit_plain_config.lock().await = true;
    let plane = control_plane_for(&base);

    let server = ServerInfo {
        id: ServerId::new("1"),
        country: "France".to_string(),
        city: "Paris".to_string(),
        flag: "🇫🇷".to_string(),
        load: 39,
        ping_ms: 18,
        server_name: None,
        address: None,
        port: None,
        protocol: None,
    };
    let tunnel = plane
        .open_tunnel(UserId(7), &server, Protocol::OpenVpn, Encryption::Aes256Gcm)
        .await
        .expect("tunnel");

    assert_eq!(tunnel.vpn_ip, "10.8.77.5");
    assert_eq!(
        tunnel.config.as_deref(),
        Some("client\ndev tun\ncipher AES-256-GCM\n")
    );
    assert_eq!(tunnel.download_filename.as_deref(), Some("securevpn-paris.ovpn"));
}

#[tokio::test]
async fn open_tunnel_propagates_collaborator_rejection() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    *state.reject_connect.lock().await = Some("no slots".to_string());
    let plane = control_plane_for(&base);

    let server = ServerInfo {
        id: ServerId::new("1"),
        country: "France".to_string(),
        city: "Paris".to_string(),
        flag: "🇫🇷".to_string(),
        load: 39,
        ping_ms: 18,
        server_name: None,
        address: None,
        port: None,
        protocol: None,
    };
    let err = plane
        .open_tunnel(UserId(7), &server, Protocol::OpenVpn, Encryption::Aes256Gcm)
        .await
        .expect_err("rejected");
    assert!(err.to_string().contains("no slots"));
}

#[tokio::test]
async fn close_tunnel_posts_and_ignores_collaborator_status() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    let plane = control_plane_for(&base);

    let connection_id = ConnectionId::random();
    plane
        .close_tunnel(UserId(7), connection_id)
        .await
        .expect("404 response is still an acknowledgment");

    let requests = state.disconnect_requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["action"], json!("disconnect"));
    assert_eq!(requests[0]["userId"], json!(7));
    assert_eq!(requests[0]["connectionId"], json!(connection_id.to_string()));
}

#[tokio::test]
async fn fetch_logs_sends_user_id_and_parses_records() {
    let (base, _state) = spawn_backend().await.expect("spawn backend");
    let plane = control_plane_for(&base);

    let logs = plane.fetch_logs(UserId(7)).await.expect("logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].event, "Connected");
    assert_eq!(logs[1].timestamp, "14:32:15");
}

#[tokio::test]
async fn controller_round_trip_over_http() {
    let (base, state) = spawn_backend().await.expect("spawn backend");
    let controller = SessionController::new(
        Arc::new(control_plane_for(&base)),
        Arc::new(EphemeralSessionStore::default()),
    );

    controller
        .authenticate(AuthAction::Login, "alice@example.com", "pw", None)
        .await
        .expect("auth");
    controller.refresh_servers().await.expect("directory");

    let link = controller.connect().await.expect("connect");
    assert_eq!(link.vpn_ip, "10.8.77.5");
    let config = link.config.expect("downloadable config");
    assert_eq!(config.filename, "securevpn-paris.ovpn");
    assert!(config.content.contains("cipher AES-256-GCM"));

    controller.disconnect().await.expect("disconnect");
    assert_eq!(
        controller.status().await,
        shared::domain::ConnectionStatus::Disconnected
    );
    assert_eq!(state.disconnect_requests.lock().await.len(), 1);
}
