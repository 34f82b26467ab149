use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{encode_config_base64, ApiContext};
use shared::{
    domain::{ConnectionId, Encryption, Protocol, UserId},
    error::{ApiError, ErrorCode},
    protocol::{AckResponse, AuthAction, AuthRequest, AuthResponse, ConnectResponse, DirectoryResponse, LogsResponse},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TunnelRequest {
    #[serde(rename_all = "camelCase")]
    Connect {
        user_id: i64,
        server_id: String,
        #[serde(default)]
        protocol: Protocol,
        #[serde(default)]
        encryption: Encryption,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect {
        user_id: i64,
        connection_id: ConnectionId,
    },
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(rename = "userId")]
    user_id: i64,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth", post(handle_auth))
        .route("/servers", get(handle_servers))
        .route("/tunnel", post(handle_tunnel))
        .route("/logs", get(handle_logs))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn handle_auth(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> (StatusCode, Json<AuthResponse>) {
    let result = match request.action {
        AuthAction::Register => server_api::register(
            &state.api,
            &request.email,
            &request.password,
            request.username.as_deref(),
        )
        .await
        .map(|user| (StatusCode::CREATED, user, "account created")),
        AuthAction::Login => server_api::login(&state.api, &request.email, &request.password)
            .await
            .map(|user| (StatusCode::OK, user, "signed in")),
    };

    match result {
        Ok((status, user, message)) => (
            status,
            Json(AuthResponse {
                success: true,
                user: Some(user),
                message: Some(message.to_string()),
            }),
        ),
        Err(err) => (
            status_for(&err),
            Json(AuthResponse {
                success: false,
                user: None,
                message: Some(err.message),
            }),
        ),
    }
}

async fn handle_servers(State(state): State<AppState>) -> Response {
    match server_api::list_servers(&state.api).await {
        Ok(servers) => Json(DirectoryResponse {
            success: true,
            servers,
        })
        .into_response(),
        Err(err) => {
            error!("directory listing failed: {err}");
            (
                status_for(&err),
                Json(DirectoryResponse {
                    success: false,
                    servers: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_tunnel(State(state): State<AppState>, Json(request): Json<TunnelRequest>) -> Response {
    match request {
        TunnelRequest::Connect {
            user_id,
            server_id,
            protocol,
            encryption,
        } => {
            match server_api::connect(&state.api, UserId(user_id), &server_id, protocol, encryption)
                .await
            {
                Ok(established) => Json(ConnectResponse {
                    success: true,
                    connection_id: Some(established.connection_id),
                    vpn_ip: Some(established.vpn_ip),
                    server_name: Some(established.server_name),
                    connected_at: Some(established.connected_at),
                    config_base64: Some(encode_config_base64(&established.config)),
                    config: Some(established.config),
                    download_filename: Some(established.download_filename),
                    error: None,
                })
                .into_response(),
                Err(err) => (
                    status_for(&err),
                    Json(ConnectResponse {
                        success: false,
                        error: Some(err.message),
                        ..Default::default()
                    }),
                )
                    .into_response(),
            }
        }
        TunnelRequest::Disconnect {
            user_id,
            connection_id,
        } => match server_api::disconnect(&state.api, UserId(user_id), connection_id).await {
            Ok(()) => Json(AckResponse {
                success: true,
                message: Some("Disconnected from VPN".to_string()),
                error: None,
            })
            .into_response(),
            Err(err) => (
                status_for(&err),
                Json(AckResponse {
                    success: false,
                    message: None,
                    error: Some(err.message),
                }),
            )
                .into_response(),
        },
    }
}

async fn handle_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> (StatusCode, Json<LogsResponse>) {
    match server_api::list_logs(&state.api, UserId(query.user_id)).await {
        Ok(logs) => (StatusCode::OK, Json(LogsResponse { success: true, logs })),
        Err(err) => (
            status_for(&err),
            Json(LogsResponse {
                success: false,
                logs: Vec::new(),
            }),
        ),
    }
}

fn status_for(err: &ApiError) -> StatusCode {
    match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;

    let storage = Storage::new(&database_url).await?;
    storage.health_check().await?;
    let seeded = storage.seed_servers_if_empty().await?;
    if seeded > 0 {
        info!(servers = seeded, "directory seeded with default fleet");
    }

    let state = AppState {
        api: ApiContext { storage },
    };

    let listener = tokio::net::TcpListener::bind(&settings.server_bind).await?;
    info!(bind = %settings.server_bind, "securevpn placeholder services listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
