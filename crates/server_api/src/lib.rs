use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use shared::{
    domain::{ConnectionId, Encryption, Protocol, ServerId, ServerInfo, SubscriptionTier, UserId, UserProfile},
    error::{ApiError, ErrorCode},
    protocol::LogRecord,
};
use storage::{Storage, StoredServer};
use tracing::info;
use uuid::Uuid;

pub mod config;

use config::generate_openvpn_config;

const LOG_HISTORY_LIMIT: u32 = 50;
const CONFIG_VALIDITY_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

#[derive(Debug, Clone)]
pub struct EstablishedConnection {
    pub connection_id: ConnectionId,
    pub vpn_ip: String,
    pub server_name: String,
    pub connected_at: DateTime<Utc>,
    pub config: String,
    pub download_filename: String,
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn register(
    ctx: &ApiContext,
    email: &str,
    password: &str,
    username: Option<&str>,
) -> Result<UserProfile, ApiError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "email and password are required",
        ));
    }

    let username = username
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());

    let created = ctx
        .storage
        .create_user(email, &hash_password(password), &username, SubscriptionTier::Premium)
        .await
        .map_err(internal)?;

    let user = created.ok_or_else(|| {
        ApiError::new(ErrorCode::Validation, "email is already registered")
    })?;
    info!(user_id = user.id.0, "auth: account created");
    Ok(user)
}

pub async fn login(ctx: &ApiContext, email: &str, password: &str) -> Result<UserProfile, ApiError> {
    let user = ctx
        .storage
        .find_user_by_credentials(email, &hash_password(password))
        .await
        .map_err(internal)?;

    user.ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid email or password"))
}

pub async fn list_servers(ctx: &ApiContext) -> Result<Vec<ServerInfo>, ApiError> {
    let servers = ctx.storage.list_active_servers().await.map_err(internal)?;
    Ok(servers.into_iter().map(server_info_from_stored).collect())
}

pub async fn connect(
    ctx: &ApiContext,
    user_id: UserId,
    server_id: &str,
    protocol: Protocol,
    encryption: Encryption,
) -> Result<EstablishedConnection, ApiError> {
    let server = resolve_server(ctx, server_id).await?;

    let username = ctx
        .storage
        .username_for_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "user not found"))?;

    let connection_id = ConnectionId::random();
    let vpn_ip = assign_virtual_ip();
    let connected_at = ctx
        .storage
        .open_connection(connection_id, user_id, server.id, &vpn_ip)
        .await
        .map_err(internal)?;

    ctx.storage
        .append_connection_log(
            user_id,
            Some(connection_id),
            "Connected",
            &format!("Secure link established ({})", encryption.label()),
        )
        .await
        .map_err(internal)?;

    let config = generate_openvpn_config(
        &server.ip_address,
        server.port,
        encryption.label(),
        &username,
    );
    ctx.storage
        .store_config(
            user_id,
            server.id,
            protocol.label(),
            encryption.label(),
            &config,
            Utc::now() + Duration::days(CONFIG_VALIDITY_DAYS),
        )
        .await
        .map_err(internal)?;

    info!(
        user_id = user_id.0,
        server = %server.server_name,
        connection_id = %connection_id,
        "tunnel: connection opened"
    );

    Ok(EstablishedConnection {
        connection_id,
        vpn_ip,
        server_name: server.server_name,
        connected_at,
        config,
        download_filename: download_filename_for_city(&server.city),
    })
}

pub async fn disconnect(
    ctx: &ApiContext,
    user_id: UserId,
    connection_id: ConnectionId,
) -> Result<(), ApiError> {
    let closed = ctx
        .storage
        .close_connection(connection_id, user_id)
        .await
        .map_err(internal)?;
    if !closed {
        return Err(ApiError::new(ErrorCode::NotFound, "connection not found"));
    }

    ctx.storage
        .append_connection_log(
            user_id,
            Some(connection_id),
            "Disconnected",
            "Connection closed safely",
        )
        .await
        .map_err(internal)?;

    info!(user_id = user_id.0, connection_id = %connection_id, "tunnel: connection closed");
    Ok(())
}

pub async fn list_logs(ctx: &ApiContext, user_id: UserId) -> Result<Vec<LogRecord>, ApiError> {
    let rows = ctx
        .storage
        .list_logs_for_user(user_id, LOG_HISTORY_LIMIT)
        .await
        .map_err(internal)?;

    Ok(rows
        .into_iter()
        .map(|row| LogRecord {
            timestamp: row.timestamp.format("%H:%M:%S").to_string(),
            event: row.event_type,
            details: row.event_details,
        })
        .collect())
}

pub fn encode_config_base64(config: &str) -> String {
    STANDARD.encode(config.as_bytes())
}

pub fn download_filename_for_city(city: &str) -> String {
    let slug: String = city
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("securevpn-{}.ovpn", slug.trim_matches('-'))
}

async fn resolve_server(ctx: &ApiContext, server_id: &str) -> Result<StoredServer, ApiError> {
    let numeric_id = server_id
        .parse::<i64>()
        .map_err(|_| ApiError::new(ErrorCode::NotFound, "server not found"))?;
    ctx.storage
        .server_by_id(numeric_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "server not found"))
}

// 10.8.0.0/16 pool; two random octets are plenty for a placeholder service.
fn assign_virtual_ip() -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    format!("10.8.{}.{}", bytes[0], bytes[1])
}

fn server_info_from_stored(server: StoredServer) -> ServerInfo {
    let protocol = match server.protocol.as_str() {
        "IKEv2" => Some(Protocol::Ikev2),
        "WireGuard" => Some(Protocol::WireGuard),
        "OpenVPN" => Some(Protocol::OpenVpn),
        _ => None,
    };
    ServerInfo {
        id: ServerId::new(server.id.to_string()),
        country: server.country,
        city: server.city,
        flag: server.flag_emoji,
        load: server.current_load,
        ping_ms: server.ping_ms,
        server_name: Some(server.server_name),
        address: Some(server.ip_address),
        port: Some(server.port),
        protocol,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
