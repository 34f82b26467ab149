use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ConnectionId, SubscriptionTier, UserId, UserProfile};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredServer {
    pub id: i64,
    pub server_name: String,
    pub country: String,
    pub city: String,
    pub flag_emoji: String,
    pub ip_address: String,
    pub port: u16,
    pub protocol: String,
    pub current_load: u8,
    pub ping_ms: u32,
}

#[derive(Debug, Clone)]
pub struct StoredLogEntry {
    pub event_type: String,
    pub event_details: String,
    pub timestamp: DateTime<Utc>,
}

/// Seed rows for an empty directory table; mirrors the launch server fleet.
const DEFAULT_SERVERS: &[(&str, &str, &str, &str, &str, u16, u8, u32)] = &[
    ("us-nyc-01", "United States", "New York", "🇺🇸", "45.133.10.21", 1194, 45, 23),
    ("us-lax-01", "United States", "Los Angeles", "🇺🇸", "45.133.11.34", 1194, 67, 35),
    ("gb-lon-01", "United Kingdom", "London", "🇬🇧", "77.81.142.7", 1194, 32, 12),
    ("de-ber-01", "Germany", "Berlin", "🇩🇪", "185.117.72.88", 1194, 28, 8),
    ("nl-ams-01", "Netherlands", "Amsterdam", "🇳🇱", "89.46.223.15", 1194, 51, 15),
    ("fr-par-01", "France", "Paris", "🇫🇷", "62.210.84.99", 1194, 39, 18),
    ("jp-tyo-01", "Japan", "Tokyo", "🇯🇵", "103.75.116.42", 1194, 73, 89),
    ("sg-sin-01", "Singapore", "Singapore", "🇸🇬", "128.199.72.10", 1194, 62, 102),
    ("ca-tor-01", "Canada", "Toronto", "🇨🇦", "158.69.34.120", 1194, 41, 28),
    ("au-syd-01", "Australia", "Sydney", "🇦🇺", "139.99.145.8", 1194, 55, 156),
];

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a new account. Returns `None` when the email is already taken.
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        username: &str,
        tier: SubscriptionTier,
    ) -> Result<Option<UserProfile>> {
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        if taken.is_some() {
            return Ok(None);
        }

        let rec = sqlx::query(
            "INSERT INTO users (email, password_hash, username, subscription_tier)
             VALUES (?, ?, ?, ?)
             RETURNING id, email, username, subscription_tier",
        )
        .bind(email)
        .bind(password_hash)
        .bind(username)
        .bind(tier_as_str(tier))
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(user_profile_from_row(&rec)))
    }

    /// Credential check for login; bumps last_login on a match.
    pub async fn find_user_by_credentials(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, email, username, subscription_tier
             FROM users
             WHERE email = ? AND password_hash = ? AND is_active = 1",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user = user_profile_from_row(&row);

        sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(user.id.0)
            .execute(&self.pool)
            .await?;

        Ok(Some(user))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn list_active_servers(&self) -> Result<Vec<StoredServer>> {
        let rows = sqlx::query(
            "SELECT id, server_name, country, city, flag_emoji, ip_address, port, protocol, current_load, ping_ms
             FROM vpn_servers
             WHERE is_active = 1
             ORDER BY ping_ms ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(stored_server_from_row).collect())
    }

    pub async fn server_by_id(&self, server_id: i64) -> Result<Option<StoredServer>> {
        let row = sqlx::query(
            "SELECT id, server_name, country, city, flag_emoji, ip_address, port, protocol, current_load, ping_ms
             FROM vpn_servers
             WHERE id = ? AND is_active = 1",
        )
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(stored_server_from_row))
    }

    /// Populates the directory with the default fleet when the table is empty.
    /// Returns the number of rows inserted.
    pub async fn seed_servers_if_empty(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vpn_servers")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Ok(0);
        }

        let mut inserted = 0u64;
        for (name, country, city, flag, ip, port, load, ping) in DEFAULT_SERVERS {
            sqlx::query(
                "INSERT INTO vpn_servers
                 (server_name, country, city, flag_emoji, ip_address, port, protocol, current_load, ping_ms)
                 VALUES (?, ?, ?, ?, ?, ?, 'OpenVPN', ?, ?)",
            )
            .bind(name)
            .bind(country)
            .bind(city)
            .bind(flag)
            .bind(ip)
            .bind(*port as i64)
            .bind(*load as i64)
            .bind(*ping as i64)
            .execute(&self.pool)
            .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn open_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        server_id: i64,
        vpn_ip: &str,
    ) -> Result<DateTime<Utc>> {
        let rec = sqlx::query(
            "INSERT INTO vpn_connections (id, user_id, server_id, connection_status, vpn_ip)
             VALUES (?, ?, ?, 'connected', ?)
             RETURNING connected_at",
        )
        .bind(connection_id.to_string())
        .bind(user_id.0)
        .bind(server_id)
        .bind(vpn_ip)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<DateTime<Utc>, _>(0))
    }

    /// Marks a connection closed. Returns false when no open row matched.
    pub async fn close_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE vpn_connections
             SET disconnected_at = CURRENT_TIMESTAMP,
                 connection_status = 'disconnected'
             WHERE id = ? AND user_id = ?",
        )
        .bind(connection_id.to_string())
        .bind(user_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn append_connection_log(
        &self,
        user_id: UserId,
        connection_id: Option<ConnectionId>,
        event_type: &str,
        event_details: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO connection_logs (user_id, connection_id, event_type, event_details)
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(connection_id.map(|id| id.to_string()))
        .bind(event_type)
        .bind(event_details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_logs_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<StoredLogEntry>> {
        let rows = sqlx::query(
            "SELECT event_type, event_details, timestamp
             FROM connection_logs
             WHERE user_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredLogEntry {
                event_type: r.get::<String, _>(0),
                event_details: r.get::<String, _>(1),
                timestamp: r.get::<DateTime<Utc>, _>(2),
            })
            .collect())
    }

    pub async fn store_config(
        &self,
        user_id: UserId,
        server_id: i64,
        config_type: &str,
        encryption: &str,
        config_content: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<i64> {
        let rec = sqlx::query(
            "INSERT INTO vpn_configs (user_id, server_id, config_type, encryption, config_content, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(user_id.0)
        .bind(server_id)
        .bind(config_type)
        .bind(encryption)
        .bind(config_content)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<i64, _>(0))
    }

    /// The client's single named local session record (the "remember me"
    /// slot). Stores the serialized authenticated user.
    pub async fn save_session(&self, slot: &str, user: &UserProfile) -> Result<()> {
        let user_json = serde_json::to_string(user)?;
        sqlx::query(
            "INSERT INTO saved_sessions (slot, user_json, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(slot) DO UPDATE SET user_json = excluded.user_json, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(slot)
        .bind(user_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_session(&self, slot: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query("SELECT user_json FROM saved_sessions WHERE slot = ?")
            .bind(slot)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_json = row.get::<String, _>(0);
        let user = serde_json::from_str(&user_json)
            .with_context(|| format!("corrupt saved session in slot '{slot}'"))?;
        Ok(Some(user))
    }

    pub async fn clear_session(&self, slot: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM saved_sessions WHERE slot = ?")
            .bind(slot)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

fn tier_as_str(tier: SubscriptionTier) -> &'static str {
    match tier {
        SubscriptionTier::Free => "free",
        SubscriptionTier::Premium => "premium",
    }
}

fn tier_from_str(raw: &str) -> SubscriptionTier {
    match raw {
        "free" => SubscriptionTier::Free,
        _ => SubscriptionTier::Premium,
    }
}

fn user_profile_from_row(row: &sqlx::sqlite::SqliteRow) -> UserProfile {
    UserProfile {
        id: UserId(row.get::<i64, _>(0)),
        email: row.get::<String, _>(1),
        username: row.get::<String, _>(2),
        subscription_tier: tier_from_str(&row.get::<String, _>(3)),
    }
}

fn stored_server_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredServer {
    StoredServer {
        id: row.get::<i64, _>(0),
        server_name: row.get::<String, _>(1),
        country: row.get::<String, _>(2),
        city: row.get::<String, _>(3),
        flag_emoji: row.get::<String, _>(4),
        ip_address: row.get::<String, _>(5),
        port: row.get::<i64, _>(6) as u16,
        protocol: row.get::<String, _>(7),
        current_load: row.get::<i64, _>(8) as u8,
        ping_ms: row.get::<i64, _>(9) as u32,
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
