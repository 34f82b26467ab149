use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use shared::{
    domain::{
        ConnectionId, ConnectionStatus, Encryption, Protocol, ServerInfo, UserId, UserProfile,
    },
    protocol::{AuthAction, AuthRequest, LogRecord},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub mod error;
mod http;
mod session_store;
mod sim;

pub use error::SessionError;
pub use http::{Endpoints, HttpControlPlane};
pub use session_store::DurableSessionStore;
pub use sim::SimulatedControlPlane;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A successfully negotiated tunnel as reported by the connect collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct EstablishedTunnel {
    pub connection_id: ConnectionId,
    pub vpn_ip: String,
    pub server_name: Option<String>,
    pub config: Option<String>,
    pub download_filename: Option<String>,
}

/// The collaborator seam: directory, auth, connect/disconnect and log
/// history live behind one strategy interface so the offline simulation and
/// the networked client share a single controller.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn fetch_servers(&self) -> Result<Vec<ServerInfo>>;
    async fn authenticate(&self, request: AuthRequest) -> Result<UserProfile>;
    async fn open_tunnel(
        &self,
        user_id: UserId,
        server: &ServerInfo,
        protocol: Protocol,
        encryption: Encryption,
    ) -> Result<EstablishedTunnel>;
    async fn close_tunnel(&self, user_id: UserId, connection_id: ConnectionId) -> Result<()>;
    async fn fetch_logs(&self, user_id: UserId) -> Result<Vec<LogRecord>>;
}

/// Persisted-session capability: one named local record remembering the
/// signed-in user across restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<UserProfile>>;
    async fn save(&self, user: &UserProfile) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory store; the session dies with the process.
#[derive(Default)]
pub struct EphemeralSessionStore {
    user: Mutex<Option<UserProfile>>,
}

#[async_trait]
impl SessionStore for EphemeralSessionStore {
    async fn load(&self) -> Result<Option<UserProfile>> {
        Ok(self.user.lock().await.clone())
    }

    async fn save(&self, user: &UserProfile) -> Result<()> {
        *self.user.lock().await = Some(user.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.user.lock().await = None;
        Ok(())
    }
}

/// One event-log line. Newest entries sit at index 0; the sequence is
/// unbounded and in-memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub event: String,
    pub details: String,
}

impl LogEntry {
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Muted,
    Pending,
    Secure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBadge {
    pub label: &'static str,
    pub tone: StatusTone,
}

pub fn status_badge(status: ConnectionStatus) -> StatusBadge {
    match status {
        ConnectionStatus::Disconnected => StatusBadge {
            label: "Not protected",
            tone: StatusTone::Muted,
        },
        ConnectionStatus::Connecting => StatusBadge {
            label: "Connecting...",
            tone: StatusTone::Pending,
        },
        ConnectionStatus::Connected => StatusBadge {
            label: "Protected",
            tone: StatusTone::Secure,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfig {
    pub content: String,
    pub filename: String,
}

/// Link details that are only meaningful while status is connected; cleared
/// whenever the session returns to disconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLink {
    pub connection_id: ConnectionId,
    pub vpn_ip: String,
    pub server_name: Option<String>,
    pub config: Option<TunnelConfig>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    LogAppended(LogEntry),
    ServersLoaded(Vec<ServerInfo>),
    AuthChanged(Option<UserProfile>),
    /// User-visible error notification; never fatal.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub user: Option<UserProfile>,
    pub selected_server: Option<ServerInfo>,
    pub protocol: Protocol,
    pub encryption: Encryption,
    pub link: Option<ActiveLink>,
}

struct SessionState {
    status: ConnectionStatus,
    user: Option<UserProfile>,
    servers: Vec<ServerInfo>,
    selected: Option<ServerInfo>,
    protocol: Protocol,
    encryption: Encryption,
    link: Option<ActiveLink>,
    logs: Vec<LogEntry>,
}

/// Client-side connection session controller.
///
/// Owns the three-state lifecycle flag and all derived session data; every
/// mutation happens behind one mutex and is announced on the event channel.
/// Only one connect attempt may be in flight at a time; a second call is
/// rejected here rather than left to a disabled button.
pub struct SessionController {
    control_plane: Arc<dyn ControlPlane>,
    session_store: Arc<dyn SessionStore>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        session_store: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            control_plane,
            session_store,
            inner: Mutex::new(SessionState {
                status: ConnectionStatus::Disconnected,
                user: None,
                servers: Vec::new(),
                selected: None,
                protocol: Protocol::default(),
                encryption: Encryption::default(),
                link: None,
                logs: vec![LogEntry {
                    timestamp: Local::now(),
                    event: "System ready".to_string(),
                    details: "VPN client initialized".to_string(),
                }],
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        SessionSnapshot {
            status: guard.status,
            user: guard.user.clone(),
            selected_server: guard.selected.clone(),
            protocol: guard.protocol,
            encryption: guard.encryption,
            link: guard.link.clone(),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.lock().await.status
    }

    pub async fn badge(&self) -> StatusBadge {
        status_badge(self.status().await)
    }

    pub async fn current_user(&self) -> Option<UserProfile> {
        self.inner.lock().await.user.clone()
    }

    pub async fn servers(&self) -> Vec<ServerInfo> {
        self.inner.lock().await.servers.clone()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock().await.logs.clone()
    }

    /// Startup path: a present local record signs the user in silently, so
    /// the front end can skip the authentication prompt.
    pub async fn restore_session(&self) -> Option<UserProfile> {
        let restored = match self.session_store.load().await {
            Ok(user) => user,
            Err(err) => {
                warn!("persisted session unreadable, showing sign-in prompt: {err}");
                None
            }
        };

        let Some(user) = restored else {
            return None;
        };

        {
            let mut guard = self.inner.lock().await;
            guard.user = Some(user.clone());
        }
        self.emit(SessionEvent::AuthChanged(Some(user.clone())));
        self.append_log("Session restored", format!("Signed in as {}", user.username))
            .await;
        Some(user)
    }

    pub async fn authenticate(
        &self,
        action: AuthAction,
        email: &str,
        password: &str,
        username: Option<&str>,
    ) -> Result<UserProfile, SessionError> {
        let request = AuthRequest {
            action,
            email: email.to_string(),
            password: password.to_string(),
            username: username.map(str::to_string),
        };

        let user = match self.control_plane.authenticate(request).await {
            Ok(user) => user,
            Err(err) => {
                let message = err.to_string();
                self.emit(SessionEvent::Error(format!(
                    "Authentication failed: {message}"
                )));
                return Err(SessionError::AuthFailed(message));
            }
        };

        {
            let mut guard = self.inner.lock().await;
            guard.user = Some(user.clone());
        }
        if let Err(err) = self.session_store.save(&user).await {
            warn!(user_id = user.id.0, "failed to persist session: {err}");
        }

        self.emit(SessionEvent::AuthChanged(Some(user.clone())));
        self.append_log("Welcome", format!("Signed in as {}", user.username))
            .await;
        Ok(user)
    }

    /// Directory loader: replaces the whole collection on success and
    /// defaults the selection to the first entry. On failure the list is
    /// left alone (empty at startup), which keeps connect() blocked on its
    /// no-server precondition until a retry succeeds.
    pub async fn refresh_servers(&self) -> Result<Vec<ServerInfo>, SessionError> {
        let servers = match self.control_plane.fetch_servers().await {
            Ok(servers) => servers,
            Err(err) => {
                let message = err.to_string();
                self.emit(SessionEvent::Error(format!(
                    "Could not load server list: {message}"
                )));
                return Err(SessionError::DirectoryUnavailable(message));
            }
        };

        let first = servers.first().cloned();
        {
            let mut guard = self.inner.lock().await;
            guard.servers = servers.clone();
            guard.selected = first.clone();
        }
        self.emit(SessionEvent::ServersLoaded(servers.clone()));
        if let Some(server) = first {
            self.append_log(
                "Server check",
                format!("Ping: {}ms, reachable", server.ping_ms),
            )
            .await;
        }
        Ok(servers)
    }

    /// Pure setter; takes effect on the next connect and never touches an
    /// established link.
    pub async fn select_server(&self, server: ServerInfo) {
        self.inner.lock().await.selected = Some(server);
    }

    pub async fn select_server_by_id(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let found = guard.servers.iter().find(|s| s.id.0 == id).cloned();
        match found {
            Some(server) => {
                guard.selected = Some(server);
                true
            }
            None => false,
        }
    }

    pub async fn set_protocol(&self, protocol: Protocol) {
        self.inner.lock().await.protocol = protocol;
    }

    pub async fn set_encryption(&self, encryption: Encryption) {
        self.inner.lock().await.encryption = encryption;
    }

    pub async fn connect(&self) -> Result<ActiveLink, SessionError> {
        let (user, server, protocol, encryption) = {
            let mut guard = self.inner.lock().await;
            match guard.status {
                ConnectionStatus::Connecting => return Err(SessionError::ConnectInProgress),
                ConnectionStatus::Connected => return Err(SessionError::AlreadyConnected),
                ConnectionStatus::Disconnected => {}
            }
            let user = guard.user.clone().ok_or(SessionError::NotAuthenticated)?;
            let server = guard.selected.clone().ok_or(SessionError::NoServerSelected)?;
            guard.status = ConnectionStatus::Connecting;
            (user, server, guard.protocol, guard.encryption)
        };

        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Connecting));
        self.append_log(
            "Connecting...",
            format!("Initializing {} to {}", protocol.label(), server.city),
        )
        .await;

        let outcome = self
            .control_plane
            .open_tunnel(user.id, &server, protocol, encryption)
            .await;

        let tunnel = match outcome {
            Ok(tunnel) => tunnel,
            Err(err) => {
                let rolled_back = {
                    let mut guard = self.inner.lock().await;
                    if guard.status == ConnectionStatus::Connecting {
                        guard.status = ConnectionStatus::Disconnected;
                        guard.link = None;
                        true
                    } else {
                        false
                    }
                };
                if rolled_back {
                    self.emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
                }
                let message = err.to_string();
                self.emit(SessionEvent::Error(format!("Connection failed: {message}")));
                return Err(SessionError::ConnectFailed(message));
            }
        };

        let link = ActiveLink {
            connection_id: tunnel.connection_id,
            vpn_ip: tunnel.vpn_ip,
            server_name: tunnel.server_name,
            config: tunnel.config.map(|content| TunnelConfig {
                content,
                filename: tunnel
                    .download_filename
                    .unwrap_or_else(|| default_download_filename(&server.city)),
            }),
        };

        {
            let mut guard = self.inner.lock().await;
            if guard.status != ConnectionStatus::Connecting {
                // A logout raced the in-flight call; the local session wins
                // and the late result is dropped.
                warn!(
                    connection_id = %link.connection_id,
                    "connect resolved after sign-out; discarding tunnel"
                );
                return Err(SessionError::ConnectAborted);
            }
            guard.status = ConnectionStatus::Connected;
            guard.link = Some(link.clone());
        }

        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Connected));
        self.append_log(
            "Connected",
            format!("Secure link established ({})", encryption.label()),
        )
        .await;
        info!(vpn_ip = %link.vpn_ip, server = %server.city, "session connected");
        Ok(link)
    }

    /// Fire-and-forget toward the collaborator: the local session always
    /// ends up disconnected no matter what the service answers.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (user, link) = {
            let guard = self.inner.lock().await;
            if guard.status != ConnectionStatus::Connected {
                return Err(SessionError::NotConnected);
            }
            (guard.user.clone(), guard.link.clone())
        };

        if let (Some(user), Some(link)) = (&user, &link) {
            if let Err(err) = self
                .control_plane
                .close_tunnel(user.id, link.connection_id)
                .await
            {
                warn!(
                    connection_id = %link.connection_id,
                    "disconnect acknowledgment failed, clearing locally anyway: {err}"
                );
            }
        }

        {
            let mut guard = self.inner.lock().await;
            guard.status = ConnectionStatus::Disconnected;
            guard.link = None;
        }
        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
        self.append_log("Disconnected", "Connection closed safely").await;
        Ok(())
    }

    /// Clears the user and the persisted record, forces the status back to
    /// disconnected and tells the front end to reopen the sign-in prompt.
    pub async fn logout(&self) {
        let was_connected = {
            let mut guard = self.inner.lock().await;
            let was = guard.status != ConnectionStatus::Disconnected;
            guard.user = None;
            guard.status = ConnectionStatus::Disconnected;
            guard.link = None;
            was
        };

        if let Err(err) = self.session_store.clear().await {
            warn!("failed to clear persisted session: {err}");
        }

        if was_connected {
            self.emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
        }
        self.emit(SessionEvent::AuthChanged(None));
        self.append_log("Logged out", "Session cleared").await;
    }

    /// Pulls the persisted history the logs collaborator keeps for this
    /// user; the in-memory log is untouched.
    pub async fn fetch_log_history(&self) -> Result<Vec<LogRecord>, SessionError> {
        let user = self
            .current_user()
            .await
            .ok_or(SessionError::NotAuthenticated)?;
        self.control_plane
            .fetch_logs(user.id)
            .await
            .map_err(|err| SessionError::HistoryUnavailable(err.to_string()))
    }

    async fn append_log(&self, event: &str, details: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            event: event.to_string(),
            details: details.into(),
        };
        {
            let mut guard = self.inner.lock().await;
            guard.logs.insert(0, entry.clone());
        }
        self.emit(SessionEvent::LogAppended(entry));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

pub(crate) fn default_download_filename(city: &str) -> String {
    let slug: String = city
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("securevpn-{}.ovpn", slug.trim_matches('-'))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
