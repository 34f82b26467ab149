use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{
        ConnectionId, Encryption, Protocol, ServerId, ServerInfo, UserId, UserProfile,
        SubscriptionTier,
    },
    protocol::{AuthRequest, LogRecord},
};
use tokio::time::sleep;

use crate::{ControlPlane, EstablishedTunnel};

const SIMULATED_CONNECT_DELAY: Duration = Duration::from_secs(2);
const SIMULATED_VPN_IP: &str = "94.156.177.42";

/// Offline collaborator: canned directory, a fixed connect delay and no
/// failure path. Backs the demo mode and makes controller tests hermetic.
pub struct SimulatedControlPlane {
    connect_delay: Duration,
    virtual_ip: String,
}

impl Default for SimulatedControlPlane {
    fn default() -> Self {
        Self {
            connect_delay: SIMULATED_CONNECT_DELAY,
            virtual_ip: SIMULATED_VPN_IP.to_string(),
        }
    }
}

impl SimulatedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn canned_servers() -> Vec<ServerInfo> {
        fn entry(id: &str, country: &str, city: &str, flag: &str, load: u8, ping_ms: u32) -> ServerInfo {
            ServerInfo {
                id: ServerId::new(id),
                country: country.to_string(),
                city: city.to_string(),
                flag: flag.to_string(),
                load,
                ping_ms,
                server_name: None,
                address: None,
                port: None,
                protocol: None,
            }
        }

        vec![
            entry("1", "United States", "New York", "🇺🇸", 45, 23),
            entry("2", "United States", "Los Angeles", "🇺🇸", 67, 35),
            entry("3", "United Kingdom", "London", "🇬🇧", 32, 12),
            entry("4", "Germany", "Berlin", "🇩🇪", 28, 8),
            entry("5", "Netherlands", "Amsterdam", "🇳🇱", 51, 15),
            entry("6", "France", "Paris", "🇫🇷", 39, 18),
            entry("7", "Japan", "Tokyo", "🇯🇵", 73, 89),
            entry("8", "Singapore", "Singapore", "🇸🇬", 62, 102),
            entry("9", "Canada", "Toronto", "🇨🇦", 41, 28),
            entry("10", "Australia", "Sydney", "🇦🇺", 55, 156),
        ]
    }
}

#[async_trait]
impl ControlPlane for SimulatedControlPlane {
    async fn fetch_servers(&self) -> Result<Vec<ServerInfo>> {
        Ok(Self::canned_servers())
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<UserProfile> {
        let username = request
            .username
            .unwrap_or_else(|| {
                request
                    .email
                    .split('@')
                    .next()
                    .unwrap_or("demo")
                    .to_string()
            });
        Ok(UserProfile {
            id: UserId(1),
            email: request.email,
            username,
            subscription_tier: SubscriptionTier::Premium,
        })
    }

    async fn open_tunnel(
        &self,
        _user_id: UserId,
        server: &ServerInfo,
        _protocol: Protocol,
        _encryption: Encryption,
    ) -> Result<EstablishedTunnel> {
        sleep(self.connect_delay).await;
        Ok(EstablishedTunnel {
            connection_id: ConnectionId::random(),
            vpn_ip: self.virtual_ip.clone(),
            server_name: Some(format!("{}, {}", server.city, server.country)),
            config: None,
            download_filename: None,
        })
    }

    async fn close_tunnel(&self, _user_id: UserId, _connection_id: ConnectionId) -> Result<()> {
        Ok(())
    }

    async fn fetch_logs(&self, _user_id: UserId) -> Result<Vec<LogRecord>> {
        Ok(Vec::new())
    }
}
