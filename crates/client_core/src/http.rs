use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use shared::{
    domain::{ConnectionId, Encryption, Protocol, ServerInfo, UserId, UserProfile},
    protocol::{
        AuthRequest, AuthResponse, ConnectRequest, ConnectResponse, DirectoryResponse,
        DisconnectRequest, LogRecord, LogsResponse,
    },
};
use url::Url;

use crate::{ControlPlane, EstablishedTunnel};

/// Resolved collaborator addresses. Explicit configuration handed to the
/// controller at construction instead of module-level constants.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub directory_url: Url,
    pub auth_url: Url,
    pub tunnel_url: Url,
    pub logs_url: Url,
}

impl Endpoints {
    /// Derives the four collaborator routes from one base URL.
    pub fn from_base(base: &str) -> Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&base).with_context(|| format!("invalid base url '{base}'"))?;
        Ok(Self {
            directory_url: base.join("servers")?,
            auth_url: base.join("auth")?,
            tunnel_url: base.join("tunnel")?,
            logs_url: base.join("logs")?,
        })
    }
}

/// Networked collaborator implementation. No timeout is applied to the
/// outbound calls; a connect in flight resolves whenever the service does.
pub struct HttpControlPlane {
    http: Client,
    endpoints: Endpoints,
}

impl HttpControlPlane {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            http: Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn fetch_servers(&self) -> Result<Vec<ServerInfo>> {
        let response: DirectoryResponse = self
            .http
            .get(self.endpoints.directory_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.success {
            return Err(anyhow!("directory reported failure"));
        }
        Ok(response.servers)
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<UserProfile> {
        // Rejections (401) still carry a JSON body with the reason, so the
        // body is read regardless of the status code.
        let body: AuthResponse = self
            .http
            .post(self.endpoints.auth_url.clone())
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        match (body.success, body.user) {
            (true, Some(user)) => Ok(user),
            _ => Err(anyhow!(body
                .message
                .unwrap_or_else(|| "authentication rejected".to_string()))),
        }
    }

    async fn open_tunnel(
        &self,
        user_id: UserId,
        server: &ServerInfo,
        protocol: Protocol,
        encryption: Encryption,
    ) -> Result<EstablishedTunnel> {
        let request = ConnectRequest::new(user_id, server.id.0.clone(), protocol, encryption);
        let body: ConnectResponse = self
            .http
            .post(self.endpoints.tunnel_url.clone())
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if !body.success {
            return Err(anyhow!(body
                .error
                .unwrap_or_else(|| "connect rejected".to_string())));
        }

        let connection_id = body
            .connection_id
            .ok_or_else(|| anyhow!("connect response missing connectionId"))?;
        let vpn_ip = body
            .vpn_ip
            .ok_or_else(|| anyhow!("connect response missing vpnIp"))?;

        let config = match (body.config, body.config_base64) {
            (Some(content), _) => Some(content),
            (None, Some(encoded)) => {
                let decoded = STANDARD
                    .decode(encoded)
                    .context("invalid base64 config payload")?;
                Some(String::from_utf8(decoded).context("config payload is not utf-8")?)
            }
            (None, None) => None,
        };

        Ok(EstablishedTunnel {
            connection_id,
            vpn_ip,
            server_name: body.server_name,
            config,
            download_filename: body.download_filename,
        })
    }

    async fn close_tunnel(&self, user_id: UserId, connection_id: ConnectionId) -> Result<()> {
        // Acknowledged-only: the response payload and status are ignored by
        // the caller, only a transport failure surfaces.
        self.http
            .post(self.endpoints.tunnel_url.clone())
            .json(&DisconnectRequest::new(user_id, connection_id))
            .send()
            .await?;
        Ok(())
    }

    async fn fetch_logs(&self, user_id: UserId) -> Result<Vec<LogRecord>> {
        let response: LogsResponse = self
            .http
            .get(self.endpoints.logs_url.clone())
            .query(&[("userId", user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.success {
            return Err(anyhow!("log history reported failure"));
        }
        Ok(response.logs)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
