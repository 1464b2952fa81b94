use std::sync::Arc;

use async_trait::async_trait;

use super::transport::TransportConfig;
use super::{TfsClient, parse_server_url};
use crate::errors::{TfsError, TfsResult};
use crate::service::RemoteBuildService;

/// Flavor of server behind a collection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProvider {
    /// On-premise TeamFoundationServer
    Tfs,
    /// Hosted Visual Studio Online
    Vso,
}

impl ServiceProvider {
    pub fn other(self) -> Self {
        match self {
            ServiceProvider::Tfs => ServiceProvider::Vso,
            ServiceProvider::Vso => ServiceProvider::Tfs,
        }
    }

    /// Best guess from the host name. Only decides which provider is tried first.
    pub fn guess(server_url: &reqwest::Url) -> Self {
        let host = server_url.host_str().unwrap_or_default().to_ascii_lowercase();
        if host.ends_with("visualstudio.com") || host.ends_with(".tfsallin.net") {
            ServiceProvider::Vso
        } else {
            ServiceProvider::Tfs
        }
    }
}

/// Produces service handles that have already answered a request.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn validated_client(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> TfsResult<Arc<dyn RemoteBuildService>>;
}

#[derive(Debug, Clone, Default)]
pub struct TfsClientFactory {
    transport: TransportConfig,
}

impl TfsClientFactory {
    pub fn new(transport: TransportConfig) -> Self {
        Self { transport }
    }

    /// Build a client for the guessed provider and check it with `get_projects`.
    /// If the server rejects it, retry once with the other provider.
    pub async fn connect(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> TfsResult<TfsClient> {
        let url = parse_server_url(server_url)?;
        let provider = ServiceProvider::guess(&url);

        let client = TfsClient::new(server_url, provider, username, password, &self.transport)?;
        match client.get_projects().await {
            Ok(_) => return Ok(client),
            Err(e) if is_retryable(&e) => {
                tracing::warn!(
                    ?provider,
                    "Validating TFS connection failed, retrying as {:?}: {}",
                    provider.other(),
                    e
                );
            }
            Err(e) => return Err(e),
        }

        let client = TfsClient::new(
            server_url,
            provider.other(),
            username,
            password,
            &self.transport,
        )?;
        client.get_projects().await?;
        Ok(client)
    }
}

fn is_retryable(err: &TfsError) -> bool {
    matches!(err, TfsError::Http { .. } | TfsError::Transport(_))
}

#[async_trait]
impl ClientFactory for TfsClientFactory {
    async fn validated_client(
        &self,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> TfsResult<Arc<dyn RemoteBuildService>> {
        let client = self.connect(server_url, username, password).await?;
        Ok(Arc::new(client))
    }
}
