//! Transport-level settings for the REST client: proxy and TLS trust.

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::{TfsError, TfsResult};

/// Proxy and TLS settings applied underneath the REST client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Proxy for all requests (e.g. `http://proxy.corp:8080`)
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Extra trust store holding the proxy's or server's root certificate
    #[serde(default)]
    pub keystore_path: Option<PathBuf>,
    /// Password for the trust store; encrypted stores are not supported
    #[serde(default)]
    pub keystore_password: Option<String>,
    /// `PEM` or `DER`
    #[serde(default = "default_trust_store_type")]
    pub trust_store_type: String,
    #[serde(default = "default_trust_manager_algorithm")]
    pub trust_manager_algorithm: String,
    /// `TLS` (any version), `TLSv1.2` or `TLSv1.3` as the minimum
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
}

fn default_trust_store_type() -> String {
    "PEM".to_string()
}

fn default_trust_manager_algorithm() -> String {
    "PKIX".to_string()
}

fn default_security_protocol() -> String {
    "TLS".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            keystore_path: None,
            keystore_password: None,
            trust_store_type: default_trust_store_type(),
            trust_manager_algorithm: default_trust_manager_algorithm(),
            security_protocol: default_security_protocol(),
        }
    }
}

/// Treat empty or whitespace-only values as unset.
fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl TransportConfig {
    /// Overlay `TFS_*` environment variables on top of `self`.
    pub fn apply_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().and_then(non_blank);

        if let Some(v) = var("TFS_PROXY_URL") {
            self.proxy_url = Some(v);
        }
        if let Some(v) = var("TFS_KEYSTORE_PATH") {
            self.keystore_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("TFS_KEYSTORE_PASSWORD") {
            self.keystore_password = Some(v);
        }
        if let Some(v) = var("TFS_TRUST_STORE_TYPE") {
            self.trust_store_type = v;
        }
        if let Some(v) = var("TFS_TRUST_MANAGER_ALGORITHM") {
            self.trust_manager_algorithm = v;
        }
        if let Some(v) = var("TFS_SECURITY_PROTOCOL") {
            self.security_protocol = v;
        }
        self
    }

    fn min_tls_version(&self) -> TfsResult<Option<reqwest::tls::Version>> {
        match self.security_protocol.to_ascii_uppercase().as_str() {
            "TLS" | "SSL" => Ok(None),
            "TLSV1.2" => Ok(Some(reqwest::tls::Version::TLS_1_2)),
            "TLSV1.3" => Ok(Some(reqwest::tls::Version::TLS_1_3)),
            other => Err(TfsError::Config(format!(
                "Unsupported security protocol '{}'. Valid values: TLS, TLSv1.2, TLSv1.3",
                other
            ))),
        }
    }

    fn root_certificate(&self) -> TfsResult<Option<reqwest::Certificate>> {
        let Some(path) = self.keystore_path.as_ref() else {
            return Ok(None);
        };
        if self.keystore_password.is_some() {
            tracing::warn!("Trust store password is ignored; only unencrypted PEM/DER stores are read");
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read trust store {}", path.display()))?;
        let cert = match self.trust_store_type.to_ascii_uppercase().as_str() {
            "PEM" => reqwest::Certificate::from_pem(&bytes)?,
            "DER" => reqwest::Certificate::from_der(&bytes)?,
            other => {
                return Err(TfsError::Config(format!(
                    "Unsupported trust store type '{}'. Valid values: PEM, DER",
                    other
                )));
            }
        };
        Ok(Some(cert))
    }

    /// Apply proxy and TLS settings to a client builder.
    pub fn configure(&self, mut builder: reqwest::ClientBuilder) -> TfsResult<reqwest::ClientBuilder> {
        if let Some(proxy) = self.proxy_url.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            tracing::debug!(
                proxy,
                trust_manager_algorithm = %self.trust_manager_algorithm,
                "Routing TFS requests through proxy"
            );
        }
        if let Some(cert) = self.root_certificate()? {
            builder = builder.add_root_certificate(cert);
        }
        if let Some(version) = self.min_tls_version()? {
            builder = builder.min_tls_version(version);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: LazyLock<std::sync::Mutex<()>> = LazyLock::new(|| std::sync::Mutex::new(()));

    #[test]
    fn defaults_match_documented_values() {
        let config = TransportConfig::default();
        assert_eq!(config.trust_store_type, "PEM");
        assert_eq!(config.trust_manager_algorithm, "PKIX");
        assert_eq!(config.security_protocol, "TLS");
        assert!(config.proxy_url.is_none());
    }

    #[test]
    fn env_overrides_and_blank_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("TFS_PROXY_URL", "http://proxy.corp:8080");
            std::env::set_var("TFS_SECURITY_PROTOCOL", "  ");
        }
        let config = TransportConfig::default().apply_env();
        unsafe {
            std::env::remove_var("TFS_PROXY_URL");
            std::env::remove_var("TFS_SECURITY_PROTOCOL");
        }

        assert_eq!(config.proxy_url.as_deref(), Some("http://proxy.corp:8080"));
        assert_eq!(config.security_protocol, "TLS");
    }

    #[test]
    fn tls_protocol_names_are_parsed() {
        let mut config = TransportConfig::default();
        assert!(config.min_tls_version().unwrap().is_none());
        config.security_protocol = "TLSv1.2".into();
        assert_eq!(
            config.min_tls_version().unwrap(),
            Some(reqwest::tls::Version::TLS_1_2)
        );
        config.security_protocol = "SSLv3".into();
        assert!(config.min_tls_version().is_err());
    }

    #[test]
    fn missing_trust_store_is_an_error() {
        let config = TransportConfig {
            keystore_path: Some(PathBuf::from("/nonexistent/trust.pem")),
            ..Default::default()
        };
        let err = config.root_certificate().unwrap_err();
        assert!(err.to_string().contains("trust store"));
    }

    #[test]
    fn unknown_trust_store_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jks");
        std::fs::write(&path, b"not a cert").unwrap();
        let config = TransportConfig {
            keystore_path: Some(path),
            trust_store_type: "JKS".into(),
            ..Default::default()
        };
        assert!(matches!(config.root_certificate(), Err(TfsError::Config(_))));
    }

    #[test]
    fn default_config_builds_a_client() {
        let builder = TransportConfig::default()
            .configure(reqwest::Client::builder())
            .unwrap();
        assert!(builder.build().is_ok());
    }
}
