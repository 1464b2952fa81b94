//! Host integration after the build: report the outcome to the remote build.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use crate::build_context::LocalBuild;
use crate::client::{ClientFactory, TfsClientFactory, TransportConfig};
use crate::config::TfsConfiguration;
use crate::errors::TfsResult;
use crate::facade_factory::{BuildFacadeFactory, TfsBuildFacadeFactory};
use crate::wrapper::build_id_variable;

/// Finishes the remote build queued at build start.
///
/// Runs after the local build is finalized, so it reports the final outcome
/// and duration. It never fails the local build.
pub struct BuildNotifier {
    config: TfsConfiguration,
    facade_factory: Arc<dyn BuildFacadeFactory>,
    client_factory: Arc<dyn ClientFactory>,
}

impl BuildNotifier {
    pub fn new(config: TfsConfiguration, transport: TransportConfig) -> Self {
        Self {
            config,
            facade_factory: Arc::new(TfsBuildFacadeFactory::new()),
            client_factory: Arc::new(TfsClientFactory::new(transport)),
        }
    }

    pub fn with_facade_factory(mut self, factory: Arc<dyn BuildFacadeFactory>) -> Self {
        self.facade_factory = factory;
        self
    }

    pub fn with_client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn config(&self) -> &TfsConfiguration {
        &self.config
    }

    /// Finish the task records, then the build. Returns `false` when no remote
    /// build was queued for `local_build` or when reporting failed.
    pub async fn perform(
        &self,
        local_build: Arc<LocalBuild>,
        build_variables: &HashMap<String, String>,
    ) -> bool {
        let Some(value) = build_variables.get(&build_id_variable(&local_build)) else {
            tracing::debug!("No TFS build was queued for {}", local_build.full_display_name());
            return false;
        };

        let build_id = match value
            .trim()
            .parse::<i32>()
            .with_context(|| format!("Invalid TFS build id: {}", value))
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("{:#}", e);
                return false;
            }
        };

        match self.finish(build_id, local_build).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(build_id, "Failed to finish TFS build: {}", e);
                false
            }
        }
    }

    async fn finish(&self, build_id: i32, local_build: Arc<LocalBuild>) -> TfsResult<()> {
        let service = self
            .client_factory
            .validated_client(
                &self.config.server_url,
                &self.config.username,
                &self.config.password,
            )
            .await?;
        let facade = self
            .facade_factory
            .get_build_on_tfs(build_id, local_build, service)
            .await?;

        facade.finish_all_task_records().await?;
        facade.finish_build().await?;
        tracing::info!(build_id, "Finished TFS build");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> BuildNotifier {
        BuildNotifier::new(
            TfsConfiguration {
                server_url: "http://testurl.com".into(),
                username: "tester".into(),
                password: "testpass".into(),
                project: "testProj".into(),
                build_definition: 1,
            },
            TransportConfig::default(),
        )
    }

    #[tokio::test]
    async fn missing_variable_means_nothing_to_report() {
        let build = Arc::new(LocalBuild::new("app", 1).with_id("jenkins1"));
        let mut env = HashMap::new();
        env.insert("TfsBuildIdother".to_string(), "3".to_string());
        assert!(!notifier().perform(build, &env).await);
    }

    #[tokio::test]
    async fn non_numeric_build_id_is_rejected() {
        let build = Arc::new(LocalBuild::new("app", 1).with_id("jenkins1"));
        let mut env = HashMap::new();
        env.insert("TfsBuildIdjenkins1".to_string(), "abc".to_string());
        assert!(!notifier().perform(build, &env).await);
    }
}
