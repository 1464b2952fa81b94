//! Host integration at build start: queue the remote build and mirror the
//! build output to it.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use crate::appender::{AppenderSettings, ConsoleLogAppender};
use crate::build_context::LocalBuild;
use crate::client::{ClientFactory, TfsClientFactory, TransportConfig};
use crate::config::TfsConfiguration;
use crate::errors::TfsResult;
use crate::facade::BuildFacade;
use crate::facade_factory::{BuildFacadeFactory, TfsBuildFacadeFactory};

/// Prefix of the build variable carrying the remote build id.
pub const BUILD_ID_VARIABLE_PREFIX: &str = "TfsBuildId";

/// `TfsBuildId<local build id>`
pub fn build_id_variable(local_build: &LocalBuild) -> String {
    format!("{}{}", BUILD_ID_VARIABLE_PREFIX, local_build.id())
}

/// Build output, either untouched or mirrored to the remote console.
pub enum DecoratedOutput<W: Write> {
    Plain(W),
    Mirrored(ConsoleLogAppender<W, dyn BuildFacade>),
}

impl<W: Write> DecoratedOutput<W> {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, DecoratedOutput::Mirrored(_))
    }

    /// Flush and, when mirrored, deliver the remaining lines. Returns the
    /// original output.
    pub async fn close(self) -> io::Result<W> {
        match self {
            DecoratedOutput::Plain(mut out) => {
                out.flush()?;
                Ok(out)
            }
            DecoratedOutput::Mirrored(appender) => appender.close().await,
        }
    }
}

impl<W: Write> Write for DecoratedOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DecoratedOutput::Plain(out) => out.write(buf),
            DecoratedOutput::Mirrored(appender) => appender.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DecoratedOutput::Plain(out) => out.flush(),
            DecoratedOutput::Mirrored(appender) => appender.flush(),
        }
    }
}

/// Best-effort write of a notice into the build output.
fn write_quietly<W: Write>(out: &mut W, msg: &str) {
    if let Err(e) = out.write_all(msg.as_bytes()) {
        tracing::error!("Failed to write to build output: {}", e);
    }
}

pub struct BuildWrapper {
    config: Option<TfsConfiguration>,
    facade_factory: Arc<dyn BuildFacadeFactory>,
    client_factory: Arc<dyn ClientFactory>,
    appender_settings: AppenderSettings,
    facade: Option<Arc<dyn BuildFacade>>,
}

impl BuildWrapper {
    /// `config` of `None` means the relay is not configured for this build.
    pub fn new(config: Option<TfsConfiguration>, transport: TransportConfig) -> Self {
        Self {
            config,
            facade_factory: Arc::new(TfsBuildFacadeFactory::new()),
            client_factory: Arc::new(TfsClientFactory::new(transport)),
            appender_settings: AppenderSettings::default(),
            facade: None,
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

    pub fn with_appender_settings(mut self, settings: AppenderSettings) -> Self {
        self.appender_settings = settings;
        self
    }

    /// Facade of the remote build queued by [`decorate_logger`](Self::decorate_logger).
    pub fn facade(&self) -> Option<&Arc<dyn BuildFacade>> {
        self.facade.as_ref()
    }

    async fn create_facade(
        &self,
        config: &TfsConfiguration,
        local_build: Arc<LocalBuild>,
    ) -> TfsResult<Arc<dyn BuildFacade>> {
        let service = self
            .client_factory
            .validated_client(&config.server_url, &config.username, &config.password)
            .await?;
        self.facade_factory
            .create_build_on_tfs(&config.project, config.build_definition, local_build, service)
            .await
    }

    /// Queue the remote build, mark it started and wrap `output` in a started
    /// log appender. Any failure leaves `output` undecorated with a notice
    /// written into it.
    ///
    /// Must be called within a tokio runtime.
    pub async fn decorate_logger<W: Write>(
        &mut self,
        local_build: Arc<LocalBuild>,
        mut output: W,
    ) -> DecoratedOutput<W> {
        let Some(config) = self.config.clone() else {
            let msg = "TfsBuildNotifier is not configured, do not decorate the output logger.\n";
            tracing::info!("{}", msg.trim_end());
            write_quietly(&mut output, msg);
            return DecoratedOutput::Plain(output);
        };

        tracing::debug!(config = %config, "Queueing build on TFS");
        match self.create_facade(&config, Arc::clone(&local_build)).await {
            Ok(facade) => self.facade = Some(facade),
            Err(e) => {
                let msg = format!("Failed to queue a build on Microsoft TFS with exception: {}\n", e);
                tracing::info!("{}", msg.trim_end());
                write_quietly(&mut output, &msg);
            }
        }

        let Some(facade) = self.facade.clone() else {
            let msg = "Build is not queue on Microsoft TFS, no log will be send to Microsoft TFS.\n";
            tracing::info!("{}", msg.trim_end());
            write_quietly(&mut output, msg);
            return DecoratedOutput::Plain(output);
        };

        if let Err(e) = facade.start_build().await {
            tracing::error!(build_id = facade.remote_build_id(), "Failed to start TFS build: {}", e);
        }
        if let Err(e) = facade.start_all_task_records().await {
            tracing::error!(
                build_id = facade.remote_build_id(),
                "Failed to start TFS timeline records: {}",
                e
            );
        }

        let mut appender =
            ConsoleLogAppender::with_settings(output, facade, self.appender_settings.clone());
        appender.start();
        DecoratedOutput::Mirrored(appender)
    }

    /// Export `TfsBuildId<local id>` when a remote build was queued.
    pub fn make_build_variables(&self, local_build: &LocalBuild, env: &mut HashMap<String, String>) {
        if let Some(facade) = &self.facade {
            env.insert(
                build_id_variable(local_build),
                facade.remote_build_id().to_string(),
            );
        }
    }
}
