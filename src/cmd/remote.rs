//! Split lifecycle for hosts that run the build themselves: `start` queues the
//! remote build, `finish` reattaches in a later process and reports the outcome.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};

use tfs_relay::build_context::BuildOutcome;
use tfs_relay::client::{ClientFactory, TfsClientFactory};
use tfs_relay::facade_factory::{BuildFacadeFactory, TfsBuildFacadeFactory};
use tfs_relay::notifier::BuildNotifier;
use tfs_relay::wrapper::build_id_variable;

use super::super::{Cli, LocalBuildArgs};
use super::{load_config, local_build, require_tfs};

pub async fn cmd_start(cli: &Cli, project_dir: &Path, args: &LocalBuildArgs) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let tfs = require_tfs(&config)?;
    let build = Arc::new(local_build(project_dir, args));

    let service = TfsClientFactory::new(config.transport.clone())
        .validated_client(&tfs.server_url, &tfs.username, &tfs.password)
        .await?;
    let facade = TfsBuildFacadeFactory::new()
        .create_build_on_tfs(&tfs.project, tfs.build_definition, Arc::clone(&build), service)
        .await?;

    facade.start_build().await?;
    facade.start_all_task_records().await?;

    println!("{}={}", build_id_variable(&build), facade.remote_build_id());
    Ok(())
}

pub async fn cmd_finish(
    cli: &Cli,
    project_dir: &Path,
    args: &LocalBuildArgs,
    tfs_build_id: i32,
    result: BuildOutcome,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let tfs = require_tfs(&config)?;
    let build = Arc::new(local_build(project_dir, args).with_outcome(result));

    let mut variables = HashMap::new();
    variables.insert(build_id_variable(&build), tfs_build_id.to_string());

    let notifier = BuildNotifier::new(tfs, config.transport);
    if !notifier.perform(build, &variables).await {
        bail!("Failed to report build {} to TFS", tfs_build_id);
    }
    println!("Finished TFS build {} as {}", tfs_build_id, result);
    Ok(())
}
