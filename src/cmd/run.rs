//! Run a local command as the build: `tfs-relay run -- <cmd...>`.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use tfs_relay::build_context::{BuildOutcome, LocalBuild};
use tfs_relay::client::TransportConfig;
use tfs_relay::config::TfsConfiguration;
use tfs_relay::notifier::BuildNotifier;
use tfs_relay::wrapper::{BuildWrapper, DecoratedOutput};

use super::super::{Cli, LocalBuildArgs};
use super::{load_config, local_build};

/// Forward raw lines, terminators included, until the pipe closes.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read build output: {}", e);
                    break;
                }
            }
        }
    });
}

/// Returns the exit code to propagate.
pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    args: &LocalBuildArgs,
    command: &[String],
) -> Result<i32> {
    let config = load_config(cli, project_dir)?;
    let tfs = config.tfs_configuration();
    let build = Arc::new(local_build(project_dir, args));

    let mut wrapper = BuildWrapper::new(tfs.clone(), config.transport.clone())
        .with_appender_settings(config.appender_settings());
    let mut output = wrapper
        .decorate_logger(Arc::clone(&build), std::io::stdout())
        .await;

    let mut variables = HashMap::new();
    wrapper.make_build_variables(&build, &mut variables);

    let (program, program_args) = command
        .split_first()
        .context("No command given to run")?;
    tracing::info!(build = %build.full_display_name(), "Running {}", command.join(" "));

    let spawned = Command::new(program)
        .args(program_args)
        .current_dir(project_dir)
        .envs(&variables)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let msg = format!("Failed to start {}: {}\n", program, e);
            if let Err(e) = output.write_all(msg.as_bytes()) {
                tracing::error!("Failed to write to build output: {}", e);
            }
            build.set_outcome(BuildOutcome::Failure);
            finish(&build, output, tfs, config.transport, &variables).await?;
            return Ok(127);
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx.clone());
    }
    drop(tx);

    let mut aborted = false;
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = output.write_all(&bytes) {
                        tracing::error!("Failed to write to build output: {}", e);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !aborted => {
                tracing::warn!("Interrupted, aborting build");
                aborted = true;
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Failed to stop build command: {}", e);
                }
            }
        }
    }

    let status = child.wait().await.context("Failed to wait for build command")?;
    let outcome = if aborted {
        BuildOutcome::Aborted
    } else if status.success() {
        BuildOutcome::Success
    } else {
        BuildOutcome::Failure
    };
    build.set_outcome(outcome);
    tracing::info!(%outcome, "Build command finished with {}", status);

    finish(&build, output, tfs, config.transport, &variables).await?;

    Ok(match outcome {
        BuildOutcome::Success => 0,
        BuildOutcome::Aborted => 130,
        _ => status.code().unwrap_or(1),
    })
}

async fn finish(
    build: &Arc<LocalBuild>,
    output: DecoratedOutput<std::io::Stdout>,
    tfs: Option<TfsConfiguration>,
    transport: TransportConfig,
    variables: &HashMap<String, String>,
) -> Result<()> {
    output
        .close()
        .await
        .context("Failed to flush build output")?;

    if let Some(tfs) = tfs {
        let notifier = BuildNotifier::new(tfs, transport);
        if !notifier.perform(Arc::clone(build), variables).await {
            tracing::warn!("Build result was not reported to TFS");
        }
    }
    Ok(())
}
