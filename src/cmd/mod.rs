//! CLI command implementations.
//!
//! | Module    | Commands handled   |
//! |-----------|--------------------|
//! | `run`     | `Run`              |
//! | `remote`  | `Start`, `Finish`  |
//! | `check`   | `Check`            |

pub mod check;
pub mod remote;
pub mod run;

pub use check::cmd_check;
pub use remote::{cmd_finish, cmd_start};
pub use run::cmd_run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tfs_relay::build_context::LocalBuild;
use tfs_relay::config::{CliOverrides, RelayConfig, TfsConfiguration};
use tfs_relay::scm::GitSourceControl;

use super::{Cli, LocalBuildArgs};

/// Resolve configuration: file, then environment, then command-line flags.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<RelayConfig> {
    let overrides = CliOverrides {
        server_url: cli.server_url.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        project: cli.project.clone(),
        definition: cli.definition,
    };
    let config = RelayConfig::resolve(cli.config.as_deref(), project_dir, &overrides)?;
    for warning in config.validate() {
        tracing::debug!("config: {}", warning);
    }
    Ok(config)
}

pub fn require_tfs(config: &RelayConfig) -> Result<TfsConfiguration> {
    config.tfs_configuration().context(
        "TFS is not configured: set server.url, build.project and build.definition \
         (or TFS_SERVER_URL, TFS_PROJECT and TFS_BUILD_DEFINITION)",
    )
}

/// Local build for `args`, with the project directory as its git source.
pub fn local_build(project_dir: &Path, args: &LocalBuildArgs) -> LocalBuild {
    let name = args.name.clone().unwrap_or_else(|| {
        project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local".to_string())
    });
    let scm = GitSourceControl::new(project_dir).with_branch_specs(args.branches.clone());

    let mut build = LocalBuild::new(name, args.number).with_source_control(Arc::new(scm));
    if let Some(id) = &args.build_id {
        build = build.with_id(id.clone());
    }
    build
}
