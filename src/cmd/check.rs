//! Connection check: `tfs-relay check`.

use std::path::Path;

use anyhow::{Context, Result};

use tfs_relay::client::TfsClientFactory;
use tfs_relay::service::RemoteBuildService;

use super::super::Cli;
use super::load_config;

pub async fn cmd_check(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    for warning in config.validate() {
        println!("warning: {}", warning);
    }

    let server_url = config
        .server
        .url
        .as_deref()
        .context("server.url is not set (config file, TFS_SERVER_URL or --server-url)")?;
    let username = config.server.username.as_deref().unwrap_or_default();
    let password = config.server.password.as_deref().unwrap_or_default();

    let client = TfsClientFactory::new(config.transport.clone())
        .connect(server_url, username, password)
        .await
        .context(
            "Could not connect to the server based on the input, please double check the username and password specified.",
        )?;
    println!("Successfully connected to server {}", server_url);

    let Some(project) = config.build.project.as_deref() else {
        for p in client.get_projects().await? {
            println!("  project {} ({})", p.name, p.id);
        }
        return Ok(());
    };

    let project_ref = client
        .get_project(project)
        .await?
        .with_context(|| format!("Could not find the project: {}", project))?;
    println!("Project {} ({})", project_ref.name, project_ref.id);

    let definitions = client.get_build_definitions(project_ref.id).await?;
    for d in &definitions {
        println!("  definition {} ({})", d.name, d.id);
    }
    if let Some(wanted) = config.build.definition {
        if !definitions.iter().any(|d| d.id == wanted) {
            anyhow::bail!("Could not find the buildDefinition: {}", wanted);
        }
    }
    Ok(())
}
