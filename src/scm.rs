//! Source-control capability used to describe the remote build's source.
//!
//! A local build may or may not have a source-control integration. When it has
//! none, or a query fails, the remote build records [`UNDETERMINED`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::Repository;

/// Marker written to the remote build when branch or revision is unknown.
pub const UNDETERMINED: &str = "undetermined";

/// Branch and revision queries a source-control integration may answer.
pub trait SourceControl: Send + Sync {
    /// Branch (or branch specs) the build is configured for.
    fn source_branch(&self) -> Option<String>;

    /// Revision identifier of the sources that were built.
    fn source_revision(&self) -> Option<String>;
}

/// Branch for the remote build descriptor, or [`UNDETERMINED`].
pub fn resolve_branch(scm: Option<&dyn SourceControl>) -> String {
    scm.and_then(|s| s.source_branch())
        .unwrap_or_else(|| UNDETERMINED.to_string())
}

/// Revision for the finished remote build, or [`UNDETERMINED`].
pub fn resolve_revision(scm: Option<&dyn SourceControl>) -> String {
    scm.and_then(|s| s.source_revision())
        .unwrap_or_else(|| UNDETERMINED.to_string())
}

/// Git working copy as a source-control integration.
///
/// The repository is reopened per query: `git2::Repository` is not `Sync`.
#[derive(Debug, Clone)]
pub struct GitSourceControl {
    repo_path: PathBuf,
    branch_specs: Vec<String>,
}

impl GitSourceControl {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            branch_specs: Vec::new(),
        }
    }

    /// Branch specs the build was configured with; reported instead of HEAD.
    pub fn with_branch_specs(mut self, specs: Vec<String>) -> Self {
        self.branch_specs = specs;
        self
    }

    fn open(&self) -> Result<Repository> {
        Repository::discover(&self.repo_path).with_context(|| {
            format!(
                "Failed to open git repository at {}",
                self.repo_path.display()
            )
        })
    }

    fn head_branch(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let head = repo.head().context("Failed to resolve HEAD")?;
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    fn head_commit(&self) -> Result<String> {
        let repo = self.open()?;
        let commit = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .context("Failed to resolve HEAD commit")?;
        Ok(commit.id().to_string())
    }
}

/// Join configured branch specs; a lone `**` wildcard reads as `any`.
fn describe_branch_specs(specs: &[String]) -> Option<String> {
    let names: Vec<&str> = specs
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    match names.as_slice() {
        [] => None,
        ["**"] => Some("any".to_string()),
        _ => Some(names.join(", ")),
    }
}

impl SourceControl for GitSourceControl {
    fn source_branch(&self) -> Option<String> {
        if let Some(specs) = describe_branch_specs(&self.branch_specs) {
            return Some(specs);
        }
        match self.head_branch() {
            Ok(branch) => branch,
            Err(e) => {
                tracing::warn!("Retrieving git branch failed: {:#}", e);
                None
            }
        }
    }

    fn source_revision(&self) -> Option<String> {
        match self.head_commit() {
            Ok(sha) => Some(sha),
            Err(e) => {
                tracing::warn!("Retrieving git revision failed: {:#}", e);
                None
            }
        }
    }
}
