//! The local build being mirrored: its identity, its outcome, and the optional
//! source-control capability the remote build uses for branch and revision.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use crate::scm::SourceControl;

/// Outcome of the local build, in the host's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unstable => "unstable",
            Self::Failure => "failure",
            Self::NotBuilt => "not_built",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "unstable" => Ok(Self::Unstable),
            "failure" => Ok(Self::Failure),
            "not_built" | "not-built" => Ok(Self::NotBuilt),
            "aborted" => Ok(Self::Aborted),
            _ => anyhow::bail!(
                "Invalid build outcome '{}'. Valid values: success, unstable, failure, not_built, aborted",
                s
            ),
        }
    }
}

/// A running (or finished) local build.
pub struct LocalBuild {
    id: String,
    project_name: String,
    number: u32,
    outcome: RwLock<Option<BuildOutcome>>,
    source_control: Option<Arc<dyn SourceControl>>,
}

impl LocalBuild {
    pub fn new(project_name: impl Into<String>, number: u32) -> Self {
        Self {
            id: number.to_string(),
            project_name: project_name.into(),
            number,
            outcome: RwLock::new(None),
            source_control: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source_control(mut self, scm: Arc<dyn SourceControl>) -> Self {
        self.source_control = Some(scm);
        self
    }

    pub fn with_outcome(self, outcome: BuildOutcome) -> Self {
        self.set_outcome(outcome);
        self
    }

    /// Identifier used to key build variables, e.g. `TfsBuildId<id>`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// `"<project> #<number>"`
    pub fn full_display_name(&self) -> String {
        format!("{} #{}", self.project_name, self.number)
    }

    /// `None` while the build is still running.
    pub fn outcome(&self) -> Option<BuildOutcome> {
        match self.outcome.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_outcome(&self, outcome: BuildOutcome) {
        match self.outcome.write() {
            Ok(mut guard) => *guard = Some(outcome),
            Err(poisoned) => *poisoned.into_inner() = Some(outcome),
        }
    }

    pub fn source_control(&self) -> Option<&dyn SourceControl> {
        self.source_control.as_deref()
    }
}

impl fmt::Debug for LocalBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBuild")
            .field("id", &self.id)
            .field("project_name", &self.project_name)
            .field("number", &self.number)
            .field("outcome", &self.outcome())
            .field("source_control", &self.source_control.is_some())
            .finish()
    }
}
