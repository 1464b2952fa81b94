use std::sync::Arc;

use async_trait::async_trait;

use crate::build_context::LocalBuild;
use crate::errors::{TfsError, TfsResult};
use crate::facade::{BuildFacade, TfsBuildFacade};
use crate::models::{
    AgentPoolQueue, Build, DefinitionReference, QueueOptions, TeamProjectReference,
};
use crate::scm;
use crate::service::RemoteBuildService;

/// Queue created on the server when it has none.
pub const RELAY_QUEUE_NAME: &str = "TfsRelayQueue";
/// Parameters attached to every build container.
pub const BUILD_PARAMETERS: &str = r#"{"build.config":"tfs-relay"}"#;

/// Produces facades for remote build containers.
///
/// Real implementation: `TfsBuildFacadeFactory`. Hosts hold it behind an
/// `Arc<dyn BuildFacadeFactory>` so tests can substitute their own.
#[async_trait]
pub trait BuildFacadeFactory: Send + Sync {
    /// Queue a new build container on the server for `local_build`.
    async fn create_build_on_tfs(
        &self,
        project: &str,
        build_definition: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>>;

    /// Reattach to a build container queued earlier, possibly by another process.
    async fn get_build_on_tfs(
        &self,
        build_id: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TfsBuildFacadeFactory;

impl TfsBuildFacadeFactory {
    pub fn new() -> Self {
        Self
    }

    /// Queue a new build container and return the concrete facade.
    pub async fn create_facade(
        &self,
        project: &str,
        build_definition: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<TfsBuildFacade> {
        let project_ref = service
            .get_project(project)
            .await?
            .ok_or_else(|| TfsError::ProjectNotFound {
                project: project.to_string(),
            })?;

        let definition = service
            .get_build_definition(project_ref.id, build_definition)
            .await?
            .ok_or(TfsError::DefinitionNotFound {
                definition: build_definition,
            })?;

        let mut queues = service.get_agent_queues().await?;
        if queues.is_empty() {
            tracing::info!("Creating {} on TeamFoundationServer", RELAY_QUEUE_NAME);
            let created = service
                .create_agent_queue(&AgentPoolQueue::named(RELAY_QUEUE_NAME))
                .await?;
            queues.push(created);
        }
        let queue = queues.swap_remove(0);

        let branch = scm::resolve_branch(local_build.source_control());
        let container = build_container(project_ref, definition, queue, branch);
        let queued = service.queue_build(&container, true).await?;

        if let Some(plan) = queued.orchestration_plan.as_ref() {
            tracing::info!(build_id = queued.id, "Queued build on TFS with plan Id {}", plan.plan_id);
        }

        TfsBuildFacade::attach(service, &queued, local_build).await
    }

    pub async fn attach_facade(
        &self,
        build_id: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<TfsBuildFacade> {
        let remote = service.get_build(build_id).await?;
        TfsBuildFacade::attach(service, &remote, local_build).await
    }
}

/// Descriptor for a build that is queued but never picked up by an agent.
fn build_container(
    project: TeamProjectReference,
    definition: DefinitionReference,
    queue: AgentPoolQueue,
    source_branch: String,
) -> Build {
    Build {
        queue: Some(queue),
        definition: Some(definition),
        project: Some(project),
        parameters: Some(BUILD_PARAMETERS.to_string()),
        demands: Some(Vec::new()),
        queue_options: Some(QueueOptions::DoNotRun),
        source_branch: Some(source_branch),
        ..Default::default()
    }
}

#[async_trait]
impl BuildFacadeFactory for TfsBuildFacadeFactory {
    async fn create_build_on_tfs(
        &self,
        project: &str,
        build_definition: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>> {
        let facade = self
            .create_facade(project, build_definition, local_build, service)
            .await?;
        Ok(Arc::new(facade))
    }

    async fn get_build_on_tfs(
        &self,
        build_id: i32,
        local_build: Arc<LocalBuild>,
        service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>> {
        let facade = self.attach_facade(build_id, local_build, service).await?;
        Ok(Arc::new(facade))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn container_is_not_run_and_has_no_demands() {
        let project = TeamProjectReference {
            id: Uuid::new_v4(),
            name: "Fabrikam".into(),
            ..Default::default()
        };
        let definition = DefinitionReference {
            id: 7,
            name: "CI".into(),
            ..Default::default()
        };
        let build = build_container(
            project.clone(),
            definition,
            AgentPoolQueue::named("default"),
            "main".into(),
        );

        assert_eq!(build.queue_options, Some(QueueOptions::DoNotRun));
        assert_eq!(build.demands, Some(vec![]));
        assert_eq!(build.parameters.as_deref(), Some(BUILD_PARAMETERS));
        assert_eq!(build.source_branch.as_deref(), Some("main"));
        assert_eq!(build.project, Some(project));
        assert_eq!(build.definition.unwrap().id, 7);
    }

    #[test]
    fn container_serializes_do_not_run() {
        let build = build_container(
            TeamProjectReference::default(),
            DefinitionReference::default(),
            AgentPoolQueue::named("q"),
            scm::UNDETERMINED.into(),
        );
        let json = serde_json::to_value(&build).unwrap();
        assert_eq!(json["queueOptions"], "doNotRun");
        assert_eq!(json["sourceBranch"], "undetermined");
        assert_eq!(json["queue"]["name"], "q");
    }
}
