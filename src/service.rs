use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::TfsResult;
use crate::models::{
    AgentPoolQueue, Build, DefinitionReference, TaskLog, TaskOrchestrationPlan,
    TeamProjectReference, TimelineRecord,
};

/// Object-level RPC surface of the remote build service.
///
/// Real implementation: `TfsClient`. Tests substitute an in-memory double.
/// Mutating calls are PATCH-style: callers fetch, mutate the fresh copy, and
/// submit it back.
#[async_trait]
pub trait RemoteBuildService: Send + Sync {
    async fn get_projects(&self) -> TfsResult<Vec<TeamProjectReference>>;

    /// `Ok(None)` when the project does not exist.
    async fn get_project(&self, project: &str) -> TfsResult<Option<TeamProjectReference>>;

    async fn get_build_definitions(&self, project_id: Uuid) -> TfsResult<Vec<DefinitionReference>>;

    /// `Ok(None)` when the definition does not exist.
    async fn get_build_definition(
        &self,
        project_id: Uuid,
        definition_id: i32,
    ) -> TfsResult<Option<DefinitionReference>>;

    async fn get_agent_queues(&self) -> TfsResult<Vec<AgentPoolQueue>>;

    async fn create_agent_queue(&self, queue: &AgentPoolQueue) -> TfsResult<AgentPoolQueue>;

    /// Submit a new build. `ignore_warnings` is forwarded to the service as-is.
    async fn queue_build(&self, build: &Build, ignore_warnings: bool) -> TfsResult<Build>;

    async fn get_build(&self, build_id: i32) -> TfsResult<Build>;

    async fn update_build(&self, build: &Build) -> TfsResult<Build>;

    async fn get_orchestration_plan(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
    ) -> TfsResult<TaskOrchestrationPlan>;

    /// All records of a timeline; empty when the timeline has none yet.
    async fn get_timeline_records(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
    ) -> TfsResult<Vec<TimelineRecord>>;

    async fn update_timeline_records(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
        records: &[TimelineRecord],
    ) -> TfsResult<Vec<TimelineRecord>>;

    /// Create a log stream. The returned log, not the request, carries the id.
    async fn create_log(&self, project_id: Uuid, plan_id: Uuid, log: &TaskLog)
    -> TfsResult<TaskLog>;

    async fn append_log(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        log_id: i32,
        content: Vec<u8>,
    ) -> TfsResult<()>;

    async fn post_console_feed(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
        record_id: Uuid,
        lines: &[String],
    ) -> TfsResult<()>;
}
