//! Facade that mirrors the local build onto the remote build container.
//!
//! All remote updates go through this type. It deliberately keeps only ids:
//! every update fetches the current remote object, mutates the fresh copy and
//! submits it back, because the remote state may have moved since we last
//! looked at it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::build_context::{BuildOutcome, LocalBuild};
use crate::errors::{TfsError, TfsResult};
use crate::models::{
    Build, BuildResult, BuildStatus, TaskLog, TaskResult, TimelineRecord, TimelineRecordState,
};
use crate::scm;
use crate::service::RemoteBuildService;

pub const JOB_RECORD_TYPE: &str = "Job";
pub const TASK_RECORD_TYPE: &str = "Task";
pub const JOB_RECORD_NAME: &str = "Build";
pub const WORKER_NAME: &str = "tfs-relay";

/// Destination for batches of console lines.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver `lines` in order. Failures are handled inside the sink.
    async fn append_job_log(&self, lines: &[String]);
}

/// Build-lifecycle operations the host drives.
///
/// Real implementation: `TfsBuildFacade`.
#[async_trait]
pub trait BuildFacade: LogSink {
    fn remote_build_id(&self) -> i32;

    async fn start_build(&self) -> TfsResult<()>;

    async fn finish_build(&self) -> TfsResult<()>;

    async fn start_all_task_records(&self) -> TfsResult<()>;

    async fn finish_all_task_records(&self) -> TfsResult<()>;
}

/// Remote build result for a local outcome. Unset and unknown outcomes fail.
pub fn to_build_result(outcome: Option<BuildOutcome>) -> BuildResult {
    match outcome {
        Some(BuildOutcome::Success) => BuildResult::Succeeded,
        Some(BuildOutcome::Aborted) => BuildResult::Canceled,
        _ => BuildResult::Failed,
    }
}

/// Remote task result for a local outcome. Unset and unknown outcomes fail.
pub fn to_task_result(outcome: Option<BuildOutcome>) -> TaskResult {
    match outcome {
        Some(BuildOutcome::Success) => TaskResult::Succeeded,
        Some(BuildOutcome::Aborted) => TaskResult::Canceled,
        _ => TaskResult::Failed,
    }
}

/// Newline-terminated log payload.
fn log_content<'a>(lines: impl ExactSizeIterator<Item = &'a str>) -> Vec<u8> {
    // ~256 bytes per line avoids growing the buffer repeatedly
    let mut buf = Vec::with_capacity(lines.len() * 256);
    for line in lines {
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }
    buf
}

fn log_path(record_id: Uuid) -> String {
    format!("logs\\{}", record_id)
}

pub struct TfsBuildFacade {
    service: Arc<dyn RemoteBuildService>,
    local_build: Arc<LocalBuild>,
    build_id: i32,
    project_id: Uuid,
    plan_id: Uuid,
    timeline_id: Uuid,
    job_record_id: Uuid,
    task_record_id: Uuid,
    job_log_id: i32,
    task_log_id: i32,
    task_name: String,
}

impl TfsBuildFacade {
    /// Bind to `remote_build`, making sure its timeline holds exactly one job
    /// record and one task record, each with a log stream.
    ///
    /// Existing records are reused, so attaching twice to the same build
    /// yields the same record and log ids.
    pub async fn attach(
        service: Arc<dyn RemoteBuildService>,
        remote_build: &Build,
        local_build: Arc<LocalBuild>,
    ) -> TfsResult<Self> {
        let build_id = remote_build.id;
        let plan_id = remote_build
            .orchestration_plan
            .as_ref()
            .map(|p| p.plan_id)
            .ok_or(TfsError::MissingField {
                object: "build",
                field: "orchestrationPlan",
            })?;
        let project_id = remote_build
            .project
            .as_ref()
            .map(|p| p.id)
            .ok_or(TfsError::MissingField {
                object: "build",
                field: "project",
            })?;

        let plan = service.get_orchestration_plan(project_id, plan_id).await?;
        let timeline_id = plan
            .timeline
            .map(|t| t.id)
            .ok_or(TfsError::MissingField {
                object: "orchestration plan",
                field: "timeline",
            })?;

        let mut records = service
            .get_timeline_records(project_id, plan_id, timeline_id)
            .await?;

        let job_idx = match records.iter().position(|r| r.is_type(JOB_RECORD_TYPE)) {
            Some(idx) => idx,
            None => {
                records.push(TimelineRecord::pending(JOB_RECORD_TYPE));
                records.len() - 1
            }
        };
        let job_record_id = records[job_idx].id;

        let task_idx = match records.iter().position(|r| r.is_type(TASK_RECORD_TYPE)) {
            Some(idx) => idx,
            None => {
                let mut task = TimelineRecord::pending(TASK_RECORD_TYPE);
                task.parent_id = Some(job_record_id);
                task.order = Some(1);
                records.push(task);
                records.len() - 1
            }
        };
        let task_record_id = records[task_idx].id;

        let task_name = local_build.full_display_name();
        records[job_idx].name = Some(JOB_RECORD_NAME.to_string());
        records[task_idx].name = Some(task_name.clone());

        for idx in [job_idx, task_idx] {
            if records[idx].log.is_some() {
                continue;
            }
            let request = TaskLog::with_path(log_path(records[idx].id));
            let log = service.create_log(project_id, plan_id, &request).await?;
            tracing::info!(
                record_type = %records[idx].record_type,
                log_path = log.path.as_deref().unwrap_or_default(),
                log_id = log.id,
                "Set up timeline record log"
            );
            records[idx].log = Some(log.reference());
        }

        service
            .update_timeline_records(project_id, plan_id, timeline_id, &records)
            .await?;

        let job_log_id = records[job_idx].log.as_ref().map(|l| l.id).unwrap_or_default();
        let task_log_id = records[task_idx].log.as_ref().map(|l| l.id).unwrap_or_default();

        tracing::debug!(
            build_id,
            %timeline_id,
            %job_record_id,
            %task_record_id,
            "Attached to remote build"
        );

        Ok(Self {
            service,
            local_build,
            build_id,
            project_id,
            plan_id,
            timeline_id,
            job_record_id,
            task_record_id,
            job_log_id,
            task_log_id,
            task_name,
        })
    }

    pub fn timeline_id(&self) -> Uuid {
        self.timeline_id
    }

    pub fn job_record_id(&self) -> Uuid {
        self.job_record_id
    }

    pub fn task_record_id(&self) -> Uuid {
        self.task_record_id
    }

    pub fn job_log_id(&self) -> i32 {
        self.job_log_id
    }

    pub fn task_log_id(&self) -> i32 {
        self.task_log_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    async fn query_build(&self) -> TfsResult<Build> {
        self.service.get_build(self.build_id).await
    }

    async fn query_records(&self, timeline_id: Uuid) -> TfsResult<Vec<TimelineRecord>> {
        self.service
            .get_timeline_records(self.project_id, self.plan_id, timeline_id)
            .await
    }

    async fn update_records(&self, records: &[TimelineRecord], timeline_id: Uuid) -> TfsResult<()> {
        self.service
            .update_timeline_records(self.project_id, self.plan_id, timeline_id, records)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl LogSink for TfsBuildFacade {
    /// Console feed, task log and job log are delivered independently: a
    /// failure in one is logged and the others are still attempted.
    async fn append_job_log(&self, lines: &[String]) {
        if lines.is_empty() {
            return;
        }

        if let Err(e) = self
            .service
            .post_console_feed(
                self.project_id,
                self.plan_id,
                self.timeline_id,
                self.job_record_id,
                lines,
            )
            .await
        {
            tracing::error!(lines = lines.len(), "Failed to post console feed to TFS: {}", e);
        }

        let task_content = log_content(lines.iter().map(String::as_str));
        if let Err(e) = self
            .service
            .append_log(self.project_id, self.plan_id, self.task_log_id, task_content)
            .await
        {
            tracing::error!(log_id = self.task_log_id, "Failed to send log to TFS: {}", e);
        }

        let prefixed: Vec<String> = lines
            .iter()
            .map(|line| format!("[{}] {}", self.task_name, line))
            .collect();
        let job_content = log_content(prefixed.iter().map(String::as_str));
        if let Err(e) = self
            .service
            .append_log(self.project_id, self.plan_id, self.job_log_id, job_content)
            .await
        {
            tracing::error!(log_id = self.job_log_id, "Failed to send log to TFS: {}", e);
        }
    }
}

#[async_trait]
impl BuildFacade for TfsBuildFacade {
    fn remote_build_id(&self) -> i32 {
        self.build_id
    }

    async fn start_build(&self) -> TfsResult<()> {
        let mut build = self.query_build().await?;
        build.start_time = Some(Utc::now());
        build.status = Some(BuildStatus::InProgress);
        self.service.update_build(&build).await?;
        tracing::info!(build_id = self.build_id, "Started TFS build");
        Ok(())
    }

    async fn finish_build(&self) -> TfsResult<()> {
        let mut build = self.query_build().await?;
        build.finish_time = Some(Utc::now());
        build.result = Some(to_build_result(self.local_build.outcome()));
        build.status = Some(BuildStatus::Completed);

        let revision = scm::resolve_revision(self.local_build.source_control());
        tracing::info!("Setting TFS build sourceVersion to: {}", revision);
        build.source_version = Some(revision);

        self.service.update_build(&build).await?;
        Ok(())
    }

    /// Only one level: detail records do not exist yet at this point.
    async fn start_all_task_records(&self) -> TfsResult<()> {
        let mut records = self.query_records(self.timeline_id).await?;
        let start_time = Utc::now();

        for record in records.iter_mut() {
            record.state = Some(TimelineRecordState::InProgress);
            record.start_time = Some(start_time);
            record.worker_name = Some(WORKER_NAME.to_string());
        }

        self.update_records(&records, self.timeline_id).await
    }

    async fn finish_all_task_records(&self) -> TfsResult<()> {
        let mut records = self.query_records(self.timeline_id).await?;
        let result = to_task_result(self.local_build.outcome());
        let finish_time = Utc::now();

        for record in records.iter_mut() {
            record.state = Some(TimelineRecordState::Completed);
            record.finish_time = Some(finish_time);
            record.result = Some(result);

            let Some(details) = record.details.as_ref() else {
                continue;
            };
            let mut detail_records = self.query_records(details.id).await?;
            if detail_records.is_empty() {
                continue;
            }
            for detail in detail_records.iter_mut() {
                if detail.state == Some(TimelineRecordState::InProgress) {
                    detail.state = Some(TimelineRecordState::Completed);
                    detail.finish_time = Some(finish_time);
                    detail.result = Some(result);
                }
            }
            self.update_records(&detail_records, details.id).await?;
        }

        self.update_records(&records, self.timeline_id).await
    }
}
