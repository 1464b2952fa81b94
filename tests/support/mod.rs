//! In-memory stand-ins for the remote build service and the host seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use tfs_relay::build_context::LocalBuild;
use tfs_relay::client::ClientFactory;
use tfs_relay::errors::{TfsError, TfsResult};
use tfs_relay::facade::{BuildFacade, LogSink};
use tfs_relay::facade_factory::BuildFacadeFactory;
use tfs_relay::models::{
    AgentPoolQueue, Build, DefinitionReference, OrchestrationPlanReference, TaskLog,
    TaskOrchestrationPlan, TeamProjectReference, TimelineRecord, TimelineReference,
};
use tfs_relay::service::RemoteBuildService;

#[derive(Default)]
struct State {
    projects: Vec<TeamProjectReference>,
    definitions: HashMap<Uuid, Vec<DefinitionReference>>,
    queues: Vec<AgentPoolQueue>,
    builds: HashMap<i32, Build>,
    queued: Vec<(Build, bool)>,
    plans: HashMap<Uuid, TaskOrchestrationPlan>,
    timelines: HashMap<Uuid, Vec<TimelineRecord>>,
    logs: HashMap<i32, TaskLog>,
    log_content: HashMap<i32, Vec<u8>>,
    feeds: Vec<(Uuid, Vec<String>)>,
    calls: Vec<String>,
    failing: HashSet<String>,
    next_build_id: i32,
    next_log_id: i32,
}

/// Fake TFS collection. Every call is recorded; any operation can be made to fail.
#[derive(Default)]
pub struct FakeTfs {
    state: Mutex<State>,
}

fn injected(op: &str) -> TfsError {
    TfsError::Http {
        method: "POST".into(),
        url: format!("fake://{}", op),
        status: 500,
        body: "injected failure".into(),
    }
}

impl FakeTfs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self, op: &str) -> TfsResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op.to_string());
        if state.failing.contains(op) {
            return Err(injected(op));
        }
        Ok(state)
    }

    pub fn fail(&self, op: &str) {
        self.state.lock().unwrap().failing.insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    pub fn add_project(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().projects.push(TeamProjectReference {
            id,
            name: name.to_string(),
            ..Default::default()
        });
        id
    }

    pub fn add_definition(&self, project_id: Uuid, id: i32, name: &str) {
        self.state
            .lock()
            .unwrap()
            .definitions
            .entry(project_id)
            .or_default()
            .push(DefinitionReference {
                id,
                name: name.to_string(),
                ..Default::default()
            });
    }

    pub fn add_queue(&self, id: i32, name: &str) {
        self.state.lock().unwrap().queues.push(AgentPoolQueue {
            id,
            ..AgentPoolQueue::named(name)
        });
    }

    fn store_build(state: &mut State, mut build: Build) -> Build {
        state.next_build_id += 1;
        build.id = state.next_build_id;

        let plan_id = Uuid::new_v4();
        let timeline_id = Uuid::new_v4();
        build.orchestration_plan = Some(OrchestrationPlanReference {
            plan_id,
            ..Default::default()
        });
        state.plans.insert(
            plan_id,
            TaskOrchestrationPlan {
                plan_id,
                timeline: Some(TimelineReference {
                    id: timeline_id,
                    change_id: None,
                    url: None,
                }),
                ..Default::default()
            },
        );
        state.timelines.insert(timeline_id, Vec::new());
        state.builds.insert(build.id, build.clone());
        build
    }

    /// A build with a fresh plan and an empty timeline, as if queued elsewhere.
    pub fn seed_build(&self, project_id: Uuid) -> Build {
        let mut state = self.state.lock().unwrap();
        let build = Build {
            project: Some(TeamProjectReference {
                id: project_id,
                name: "seeded".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        Self::store_build(&mut state, build)
    }

    pub fn timeline_of(&self, build: &Build) -> Uuid {
        let state = self.state.lock().unwrap();
        let plan_id = build.orchestration_plan.as_ref().unwrap().plan_id;
        state.plans[&plan_id].timeline.as_ref().unwrap().id
    }

    pub fn records(&self, timeline_id: Uuid) -> Vec<TimelineRecord> {
        self.state
            .lock()
            .unwrap()
            .timelines
            .get(&timeline_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_records(&self, timeline_id: Uuid, records: Vec<TimelineRecord>) {
        self.state
            .lock()
            .unwrap()
            .timelines
            .insert(timeline_id, records);
    }

    pub fn build(&self, id: i32) -> Build {
        self.state.lock().unwrap().builds[&id].clone()
    }

    pub fn queued(&self) -> Vec<(Build, bool)> {
        self.state.lock().unwrap().queued.clone()
    }

    pub fn queues(&self) -> Vec<AgentPoolQueue> {
        self.state.lock().unwrap().queues.clone()
    }

    pub fn log(&self, id: i32) -> TaskLog {
        self.state.lock().unwrap().logs[&id].clone()
    }

    pub fn log_count(&self) -> usize {
        self.state.lock().unwrap().logs.len()
    }

    pub fn log_text(&self, id: i32) -> String {
        let state = self.state.lock().unwrap();
        String::from_utf8(state.log_content.get(&id).cloned().unwrap_or_default()).unwrap()
    }

    pub fn feeds(&self) -> Vec<(Uuid, Vec<String>)> {
        self.state.lock().unwrap().feeds.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }
}

#[async_trait]
impl RemoteBuildService for FakeTfs {
    async fn get_projects(&self) -> TfsResult<Vec<TeamProjectReference>> {
        Ok(self.enter("get_projects")?.projects.clone())
    }

    async fn get_project(&self, project: &str) -> TfsResult<Option<TeamProjectReference>> {
        let state = self.enter("get_project")?;
        Ok(state
            .projects
            .iter()
            .find(|p| p.name == project || p.id.to_string() == project)
            .cloned())
    }

    async fn get_build_definitions(&self, project_id: Uuid) -> TfsResult<Vec<DefinitionReference>> {
        let state = self.enter("get_build_definitions")?;
        Ok(state.definitions.get(&project_id).cloned().unwrap_or_default())
    }

    async fn get_build_definition(
        &self,
        project_id: Uuid,
        definition_id: i32,
    ) -> TfsResult<Option<DefinitionReference>> {
        let state = self.enter("get_build_definition")?;
        Ok(state
            .definitions
            .get(&project_id)
            .and_then(|defs| defs.iter().find(|d| d.id == definition_id))
            .cloned())
    }

    async fn get_agent_queues(&self) -> TfsResult<Vec<AgentPoolQueue>> {
        Ok(self.enter("get_agent_queues")?.queues.clone())
    }

    async fn create_agent_queue(&self, queue: &AgentPoolQueue) -> TfsResult<AgentPoolQueue> {
        let mut state = self.enter("create_agent_queue")?;
        let created = AgentPoolQueue {
            id: state.queues.len() as i32 + 1,
            ..queue.clone()
        };
        state.queues.push(created.clone());
        Ok(created)
    }

    async fn queue_build(&self, build: &Build, ignore_warnings: bool) -> TfsResult<Build> {
        let mut state = self.enter("queue_build")?;
        state.queued.push((build.clone(), ignore_warnings));
        Ok(Self::store_build(&mut state, build.clone()))
    }

    async fn get_build(&self, build_id: i32) -> TfsResult<Build> {
        let state = self.enter("get_build")?;
        state.builds.get(&build_id).cloned().ok_or(TfsError::Http {
            method: "GET".into(),
            url: format!("fake://builds/{}", build_id),
            status: 404,
            body: String::new(),
        })
    }

    async fn update_build(&self, build: &Build) -> TfsResult<Build> {
        let mut state = self.enter("update_build")?;
        state.builds.insert(build.id, build.clone());
        Ok(build.clone())
    }

    async fn get_orchestration_plan(
        &self,
        _project_id: Uuid,
        plan_id: Uuid,
    ) -> TfsResult<TaskOrchestrationPlan> {
        let state = self.enter("get_orchestration_plan")?;
        state
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| TfsError::Other(anyhow::anyhow!("no plan {}", plan_id)))
    }

    async fn get_timeline_records(
        &self,
        _project_id: Uuid,
        _plan_id: Uuid,
        timeline_id: Uuid,
    ) -> TfsResult<Vec<TimelineRecord>> {
        let state = self.enter("get_timeline_records")?;
        Ok(state.timelines.get(&timeline_id).cloned().unwrap_or_default())
    }

    async fn update_timeline_records(
        &self,
        _project_id: Uuid,
        _plan_id: Uuid,
        timeline_id: Uuid,
        records: &[TimelineRecord],
    ) -> TfsResult<Vec<TimelineRecord>> {
        let mut state = self.enter("update_timeline_records")?;
        let timeline = state.timelines.entry(timeline_id).or_default();
        for record in records {
            match timeline.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => timeline.push(record.clone()),
            }
        }
        Ok(records.to_vec())
    }

    async fn create_log(
        &self,
        _project_id: Uuid,
        _plan_id: Uuid,
        log: &TaskLog,
    ) -> TfsResult<TaskLog> {
        let mut state = self.enter("create_log")?;
        state.next_log_id += 1;
        let created = TaskLog {
            id: state.next_log_id,
            ..log.clone()
        };
        state.logs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn append_log(
        &self,
        _project_id: Uuid,
        _plan_id: Uuid,
        log_id: i32,
        content: Vec<u8>,
    ) -> TfsResult<()> {
        let op = format!("append_log:{}", log_id);
        let mut state = self.enter(&op)?;
        if state.failing.contains("append_log") {
            return Err(injected("append_log"));
        }
        state.log_content.entry(log_id).or_default().extend(content);
        Ok(())
    }

    async fn post_console_feed(
        &self,
        _project_id: Uuid,
        _plan_id: Uuid,
        _timeline_id: Uuid,
        record_id: Uuid,
        lines: &[String],
    ) -> TfsResult<()> {
        let mut state = self.enter("post_console_feed")?;
        state.feeds.push((record_id, lines.to_vec()));
        Ok(())
    }
}

/// Client factory handing out a fixed service, or failing.
pub struct StaticClientFactory {
    service: Option<Arc<dyn RemoteBuildService>>,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl StaticClientFactory {
    pub fn serving(service: Arc<dyn RemoteBuildService>) -> Arc<Self> {
        Arc::new(Self {
            service: Some(service),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            service: None,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn validated_client(
        &self,
        server_url: &str,
        username: &str,
        _password: &str,
    ) -> TfsResult<Arc<dyn RemoteBuildService>> {
        self.requests
            .lock()
            .unwrap()
            .push((server_url.to_string(), username.to_string()));
        self.service.clone().ok_or(TfsError::Http {
            method: "GET".into(),
            url: format!("{}/_apis/projects", server_url),
            status: 401,
            body: "unauthorized".into(),
        })
    }
}

/// Facade that only records what the host asked of it.
#[derive(Default)]
pub struct RecordingFacade {
    pub build_id: i32,
    pub calls: Mutex<Vec<&'static str>>,
    pub lines: Mutex<Vec<String>>,
}

impl RecordingFacade {
    pub fn with_id(build_id: i32) -> Arc<Self> {
        Arc::new(Self {
            build_id,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for RecordingFacade {
    async fn append_job_log(&self, lines: &[String]) {
        self.lines.lock().unwrap().extend_from_slice(lines);
    }
}

#[async_trait]
impl BuildFacade for RecordingFacade {
    fn remote_build_id(&self) -> i32 {
        self.build_id
    }

    async fn start_build(&self) -> TfsResult<()> {
        self.calls.lock().unwrap().push("start_build");
        Ok(())
    }

    async fn finish_build(&self) -> TfsResult<()> {
        self.calls.lock().unwrap().push("finish_build");
        Ok(())
    }

    async fn start_all_task_records(&self) -> TfsResult<()> {
        self.calls.lock().unwrap().push("start_all_task_records");
        Ok(())
    }

    async fn finish_all_task_records(&self) -> TfsResult<()> {
        self.calls.lock().unwrap().push("finish_all_task_records");
        Ok(())
    }
}

/// Facade factory returning a fixed [`RecordingFacade`].
pub struct RecordingFacadeFactory {
    pub facade: Arc<RecordingFacade>,
    pub created: Mutex<Vec<(String, i32)>>,
    pub attached: Mutex<Vec<i32>>,
}

impl RecordingFacadeFactory {
    pub fn new(facade: Arc<RecordingFacade>) -> Arc<Self> {
        Arc::new(Self {
            facade,
            created: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl BuildFacadeFactory for RecordingFacadeFactory {
    async fn create_build_on_tfs(
        &self,
        project: &str,
        build_definition: i32,
        _local_build: Arc<LocalBuild>,
        _service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>> {
        self.created
            .lock()
            .unwrap()
            .push((project.to_string(), build_definition));
        Ok(self.facade.clone())
    }

    async fn get_build_on_tfs(
        &self,
        build_id: i32,
        _local_build: Arc<LocalBuild>,
        _service: Arc<dyn RemoteBuildService>,
    ) -> TfsResult<Arc<dyn BuildFacade>> {
        self.attached.lock().unwrap().push(build_id);
        Ok(self.facade.clone())
    }
}
