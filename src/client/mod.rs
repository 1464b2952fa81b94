//! reqwest-backed REST client for the TFS/VSTS build and distributed-task APIs.
//!
//! Collections come back wrapped as `{count, value}`. All requests carry basic
//! authentication; proxy and TLS trust come from [`TransportConfig`].

pub mod factory;
pub mod transport;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use factory::{ClientFactory, ServiceProvider, TfsClientFactory};
pub use transport::TransportConfig;

use crate::errors::{TfsError, TfsResult};
use crate::models::{
    AgentPoolQueue, Build, DefinitionReference, TaskLog, TaskOrchestrationPlan,
    TeamProjectReference, TimelineRecord,
};
use crate::service::RemoteBuildService;

const API_VERSION: &str = "2.0";
const PREVIEW_API_VERSION: &str = "2.0-preview";
/// Distributed-task hub that owns build plans.
const HUB_NAME: &str = "build";

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Serialize)]
struct CollectionBody<'a, T> {
    count: usize,
    value: &'a [T],
}

impl<'a, T> CollectionBody<'a, T> {
    fn new(value: &'a [T]) -> Self {
        Self {
            count: value.len(),
            value,
        }
    }
}

/// On-premise servers expect `domain\user`; accept `domain/user` too.
pub fn normalize_username(provider: ServiceProvider, username: &str) -> String {
    if provider != ServiceProvider::Tfs {
        return username.to_string();
    }
    match username.find(['/', '\\']) {
        Some(idx) if idx > 0 => format!("{}\\{}", &username[..idx], &username[idx + 1..]),
        _ => username.to_string(),
    }
}

/// Parse and check a collection URL such as `https://tfs.corp/tfs/DefaultCollection`.
pub fn parse_server_url(server_url: &str) -> TfsResult<Url> {
    let url = Url::parse(server_url.trim())
        .map_err(|e| TfsError::InvalidUrl(format!("{}: {}", server_url, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(TfsError::InvalidUrl(format!(
            "{}: expected an http(s) collection URL",
            server_url
        )));
    }
    Ok(url)
}

pub struct TfsClient {
    http: reqwest::Client,
    base_url: Url,
    provider: ServiceProvider,
    username: String,
    password: String,
}

impl std::fmt::Debug for TfsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfsClient")
            .field("base_url", &self.base_url.as_str())
            .field("provider", &self.provider)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TfsClient {
    pub fn new(
        server_url: &str,
        provider: ServiceProvider,
        username: &str,
        password: &str,
        transport: &TransportConfig,
    ) -> TfsResult<Self> {
        let base_url = parse_server_url(server_url)?;
        let builder = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        let http = transport.configure(builder)?.build()?;

        match provider {
            ServiceProvider::Tfs => tracing::info!("Using basic authentication for on-premise TeamFoundationServer"),
            ServiceProvider::Vso => tracing::info!("Using user/pass authentication for Visual Studio Online services"),
        }

        Ok(Self {
            http,
            base_url,
            provider,
            username: normalize_username(provider, username),
            password: password.to_string(),
        })
    }

    pub fn provider(&self) -> ServiceProvider {
        self.provider
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint<I>(&self, segments: I, api_version: &str) -> TfsResult<Url>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TfsError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// `<project>/_apis/distributedtask/hubs/build/plans/<plan>/<rest...>`
    fn plan_endpoint(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        rest: &[&str],
    ) -> TfsResult<Url> {
        let mut segments = vec![
            project_id.to_string(),
            "_apis".to_string(),
            "distributedtask".to_string(),
            "hubs".to_string(),
            HUB_NAME.to_string(),
            "plans".to_string(),
            plan_id.to_string(),
        ];
        segments.extend(rest.iter().map(|s| s.to_string()));
        self.endpoint(segments, PREVIEW_API_VERSION)
    }

    async fn execute(&self, request: RequestBuilder) -> TfsResult<reqwest::Response> {
        let request = request
            .basic_auth(&self.username, Some(&self.password))
            .build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();
        tracing::debug!(%method, %url, "TFS request");

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TfsError::Http {
            method,
            url,
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> TfsResult<T> {
        let response = self.execute(self.http.get(url)).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> TfsResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(self.http.request(method, url).json(body))
            .await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> TfsResult<Option<T>> {
        match self.get_json(url).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteBuildService for TfsClient {
    async fn get_projects(&self) -> TfsResult<Vec<TeamProjectReference>> {
        let url = self.endpoint(["_apis", "projects"], API_VERSION)?;
        let projects: Collection<TeamProjectReference> = self.get_json(url).await?;
        Ok(projects.value)
    }

    async fn get_project(&self, project: &str) -> TfsResult<Option<TeamProjectReference>> {
        let url = self.endpoint(["_apis", "projects", project], API_VERSION)?;
        self.get_optional(url).await
    }

    async fn get_build_definitions(&self, project_id: Uuid) -> TfsResult<Vec<DefinitionReference>> {
        let project = project_id.to_string();
        let url = self.endpoint([project.as_str(), "_apis", "build", "definitions"], API_VERSION)?;
        let definitions: Collection<DefinitionReference> = self.get_json(url).await?;
        Ok(definitions.value)
    }

    async fn get_build_definition(
        &self,
        project_id: Uuid,
        definition_id: i32,
    ) -> TfsResult<Option<DefinitionReference>> {
        let project = project_id.to_string();
        let definition = definition_id.to_string();
        let url = self.endpoint(
            [project.as_str(), "_apis", "build", "definitions", definition.as_str()],
            API_VERSION,
        )?;
        self.get_optional(url).await
    }

    async fn get_agent_queues(&self) -> TfsResult<Vec<AgentPoolQueue>> {
        let url = self.endpoint(["_apis", "build", "queues"], API_VERSION)?;
        let queues: Collection<AgentPoolQueue> = self.get_json(url).await?;
        Ok(queues.value)
    }

    async fn create_agent_queue(&self, queue: &AgentPoolQueue) -> TfsResult<AgentPoolQueue> {
        let url = self.endpoint(["_apis", "build", "queues"], API_VERSION)?;
        self.send_json(Method::POST, url, queue).await
    }

    async fn queue_build(&self, build: &Build, ignore_warnings: bool) -> TfsResult<Build> {
        let mut url = self.endpoint(["_apis", "build", "builds"], API_VERSION)?;
        url.query_pairs_mut()
            .append_pair("ignoreWarnings", if ignore_warnings { "true" } else { "false" });
        self.send_json(Method::POST, url, build).await
    }

    async fn get_build(&self, build_id: i32) -> TfsResult<Build> {
        let id = build_id.to_string();
        let url = self.endpoint(["_apis", "build", "builds", id.as_str()], API_VERSION)?;
        self.get_json(url).await
    }

    async fn update_build(&self, build: &Build) -> TfsResult<Build> {
        let id = build.id.to_string();
        let url = self.endpoint(["_apis", "build", "builds", id.as_str()], API_VERSION)?;
        self.send_json(Method::PATCH, url, build).await
    }

    async fn get_orchestration_plan(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
    ) -> TfsResult<TaskOrchestrationPlan> {
        let url = self.plan_endpoint(project_id, plan_id, &[])?;
        self.get_json(url).await
    }

    async fn get_timeline_records(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
    ) -> TfsResult<Vec<TimelineRecord>> {
        let timeline = timeline_id.to_string();
        let url = self.plan_endpoint(project_id, plan_id, &["timelines", &timeline, "records"])?;
        let records: Collection<TimelineRecord> = self.get_json(url).await?;
        Ok(records.value)
    }

    async fn update_timeline_records(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
        records: &[TimelineRecord],
    ) -> TfsResult<Vec<TimelineRecord>> {
        let timeline = timeline_id.to_string();
        let url = self.plan_endpoint(project_id, plan_id, &["timelines", &timeline, "records"])?;
        let updated: Collection<TimelineRecord> = self
            .send_json(Method::PATCH, url, &CollectionBody::new(records))
            .await?;
        Ok(updated.value)
    }

    async fn create_log(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        log: &TaskLog,
    ) -> TfsResult<TaskLog> {
        let url = self.plan_endpoint(project_id, plan_id, &["logs"])?;
        self.send_json(Method::POST, url, log).await
    }

    async fn append_log(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        log_id: i32,
        content: Vec<u8>,
    ) -> TfsResult<()> {
        let log = log_id.to_string();
        let url = self.plan_endpoint(project_id, plan_id, &["logs", &log])?;
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.execute(request).await?;
        Ok(())
    }

    async fn post_console_feed(
        &self,
        project_id: Uuid,
        plan_id: Uuid,
        timeline_id: Uuid,
        record_id: Uuid,
        lines: &[String],
    ) -> TfsResult<()> {
        let timeline = timeline_id.to_string();
        let record = record_id.to_string();
        let url = self.plan_endpoint(
            project_id,
            plan_id,
            &["timelines", &timeline, "records", &record, "feed"],
        )?;
        self.execute(self.http.post(url).json(&CollectionBody::new(lines)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> TfsClient {
        TfsClient::new(
            url,
            ServiceProvider::Vso,
            "user",
            "secret",
            &TransportConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn on_premise_usernames_use_backslash() {
        assert_eq!(
            normalize_username(ServiceProvider::Tfs, "corp/alice"),
            "corp\\alice"
        );
        assert_eq!(
            normalize_username(ServiceProvider::Tfs, "corp\\alice"),
            "corp\\alice"
        );
        assert_eq!(normalize_username(ServiceProvider::Tfs, "alice"), "alice");
        assert_eq!(normalize_username(ServiceProvider::Tfs, "/alice"), "/alice");
        assert_eq!(
            normalize_username(ServiceProvider::Vso, "corp/alice"),
            "corp/alice"
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            parse_server_url("ftp://tfs.corp"),
            Err(TfsError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_server_url("not a url"),
            Err(TfsError::InvalidUrl(_))
        ));
        assert!(parse_server_url("https://tfs.corp/tfs/DefaultCollection").is_ok());
    }

    #[test]
    fn endpoints_extend_the_collection_path() {
        let client = client("https://tfs.corp/tfs/DefaultCollection/");
        let url = client.endpoint(["_apis", "projects"], API_VERSION).unwrap();
        assert_eq!(
            url.as_str(),
            "https://tfs.corp/tfs/DefaultCollection/_apis/projects?api-version=2.0"
        );
    }

    #[test]
    fn project_names_are_escaped() {
        let client = client("https://tfs.corp/tfs/DefaultCollection");
        let url = client
            .endpoint(["_apis", "projects", "My Project"], API_VERSION)
            .unwrap();
        assert!(url.path().ends_with("/_apis/projects/My%20Project"));
    }

    #[test]
    fn plan_endpoints_use_the_build_hub() {
        let client = client("https://fabrikam.visualstudio.com/DefaultCollection");
        let project = Uuid::nil();
        let plan = Uuid::from_u128(1);
        let url = client.plan_endpoint(project, plan, &["logs"]).unwrap();
        assert_eq!(
            url.path(),
            format!(
                "/DefaultCollection/{}/_apis/distributedtask/hubs/build/plans/{}/logs",
                project, plan
            )
        );
        assert_eq!(url.query(), Some("api-version=2.0-preview"));
    }

    #[test]
    fn collection_bodies_carry_count() {
        let lines = vec!["a".to_string(), "b".to_string()];
        let json = serde_json::to_value(CollectionBody::new(&lines)).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["value"][1], "b");
    }

    #[test]
    fn debug_output_hides_password() {
        let client = client("https://tfs.corp/tfs");
        let debug = format!("{:?}", client);
        assert!(debug.contains("tfs.corp"));
        assert!(!debug.contains("secret"));
    }
}
