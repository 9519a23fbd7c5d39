//! Flat task records: one per reconciliation, the shape an automation run
//! hands us. A task file is a YAML (or JSON) list of them, run in order and
//! stopped at the first failure.

use drover_api::ArgoApi;
use drover_core::model::{ApplicationDestination, ApplicationSource};
use drover_core::{
    Application, Destination, DroverError, DroverResult, Outcome, Presence, ProjectState, Repository,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;
use tracing::info;

use crate::ReconcilingClient;

fn max_task_bytes() -> usize {
    std::env::var("DROVER_MAX_TASK_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1 << 20) // 1 MiB default
}

fn max_task_nodes() -> usize {
    std::env::var("DROVER_MAX_TASK_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// YAML hands `name: 2024` or `target_revision: 1.0` over as numbers; take
/// any scalar as its text form.
fn scalar_text<E: serde::de::Error>(v: Json) -> Result<Option<String>, E> {
    match v {
        Json::Null => Ok(None),
        Json::String(s) => Ok(Some(s)),
        Json::Number(n) => Ok(Some(n.to_string())),
        Json::Bool(b) => Ok(Some(b.to_string())),
        other => Err(E::custom(format!("expected a string, found {other}"))),
    }
}

fn scalar_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_text(Json::deserialize(d)?)?.ok_or_else(|| serde::de::Error::custom("expected a string, found null"))
}

fn opt_scalar_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_text(Json::deserialize(d)?)
}

/// Accept either a single string or a list of strings.
fn one_or_many<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectTask {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub description: String,
    #[serde(default)]
    pub status: ProjectState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleTask {
    #[serde(deserialize_with = "scalar_string")]
    pub project_name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub role_name: String,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub role_description: Option<String>,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyTask {
    #[serde(deserialize_with = "scalar_string")]
    pub project_name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub role_name: String,
    #[serde(deserialize_with = "one_or_many")]
    pub policies: Vec<String>,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupTask {
    #[serde(deserialize_with = "scalar_string")]
    pub project_name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub role_name: String,
    #[serde(deserialize_with = "one_or_many")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationTask {
    #[serde(deserialize_with = "scalar_string")]
    pub project_name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub server: String,
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub namespace: String,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceReposTask {
    #[serde(deserialize_with = "scalar_string")]
    pub project_name: String,
    #[serde(deserialize_with = "one_or_many")]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryTask {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "scalar_string")]
    pub repository_url: String,
    #[serde(deserialize_with = "scalar_string")]
    pub username: String,
    #[serde(deserialize_with = "scalar_string")]
    pub password: String,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationTask {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(deserialize_with = "scalar_string")]
    pub repository_url: String,
    #[serde(deserialize_with = "scalar_string")]
    pub path: String,
    #[serde(deserialize_with = "scalar_string")]
    pub target_revision: String,
    #[serde(deserialize_with = "scalar_string")]
    pub namespace: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub values_files: Vec<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub destination_server: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub project: Option<String>,
    #[serde(default)]
    pub status: Presence,
}

/// One named reconciliation with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    Project(ProjectTask),
    Role(RoleTask),
    Policy(PolicyTask),
    Group(GroupTask),
    Destination(DestinationTask),
    SourceRepos(SourceReposTask),
    Repository(RepositoryTask),
    Application(ApplicationTask),
}

fn to_json<T: Serialize>(o: Outcome<T>) -> DroverResult<Outcome<Json>> {
    let changed = o.changed;
    let resource = serde_json::to_value(o.resource)
        .map_err(|e| DroverError::MalformedResponse(format!("re-encoding result: {e}")))?;
    Ok(Outcome { changed, resource })
}

impl Task {
    /// Short label for logs and reports, e.g. `policy team-a/dev`.
    pub fn label(&self) -> String {
        match self {
            Task::Project(t) => format!("project {}", t.name),
            Task::Role(t) => format!("role {}/{}", t.project_name, t.role_name),
            Task::Policy(t) => format!("policy {}/{}", t.project_name, t.role_name),
            Task::Group(t) => format!("group {}/{}", t.project_name, t.role_name),
            Task::Destination(t) => format!("destination {}/{}", t.project_name, t.name),
            Task::SourceRepos(t) => format!("source_repos {}", t.project_name),
            Task::Repository(t) => format!("repository {}", t.repository_url),
            Task::Application(t) => format!("application {}", t.name),
        }
    }

    pub async fn run<A: ArgoApi>(&self, client: &ReconcilingClient<A>) -> DroverResult<Outcome<Json>> {
        match self {
            Task::Project(t) => to_json(match t.status {
                ProjectState::Present => client.create_project(&t.name, &t.description).await?,
                ProjectState::Update => client.update_project(&t.name, &t.description).await?,
                ProjectState::Absent => client.delete_project(&t.name).await?,
            }),
            Task::Role(t) => to_json(match t.status {
                Presence::Present => {
                    client.add_role_to_project(&t.project_name, &t.role_name, t.role_description.as_deref()).await?
                }
                Presence::Absent => client.remove_role_from_project(&t.project_name, &t.role_name).await?,
            }),
            Task::Policy(t) => {
                to_json(client.merge_role_policies(&t.project_name, &t.role_name, &t.policies, t.status).await?)
            }
            Task::Group(t) => {
                to_json(client.merge_role_groups(&t.project_name, &t.role_name, &t.groups, t.status).await?)
            }
            Task::Destination(t) => {
                let dest = Destination::new(&t.server, &t.name, &t.namespace);
                to_json(match t.status {
                    Presence::Present => client.add_destination_to_project(&t.project_name, dest).await?,
                    Presence::Absent => client.remove_destination_from_project(&t.project_name, &dest).await?,
                })
            }
            Task::SourceRepos(t) => {
                to_json(client.merge_source_repos(&t.project_name, &t.repositories, t.status).await?)
            }
            Task::Repository(t) => match t.status {
                Presence::Present => to_json(client.create_repository(t.to_repository()).await?),
                Presence::Absent => to_json(client.delete_repository(&t.repository_url).await?),
            },
            Task::Application(t) => match t.status {
                Presence::Present => to_json(client.create_application(t.to_application()).await?),
                Presence::Absent => to_json(client.delete_application(&t.name).await?),
            },
        }
    }
}

impl RepositoryTask {
    pub fn to_repository(&self) -> Repository {
        Repository {
            repo: self.repository_url.clone(),
            kind: Some(self.kind.clone()),
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            project: self.project.clone(),
            name: self.name.clone(),
            ..Default::default()
        }
    }
}

impl ApplicationTask {
    pub fn to_application(&self) -> Application {
        Application::automated(
            &self.name,
            self.project.clone(),
            ApplicationSource::new(&self.repository_url, &self.path, &self.target_revision, self.values_files.clone()),
            ApplicationDestination::new(self.destination_server.clone(), Some(self.namespace.clone())),
        )
    }
}

// ---------------- Task files ----------------

#[derive(Debug, Deserialize)]
struct TaskFile {
    tasks: Vec<Task>,
}

/// Parse a task file: either `{ tasks: [...] }` or a bare list of tasks.
pub fn load_task_file(text: &str) -> DroverResult<Vec<Task>> {
    if text.len() > max_task_bytes() {
        return Err(DroverError::InvalidInput(format!("task file too large (>{} bytes)", max_task_bytes())));
    }
    let val: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| DroverError::InvalidInput(format!("parsing task file: {e}")))?;
    let json = serde_json::to_value(val).map_err(|e| DroverError::InvalidInput(format!("converting task file: {e}")))?;
    if node_budget_exceeded(&json, max_task_nodes()) {
        return Err(DroverError::InvalidInput(format!("task file too complex (>{} nodes)", max_task_nodes())));
    }
    let tasks = if json.is_array() {
        serde_json::from_value::<Vec<Task>>(json)
    } else {
        serde_json::from_value::<TaskFile>(json).map(|f| f.tasks)
    };
    tasks.map_err(|e| DroverError::InvalidInput(format!("invalid task: {e}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: String,
    pub changed: bool,
    pub result: Json,
}

#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub index: usize,
    pub task: String,
    pub error: DroverError,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub completed: Vec<TaskReport>,
    pub failure: Option<TaskFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool { self.failure.is_none() }

    pub fn changed(&self) -> bool { self.completed.iter().any(|r| r.changed) }
}

/// Run tasks strictly in order; the first failure stops the run.
pub async fn run_all<A: ArgoApi>(client: &ReconcilingClient<A>, tasks: &[Task]) -> RunReport {
    let mut report = RunReport::default();
    for (index, task) in tasks.iter().enumerate() {
        let label = task.label();
        match task.run(client).await {
            Ok(o) => {
                info!(task = %label, changed = o.changed, "task done");
                report.completed.push(TaskReport { task: label, changed: o.changed, result: o.resource });
            }
            Err(error) => {
                report.failure = Some(TaskFailure { index, task: label, error });
                break;
            }
        }
    }
    report
}
