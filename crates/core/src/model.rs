//! Resource shapes exchanged with the CD server.
//!
//! Every collection defaults to empty when the server omits it or sends `null`,
//! and every struct keeps the fields it does not model in `extra`, so a
//! fetched resource can be written back whole without dropping anything.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as Json};

/// Unmodelled fields carried through a read-merge-write cycle.
pub type Extra = Map<String, Json>;

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

// ---------------- Projects ----------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: ProjectMetadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: ProjectSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<Role>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub destinations: Vec<Destination>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_repos: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            metadata: ProjectMetadata { name: name.into(), description: Some(description.into()), extra: Extra::new() },
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str { &self.metadata.name }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub policies: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub groups: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: Some(description.into()), ..Default::default() }
    }
}

/// An allowed deployment target. Identity is the full `(server, name, namespace)` triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, deserialize_with = "null_as_default")]
    pub server: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Destination {
    pub fn new(server: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { server: server.into(), name: name.into(), namespace: namespace.into(), extra: Extra::new() }
    }

    pub fn same_target(&self, other: &Destination) -> bool {
        self.server == other.server && self.name == other.name && self.namespace == other.namespace
    }
}

// ---------------- Repositories ----------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository URL; the identity of the entry.
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Repository {
    /// Chart repositories must carry a name; git ones need not.
    pub fn is_chart(&self) -> bool {
        self.kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case("helm"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Repository>,
}

// ---------------- Applications ----------------

pub const DEFAULT_DESTINATION_SERVER: &str = "https://kubernetes.default.svc";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: ApplicationMetadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: ApplicationSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub project: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: ApplicationSource,
    #[serde(default, deserialize_with = "null_as_default")]
    pub destination: ApplicationDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL", default, deserialize_with = "null_as_default")]
    pub repo_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub value_files: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDestination {
    #[serde(default, deserialize_with = "null_as_default")]
    pub server: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<AutomatedSync>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSync {
    #[serde(default)]
    pub self_heal: bool,
    #[serde(default)]
    pub prune: bool,
}

impl ApplicationSource {
    /// Build a source; the `helm` block is only emitted when value files are given.
    pub fn new(repo_url: impl Into<String>, path: impl Into<String>, target_revision: impl Into<String>, value_files: Vec<String>) -> Self {
        let helm = if value_files.is_empty() { None } else { Some(HelmSource { value_files, extra: Extra::new() }) };
        Self { repo_url: repo_url.into(), path: path.into(), target_revision: target_revision.into(), helm, extra: Extra::new() }
    }
}

impl ApplicationDestination {
    pub fn new(server: Option<String>, namespace: Option<String>) -> Self {
        Self {
            server: server.unwrap_or_else(|| DEFAULT_DESTINATION_SERVER.to_string()),
            namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            extra: Extra::new(),
        }
    }
}

impl Application {
    /// New application with automated self-heal and prune always switched on.
    pub fn automated(
        name: impl Into<String>,
        project: Option<String>,
        source: ApplicationSource,
        destination: ApplicationDestination,
    ) -> Self {
        Self {
            metadata: ApplicationMetadata { name: name.into(), extra: Extra::new() },
            spec: ApplicationSpec {
                project: project.unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
                source,
                destination,
                sync_policy: Some(SyncPolicy {
                    automated: Some(AutomatedSync { self_heal: true, prune: true }),
                    extra: Extra::new(),
                }),
                extra: Extra::new(),
            },
            extra: Extra::new(),
        }
    }
}
