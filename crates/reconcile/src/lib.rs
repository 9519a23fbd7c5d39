//! Drover reconcile: converge one desired-state change at a time.
//!
//! Every project-scoped operation is the same cycle: fetch the project, merge
//! a single change into one nested collection, and write the whole project
//! back with a full replace. When the merge changes nothing the write is
//! skipped and the outcome says `changed: false`. There is no locking and no
//! resourceVersion guard: a concurrent writer between our read and our write
//! wins or loses by timing.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Instant;

use drover_api::ArgoApi;
use drover_core::{
    Application, Destination, DroverError, DroverResult, Outcome, Presence, Project, Repository, Role, RoleMembers,
};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

pub mod tasks;

pub use tasks::{load_task_file, run_all, RunReport, Task, TaskFailure, TaskReport};

fn require(field: &str, value: &str) -> DroverResult<()> {
    if value.trim().is_empty() {
        return Err(DroverError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

/// The server must answer for the project we asked about; anything else would
/// turn the following write into an edit of some other project.
fn ensure_requested(name: &str, project: &Project) -> DroverResult<()> {
    if project.name() != name {
        return Err(DroverError::MalformedResponse(format!(
            "asked for project '{name}' but the server returned '{}'",
            project.name()
        )));
    }
    Ok(())
}

async fn unsupported<T>(op: &str) -> DroverResult<Outcome<T>> { Err(DroverError::Unsupported(op.to_string())) }

/// Run one operation with latency, outcome counters and a warning on failure.
async fn tracked<T, F>(op: &'static str, fut: F) -> DroverResult<Outcome<T>>
where
    F: Future<Output = DroverResult<Outcome<T>>>,
{
    let t0 = Instant::now();
    counter!("reconcile_attempts", 1u64);
    let res = fut.await;
    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    match &res {
        Ok(o) if o.changed => counter!("reconcile_writes", 1u64),
        Ok(_) => counter!("reconcile_noop", 1u64),
        Err(e) => {
            counter!("reconcile_err", 1u64);
            warn!(op, kind = e.kind(), error = %e, "reconcile failed");
        }
    }
    res
}

/// Stateless reconciler over an `ArgoApi`. Holds nothing but the API handle.
pub struct ReconcilingClient<A> {
    api: A,
}

impl<A: ArgoApi> ReconcilingClient<A> {
    pub fn new(api: A) -> Self { Self { api } }

    pub fn api(&self) -> &A { &self.api }

    /// Fetch, let `merge` mutate, write back only if `merge` reports a change.
    async fn modify_project<F>(&self, op: &'static str, name: &str, merge: F) -> DroverResult<Outcome<Project>>
    where
        F: FnOnce(&mut Project) -> DroverResult<bool>,
    {
        require("project name", name)?;
        let mut project = self.api.get_project(name).await?;
        ensure_requested(name, &project)?;
        if !merge(&mut project)? {
            debug!(op, project = name, "already converged; no write");
            return Ok(Outcome::unchanged(project));
        }
        let written = self.api.update_project(&project).await?;
        info!(op, project = name, "project written");
        Ok(Outcome::changed(written))
    }

    // ---------------- Projects ----------------

    /// Create the project unless it already exists; an existing project is
    /// returned untouched.
    pub async fn create_project(&self, name: &str, description: &str) -> DroverResult<Outcome<Project>> {
        tracked("create_project", async {
            require("project name", name)?;
            match self.api.get_project(name).await {
                Ok(existing) => {
                    ensure_requested(name, &existing)?;
                    debug!(project = name, "project exists; not creating");
                    return Ok(Outcome::unchanged(existing));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            let created = self.api.create_project(&Project::new(name, description)).await?;
            info!(project = name, "project created");
            Ok(Outcome::changed(created))
        })
        .await
    }

    /// Rewrite name and description of an existing project; all other fields
    /// go back exactly as fetched.
    pub async fn update_project(&self, name: &str, description: &str) -> DroverResult<Outcome<Project>> {
        let modify = self.modify_project("update_project", name, |p| Ok(p.set_metadata(name, description)));
        tracked("update_project", modify).await
    }

    /// Project deletion is not wired up; callers get an explicit error instead
    /// of a silent success.
    pub async fn delete_project(&self, name: &str) -> DroverResult<Outcome<Project>> {
        debug!(project = name, "delete_project requested");
        tracked("delete_project", unsupported("delete_project")).await
    }

    // ---------------- Roles ----------------

    /// Append a role. A role with the same name already present is left as is,
    /// description included.
    pub async fn add_role_to_project(
        &self,
        project: &str,
        role: &str,
        description: Option<&str>,
    ) -> DroverResult<Outcome<Project>> {
        tracked("add_role", async {
            require("role name", role)?;
            self.modify_project("add_role", project, |p| {
                let new_role = Role { name: role.to_string(), description: description.map(str::to_string), ..Default::default() };
                Ok(p.spec.add_role(new_role))
            })
            .await
        })
        .await
    }

    pub async fn remove_role_from_project(&self, project: &str, role: &str) -> DroverResult<Outcome<Project>> {
        debug!(project, role, "remove_role_from_project requested");
        tracked("remove_role_from_project", unsupported("remove_role_from_project")).await
    }

    /// Add (`Present`) or remove (`Absent`) policies on a role. Fails with
    /// `RoleNotFound` when the role is missing.
    pub async fn merge_role_policies(
        &self,
        project: &str,
        role: &str,
        policies: &[String],
        presence: Presence,
    ) -> DroverResult<Outcome<Project>> {
        self.merge_role_members("merge_role_policies", project, role, RoleMembers::Policies, policies, presence)
            .await
    }

    /// Same as `merge_role_policies`, for group bindings.
    pub async fn merge_role_groups(
        &self,
        project: &str,
        role: &str,
        groups: &[String],
        presence: Presence,
    ) -> DroverResult<Outcome<Project>> {
        self.merge_role_members("merge_role_groups", project, role, RoleMembers::Groups, groups, presence)
            .await
    }

    async fn merge_role_members(
        &self,
        op: &'static str,
        project: &str,
        role: &str,
        which: RoleMembers,
        wanted: &[String],
        presence: Presence,
    ) -> DroverResult<Outcome<Project>> {
        tracked(op, async {
            require("role name", role)?;
            self.modify_project(op, project, |p| p.merge_role_members(role, which, wanted, presence)).await
        })
        .await
    }

    // ---------------- Destinations / source repos ----------------

    pub async fn add_destination_to_project(&self, project: &str, dest: Destination) -> DroverResult<Outcome<Project>> {
        let modify = self.modify_project("add_destination", project, |p| Ok(p.spec.add_destination(dest)));
        tracked("add_destination", modify).await
    }

    /// Remove by exact `(server, name, namespace)` match. A destination that is
    /// not there leaves the project unchanged and is not an error.
    pub async fn remove_destination_from_project(
        &self,
        project: &str,
        dest: &Destination,
    ) -> DroverResult<Outcome<Project>> {
        let modify = self.modify_project("remove_destination", project, |p| Ok(p.spec.remove_destination(dest)));
        tracked("remove_destination", modify).await
    }

    pub async fn merge_source_repos(
        &self,
        project: &str,
        repos: &[String],
        presence: Presence,
    ) -> DroverResult<Outcome<Project>> {
        let modify = self.modify_project("merge_source_repos", project, |p| Ok(p.spec.merge_source_repos(repos, presence)));
        tracked("merge_source_repos", modify).await
    }

    // ---------------- Repositories / applications ----------------

    /// Register a repository. Fails with `AlreadyExists` when the server already
    /// lists one with the same URL; there is no update path.
    pub async fn create_repository(&self, repo: Repository) -> DroverResult<Outcome<Repository>> {
        tracked("create_repository", async {
            require("repository url", &repo.repo)?;
            if repo.is_chart() && repo.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                return Err(DroverError::InvalidInput("name is required for helm repositories".into()));
            }
            let existing = self.api.list_repositories().await?;
            if existing.iter().any(|r| r.repo == repo.repo) {
                return Err(DroverError::AlreadyExists { kind: "repository".into(), id: repo.repo.clone() });
            }
            let created = self.api.create_repository(&repo).await?;
            info!(repo = %repo.repo, "repository created");
            Ok(Outcome::changed(created))
        })
        .await
    }

    /// Repositories are never deleted; the call fails without touching the server.
    pub async fn delete_repository(&self, url: &str) -> DroverResult<Outcome<Repository>> {
        debug!(repo = url, "delete_repository requested");
        tracked("delete_repository", unsupported("delete_repository")).await
    }

    /// Applications are never deleted; the call fails without touching the server.
    pub async fn delete_application(&self, name: &str) -> DroverResult<Outcome<Application>> {
        debug!(app = name, "delete_application requested");
        tracked("delete_application", unsupported("delete_application")).await
    }

    /// Create an application directly; a duplicate name is reported by the
    /// server (usually as `Conflict`).
    pub async fn create_application(&self, app: Application) -> DroverResult<Outcome<Application>> {
        tracked("create_application", async {
            require("application name", &app.metadata.name)?;
            let created = self.api.create_application(&app).await?;
            info!(app = %app.metadata.name, project = %app.spec.project, "application created");
            Ok::<_, DroverError>(Outcome::changed(created))
        })
        .await
    }
}
