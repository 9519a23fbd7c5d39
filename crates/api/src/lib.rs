//! Drover remote resource store.
//!
//! `ArgoApi` is the seam between reconciliation logic and the CD server: one
//! method per REST call the reconciler needs. `HttpArgoApi` talks to a real
//! server; `MockApi` keeps everything in memory and records every call, for
//! tests of the layers above.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use drover_core::{Application, DroverError, DroverResult, Project, Repository};

mod config;
mod http;

pub use config::{http_timeout, ClientConfig, DEFAULT_HTTP_TIMEOUT_SECS};
pub use http::HttpArgoApi;

/// REST surface of the CD server used by the reconciler. Each method is a
/// single HTTP call; nothing here retries or caches.
#[async_trait::async_trait]
pub trait ArgoApi: Send + Sync {
    /// `GET /projects/{name}`
    async fn get_project(&self, name: &str) -> DroverResult<Project>;

    /// `POST /projects`
    async fn create_project(&self, project: &Project) -> DroverResult<Project>;

    /// `PUT /projects/{name}`: full replace.
    async fn update_project(&self, project: &Project) -> DroverResult<Project>;

    /// `GET /repositories`
    async fn list_repositories(&self) -> DroverResult<Vec<Repository>>;

    /// `POST /repositories`
    async fn create_repository(&self, repo: &Repository) -> DroverResult<Repository>;

    /// `POST /applications`
    async fn create_application(&self, app: &Application) -> DroverResult<Application>;
}

// ----------------- Mock implementation -----------------

/// In-memory implementation for tests. Every call is recorded as
/// `"<METHOD> <path>"` so callers can assert which requests were issued.
#[derive(Default)]
pub struct MockApi {
    projects: Mutex<BTreeMap<String, Project>>,
    repositories: Mutex<Vec<Repository>>,
    applications: Mutex<BTreeMap<String, Application>>,
    calls: Mutex<Vec<String>>,
    write_error: Mutex<Option<DroverError>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

impl MockApi {
    pub fn new() -> Self { Self::default() }

    pub fn with_project(self, project: Project) -> Self {
        lock(&self.projects).insert(project.metadata.name.clone(), project);
        self
    }

    pub fn with_repository(self, repo: Repository) -> Self {
        lock(&self.repositories).push(repo);
        self
    }

    /// Make every subsequent write (POST/PUT) fail with `err`.
    pub fn fail_writes_with(&self, err: DroverError) { *lock(&self.write_error) = Some(err); }

    pub fn project(&self, name: &str) -> Option<Project> { lock(&self.projects).get(name).cloned() }

    pub fn repositories(&self) -> Vec<Repository> { lock(&self.repositories).clone() }

    pub fn application(&self, name: &str) -> Option<Application> { lock(&self.applications).get(name).cloned() }

    pub fn calls(&self) -> Vec<String> { lock(&self.calls).clone() }

    /// Number of POST/PUT calls seen so far.
    pub fn writes(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.starts_with("POST") || c.starts_with("PUT")).count()
    }

    fn record(&self, call: String) { lock(&self.calls).push(call); }

    fn check_write(&self) -> DroverResult<()> {
        match lock(&self.write_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ArgoApi for MockApi {
    async fn get_project(&self, name: &str) -> DroverResult<Project> {
        self.record(format!("GET /projects/{name}"));
        self.project(name).ok_or_else(|| DroverError::NotFound(format!("project {name} not found")))
    }

    async fn create_project(&self, project: &Project) -> DroverResult<Project> {
        self.record("POST /projects".to_string());
        self.check_write()?;
        let mut projects = lock(&self.projects);
        if projects.contains_key(project.name()) {
            return Err(DroverError::Conflict(format!("project {} already exists", project.name())));
        }
        projects.insert(project.name().to_string(), project.clone());
        Ok(project.clone())
    }

    async fn update_project(&self, project: &Project) -> DroverResult<Project> {
        self.record(format!("PUT /projects/{}", project.name()));
        self.check_write()?;
        let mut projects = lock(&self.projects);
        match projects.get_mut(project.name()) {
            Some(slot) => {
                *slot = project.clone();
                Ok(project.clone())
            }
            None => Err(DroverError::NotFound(format!("project {} not found", project.name()))),
        }
    }

    async fn list_repositories(&self) -> DroverResult<Vec<Repository>> {
        self.record("GET /repositories".to_string());
        Ok(self.repositories())
    }

    async fn create_repository(&self, repo: &Repository) -> DroverResult<Repository> {
        self.record("POST /repositories".to_string());
        self.check_write()?;
        lock(&self.repositories).push(repo.clone());
        Ok(repo.clone())
    }

    async fn create_application(&self, app: &Application) -> DroverResult<Application> {
        self.record("POST /applications".to_string());
        self.check_write()?;
        let mut apps = lock(&self.applications);
        if apps.contains_key(&app.metadata.name) {
            return Err(DroverError::Conflict(format!("application {} already exists", app.metadata.name)));
        }
        apps.insert(app.metadata.name.clone(), app.clone());
        Ok(app.clone())
    }
}
