#![forbid(unsafe_code)]

use drover_api::{ArgoApi, MockApi};
use drover_core::{Application, Destination, DroverError, DroverResult, Presence, Project, Repository, Role};
use drover_reconcile::{load_task_file, run_all, ReconcilingClient, Task};
use serde_json::json;

fn s(v: &[&str]) -> Vec<String> { v.iter().map(|x| x.to_string()).collect() }

fn team_a() -> Project {
    let mut p = Project::new("team-a", "Team A");
    p.spec.roles.push(Role { name: "dev".into(), ..Default::default() });
    p
}

fn client_with(p: Project) -> ReconcilingClient<MockApi> { ReconcilingClient::new(MockApi::new().with_project(p)) }

#[tokio::test]
async fn create_project_twice_writes_once() {
    let client = ReconcilingClient::new(MockApi::new());
    let first = client.create_project("team-a", "Team A").await.unwrap();
    assert!(first.changed);
    let second = client.create_project("team-a", "something else").await.unwrap();
    assert!(!second.changed);
    assert_eq!(second.resource, first.resource);
    assert_eq!(second.resource.metadata.description.as_deref(), Some("Team A"));
    assert_eq!(
        client.api().calls(),
        vec!["GET /projects/team-a", "POST /projects", "GET /projects/team-a"]
    );
}

#[tokio::test]
async fn create_project_surfaces_create_failure() {
    let client = ReconcilingClient::new(MockApi::new());
    client.api().fail_writes_with(DroverError::Forbidden("no create".into()));
    let err = client.create_project("team-a", "x").await.unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn update_project_keeps_everything_but_metadata() {
    let mut p = team_a();
    p.spec.source_repos.push("https://git/a".into());
    p.extra.insert("status".into(), json!({ "jwtTokensByRole": {} }));
    let client = client_with(p);

    let out = client.update_project("team-a", "Renamed").await.unwrap();
    assert!(out.changed);
    let stored = client.api().project("team-a").unwrap();
    assert_eq!(stored.metadata.description.as_deref(), Some("Renamed"));
    assert_eq!(stored.spec.source_repos, s(&["https://git/a"]));
    assert_eq!(stored.spec.roles.len(), 1);
    assert!(stored.extra.contains_key("status"));

    let again = client.update_project("team-a", "Renamed").await.unwrap();
    assert!(!again.changed);
    assert_eq!(client.api().writes(), 1);
}

#[tokio::test]
async fn update_missing_project_is_not_found() {
    let client = ReconcilingClient::new(MockApi::new());
    let err = client.update_project("ghost", "x").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn delete_and_remove_role_are_unsupported_and_silent_on_the_wire() {
    let client = client_with(team_a());
    let err = client.delete_project("team-a").await.unwrap_err();
    assert_eq!(err, DroverError::Unsupported("delete_project".into()));
    let err = client.remove_role_from_project("team-a", "dev").await.unwrap_err();
    assert_eq!(err.kind(), "unsupported");
    assert!(client.api().calls().is_empty());
    assert!(client.api().project("team-a").is_some());
}

#[tokio::test]
async fn add_role_is_idempotent() {
    let client = client_with(team_a());
    let once = client.add_role_to_project("team-a", "ops", Some("operators")).await.unwrap();
    assert!(once.changed);
    let twice = client.add_role_to_project("team-a", "ops", Some("different")).await.unwrap();
    assert!(!twice.changed);
    assert_eq!(once.resource.spec.roles, twice.resource.spec.roles);

    let roles = client.api().project("team-a").unwrap().spec.roles;
    assert_eq!(roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["dev", "ops"]);
    assert_eq!(roles[1].description.as_deref(), Some("operators"));
    assert_eq!(client.api().writes(), 1);
}

#[tokio::test]
async fn add_policy_scenario() {
    let client = client_with(team_a());
    let out = client.merge_role_policies("team-a", "dev", &s(&["sync"]), Presence::Present).await.unwrap();
    assert!(out.changed);
    assert_eq!(out.resource.spec.role("dev").unwrap().policies, s(&["sync"]));

    let again = client.merge_role_policies("team-a", "dev", &s(&["sync"]), Presence::Present).await.unwrap();
    assert!(!again.changed);
    assert_eq!(client.api().project("team-a").unwrap().spec.role("dev").unwrap().policies, s(&["sync"]));
    assert_eq!(client.api().writes(), 1);
}

#[tokio::test]
async fn absent_removes_every_listed_member() {
    let mut p = team_a();
    p.spec.roles[0].policies = s(&["a", "b", "c"]);
    p.spec.roles[0].groups = s(&["g1", "g2"]);
    let client = client_with(p);

    let out = client.merge_role_policies("team-a", "dev", &s(&["a", "c", "zz"]), Presence::Absent).await.unwrap();
    assert_eq!(out.resource.spec.roles[0].policies, s(&["b"]));
    let out = client.merge_role_groups("team-a", "dev", &s(&["g2"]), Presence::Absent).await.unwrap();
    assert_eq!(out.resource.spec.roles[0].groups, s(&["g1"]));
    let out = client.merge_role_groups("team-a", "dev", &s(&["g2"]), Presence::Absent).await.unwrap();
    assert!(!out.changed);
}

#[tokio::test]
async fn groups_present_dedups_request_and_existing() {
    let mut p = team_a();
    p.spec.roles[0].groups = s(&["org:a"]);
    let client = client_with(p);
    let out = client.merge_role_groups("team-a", "dev", &s(&["org:a", "org:b", "org:b"]), Presence::Present).await.unwrap();
    assert_eq!(out.resource.spec.roles[0].groups, s(&["org:a", "org:b"]));
}

#[tokio::test]
async fn missing_role_is_role_not_found_without_write() {
    let client = client_with(team_a());
    let err = client.merge_role_policies("team-a", "ops", &s(&["x"]), Presence::Present).await.unwrap_err();
    assert_eq!(err, DroverError::RoleNotFound { project: "team-a".into(), role: "ops".into() });
    let err = client.merge_role_groups("team-a", "ops", &s(&["x"]), Presence::Absent).await.unwrap_err();
    assert_eq!(err.kind(), "role_not_found");
    assert_eq!(client.api().writes(), 0);
}

#[tokio::test]
async fn missing_project_is_not_found() {
    let client = ReconcilingClient::new(MockApi::new());
    let err = client.merge_source_repos("ghost", &s(&["https://git/a"]), Presence::Present).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn destination_add_is_unique_by_triple() {
    let client = client_with(team_a());
    let d = Destination::new("https://k8s", "prod", "ns1");
    assert!(client.add_destination_to_project("team-a", d.clone()).await.unwrap().changed);
    let again = client.add_destination_to_project("team-a", d.clone()).await.unwrap();
    assert!(!again.changed);
    assert_eq!(again.resource.spec.destinations.len(), 1);

    let other_ns = Destination::new("https://k8s", "prod", "ns2");
    let out = client.add_destination_to_project("team-a", other_ns).await.unwrap();
    assert_eq!(out.resource.spec.destinations.len(), 2);
}

#[tokio::test]
async fn removing_absent_destination_returns_unchanged_project() {
    let mut p = team_a();
    p.spec.destinations.push(Destination::new("https://k8s", "stage", "ns1"));
    let client = client_with(p.clone());
    let d = Destination::new("https://k8s", "prod", "ns1");
    let out = client.remove_destination_from_project("team-a", &d).await.unwrap();
    assert!(!out.changed);
    assert_eq!(out.resource, p);
    assert_eq!(client.api().writes(), 0);

    // A project with no destinations at all behaves the same.
    let client = client_with(Project::new("bare", ""));
    let out = client.remove_destination_from_project("bare", &d).await.unwrap();
    assert!(!out.changed);
}

#[tokio::test]
async fn remove_destination_matches_exact_triple() {
    let mut p = team_a();
    p.spec.destinations = vec![
        Destination::new("https://k8s", "prod", "ns1"),
        Destination::new("https://k8s", "prod", "ns2"),
    ];
    let client = client_with(p);
    let out = client
        .remove_destination_from_project("team-a", &Destination::new("https://k8s", "prod", "ns1"))
        .await
        .unwrap();
    assert!(out.changed);
    assert_eq!(out.resource.spec.destinations, vec![Destination::new("https://k8s", "prod", "ns2")]);
}

#[tokio::test]
async fn source_repos_set_semantics() {
    let client = client_with(team_a());
    let out = client.merge_source_repos("team-a", &s(&["https://git/a", "https://git/b"]), Presence::Present).await.unwrap();
    assert_eq!(out.resource.spec.source_repos, s(&["https://git/a", "https://git/b"]));
    let out = client.merge_source_repos("team-a", &s(&["https://git/a"]), Presence::Present).await.unwrap();
    assert!(!out.changed);
    let out = client.merge_source_repos("team-a", &s(&["https://git/a"]), Presence::Absent).await.unwrap();
    assert_eq!(out.resource.spec.source_repos, s(&["https://git/b"]));
}

#[tokio::test]
async fn failed_write_after_read_propagates() {
    let client = client_with(team_a());
    client.api().fail_writes_with(DroverError::Timeout("PUT took too long".into()));
    let err = client.merge_source_repos("team-a", &s(&["https://git/a"]), Presence::Present).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(client.api().project("team-a").unwrap().spec.source_repos.is_empty());
}

#[tokio::test]
async fn existing_repository_url_is_already_exists_without_create() {
    let existing = Repository { repo: "https://git/a".into(), kind: Some("git".into()), ..Default::default() };
    let client = ReconcilingClient::new(MockApi::new().with_repository(existing));
    let dup = Repository { repo: "https://git/a".into(), kind: Some("git".into()), ..Default::default() };
    let err = client.create_repository(dup).await.unwrap_err();
    assert_eq!(err, DroverError::AlreadyExists { kind: "repository".into(), id: "https://git/a".into() });
    assert_eq!(client.api().calls(), vec!["GET /repositories"]);
}

#[tokio::test]
async fn helm_repository_needs_a_name() {
    let client = ReconcilingClient::new(MockApi::new());
    let chart = Repository { repo: "https://charts".into(), kind: Some("helm".into()), ..Default::default() };
    let err = client.create_repository(chart.clone()).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_input");
    assert!(client.api().calls().is_empty());

    let named = Repository { name: Some("charts".into()), ..chart };
    let out = client.create_repository(named).await.unwrap();
    assert!(out.changed);
    assert_eq!(client.api().repositories().len(), 1);
}

#[tokio::test]
async fn application_duplicate_is_reported_by_server() {
    let tasks = load_task_file(
        "- task: application\n  name: gb\n  repository_url: https://git/gb\n  path: chart\n  target_revision: main\n  namespace: gb\n",
    )
    .unwrap();
    let client = ReconcilingClient::new(MockApi::new());
    let first = tasks[0].run(&client).await.unwrap();
    assert!(first.changed);
    assert_eq!(first.resource["spec"]["syncPolicy"]["automated"]["selfHeal"], true);
    let err = tasks[0].run(&client).await.unwrap_err();
    assert_eq!(err.kind(), "conflict");
    // no existence probe: both runs went straight to create
    assert_eq!(client.api().calls(), vec!["POST /applications", "POST /applications"]);
}

#[tokio::test]
async fn task_file_runs_in_order_and_stops_at_first_failure() {
    let y = r#"
tasks:
  - task: project
    name: team-a
    description: Team A
  - task: role
    project_name: team-a
    role_name: dev
    role_description: developers
  - task: policy
    project_name: team-a
    role_name: dev
    policies: [sync]
  - task: group
    project_name: team-a
    role_name: ops
    groups: [org:ops]
  - task: source_repos
    project_name: team-a
    repositories: [https://git/never]
"#;
    let tasks = load_task_file(y).unwrap();
    let client = ReconcilingClient::new(MockApi::new());
    let report = run_all(&client, &tasks).await;

    assert!(!report.is_success());
    assert!(report.changed());
    assert_eq!(report.completed.len(), 3);
    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 3);
    assert_eq!(failure.task, "group team-a/ops");
    assert_eq!(failure.error.kind(), "role_not_found");

    let stored = client.api().project("team-a").unwrap();
    assert_eq!(stored.spec.role("dev").unwrap().policies, s(&["sync"]));
    assert!(stored.spec.source_repos.is_empty());
}

#[tokio::test]
async fn absent_repository_and_project_tasks_are_unsupported() {
    let client = ReconcilingClient::new(MockApi::new());
    let tasks = load_task_file(
        "- task: repository\n  type: git\n  repository_url: https://git/a\n  username: u\n  password: p\n  status: absent\n\
         - task: project\n  name: team-a\n  description: x\n  status: absent\n",
    )
    .unwrap();
    for t in &tasks {
        let err: DroverError = t.run(&client).await.unwrap_err();
        assert_eq!(err.kind(), "unsupported", "task={}", t.label());
    }
    assert!(matches!(tasks[0], Task::Repository(_)));
    assert!(client.api().calls().is_empty());
}

#[tokio::test]
async fn repository_and_application_deletes_are_unsupported() {
    let client = ReconcilingClient::new(MockApi::new());
    let err = client.delete_repository("https://git/a").await.unwrap_err();
    assert_eq!(err, DroverError::Unsupported("delete_repository".into()));
    let err = client.delete_application("guestbook").await.unwrap_err();
    assert_eq!(err, DroverError::Unsupported("delete_application".into()));
    assert!(client.api().calls().is_empty());
}

/// Answers every project lookup with the same project, whatever name was asked for.
struct OneProjectApi {
    project: Project,
    writes: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ArgoApi for OneProjectApi {
    async fn get_project(&self, _name: &str) -> DroverResult<Project> { Ok(self.project.clone()) }

    async fn create_project(&self, project: &Project) -> DroverResult<Project> {
        self.writes.lock().unwrap().push(format!("POST {}", project.name()));
        Ok(project.clone())
    }

    async fn update_project(&self, project: &Project) -> DroverResult<Project> {
        self.writes.lock().unwrap().push(format!("PUT {}", project.name()));
        Ok(project.clone())
    }

    async fn list_repositories(&self) -> DroverResult<Vec<Repository>> { Ok(Vec::new()) }

    async fn create_repository(&self, repo: &Repository) -> DroverResult<Repository> { Ok(repo.clone()) }

    async fn create_application(&self, app: &Application) -> DroverResult<Application> { Ok(app.clone()) }
}

#[tokio::test]
async fn project_returned_under_another_name_is_never_written() {
    let client = ReconcilingClient::new(OneProjectApi { project: Project::new("team-b", "B"), writes: Default::default() });

    let err = client.merge_source_repos("team-a/../team-b", &s(&["https://git/x"]), Presence::Present).await.unwrap_err();
    assert_eq!(err.kind(), "malformed_response");
    let err = client.add_role_to_project("team-a", "dev", None).await.unwrap_err();
    assert_eq!(err.kind(), "malformed_response");
    let err = client.create_project("team-a", "A").await.unwrap_err();
    assert_eq!(err.kind(), "malformed_response");
    assert!(client.api().writes.lock().unwrap().is_empty());

    let ok = client.merge_source_repos("team-b", &s(&["https://git/x"]), Presence::Present).await.unwrap();
    assert!(ok.changed);
    assert_eq!(*client.api().writes.lock().unwrap(), vec!["PUT team-b".to_string()]);
}
