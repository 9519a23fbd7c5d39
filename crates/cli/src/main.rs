use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use drover_api::{ClientConfig, HttpArgoApi};
use drover_core::{DroverError, Presence, ProjectState};
use drover_reconcile::tasks::{
    ApplicationTask, DestinationTask, GroupTask, PolicyTask, ProjectTask, RepositoryTask, RoleTask, SourceReposTask,
};
use drover_reconcile::{load_task_file, run_all, ReconcilingClient, RunReport, Task};
use serde_json::{json, Value as Json};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "droverctl", version, about = "Converge Argo CD projects, repositories and applications toward a desired state")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Json)]
    output: Output,

    /// API root, e.g. https://argocd.example.com/api/v1
    #[arg(long = "api-url", env = "DROVER_API_URL", global = true)]
    api_url: Option<String>,

    /// Bearer token
    #[arg(long = "token", env = "DROVER_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create (present), update, or delete (absent, unsupported) a project
    Project {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long, value_enum, default_value_t = ProjectState::Present)]
        status: ProjectState,
    },
    /// Add a role to a project (absent is unsupported)
    Role {
        #[arg(long = "project")]
        project: String,
        #[arg(long = "role")]
        role: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Add or remove policies on a project role
    Policy {
        #[arg(long = "project")]
        project: String,
        #[arg(long = "role")]
        role: String,
        /// Policy line; repeat for several
        #[arg(long = "policy", required = true)]
        policies: Vec<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Add or remove group bindings on a project role
    Group {
        #[arg(long = "project")]
        project: String,
        #[arg(long = "role")]
        role: String,
        /// Group name; repeat for several
        #[arg(long = "group", required = true)]
        groups: Vec<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Add or remove an allowed deployment destination
    Destination {
        #[arg(long = "project")]
        project: String,
        #[arg(long)]
        server: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        namespace: String,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Add or remove allowed source repositories of a project
    SourceRepos {
        #[arg(long = "project")]
        project: String,
        /// Repository URL; repeat for several
        #[arg(long = "repo", required = true)]
        repos: Vec<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Register a repository (fails if the URL is already registered)
    Repository {
        /// Repository type, e.g. git or helm
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long, env = "DROVER_REPO_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        project: Option<String>,
        /// Required for helm repositories
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Create an application with automated self-heal and prune
    Application {
        #[arg(long)]
        name: String,
        #[arg(long = "repo-url")]
        repo_url: String,
        #[arg(long)]
        path: String,
        #[arg(long = "revision")]
        revision: String,
        #[arg(long)]
        namespace: String,
        /// Helm value file; repeat for several
        #[arg(long = "values-file")]
        values_files: Vec<String>,
        #[arg(long = "dest-server")]
        dest_server: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, value_enum, default_value_t = Presence::Present)]
        status: Presence,
    },
    /// Run a YAML/JSON task file in order, stopping at the first failure
    Run {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("DROVER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DROVER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DROVER_METRICS_ADDR; expected host:port");
        }
    }
}

impl Commands {
    /// Every single-resource subcommand is one task record; `run` is not.
    fn into_task(self) -> Option<Task> {
        Some(match self {
            Commands::Project { name, description, status } => Task::Project(ProjectTask { name, description, status }),
            Commands::Role { project, role, description, status } => Task::Role(RoleTask {
                project_name: project,
                role_name: role,
                role_description: description,
                status,
            }),
            Commands::Policy { project, role, policies, status } => {
                Task::Policy(PolicyTask { project_name: project, role_name: role, policies, status })
            }
            Commands::Group { project, role, groups, status } => {
                Task::Group(GroupTask { project_name: project, role_name: role, groups, status })
            }
            Commands::Destination { project, server, name, namespace, status } => {
                Task::Destination(DestinationTask { project_name: project, server, name, namespace, status })
            }
            Commands::SourceRepos { project, repos, status } => {
                Task::SourceRepos(SourceReposTask { project_name: project, repositories: repos, status })
            }
            Commands::Repository { kind, url, username, password, project, name, status } => {
                Task::Repository(RepositoryTask { kind, repository_url: url, username, password, project, name, status })
            }
            Commands::Application { name, repo_url, path, revision, namespace, values_files, dest_server, project, status } => {
                Task::Application(ApplicationTask {
                    name,
                    repository_url: repo_url,
                    path,
                    target_revision: revision,
                    namespace,
                    values_files,
                    destination_server: dest_server,
                    project,
                    status,
                })
            }
            Commands::Run { .. } => return None,
        })
    }
}

fn make_client(cli: &Cli) -> Result<ReconcilingClient<HttpArgoApi>> {
    let url = cli.api_url.as_deref().ok_or_else(|| anyhow!("no API URL: pass --api-url or set DROVER_API_URL"))?;
    let token = cli.token.as_deref().ok_or_else(|| anyhow!("no token: pass --token or set DROVER_TOKEN"))?;
    let mut cfg = ClientConfig::new(url, token)?;
    if let Some(secs) = cli.timeout_secs {
        cfg = cfg.with_timeout(Duration::from_secs(secs.max(1)));
    }
    info!(base_url = %cfg.base_url, timeout = ?cfg.timeout, "client configured");
    Ok(ReconcilingClient::new(HttpArgoApi::new(&cfg)?))
}

fn failure_json(err: &DroverError) -> Json { json!({ "failed": true, "kind": err.kind(), "msg": err.to_string() }) }

fn print_json(v: &Json) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

/// Print a single task's result; returns whether it succeeded.
fn report_one(output: Output, label: &str, res: &Result<drover_core::Outcome<Json>, DroverError>) -> Result<bool> {
    match (output, res) {
        (Output::Json, Ok(o)) => print_json(&serde_json::to_value(o)?)?,
        (Output::Json, Err(e)) => print_json(&failure_json(e))?,
        (Output::Human, Ok(o)) => {
            println!("{} • {}", if o.changed { "changed" } else { "ok" }, label);
            println!("{}", serde_json::to_string_pretty(&o.resource)?);
        }
        (Output::Human, Err(e)) => eprintln!("failed • {} • {}", label, e),
    }
    Ok(res.is_ok())
}

fn report_run(output: Output, report: &RunReport) -> Result<bool> {
    match output {
        Output::Json => {
            let mut v = json!({ "changed": report.changed(), "results": report.completed });
            if let Some(f) = &report.failure {
                v["failed"] = json!(true);
                v["failed_task"] = json!({ "index": f.index, "task": f.task });
                v["kind"] = json!(f.error.kind());
                v["msg"] = json!(f.error.to_string());
            }
            print_json(&v)?;
        }
        Output::Human => {
            for r in &report.completed {
                println!("{} • {}", if r.changed { "changed" } else { "ok" }, r.task);
            }
            if let Some(f) = &report.failure {
                eprintln!("failed • #{} {} • {}", f.index, f.task, f.error);
            }
        }
    }
    Ok(report.is_success())
}

async fn run(cli: Cli) -> Result<bool> {
    let client = make_client(&cli)?;
    let output = cli.output;
    match cli.command {
        Commands::Run { file } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading task file {}", file.display()))?;
            let tasks = load_task_file(&text)?;
            info!(file = %file.display(), count = tasks.len(), "running task file");
            let report = run_all(&client, &tasks).await;
            report_run(output, &report)
        }
        other => {
            let task = other.into_task().ok_or_else(|| anyhow!("subcommand is not a task"))?;
            let label = task.label();
            info!(task = %label, "task invoked");
            let res = task.run(&client).await;
            report_one(output, &label, &res)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
