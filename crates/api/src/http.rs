//! reqwest-backed `ArgoApi`.

use std::time::Instant;

use drover_core::{Application, DroverError, DroverResult, Project, Repository, RepositoryList};
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::{ArgoApi, ClientConfig};

pub struct HttpArgoApi {
    http: reqwest::Client,
    base_url: Url,
}

/// Request envelope the server expects around a project on create/update.
#[derive(Serialize)]
struct ProjectBody<'a> {
    project: &'a Project,
}

impl HttpArgoApi {
    pub fn new(cfg: &ClientConfig) -> DroverResult<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.token))
            .map_err(|_| DroverError::InvalidInput("api token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| DroverError::ConnectionFailure(format!("building http client: {e}")))?;
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| DroverError::InvalidInput(format!("api url {:?}: {e}", cfg.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(DroverError::InvalidInput(format!("api url {:?} cannot carry a path", cfg.base_url)));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str { self.base_url.as_str() }

    /// Append segments to the base path. Each segment is percent-encoded, so a
    /// resource name can never climb out of or split its own segment.
    fn url(&self, segments: &[&str]) -> DroverResult<Url> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(DroverError::InvalidInput(format!("{bad:?} is not a usable resource name")));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DroverError::InvalidInput(format!("api url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<T, B>(&self, method: Method, segments: &[&str], body: Option<&B>) -> DroverResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let t0 = Instant::now();
        counter!("http_requests", 1u64);
        let url = self.url(segments)?;
        let path = url.path().to_owned();
        let mut req = self.http.request(method.clone(), url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(|e| transport_error(&method, &path, e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error(&method, &path, e))?;
        histogram!("http_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(%method, path = %path, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "http call");

        if !status.is_success() {
            counter!("http_errors", 1u64);
            return Err(DroverError::from_status(status.as_u16(), error_message(&text)));
        }
        serde_json::from_str(&text)
            .map_err(|e| DroverError::MalformedResponse(format!("{method} {path}: {e}")))
    }
}

fn transport_error(method: &Method, path: &str, e: reqwest::Error) -> DroverError {
    if e.is_timeout() {
        DroverError::Timeout(format!("{method} {path}: {e}"))
    } else {
        DroverError::ConnectionFailure(format!("{method} {path}: {e}"))
    }
}

/// Pull the server's own explanation out of an error body when there is one.
fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Json>(body) {
        for key in ["message", "error"] {
            if let Some(msg) = json.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() { "(empty body)".to_string() } else { body.to_string() }
}

#[async_trait::async_trait]
impl ArgoApi for HttpArgoApi {
    async fn get_project(&self, name: &str) -> DroverResult<Project> {
        self.call(Method::GET, &["projects", name], None::<&Json>).await
    }

    async fn create_project(&self, project: &Project) -> DroverResult<Project> {
        self.call(Method::POST, &["projects"], Some(&ProjectBody { project })).await
    }

    async fn update_project(&self, project: &Project) -> DroverResult<Project> {
        self.call(Method::PUT, &["projects", project.name()], Some(&ProjectBody { project })).await
    }

    async fn list_repositories(&self) -> DroverResult<Vec<Repository>> {
        let list: RepositoryList = self.call(Method::GET, &["repositories"], None::<&Json>).await?;
        Ok(list.items)
    }

    async fn create_repository(&self, repo: &Repository) -> DroverResult<Repository> {
        self.call(Method::POST, &["repositories"], Some(repo)).await
    }

    async fn create_application(&self, app: &Application) -> DroverResult<Application> {
        self.call(Method::POST, &["applications"], Some(app)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_server_fields() {
        assert_eq!(error_message(r#"{"error":"x","message":"permission denied"}"#), "permission denied");
        assert_eq!(error_message(r#"{"error":"token expired"}"#), "token expired");
        assert_eq!(error_message("upstream connect error"), "upstream connect error");
        assert_eq!(error_message("  "), "(empty body)");
    }

    #[test]
    fn rejects_token_with_newline() {
        let cfg = ClientConfig::new("https://argocd.local", "bad\ntoken").unwrap();
        let err = HttpArgoApi::new(&cfg).err().unwrap();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn resource_names_stay_one_path_segment() {
        let cfg = ClientConfig::new("https://argocd.local/api/v1/", "t0k").unwrap();
        let api = HttpArgoApi::new(&cfg).unwrap();
        assert_eq!(api.url(&["projects", "team-a"]).unwrap().path(), "/api/v1/projects/team-a");
        assert_eq!(
            api.url(&["projects", "team-a/../team-b"]).unwrap().path(),
            "/api/v1/projects/team-a%2F..%2Fteam-b"
        );
        let hashed = api.url(&["projects", "team-b#x"]).unwrap();
        assert_eq!(hashed.path(), "/api/v1/projects/team-b%23x");
        assert_eq!(hashed.fragment(), None);
        assert_eq!(api.url(&["projects", ".."]).unwrap_err().kind(), "invalid_input");
    }
}
