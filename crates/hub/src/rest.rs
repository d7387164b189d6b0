//! GitLab v4 REST client over reqwest.

use std::time::Instant;

use anyhow::Context;
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use tanuki_core::{TanukiError, TanukiResult};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::models::*;
use crate::GitlabApi;

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Pull GitLab's `message`/`error` out of an error body, or fall back to a truncated body.
fn error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Json>(body) {
        for key in ["message", "error"] {
            match v.get(key) {
                Some(Json::String(s)) => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    let mut out: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if body.chars().count() > MAX_ERROR_BODY_CHARS { out.push_str("... (truncated)"); }
    out
}

pub struct RestClient {
    http: reqwest::Client,
    base: Url,
}

impl RestClient {
    pub fn new(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", cfg.token)).context("token contains characters not allowed in a header")?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("tanuki/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .danger_accept_invalid_certs(cfg.insecure);
        if let Some(path) = cfg.cacert_file.as_deref() {
            let pem = std::fs::read(path).with_context(|| format!("reading cacert_file {}", path))?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem).context("parsing cacert_file")?);
        }
        if let (Some(cert), Some(key)) = (cfg.client_cert.as_deref(), cfg.client_key.as_deref()) {
            let mut pem = std::fs::read(cert).with_context(|| format!("reading client_cert {}", cert))?;
            pem.extend(std::fs::read(key).with_context(|| format!("reading client_key {}", key))?);
            builder = builder.identity(reqwest::Identity::from_pem(&pem).context("parsing client certificate/key")?);
        }
        let http = builder.build().context("building http client")?;
        Ok(Self { http, base: cfg.base_url.clone() })
    }

    /// Build the client and, when enabled, verify the token by fetching the current user.
    pub async fn connect(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let client = Self::new(cfg)?;
        if cfg.early_auth_check {
            let t0 = Instant::now();
            let me = client.current_user().await.context("early auth check (GET /user)")?;
            info!(user = %me.username, took_ms = %t0.elapsed().as_millis(), "hub: authenticated");
        }
        Ok(client)
    }

    pub fn base_url(&self) -> &Url { &self.base }

    fn request(&self, method: Method, segments: &[&str]) -> TanukiResult<(RequestBuilder, String)> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TanukiError::validation(format!("base url {} cannot carry a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        let what = format!("{} {}", method, segments.join("/"));
        Ok((self.http.request(method, url), what))
    }

    async fn execute(&self, req: RequestBuilder, what: &str) -> TanukiResult<Response> {
        let t0 = Instant::now();
        counter!("gitlab_requests_total", 1u64);
        let resp = req.send().await.map_err(|e| {
            counter!("gitlab_request_errors_total", 1u64);
            TanukiError::transport(None, format!("{}: {}", what, e))
        })?;
        let status = resp.status();
        histogram!("gitlab_request_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(what, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "hub: request");
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(TanukiError::not_found(what.to_string()));
        }
        counter!("gitlab_request_errors_total", 1u64);
        let body = resp.text().await.unwrap_or_default();
        Err(TanukiError::transport(Some(status.as_u16()), format!("{}: {}", what, error_message(&body))))
    }

    async fn call<T: DeserializeOwned>(&self, (req, what): (RequestBuilder, String)) -> TanukiResult<T> {
        let resp = self.execute(req, &what).await?;
        let status = resp.status().as_u16();
        resp.json::<T>().await.map_err(|e| TanukiError::transport(Some(status), format!("{}: decoding response: {}", what, e)))
    }

    async fn call_empty(&self, (req, what): (RequestBuilder, String)) -> TanukiResult<()> {
        self.execute(req, &what).await.map(|_| ())
    }
}

fn with_json<B: serde::Serialize + ?Sized>((req, what): (RequestBuilder, String), body: &B) -> (RequestBuilder, String) {
    (req.json(body), what)
}

fn with_query<Q: serde::Serialize + ?Sized>((req, what): (RequestBuilder, String), query: &Q) -> (RequestBuilder, String) {
    (req.query(query), what)
}

#[async_trait::async_trait]
impl GitlabApi for RestClient {
    async fn current_user(&self) -> TanukiResult<User> {
        self.call(self.request(Method::GET, &["user"])?).await
    }

    async fn get_settings(&self) -> TanukiResult<Settings> {
        self.call(self.request(Method::GET, &["application", "settings"])?).await
    }

    async fn get_group(&self, group: &str) -> TanukiResult<Group> {
        self.call(self.request(Method::GET, &["groups", group])?).await
    }

    async fn get_project(&self, project: &str) -> TanukiResult<Project> {
        self.call(self.request(Method::GET, &["projects", project])?).await
    }

    async fn create_project(&self, opts: &CreateProjectOptions) -> TanukiResult<Project> {
        self.call(with_json(self.request(Method::POST, &["projects"])?, opts)).await
    }

    async fn edit_project(&self, project: &str, opts: &EditProjectOptions) -> TanukiResult<Project> {
        self.call(with_json(self.request(Method::PUT, &["projects", project])?, opts)).await
    }

    async fn transfer_project(&self, project: &str, namespace_id: i64) -> TanukiResult<Project> {
        self.call(with_json(self.request(Method::PUT, &["projects", project, "transfer"])?, &json!({ "namespace": namespace_id }))).await
    }

    async fn archive_project(&self, project: &str) -> TanukiResult<Project> {
        self.call(self.request(Method::POST, &["projects", project, "archive"])?).await
    }

    async fn unarchive_project(&self, project: &str) -> TanukiResult<Project> {
        self.call(self.request(Method::POST, &["projects", project, "unarchive"])?).await
    }

    async fn delete_project(&self, project: &str) -> TanukiResult<()> {
        self.call_empty(self.request(Method::DELETE, &["projects", project])?).await
    }

    async fn import_status(&self, project: &str) -> TanukiResult<ImportStatus> {
        self.call(self.request(Method::GET, &["projects", project, "import"])?).await
    }

    async fn get_branch(&self, project: &str, branch: &str) -> TanukiResult<Branch> {
        self.call(self.request(Method::GET, &["projects", project, "repository", "branches", branch])?).await
    }

    async fn create_branch(&self, project: &str, branch: &str, git_ref: &str) -> TanukiResult<Branch> {
        let req = self.request(Method::POST, &["projects", project, "repository", "branches"])?;
        self.call(with_query(req, &[("branch", branch), ("ref", git_ref)])).await
    }

    async fn delete_branch(&self, project: &str, branch: &str) -> TanukiResult<()> {
        self.call_empty(self.request(Method::DELETE, &["projects", project, "repository", "branches", branch])?).await
    }

    async fn get_protected_branch(&self, project: &str, branch: &str) -> TanukiResult<ProtectedBranch> {
        self.call(self.request(Method::GET, &["projects", project, "protected_branches", branch])?).await
    }

    async fn protect_branch(&self, project: &str, opts: &ProtectBranchOptions) -> TanukiResult<ProtectedBranch> {
        self.call(with_json(self.request(Method::POST, &["projects", project, "protected_branches"])?, opts)).await
    }

    async fn unprotect_branch(&self, project: &str, branch: &str) -> TanukiResult<()> {
        self.call_empty(self.request(Method::DELETE, &["projects", project, "protected_branches", branch])?).await
    }

    async fn require_code_owner_approvals(&self, project: &str, branch: &str, required: bool) -> TanukiResult<()> {
        let req = self.request(Method::PATCH, &["projects", project, "protected_branches", branch])?;
        self.call_empty(with_query(req, &[("code_owner_approval_required", required)])).await
    }

    async fn get_protected_tag(&self, project: &str, tag: &str) -> TanukiResult<ProtectedTag> {
        self.call(self.request(Method::GET, &["projects", project, "protected_tags", tag])?).await
    }

    async fn protect_tag(&self, project: &str, opts: &ProtectTagOptions) -> TanukiResult<ProtectedTag> {
        self.call(with_json(self.request(Method::POST, &["projects", project, "protected_tags"])?, opts)).await
    }

    async fn unprotect_tag(&self, project: &str, tag: &str) -> TanukiResult<()> {
        self.call_empty(self.request(Method::DELETE, &["projects", project, "protected_tags", tag])?).await
    }

    async fn get_project_member(&self, project: &str, user_id: i64) -> TanukiResult<Member> {
        let uid = user_id.to_string();
        self.call(self.request(Method::GET, &["projects", project, "members", &uid])?).await
    }

    async fn add_project_member(&self, project: &str, opts: &AddMemberOptions) -> TanukiResult<Member> {
        self.call(with_json(self.request(Method::POST, &["projects", project, "members"])?, opts)).await
    }

    async fn edit_project_member(&self, project: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member> {
        let uid = user_id.to_string();
        self.call(with_json(self.request(Method::PUT, &["projects", project, "members", &uid])?, opts)).await
    }

    async fn remove_project_member(&self, project: &str, user_id: i64) -> TanukiResult<()> {
        let uid = user_id.to_string();
        self.call_empty(self.request(Method::DELETE, &["projects", project, "members", &uid])?).await
    }

    async fn get_group_member(&self, group: &str, user_id: i64) -> TanukiResult<Member> {
        let uid = user_id.to_string();
        self.call(self.request(Method::GET, &["groups", group, "members", &uid])?).await
    }

    async fn add_group_member(&self, group: &str, opts: &AddMemberOptions) -> TanukiResult<Member> {
        self.call(with_json(self.request(Method::POST, &["groups", group, "members"])?, opts)).await
    }

    async fn edit_group_member(&self, group: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member> {
        let uid = user_id.to_string();
        self.call(with_json(self.request(Method::PUT, &["groups", group, "members", &uid])?, opts)).await
    }

    async fn remove_group_member(&self, group: &str, user_id: i64, opts: &RemoveMemberOptions) -> TanukiResult<()> {
        let uid = user_id.to_string();
        self.call_empty(with_query(self.request(Method::DELETE, &["groups", group, "members", &uid])?, opts)).await
    }
}
