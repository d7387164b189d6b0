//! Tanuki provider façade (in-process).
//!
//! This crate is what a configuration framework (or `tanukictl`) talks to: a registry of resource
//! types built once at startup, and a [`Provider`] that plans and dispatches lifecycle calls to
//! the orchestrators in `tanuki-apply`.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tanuki_apply::{Invocation, Resource};
use tanuki_core::{AttrMap, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::{GitlabApi, ProviderConfig, RestClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static TYPE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^gitlab_[a-z0-9]+(_[a-z0-9]+)*$").expect("valid type name regex"));

/// Registration failures abort startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource type {0:?} is registered twice")]
    Duplicate(String),
    #[error("resource type name {0:?} does not match gitlab_<word>[_<word>...]")]
    BadName(String),
}

/// Type name -> orchestrator. Immutable once [`bootstrap`] returns.
#[derive(Default)]
pub struct Registry {
    by_name: FxHashMap<&'static str, Arc<dyn Resource>>,
    order: Vec<&'static str>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn register(&mut self, resource: Arc<dyn Resource>) -> Result<(), RegistryError> {
        let name = resource.type_name();
        if !TYPE_NAME_RE.is_match(name) {
            return Err(RegistryError::BadName(name.to_string()));
        }
        if self.by_name.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.by_name.insert(name, resource);
        self.order.push(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resource>> { self.by_name.get(name) }

    /// Type names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ { self.order.iter().copied() }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn resource(&self, kind: &str) -> TanukiResult<&Arc<dyn Resource>> {
        self.get(kind).ok_or_else(|| TanukiError::validation(format!("unknown resource type {:?}", kind)))
    }

    /// Compare desired attributes with the tracked state of one object. Needs no connection.
    pub fn plan(&self, kind: &str, prior: Option<&ResourceState>, desired: Option<&AttrMap>) -> TanukiResult<PlanAction> {
        let r = self.resource(kind)?;
        let action = match (prior, desired) {
            (None, None) => PlanAction::NoOp,
            (Some(_), None) => PlanAction::Delete,
            (None, Some(d)) => {
                r.validate(d)?;
                PlanAction::Create
            }
            (Some(p), Some(d)) => {
                r.validate(d)?;
                let req = tanuki_plan::plan(&r.normalize(d)?, &p.attributes);
                let replace: Vec<String> = req
                    .keys()
                    .filter(|k| r.force_new().contains(k) && p.attributes.contains_key(*k))
                    .map(str::to_string)
                    .collect();
                if req.is_noop() {
                    PlanAction::NoOp
                } else if !replace.is_empty() {
                    PlanAction::Replace { attributes: replace }
                } else {
                    PlanAction::Update { changed: req.keys().map(str::to_string).collect() }
                }
            }
        };
        debug!(kind, id = prior.map(|p| p.id.as_str()).unwrap_or("-"), action = ?action, "api: plan");
        Ok(action)
    }
}

/// Register every built-in resource type, always in the same order.
pub fn bootstrap() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    for resource in tanuki_apply::builtin() {
        registry.register(resource)?;
    }
    info!(types = registry.len(), "api: registry ready");
    Ok(registry)
}

/// Outcome of comparing desired attributes with the tracked state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update { changed: Vec<String> },
    /// Destroy then create; `attributes` are the replacement-only ones that changed.
    Replace { attributes: Vec<String> },
    Delete,
    NoOp,
}

impl PlanAction {
    pub fn is_noop(&self) -> bool { matches!(self, PlanAction::NoOp) }
}

/// In-process provider: registry plus the GitLab collaborator.
#[derive(Clone)]
pub struct Provider {
    registry: Arc<Registry>,
    api: Arc<dyn GitlabApi>,
}

impl Provider {
    pub fn new(registry: Registry, api: Arc<dyn GitlabApi>) -> Self { Self { registry: Arc::new(registry), api } }

    /// Resolve settings (environment fallbacks included), connect, and bootstrap the registry.
    pub async fn connect(cfg: ProviderConfig) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client_cfg = cfg.with_env_fallbacks()?.resolve()?;
        let client = RestClient::connect(&client_cfg).await?;
        let registry = bootstrap().context("registering resource types")?;
        info!(base_url = %client.base_url(), "api: provider connected");
        Ok(Self::new(registry, Arc::new(client)))
    }

    pub fn registry(&self) -> &Registry { &self.registry }

    pub fn api(&self) -> Arc<dyn GitlabApi> { self.api.clone() }

    fn resource(&self, kind: &str) -> TanukiResult<&Arc<dyn Resource>> { self.registry.resource(kind) }

    fn invocation(&self, cancel: &CancellationToken) -> Invocation { Invocation::new(self.api.clone()).with_cancel(cancel.clone()) }

    pub fn validate(&self, kind: &str, desired: &AttrMap) -> TanukiResult<()> { self.resource(kind)?.validate(desired) }

    /// Offline plan; never calls GitLab.
    pub fn plan(&self, kind: &str, prior: Option<&ResourceState>, desired: Option<&AttrMap>) -> TanukiResult<PlanAction> {
        self.registry.plan(kind, prior, desired)
    }

    pub async fn create(&self, kind: &str, desired: &AttrMap, cancel: &CancellationToken) -> TanukiResult<ResourceState> {
        let r = self.resource(kind)?;
        timed(kind, "create", r.create(&self.invocation(cancel), desired)).await
    }

    pub async fn read(&self, kind: &str, prior: &ResourceState, cancel: &CancellationToken) -> TanukiResult<Option<ResourceState>> {
        let r = self.resource(kind)?;
        timed(kind, "read", r.read(&self.invocation(cancel), prior)).await
    }

    pub async fn update(&self, kind: &str, prior: &ResourceState, desired: &AttrMap, cancel: &CancellationToken) -> TanukiResult<ResourceState> {
        let r = self.resource(kind)?;
        timed(kind, "update", r.update(&self.invocation(cancel), prior, desired)).await
    }

    pub async fn delete(&self, kind: &str, state: &ResourceState, cancel: &CancellationToken) -> TanukiResult<()> {
        let r = self.resource(kind)?;
        timed(kind, "delete", r.delete(&self.invocation(cancel), state)).await
    }

    pub async fn import(&self, kind: &str, id: &str, cancel: &CancellationToken) -> TanukiResult<ResourceState> {
        let r = self.resource(kind)?;
        timed(kind, "import", r.import(&self.invocation(cancel), id)).await
    }

    /// Plan, then carry the plan out. Returns the new state, `None` once deleted.
    pub async fn apply(
        &self,
        kind: &str,
        prior: Option<&ResourceState>,
        desired: Option<&AttrMap>,
        cancel: &CancellationToken,
    ) -> TanukiResult<Option<ResourceState>> {
        let action = self.plan(kind, prior, desired)?;
        match (action, prior, desired) {
            (PlanAction::NoOp, p, _) => Ok(p.cloned()),
            (PlanAction::Create, _, Some(d)) => self.create(kind, d, cancel).await.map(Some),
            (PlanAction::Update { .. }, Some(p), Some(d)) => self.update(kind, p, d, cancel).await.map(Some),
            (PlanAction::Replace { attributes }, Some(p), Some(d)) => {
                info!(kind, id = %p.id, attributes = ?attributes, "api: replacing");
                self.delete(kind, p, cancel).await?;
                self.create(kind, d, cancel).await.map(Some)
            }
            (PlanAction::Delete, Some(p), _) => self.delete(kind, p, cancel).await.map(|_| None),
            (action, _, _) => Err(TanukiError::validation(format!("plan {:?} does not fit the given state", action))),
        }
    }
}

/// Run one lifecycle call with the log lines and metrics every call gets.
async fn timed<T>(kind: &str, op: &'static str, fut: impl std::future::Future<Output = TanukiResult<T>>) -> TanukiResult<T> {
    let t0 = Instant::now();
    counter!("apply_attempts", 1u64, "op" => op);
    info!(kind, op, "api: start");
    let res = fut.await;
    let took = t0.elapsed();
    histogram!("apply_latency_ms", took.as_secs_f64() * 1000.0, "op" => op);
    match &res {
        Ok(_) => info!(kind, op, took_ms = %took.as_millis(), "api: ok"),
        Err(e) => {
            counter!("apply_err", 1u64, "op" => op, "kind" => format!("{:?}", e.kind()));
            warn!(kind, op, error = %e, took_ms = %took.as_millis(), "api: failed");
        }
    }
    res
}
