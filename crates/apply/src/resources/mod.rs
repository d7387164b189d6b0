//! The resource trait the provider façade dispatches to, plus one orchestrator per GitLab type.

pub mod branch;
pub mod branch_protection;
pub mod membership;
pub mod project;
pub mod tag_protection;

use std::sync::Arc;

use tanuki_core::{AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_plan::{plan, summarize, UpdateRequest};
use tracing::debug;

use crate::Invocation;

/// Lifecycle of one resource type.
///
/// `read` returning `Ok(None)` means the object vanished remotely and should leave the state.
/// `update` receives the prior state and the desired attributes; when nothing declared differs
/// it returns the prior state without touching the network.
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Number of `:`-separated parts in this type's id.
    fn id_arity(&self) -> usize;

    /// Attributes whose change requires destroy-then-create.
    fn force_new(&self) -> &'static [&'static str] { &[] }

    /// Offline checks (access levels, dates, required fields).
    fn validate(&self, desired: &AttrMap) -> TanukiResult<()>;

    /// Canonical form of `desired` as it would read back: defaults filled in, sets sorted,
    /// legacy spellings replaced. This is what gets planned against the prior state.
    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { Ok(desired.clone()) }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState>;

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>>;

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState>;

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()>;

    /// Adopt an existing object by id. The id is validated before any remote call.
    async fn import(&self, inv: &Invocation, id: &str) -> TanukiResult<ResourceState> {
        let id = CompositeId::decode(id, self.id_arity())?;
        let seed = ResourceState::new(id.to_string(), AttrMap::new());
        self.read(inv, &seed).await?.ok_or_else(|| TanukiError::not_found(format!("{} {}", self.type_name(), id)))
    }
}

/// Every resource type tanuki ships, in registration order.
pub fn builtin() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(project::ProjectResource),
        Arc::new(branch::BranchResource),
        Arc::new(branch_protection::BranchProtectionResource),
        Arc::new(tag_protection::TagProtectionResource),
        Arc::new(membership::ProjectMembershipResource),
        Arc::new(membership::GroupMembershipResource),
    ]
}

/// Plan `desired` against the attributes recorded in `prior`.
pub(crate) fn plan_update(type_name: &str, prior: &ResourceState, desired: &AttrMap) -> UpdateRequest {
    let req = plan(desired, &prior.attributes);
    let summary = summarize(desired, &req);
    debug!(kind = type_name, id = %prior.id, changed = ?summary.changed, unchanged = summary.unchanged, "apply: plan");
    req
}

/// Refuse an in-place update that changes replacement-only attributes.
///
/// An attribute missing from `prior` was never observed (typically after an import), so filling
/// it in is recorded in place rather than treated as a change.
pub(crate) fn ensure_in_place(type_name: &str, prior: &ResourceState, req: &UpdateRequest, force_new: &[&str]) -> TanukiResult<()> {
    let blocked: Vec<&str> = req.keys().filter(|k| force_new.contains(k) && prior.attributes.contains_key(*k)).collect();
    if blocked.is_empty() {
        return Ok(());
    }
    Err(TanukiError::validation(format!("{}: changing {} requires replacing the resource", type_name, blocked.join(", "))))
}

/// Validate a `YYYY-MM-DD` date; empty means "no date".
pub(crate) fn validate_date(field: &str, value: Option<&str>) -> TanukiResult<()> {
    match value {
        None | Some("") => Ok(()),
        Some(v) => chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| TanukiError::validation(format!("{}: {:?} is not valid for format YYYY-MM-DD", field, v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_are_unique() {
        let names: Vec<&str> = builtin().iter().map(|r| r.type_name()).collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(names.len(), dedup.len());
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn dates_must_be_calendar_days() {
        assert!(validate_date("expires_at", Some("2030-02-28")).is_ok());
        assert!(validate_date("expires_at", Some("")).is_ok());
        assert!(validate_date("expires_at", None).is_ok());
        assert!(validate_date("expires_at", Some("2030-02-30")).is_err());
        assert!(validate_date("expires_at", Some("30-01-2030")).is_err());
    }

    #[test]
    fn replacement_only_changes_are_refused() {
        let prior = ResourceState::new("1:main", serde_json::json!({"project": "1", "flag": false}).as_object().cloned().unwrap());
        let desired = serde_json::json!({"project": "2", "flag": true}).as_object().cloned().unwrap();
        let req = plan_update("gitlab_x", &prior, &desired);
        let err = ensure_in_place("gitlab_x", &prior, &req, &["project"]).unwrap_err();
        assert!(err.to_string().contains("project"));
        assert!(ensure_in_place("gitlab_x", &prior, &req, &["other"]).is_ok());

        let imported = ResourceState::new("1:main", AttrMap::new());
        let req = plan_update("gitlab_x", &imported, &desired);
        assert!(ensure_in_place("gitlab_x", &imported, &req, &["project"]).is_ok());
    }
}
