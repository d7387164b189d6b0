//! `gitlab_project_membership` and `gitlab_group_membership`.
//!
//! Both share one lifecycle; [`Scope`] picks the endpoints and the access-level allow-list.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tanuki_core::state::{from_attr_map, to_attr_map};
use tanuki_core::{AccessDomain, AccessLevel, AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::{AddMemberOptions, EditMemberOptions, Member, RemoveMemberOptions};
use tracing::{debug, info};

use super::{ensure_in_place, plan_update, validate_date, Resource};
use crate::adopt::{resolve, AdoptionDecision};
use crate::{found, Invocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Project,
    Group,
}

impl Scope {
    fn noun(self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::Group => "group",
        }
    }

    fn domain(self) -> AccessDomain {
        match self {
            Scope::Project => AccessDomain::ProjectMember,
            Scope::Group => AccessDomain::GroupMember,
        }
    }

    async fn get(self, inv: &Invocation, parent: &str, user_id: i64) -> TanukiResult<Member> {
        match self {
            Scope::Project => inv.call(inv.api.get_project_member(parent, user_id)).await,
            Scope::Group => inv.call(inv.api.get_group_member(parent, user_id)).await,
        }
    }

    async fn add(self, inv: &Invocation, parent: &str, opts: &AddMemberOptions) -> TanukiResult<Member> {
        match self {
            Scope::Project => inv.call(inv.api.add_project_member(parent, opts)).await,
            Scope::Group => inv.call(inv.api.add_group_member(parent, opts)).await,
        }
    }

    async fn edit(self, inv: &Invocation, parent: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member> {
        match self {
            Scope::Project => inv.call(inv.api.edit_project_member(parent, user_id, opts)).await,
            Scope::Group => inv.call(inv.api.edit_group_member(parent, user_id, opts)).await,
        }
    }

    async fn remove(self, inv: &Invocation, parent: &str, user_id: i64, opts: &RemoveMemberOptions) -> TanukiResult<()> {
        match self {
            Scope::Project => inv.call(inv.api.remove_project_member(parent, user_id)).await,
            Scope::Group => inv.call(inv.api.remove_group_member(parent, user_id, opts)).await,
        }
    }
}

/// The scope-independent view of a membership config.
struct Grant {
    parent: String,
    user_id: i64,
    access_level: String,
    expires_at: Option<String>,
    on_destroy: RemoveMemberOptions,
}

trait MemberAttrs: Serialize + DeserializeOwned + Send + Sync {
    const SCOPE: Scope;
    const TYPE_NAME: &'static str;
    const FORCE_NEW: &'static [&'static str];

    fn grant(&self) -> Grant;

    /// Attributes for `m`, keeping the local-only fields of `local`.
    fn observed(parent: &str, m: &Member, level: &str, local: Option<&Self>) -> Self;
}

/// An empty `expires_at` clears the date; GitLab then reports none, which must not read as drift.
fn observed_expiry(m: &Member, local: Option<&str>) -> Option<String> {
    m.expires_at.clone().or_else(|| local.filter(|s| s.is_empty()).map(str::to_string))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMembershipConfig {
    pub project_id: String,
    pub user_id: i64,
    pub access_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl MemberAttrs for ProjectMembershipConfig {
    const SCOPE: Scope = Scope::Project;
    const TYPE_NAME: &'static str = "gitlab_project_membership";
    const FORCE_NEW: &'static [&'static str] = &["project_id", "user_id"];

    fn grant(&self) -> Grant {
        Grant {
            parent: self.project_id.clone(),
            user_id: self.user_id,
            access_level: self.access_level.clone(),
            expires_at: self.expires_at.clone(),
            on_destroy: RemoveMemberOptions::default(),
        }
    }

    fn observed(parent: &str, m: &Member, level: &str, local: Option<&Self>) -> Self {
        Self {
            project_id: parent.to_string(),
            user_id: m.id,
            access_level: level.to_string(),
            expires_at: observed_expiry(m, local.and_then(|l| l.expires_at.as_deref())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembershipConfig {
    pub group_id: String,
    pub user_id: i64,
    pub access_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Only remove the direct membership, keep subgroup and project memberships.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_subresources_on_destroy: Option<bool>,
    /// Unassign issues and merge requests of the removed member.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unassign_issuables_on_destroy: Option<bool>,
}

impl MemberAttrs for GroupMembershipConfig {
    const SCOPE: Scope = Scope::Group;
    const TYPE_NAME: &'static str = "gitlab_group_membership";
    const FORCE_NEW: &'static [&'static str] = &["group_id", "user_id"];

    fn grant(&self) -> Grant {
        Grant {
            parent: self.group_id.clone(),
            user_id: self.user_id,
            access_level: self.access_level.clone(),
            expires_at: self.expires_at.clone(),
            on_destroy: RemoveMemberOptions {
                skip_subresources: self.skip_subresources_on_destroy,
                unassign_issuables: self.unassign_issuables_on_destroy,
            },
        }
    }

    fn observed(parent: &str, m: &Member, level: &str, local: Option<&Self>) -> Self {
        Self {
            group_id: parent.to_string(),
            user_id: m.id,
            access_level: level.to_string(),
            expires_at: observed_expiry(m, local.and_then(|l| l.expires_at.as_deref())),
            skip_subresources_on_destroy: local.and_then(|l| l.skip_subresources_on_destroy),
            unassign_issuables_on_destroy: local.and_then(|l| l.unassign_issuables_on_destroy),
        }
    }
}

fn state_from<C: MemberAttrs>(parent: &str, m: &Member, local: Option<&C>) -> TanukiResult<ResourceState> {
    let level = C::SCOPE.domain().decode(m.access_level)?;
    let id = CompositeId::two(parent, m.id.to_string())?;
    let mut st = ResourceState::from_typed(id.to_string(), &C::observed(parent, m, level, local))?;
    st.attributes.insert("username".into(), m.username.clone().into());
    st.attributes.insert("state".into(), m.state.clone().into());
    Ok(st)
}

fn user_of(id: &CompositeId) -> TanukiResult<(&str, i64)> {
    let (parent, user) = id.pair()?;
    let user_id = user.parse().map_err(|_| TanukiError::validation(format!("malformed id {:?}: user id {:?} is not a number", id.to_string(), user)))?;
    Ok((parent, user_id))
}

fn normalize<C: MemberAttrs>(desired: &AttrMap) -> TanukiResult<AttrMap> {
    let mut wanted = to_attr_map(&from_attr_map::<C>(desired)?)?;
    // `master` reads back as `maintainer`.
    if let Some(level) = wanted.get("access_level").and_then(|v| v.as_str()).and_then(|s| s.parse::<AccessLevel>().ok()) {
        wanted.insert("access_level".into(), level.as_str().into());
    }
    Ok(wanted)
}

fn validate<C: MemberAttrs>(desired: &AttrMap) -> TanukiResult<()> {
    let g = from_attr_map::<C>(desired)?.grant();
    if g.user_id <= 0 {
        return Err(TanukiError::validation(format!("{}: user_id must be positive", C::TYPE_NAME)));
    }
    CompositeId::two(g.parent, g.user_id.to_string())?;
    C::SCOPE.domain().encode(&g.access_level)?;
    validate_date("expires_at", g.expires_at.as_deref())
}

async fn create<C: MemberAttrs>(inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
    validate::<C>(desired)?;
    let cfg: C = from_attr_map(desired)?;
    let g = cfg.grant();
    let scope = C::SCOPE;

    let existing = found(scope.get(inv, &g.parent, g.user_id).await)?;
    let object = existing.map(|_| format!("member {} of {} {}", g.user_id, scope.noun(), g.parent));
    if let Some(AdoptionDecision::Conflict { object }) = resolve(object.as_deref(), true, false) {
        return Err(AdoptionDecision::conflict_error(&object));
    }

    let opts = AddMemberOptions {
        user_id: g.user_id,
        access_level: scope.domain().encode(&g.access_level)?,
        expires_at: g.expires_at.clone().filter(|s| !s.is_empty()),
    };
    let m = scope.add(inv, &g.parent, &opts).await?;
    info!(kind = C::TYPE_NAME, parent = %g.parent, user_id = g.user_id, level = %g.access_level, "apply: member added");
    state_from(&g.parent, &m, Some(&cfg))
}

async fn read<C: MemberAttrs>(inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
    let id = CompositeId::decode(&prior.id, 2)?;
    let (parent, user_id) = user_of(&id)?;
    let local = prior.typed::<C>().ok();
    match found(C::SCOPE.get(inv, parent, user_id).await)? {
        Some(m) => state_from(parent, &m, local.as_ref()).map(Some),
        None => {
            debug!(kind = C::TYPE_NAME, parent, user_id, "apply: member is gone");
            Ok(None)
        }
    }
}

async fn update<C: MemberAttrs>(inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
    validate::<C>(desired)?;
    let cfg: C = from_attr_map(desired)?;
    let mut req = plan_update(C::TYPE_NAME, prior, &normalize::<C>(desired)?);
    if req.is_noop() {
        return Ok(prior.clone());
    }
    ensure_in_place(C::TYPE_NAME, prior, &req, C::FORCE_NEW)?;
    let id = CompositeId::decode(&prior.id, 2)?;
    let (parent, user_id) = user_of(&id)?;

    let access_level = match req.take("access_level").as_ref().and_then(|v| v.as_str()) {
        Some(level) => Some(C::SCOPE.domain().encode(level)?),
        None => None,
    };
    let expires_at = req.take("expires_at").and_then(|v| v.as_str().map(str::to_string));
    if access_level.is_none() && expires_at.is_none() {
        let mut st = prior.clone();
        st.attributes.extend(req.into_map());
        return Ok(st);
    }
    let m = C::SCOPE.edit(inv, parent, user_id, &EditMemberOptions { access_level, expires_at }).await?;
    info!(kind = C::TYPE_NAME, parent, user_id, "apply: member updated");
    state_from(parent, &m, Some(&cfg))
}

async fn delete<C: MemberAttrs>(inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
    let id = CompositeId::decode(&state.id, 2)?;
    let (parent, user_id) = user_of(&id)?;
    let opts = state.typed::<C>().map(|c| c.grant().on_destroy).unwrap_or_default();
    match C::SCOPE.remove(inv, parent, user_id, &opts).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

pub struct ProjectMembershipResource;

#[async_trait::async_trait]
impl Resource for ProjectMembershipResource {
    fn type_name(&self) -> &'static str { ProjectMembershipConfig::TYPE_NAME }

    fn id_arity(&self) -> usize { 2 }

    fn force_new(&self) -> &'static [&'static str] { ProjectMembershipConfig::FORCE_NEW }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> { validate::<ProjectMembershipConfig>(desired) }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { normalize::<ProjectMembershipConfig>(desired) }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        create::<ProjectMembershipConfig>(inv, desired).await
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        read::<ProjectMembershipConfig>(inv, prior).await
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        update::<ProjectMembershipConfig>(inv, prior, desired).await
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        delete::<ProjectMembershipConfig>(inv, state).await
    }
}

pub struct GroupMembershipResource;

#[async_trait::async_trait]
impl Resource for GroupMembershipResource {
    fn type_name(&self) -> &'static str { GroupMembershipConfig::TYPE_NAME }

    fn id_arity(&self) -> usize { 2 }

    fn force_new(&self) -> &'static [&'static str] { GroupMembershipConfig::FORCE_NEW }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> { validate::<GroupMembershipConfig>(desired) }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { normalize::<GroupMembershipConfig>(desired) }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        create::<GroupMembershipConfig>(inv, desired).await
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        read::<GroupMembershipConfig>(inv, prior).await
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        update::<GroupMembershipConfig>(inv, prior, desired).await
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        delete::<GroupMembershipConfig>(inv, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: serde_json::Value) -> AttrMap { v.as_object().cloned().unwrap() }

    #[test]
    fn expiry_must_be_a_calendar_day() {
        let ok = attrs(json!({"project_id": "5", "user_id": 3, "access_level": "developer", "expires_at": "2030-12-31"}));
        assert!(validate::<ProjectMembershipConfig>(&ok).is_ok());
        let bad = attrs(json!({"project_id": "5", "user_id": 3, "access_level": "developer", "expires_at": "31/12/2030"}));
        let err = validate::<ProjectMembershipConfig>(&bad).unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"), "{}", err);
    }

    #[test]
    fn legacy_master_is_accepted_and_unknown_levels_are_not() {
        let master = attrs(json!({"group_id": "g", "user_id": 3, "access_level": "master"}));
        assert!(validate::<GroupMembershipConfig>(&master).is_ok());
        let admin = attrs(json!({"group_id": "g", "user_id": 3, "access_level": "admin"}));
        assert!(validate::<GroupMembershipConfig>(&admin).is_err());
    }

    #[test]
    fn non_numeric_user_in_id_is_malformed() {
        let id = CompositeId::decode("5:alice", 2).unwrap();
        let err = user_of(&id).unwrap_err();
        assert!(err.to_string().contains("not a number"), "{}", err);
    }

    #[test]
    fn cleared_expiry_does_not_drift() {
        let m = Member { id: 3, access_level: 30, ..Default::default() };
        let local = ProjectMembershipConfig { project_id: "5".into(), user_id: 3, access_level: "developer".into(), expires_at: Some(String::new()) };
        let st = state_from::<ProjectMembershipConfig>("5", &m, Some(&local)).unwrap();
        assert_eq!(st.id, "5:3");
        assert_eq!(st.attributes["expires_at"], json!(""));
        assert_eq!(st.attributes["access_level"], json!("developer"));
    }
}
