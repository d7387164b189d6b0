//! `gitlab_branch_protection`.
//!
//! GitLab protects the default branch of a new project by itself, so declaring that protection
//! goes through [`crate::adopt::resolve`]: the implicit rule is reset and replaced by the declared
//! one. Any other pre-existing rule is a conflict.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tanuki_core::state::{from_attr_map, to_attr_map};
use tanuki_core::{AccessDomain, AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::{AccessDescription, BranchPermission, ProtectBranchOptions, ProtectedBranch};
use tracing::{info, warn};

use super::{ensure_in_place, plan_update, Resource};
use crate::adopt::{resolve, AdoptionDecision};
use crate::{found, Invocation};

pub const TYPE_NAME: &str = "gitlab_branch_protection";
const FORCE_NEW: &[&str] = &[
    "project",
    "branch",
    "push_access_level",
    "merge_access_level",
    "unprotect_access_level",
    "allowed_to_push",
    "allowed_to_merge",
    "allow_force_push",
];
const CODE_OWNERS_UNAVAILABLE: &str = "feature unavailable: code owner approvals";

fn maintainer() -> String { "maintainer".into() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchProtectionConfig {
    pub project: String,
    pub branch: String,
    #[serde(default = "maintainer")]
    pub push_access_level: String,
    #[serde(default = "maintainer")]
    pub merge_access_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unprotect_access_level: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allowed_to_push: BTreeSet<BranchPermission>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub allowed_to_merge: BTreeSet<BranchPermission>,
    #[serde(default)]
    pub allow_force_push: bool,
    #[serde(default)]
    pub code_owner_approval_required: bool,
}

impl BranchProtectionConfig {
    fn options(&self) -> TanukiResult<ProtectBranchOptions> {
        Ok(ProtectBranchOptions {
            name: self.branch.clone(),
            push_access_level: Some(AccessDomain::BranchProtection.encode(&self.push_access_level)?),
            merge_access_level: Some(AccessDomain::BranchProtection.encode(&self.merge_access_level)?),
            unprotect_access_level: self.unprotect_access_level.as_deref().map(|l| AccessDomain::BranchUnprotect.encode(l)).transpose()?,
            allowed_to_push: self.allowed_to_push.iter().copied().collect(),
            allowed_to_merge: self.allowed_to_merge.iter().copied().collect(),
            code_owner_approval_required: Some(self.code_owner_approval_required),
            allow_force_push: Some(self.allow_force_push),
        })
    }
}

/// The role rule of a list, decoded in `domain`. A list with only user or group rules reads as `no one`.
fn role_level(domain: AccessDomain, rules: &[AccessDescription]) -> TanukiResult<Option<String>> {
    rules.iter().find(|r| r.is_role()).map(|r| domain.decode(r.access_level).map(str::to_string)).transpose()
}

fn grants(rules: &[AccessDescription]) -> BTreeSet<BranchPermission> {
    rules.iter().filter(|r| !r.is_role()).map(|r| BranchPermission { user_id: r.user_id, group_id: r.group_id }).collect()
}

fn state_from(project: &str, pb: &ProtectedBranch) -> TanukiResult<ResourceState> {
    let id = CompositeId::two(project, pb.name.as_str())?;
    let no_one = || "no one".to_string();
    let cfg = BranchProtectionConfig {
        project: project.to_string(),
        branch: pb.name.clone(),
        push_access_level: role_level(AccessDomain::BranchProtection, &pb.push_access_levels)?.unwrap_or_else(no_one),
        merge_access_level: role_level(AccessDomain::BranchProtection, &pb.merge_access_levels)?.unwrap_or_else(no_one),
        unprotect_access_level: role_level(AccessDomain::BranchUnprotect, &pb.unprotect_access_levels)?,
        allowed_to_push: grants(&pb.push_access_levels),
        allowed_to_merge: grants(&pb.merge_access_levels),
        allow_force_push: pb.allow_force_push,
        code_owner_approval_required: pb.code_owner_approval_required,
    };
    ResourceState::from_typed(id.to_string(), &cfg)
}

fn object_name(project: &str, branch: &str) -> String { format!("protected branch {} of project {}", branch, project) }

pub struct BranchProtectionResource;

impl BranchProtectionResource {
    /// Clear the way for a new rule: adopt the implicit default-branch rule, refuse anything else.
    async fn make_room(inv: &Invocation, cfg: &BranchProtectionConfig) -> TanukiResult<()> {
        let (project, branch) = (cfg.project.as_str(), cfg.branch.as_str());
        let existing = found(inv.call(inv.api.get_protected_branch(project, branch)).await)?;
        let Some(current) = existing else {
            return Ok(());
        };
        let is_default = inv.call(inv.api.get_project(project)).await?.default_branch.as_deref() == Some(branch);
        let object = object_name(project, branch);
        match resolve(Some(&object), true, is_default) {
            Some(AdoptionDecision::AdoptByReset) => {
                match found(inv.call(inv.api.get_protected_branch(project, branch)).await)? {
                    None => return Ok(()),
                    Some(again) if again == current => {}
                    Some(_) => {
                        warn!(project, branch, "apply: default branch protection changed while adopting");
                        return Err(TanukiError::conflict(object, "changed while being adopted; re-run to try again"));
                    }
                }
                match inv.call(inv.api.unprotect_branch(project, branch)).await {
                    Err(e) if !e.is_not_found() => Err(e),
                    _ => Ok(()),
                }
            }
            Some(AdoptionDecision::Conflict { object }) => Err(AdoptionDecision::conflict_error(&object)),
            Some(AdoptionDecision::Create) | None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Resource for BranchProtectionResource {
    fn type_name(&self) -> &'static str { TYPE_NAME }

    fn id_arity(&self) -> usize { 2 }

    fn force_new(&self) -> &'static [&'static str] { FORCE_NEW }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { to_attr_map(&from_attr_map::<BranchProtectionConfig>(desired)?) }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> {
        let cfg: BranchProtectionConfig = from_attr_map(desired)?;
        CompositeId::two(cfg.project.as_str(), cfg.branch.as_str())?;
        cfg.options().map(|_| ())
    }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        let cfg: BranchProtectionConfig = from_attr_map(desired)?;
        self.validate(desired)?;
        let opts = cfg.options()?;
        Self::make_room(inv, &cfg).await?;

        let pb = inv.call(inv.api.protect_branch(&cfg.project, &opts)).await?;
        info!(project = %cfg.project, branch = %cfg.branch, push = %cfg.push_access_level, merge = %cfg.merge_access_level, "apply: branch protected");
        if cfg.code_owner_approval_required && !pb.code_owner_approval_required {
            return Err(TanukiError::validation(CODE_OWNERS_UNAVAILABLE));
        }
        state_from(&cfg.project, &pb)
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        let id = CompositeId::decode(&prior.id, 2)?;
        let (project, branch) = id.pair()?;
        match found(inv.call(inv.api.get_protected_branch(project, branch)).await)? {
            Some(pb) => state_from(project, &pb).map(Some),
            None => Ok(None),
        }
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let mut req = plan_update(TYPE_NAME, prior, &self.normalize(desired)?);
        if req.is_noop() {
            return Ok(prior.clone());
        }
        ensure_in_place(TYPE_NAME, prior, &req, FORCE_NEW)?;
        let id = CompositeId::decode(&prior.id, 2)?;
        let (project, branch) = id.pair()?;
        if let Some(required) = req.take("code_owner_approval_required").and_then(|v| v.as_bool()) {
            match inv.call(inv.api.require_code_owner_approvals(project, branch, required)).await {
                Err(e) if e.is_not_found() => return Err(TanukiError::validation(CODE_OWNERS_UNAVAILABLE)),
                r => r?,
            }
        }
        self.read(inv, prior).await?.ok_or_else(|| TanukiError::not_found(object_name(project, branch)))
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        let id = CompositeId::decode(&state.id, 2)?;
        let (project, branch) = id.pair()?;
        match inv.call(inv.api.unprotect_branch(project, branch)).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn levels_are_checked_per_domain() {
        let r = BranchProtectionResource;
        let ok = json!({"project": "1", "branch": "main", "push_access_level": "no one", "unprotect_access_level": "developer"});
        assert!(r.validate(ok.as_object().unwrap()).is_ok());
        let owner = json!({"project": "1", "branch": "main", "push_access_level": "owner"});
        let err = r.validate(owner.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not valid for branch-protection"), "{}", err);
        let no_one_unprotect = json!({"project": "1", "branch": "main", "unprotect_access_level": "no one"});
        assert!(r.validate(no_one_unprotect.as_object().unwrap()).is_err());
    }

    #[test]
    fn user_rules_become_grants() {
        let pb = ProtectedBranch {
            name: "release".into(),
            push_access_levels: vec![AccessDescription::role(30), AccessDescription { access_level: 40, user_id: Some(7), ..Default::default() }],
            merge_access_levels: vec![AccessDescription { access_level: 40, group_id: Some(3), ..Default::default() }],
            ..Default::default()
        };
        let st = state_from("9", &pb).unwrap();
        assert_eq!(st.id, "9:release");
        assert_eq!(st.attributes["push_access_level"], json!("developer"));
        assert_eq!(st.attributes["merge_access_level"], json!("no one"));
        assert_eq!(st.attributes["allowed_to_push"], json!([{"user_id": 7}]));
        assert_eq!(st.attributes["allowed_to_merge"], json!([{"group_id": 3}]));
        assert!(!st.attributes.contains_key("unprotect_access_level"));
    }

    #[test]
    fn unsupported_levels_fail_the_read() {
        let pb = ProtectedBranch { name: "main".into(), push_access_levels: vec![AccessDescription::role(60)], ..Default::default() };
        assert!(state_from("9", &pb).is_err());
    }
}
