//! `gitlab_branch`: create from a ref, wait until reads see it.

use serde::{Deserialize, Serialize};
use tanuki_converge::ConvergenceTarget;
use tanuki_core::state::{from_attr_map, to_attr_map};
use tanuki_core::{AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::Branch;
use tracing::{debug, info};

use super::{ensure_in_place, plan_update, Resource};
use crate::probes::BranchPresenceProbe;
use crate::{branch_timeout, found, poll_interval, Invocation};

pub const TYPE_NAME: &str = "gitlab_branch";
const FORCE_NEW: &[&str] = &["project", "name", "ref"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchConfig {
    pub project: String,
    pub name: String,
    /// Branch, tag or commit the branch starts from. GitLab does not report it back.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchAttrs {
    #[serde(flatten)]
    config: BranchConfig,
    protected: bool,
    default: bool,
    can_push: bool,
    web_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_sha: Option<String>,
}

fn state_from(project: &str, b: &Branch, git_ref: Option<String>) -> TanukiResult<ResourceState> {
    let id = CompositeId::two(project, b.name.as_str())?;
    let attrs = BranchAttrs {
        config: BranchConfig { project: project.to_string(), name: b.name.clone(), git_ref },
        protected: b.protected,
        default: b.default,
        can_push: b.can_push,
        web_url: b.web_url.clone(),
        commit_sha: b.commit.as_ref().map(|c| c.id.clone()),
    };
    ResourceState::from_typed(id.to_string(), &attrs)
}

pub struct BranchResource;

#[async_trait::async_trait]
impl Resource for BranchResource {
    fn type_name(&self) -> &'static str { TYPE_NAME }

    fn id_arity(&self) -> usize { 2 }

    fn force_new(&self) -> &'static [&'static str] { FORCE_NEW }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { to_attr_map(&from_attr_map::<BranchConfig>(desired)?) }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> {
        let cfg: BranchConfig = from_attr_map(desired)?;
        if cfg.project.is_empty() || cfg.name.is_empty() {
            return Err(TanukiError::validation(format!("{}: project and name are required", TYPE_NAME)));
        }
        if cfg.git_ref.as_deref().map_or(true, str::is_empty) {
            return Err(TanukiError::validation(format!("{}: ref is required", TYPE_NAME)));
        }
        CompositeId::two(cfg.project, cfg.name).map(|_| ())
    }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let cfg: BranchConfig = from_attr_map(desired)?;
        let git_ref = cfg.git_ref.clone().unwrap_or_default();
        inv.call(inv.api.create_branch(&cfg.project, &cfg.name, &git_ref)).await?;
        info!(project = %cfg.project, branch = %cfg.name, git_ref = %git_ref, "apply: branch created");

        let probe = BranchPresenceProbe { api: inv.api.clone(), project: cfg.project.clone(), branch: cfg.name.clone() };
        let wait = ConvergenceTarget::new(format!("branch {} of project {}", cfg.name, cfg.project), ["absent"], ["present"], probe)
            .timeout(branch_timeout())
            .poll_interval(poll_interval());
        inv.wait(wait).await?;

        let b = inv.call(inv.api.get_branch(&cfg.project, &cfg.name)).await?;
        state_from(&cfg.project, &b, cfg.git_ref)
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        let id = CompositeId::decode(&prior.id, 2)?;
        let (project, name) = id.pair()?;
        let git_ref = prior.attributes.get("ref").and_then(|v| v.as_str()).map(str::to_string);
        match found(inv.call(inv.api.get_branch(project, name)).await)? {
            Some(b) => state_from(project, &b, git_ref).map(Some),
            None => {
                debug!(project, branch = name, "apply: branch is gone");
                Ok(None)
            }
        }
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let req = plan_update(TYPE_NAME, prior, &self.normalize(desired)?);
        if req.is_noop() {
            return Ok(prior.clone());
        }
        // Only never-observed attributes get past this; nothing to send.
        ensure_in_place(TYPE_NAME, prior, &req, FORCE_NEW)?;
        let mut refreshed = self.read(inv, prior).await?.ok_or_else(|| TanukiError::not_found(format!("{} {}", TYPE_NAME, prior.id)))?;
        refreshed.attributes.extend(req.into_map());
        Ok(refreshed)
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        let id = CompositeId::decode(&state.id, 2)?;
        let (project, name) = id.pair()?;
        match inv.call(inv.api.delete_branch(project, name)).await {
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
    fn ref_is_required_and_names_cannot_hold_the_separator() {
        let r = BranchResource;
        let ok = json!({"project": "g/p", "name": "feature", "ref": "main"});
        assert!(r.validate(ok.as_object().unwrap()).is_ok());
        let no_ref = json!({"project": "g/p", "name": "feature"});
        assert!(r.validate(no_ref.as_object().unwrap()).is_err());
        let colon = json!({"project": "g/p", "name": "a:b", "ref": "main"});
        assert!(r.validate(colon.as_object().unwrap()).is_err());
    }

    #[test]
    fn state_keeps_the_ref_it_was_given() {
        let b = Branch { name: "feature".into(), web_url: "u".into(), ..Default::default() };
        let st = state_from("7", &b, Some("main".into())).unwrap();
        assert_eq!(st.id, "7:feature");
        assert_eq!(st.attributes["ref"], json!("main"));
        assert!(!st.attributes.contains_key("commit_sha"));
    }
}
