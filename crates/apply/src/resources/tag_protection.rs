//! `gitlab_tag_protection`: every attribute forces replacement.

use serde::{Deserialize, Serialize};
use tanuki_core::state::{from_attr_map, to_attr_map};
use tanuki_core::{AccessDomain, AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::{ProtectTagOptions, ProtectedTag};
use tracing::info;

use super::{ensure_in_place, plan_update, Resource};
use crate::adopt::{resolve, AdoptionDecision};
use crate::{found, Invocation};

pub const TYPE_NAME: &str = "gitlab_tag_protection";
const FORCE_NEW: &[&str] = &["project", "tag", "create_access_level"];

fn maintainer() -> String { "maintainer".into() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagProtectionConfig {
    pub project: String,
    /// Tag name or wildcard, e.g. `v*`.
    pub tag: String,
    #[serde(default = "maintainer")]
    pub create_access_level: String,
}

fn state_from(project: &str, pt: &ProtectedTag) -> TanukiResult<ResourceState> {
    let level = match pt.create_access_levels.iter().find(|r| r.is_role()) {
        Some(r) => AccessDomain::TagProtection.decode(r.access_level)?,
        None => "no one",
    };
    let cfg = TagProtectionConfig { project: project.to_string(), tag: pt.name.clone(), create_access_level: level.to_string() };
    ResourceState::from_typed(CompositeId::two(project, pt.name.as_str())?.to_string(), &cfg)
}

pub struct TagProtectionResource;

#[async_trait::async_trait]
impl Resource for TagProtectionResource {
    fn type_name(&self) -> &'static str { TYPE_NAME }

    fn id_arity(&self) -> usize { 2 }

    fn force_new(&self) -> &'static [&'static str] { FORCE_NEW }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { to_attr_map(&from_attr_map::<TagProtectionConfig>(desired)?) }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> {
        let cfg: TagProtectionConfig = from_attr_map(desired)?;
        CompositeId::two(cfg.project.as_str(), cfg.tag.as_str())?;
        AccessDomain::TagProtection.encode(&cfg.create_access_level).map(|_| ())
    }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let cfg: TagProtectionConfig = from_attr_map(desired)?;
        let opts = ProtectTagOptions { name: cfg.tag.clone(), create_access_level: AccessDomain::TagProtection.encode(&cfg.create_access_level)? };

        let existing = found(inv.call(inv.api.get_protected_tag(&cfg.project, &cfg.tag)).await)?;
        let object = existing.map(|_| format!("protected tag {} of project {}", cfg.tag, cfg.project));
        if let Some(AdoptionDecision::Conflict { object }) = resolve(object.as_deref(), true, false) {
            return Err(AdoptionDecision::conflict_error(&object));
        }

        let pt = inv.call(inv.api.protect_tag(&cfg.project, &opts)).await?;
        info!(project = %cfg.project, tag = %cfg.tag, level = %cfg.create_access_level, "apply: tag protected");
        state_from(&cfg.project, &pt)
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        let id = CompositeId::decode(&prior.id, 2)?;
        let (project, tag) = id.pair()?;
        match found(inv.call(inv.api.get_protected_tag(project, tag)).await)? {
            Some(pt) => state_from(project, &pt).map(Some),
            None => Ok(None),
        }
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let req = plan_update(TYPE_NAME, prior, &self.normalize(desired)?);
        if req.is_noop() {
            return Ok(prior.clone());
        }
        ensure_in_place(TYPE_NAME, prior, &req, FORCE_NEW)?;
        self.read(inv, prior).await?.ok_or_else(|| TanukiError::not_found(format!("{} {}", TYPE_NAME, prior.id)))
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        let id = CompositeId::decode(&state.id, 2)?;
        let (project, tag) = id.pair()?;
        match inv.call(inv.api.unprotect_tag(project, tag)).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
