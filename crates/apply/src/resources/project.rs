//! `gitlab_project`: the only resource whose create and delete both wait on GitLab.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tanuki_converge::ConvergenceTarget;
use tanuki_core::state::{from_attr_map, to_attr_map};
use tanuki_core::{AttrMap, CompositeId, ResourceState, TanukiError, TanukiResult};
use tanuki_hub::{CreateProjectOptions, EditProjectOptions, Project};
use tracing::{debug, info, warn};

use super::{ensure_in_place, plan_update, Resource};
use crate::probes::{BranchProtectedProbe, ImportProbe, ProjectDeletionProbe};
use crate::{branch_protection_timeout, delete_timeout, found, import_timeout, poll_interval, Invocation};

pub const TYPE_NAME: &str = "gitlab_project";
const FORCE_NEW: &[&str] = &["import_url", "initialize_with_readme"];
/// Text settings an explicit `null` clears; GitLab stores them as `""`.
const CLEARABLE_TEXT: &[&str] = &["description", "ci_config_path"];
/// Recorded in state, never sent on update.
const LOCAL_ONLY: &[&str] = &["archive_on_destroy", "import_url", "initialize_with_readme"];
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DELETE_INITIAL_DELAY: Duration = Duration::from_secs(5);

const VISIBILITIES: &[&str] = &["private", "internal", "public"];
const MERGE_METHODS: &[&str] = &["merge", "rebase_merge", "ff"];
const SQUASH_OPTIONS: &[&str] = &["never", "always", "default_on", "default_off"];

/// Settings that GitLab reports back and that can change in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "visibility_level")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_requests_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippets_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lfs_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_access_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_runners_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_allow_merge_if_pipeline_succeeds: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_allow_merge_if_all_discussions_are_resolved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_source_branch_after_merge: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squash_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_config_path: Option<String>,
    /// Changing it transfers the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<i64>,
    /// Served by the archive/unarchive endpoints, not by the edit call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(flatten)]
    pub settings: ProjectSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_with_readme: Option<bool>,
    /// Archive instead of deleting on destroy. Never sent to GitLab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_on_destroy: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectAttrs {
    #[serde(flatten)]
    config: ProjectConfig,
    path_with_namespace: String,
    web_url: String,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
}

fn observed(p: &Project) -> ProjectSettings {
    ProjectSettings {
        name: Some(p.name.clone()),
        path: Some(p.path.clone()),
        description: Some(p.description.clone().unwrap_or_default()),
        default_branch: p.default_branch.clone(),
        visibility: p.visibility.clone(),
        topics: Some(p.topics.iter().cloned().collect()),
        issues_enabled: p.issues_enabled,
        merge_requests_enabled: p.merge_requests_enabled,
        wiki_enabled: p.wiki_enabled,
        snippets_enabled: p.snippets_enabled,
        lfs_enabled: p.lfs_enabled,
        packages_enabled: p.packages_enabled,
        request_access_enabled: p.request_access_enabled,
        shared_runners_enabled: p.shared_runners_enabled,
        only_allow_merge_if_pipeline_succeeds: p.only_allow_merge_if_pipeline_succeeds,
        only_allow_merge_if_all_discussions_are_resolved: p.only_allow_merge_if_all_discussions_are_resolved,
        remove_source_branch_after_merge: p.remove_source_branch_after_merge,
        merge_method: p.merge_method.clone(),
        squash_option: p.squash_option.clone(),
        ci_config_path: Some(p.ci_config_path.clone().unwrap_or_default()),
        namespace_id: Some(p.namespace.id),
        archived: Some(p.archived),
    }
}

/// Observed settings plus the local-only fields carried over from `local`.
fn state_from(p: &Project, local: &ProjectConfig) -> TanukiResult<ResourceState> {
    let attrs = ProjectAttrs {
        config: ProjectConfig {
            settings: observed(p),
            import_url: local.import_url.clone(),
            initialize_with_readme: local.initialize_with_readme,
            archive_on_destroy: local.archive_on_destroy,
        },
        path_with_namespace: p.path_with_namespace.clone(),
        web_url: p.web_url.clone(),
        http_url_to_repo: p.http_url_to_repo.clone(),
        ssh_url_to_repo: p.ssh_url_to_repo.clone(),
    };
    ResourceState::from_typed(p.id.to_string(), &attrs)
}

fn one_of(field: &str, value: Option<&str>, allowed: &[&str]) -> TanukiResult<()> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(TanukiError::validation(format!(
            "{}: {:?} is not one of {}",
            field,
            v,
            tanuki_core::access::render_value_list(allowed)
        ))),
        _ => Ok(()),
    }
}

/// Settings as edit options, leaving out what has its own endpoint.
fn edit_options(settings: &ProjectSettings) -> TanukiResult<EditProjectOptions> {
    let mut map = to_attr_map(settings)?;
    map.remove("archived");
    map.remove("namespace_id");
    from_attr_map(&map)
}

pub struct ProjectResource;

impl ProjectResource {
    fn config(desired: &AttrMap) -> TanukiResult<ProjectConfig> { from_attr_map(desired) }

    /// Rewrite explicit clears into the value GitLab reports once cleared, so they survive the
    /// typed round-trip and reach the edit call.
    fn with_clears(desired: &AttrMap) -> AttrMap {
        let mut map = desired.clone();
        for (k, v) in map.iter_mut().filter(|(_, v)| v.is_null()) {
            if CLEARABLE_TEXT.contains(&k.as_str()) {
                *v = serde_json::Value::String(String::new());
            } else if k == "topics" {
                *v = serde_json::Value::Array(Vec::new());
            }
        }
        map
    }

    /// Whether GitLab will protect the default branch of `project` on its own.
    async fn expects_default_branch_protection(inv: &Invocation, project: &Project) -> TanukiResult<bool> {
        let level = if project.namespace.is_group() {
            inv.call(inv.api.get_group(&project.namespace.id.to_string())).await?.default_branch_protection
        } else {
            inv.call(inv.api.get_settings()).await?.default_branch_protection
        };
        Ok(level != 0)
    }
}

#[async_trait::async_trait]
impl Resource for ProjectResource {
    fn type_name(&self) -> &'static str { TYPE_NAME }

    fn id_arity(&self) -> usize { 1 }

    fn force_new(&self) -> &'static [&'static str] { FORCE_NEW }

    fn normalize(&self, desired: &AttrMap) -> TanukiResult<AttrMap> { to_attr_map(&Self::config(&Self::with_clears(desired))?) }

    fn validate(&self, desired: &AttrMap) -> TanukiResult<()> {
        if let Some((k, _)) = Self::with_clears(desired).iter().find(|(_, v)| v.is_null()) {
            return Err(TanukiError::validation(format!("{}: {} cannot be cleared; omit it to leave it unmanaged", TYPE_NAME, k)));
        }
        let cfg = Self::config(desired)?;
        if cfg.settings.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(TanukiError::validation(format!("{}: name is required", TYPE_NAME)));
        }
        one_of("visibility_level", cfg.settings.visibility.as_deref(), VISIBILITIES)?;
        one_of("merge_method", cfg.settings.merge_method.as_deref(), MERGE_METHODS)?;
        one_of("squash_option", cfg.settings.squash_option.as_deref(), SQUASH_OPTIONS)?;
        Ok(())
    }

    async fn create(&self, inv: &Invocation, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let cfg = Self::config(desired)?;
        let t0 = Instant::now();
        let opts = CreateProjectOptions {
            settings: edit_options(&cfg.settings)?,
            namespace_id: cfg.settings.namespace_id,
            import_url: cfg.import_url.clone(),
            initialize_with_readme: cfg.initialize_with_readme,
        };
        let mut project = inv.call(inv.api.create_project(&opts)).await?;
        let id = project.id.to_string();
        info!(project = %id, path = %project.path_with_namespace, "apply: project created");

        let settle = async {
            // An import runs for projects created from a url or a template.
            if project.import_status.as_deref().is_some_and(|s| s != "none") {
                debug!(project = %id, "apply: waiting for import");
                let probe = ImportProbe { api: inv.api.clone(), project: id.clone() };
                let wait = ConvergenceTarget::new(format!("project {} import", id), ["scheduled", "started"], ["finished"], probe)
                    .timeout(import_timeout())
                    .poll_interval(poll_interval());
                inv.wait(wait).await?;
                project = inv.call(inv.api.get_project(&id)).await?;
            }
            if cfg.settings.archived == Some(true) {
                project = inv.call(inv.api.archive_project(&id)).await?;
            }
            if let Some(branch) = project.default_branch.clone() {
                if Self::expects_default_branch_protection(inv, &project).await? {
                    let probe = BranchProtectedProbe { api: inv.api.clone(), project: id.clone(), branch: branch.clone() };
                    let wait = ConvergenceTarget::new(format!("default branch {} protection", branch), ["false"], ["true"], probe)
                        .timeout(branch_protection_timeout())
                        .poll_interval(poll_interval());
                    inv.wait(wait).await?;
                }
            }
            inv.call(inv.api.get_project(&id)).await
        };
        let fresh = match settle.await {
            Ok(p) => p,
            Err(e) => {
                warn!(project = %id, error = %e, "apply: project created but did not settle");
                return Err(e);
            }
        };
        info!(project = %id, took_ms = %t0.elapsed().as_millis(), "apply: project ready");
        state_from(&fresh, &cfg)
    }

    async fn read(&self, inv: &Invocation, prior: &ResourceState) -> TanukiResult<Option<ResourceState>> {
        let id = CompositeId::decode(&prior.id, 1)?.to_string();
        let local: ProjectConfig = prior.typed()?;
        match found(inv.call(inv.api.get_project(&id)).await)? {
            None => Ok(None),
            Some(p) if p.marked_for_deletion_at.is_some() => {
                debug!(project = %id, "apply: project is marked for deletion");
                Ok(None)
            }
            Some(p) => state_from(&p, &local).map(Some),
        }
    }

    async fn update(&self, inv: &Invocation, prior: &ResourceState, desired: &AttrMap) -> TanukiResult<ResourceState> {
        self.validate(desired)?;
        let cfg = Self::config(desired)?;
        let mut req = plan_update(TYPE_NAME, prior, &self.normalize(desired)?);
        if req.is_noop() {
            return Ok(prior.clone());
        }
        ensure_in_place(TYPE_NAME, prior, &req, FORCE_NEW)?;
        let id = CompositeId::decode(&prior.id, 1)?.to_string();

        let local: Vec<(&str, serde_json::Value)> = LOCAL_ONLY.iter().filter_map(|k| req.take(k).map(|v| (*k, v))).collect();
        if req.is_noop() {
            let mut st = prior.clone();
            st.attributes.extend(local.into_iter().map(|(k, v)| (k.to_string(), v)));
            return Ok(st);
        }
        let archived = req.take("archived").and_then(|v| v.as_bool());
        let namespace = req.take("namespace_id").and_then(|v| v.as_i64());
        if !req.is_noop() {
            let opts: EditProjectOptions = req.into_options()?;
            debug!(project = %id, "apply: editing project");
            inv.call(inv.api.edit_project(&id, &opts)).await?;
        }
        if let Some(ns) = namespace {
            info!(project = %id, namespace = ns, "apply: transferring project");
            inv.call(inv.api.transfer_project(&id, ns)).await?;
        }
        match archived {
            Some(true) => { inv.call(inv.api.archive_project(&id)).await?; }
            Some(false) => { inv.call(inv.api.unarchive_project(&id)).await?; }
            None => {}
        }
        let fresh = inv.call(inv.api.get_project(&id)).await?;
        state_from(&fresh, &cfg)
    }

    async fn delete(&self, inv: &Invocation, state: &ResourceState) -> TanukiResult<()> {
        let id = CompositeId::decode(&state.id, 1)?.to_string();
        let local: ProjectConfig = state.typed()?;
        if local.archive_on_destroy == Some(true) {
            info!(project = %id, "apply: archiving instead of deleting");
            inv.call(inv.api.archive_project(&id)).await?;
            return Ok(());
        }
        let t0 = Instant::now();
        if let Err(e) = inv.call(inv.api.delete_project(&id)).await {
            if e.is_not_found() {
                return Ok(());
            }
            return Err(e);
        }
        let probe = ProjectDeletionProbe { api: inv.api.clone(), project: id.clone() };
        let wait = ConvergenceTarget::new(format!("project {} deletion", id), ["Deleting"], ["Deleted"], probe)
            .timeout(delete_timeout())
            .poll_interval(DELETE_POLL_INTERVAL)
            .initial_delay(DELETE_INITIAL_DELAY);
        inv.wait(wait).await?;
        info!(project = %id, took_ms = %t0.elapsed().as_millis(), "apply: project deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: serde_json::Value) -> AttrMap { v.as_object().cloned().unwrap() }

    #[test]
    fn validation_requires_a_name_and_known_enums() {
        let r = ProjectResource;
        assert!(r.validate(&attrs(json!({"name": "svc"}))).is_ok());
        assert!(r.validate(&attrs(json!({"name": " "}))).is_err());
        assert!(r.validate(&attrs(json!({"name": "svc", "visibility_level": "secret"}))).is_err());
        assert!(r.validate(&attrs(json!({"name": "svc", "merge_method": "squash"}))).is_err());
        assert!(r.validate(&attrs(json!({"name": 5}))).is_err());
    }

    #[test]
    fn explicit_nulls_normalize_to_the_cleared_form() {
        let r = ProjectResource;
        let n = r.normalize(&attrs(json!({"name": "svc", "description": null, "ci_config_path": null, "topics": null}))).unwrap();
        assert_eq!(n["description"], json!(""));
        assert_eq!(n["ci_config_path"], json!(""));
        assert_eq!(n["topics"], json!([]));
        assert!(r.validate(&attrs(json!({"name": "svc", "description": null}))).is_ok());
        assert!(r.validate(&attrs(json!({"name": "svc", "merge_method": null}))).is_err());
    }

    #[test]
    fn edit_options_leave_out_dedicated_endpoints() {
        let s = ProjectSettings { name: Some("n".into()), archived: Some(true), namespace_id: Some(3), visibility: Some("public".into()), ..Default::default() };
        let opts = edit_options(&s).unwrap();
        assert_eq!(opts.name.as_deref(), Some("n"));
        assert_eq!(opts.visibility.as_deref(), Some("public"));
        assert_eq!(serde_json::to_value(&opts).unwrap(), json!({"name": "n", "visibility": "public"}));
    }

    #[test]
    fn state_carries_local_fields_and_sorted_topics() {
        let p = Project { id: 9, name: "svc".into(), topics: vec!["b".into(), "a".into()], web_url: "https://x/svc".into(), ..Default::default() };
        let local = ProjectConfig { archive_on_destroy: Some(true), ..Default::default() };
        let st = state_from(&p, &local).unwrap();
        assert_eq!(st.id, "9");
        assert_eq!(st.attributes["topics"], json!(["a", "b"]));
        assert_eq!(st.attributes["archive_on_destroy"], json!(true));
        assert_eq!(st.attributes["archived"], json!(false));
        assert!(!st.attributes.contains_key("import_url"));
    }
}
