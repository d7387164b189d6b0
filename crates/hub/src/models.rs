//! Wire shapes of the GitLab v4 REST API, limited to the fields tanuki reads or sends.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    /// `group` or `user`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub full_path: String,
}

impl Namespace {
    pub fn is_group(&self) -> bool { self.kind == "group" }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub namespace: Namespace,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub issues_enabled: Option<bool>,
    #[serde(default)]
    pub merge_requests_enabled: Option<bool>,
    #[serde(default)]
    pub wiki_enabled: Option<bool>,
    #[serde(default)]
    pub snippets_enabled: Option<bool>,
    #[serde(default)]
    pub lfs_enabled: Option<bool>,
    #[serde(default)]
    pub packages_enabled: Option<bool>,
    #[serde(default)]
    pub request_access_enabled: Option<bool>,
    #[serde(default)]
    pub shared_runners_enabled: Option<bool>,
    #[serde(default)]
    pub only_allow_merge_if_pipeline_succeeds: Option<bool>,
    #[serde(default)]
    pub only_allow_merge_if_all_discussions_are_resolved: Option<bool>,
    #[serde(default)]
    pub remove_source_branch_after_merge: Option<bool>,
    #[serde(default)]
    pub merge_method: Option<String>,
    #[serde(default)]
    pub squash_option: Option<String>,
    #[serde(default)]
    pub ci_config_path: Option<String>,
    #[serde(default)]
    pub import_status: Option<String>,
    /// Set while a soft-deleted project waits for its final removal (GitLab EE).
    #[serde(default)]
    pub marked_for_deletion_at: Option<String>,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub http_url_to_repo: String,
    #[serde(default)]
    pub ssh_url_to_repo: String,
}

/// Editable project settings. Every field is optional; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditProjectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "visibility_level")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
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
}

impl EditProjectOptions {
    pub fn is_empty(&self) -> bool { *self == Self::default() }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateProjectOptions {
    #[serde(flatten)]
    pub settings: EditProjectOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_with_readme: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStatus {
    pub id: i64,
    pub import_status: String,
    #[serde(default)]
    pub import_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    #[serde(default)]
    pub full_path: String,
    /// 0 disables default-branch protection for projects created in this group.
    #[serde(default)]
    pub default_branch_protection: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub default_branch_protection: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub can_push: bool,
    #[serde(default)]
    pub developers_can_push: bool,
    #[serde(default)]
    pub developers_can_merge: bool,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub commit: Option<Commit>,
}

/// One access rule of a protected branch or tag. Role rules carry neither user nor group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessDescription {
    pub access_level: i32,
    #[serde(default)]
    pub access_level_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

impl AccessDescription {
    pub fn role(access_level: i32) -> Self { Self { access_level, ..Default::default() } }

    pub fn is_role(&self) -> bool { self.user_id.unwrap_or(0) == 0 && self.group_id.unwrap_or(0) == 0 }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedBranch {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub push_access_levels: Vec<AccessDescription>,
    #[serde(default)]
    pub merge_access_levels: Vec<AccessDescription>,
    #[serde(default)]
    pub unprotect_access_levels: Vec<AccessDescription>,
    #[serde(default)]
    pub code_owner_approval_required: bool,
    #[serde(default)]
    pub allow_force_push: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchPermission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectBranchOptions {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_access_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_access_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unprotect_access_level: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_to_push: Vec<BranchPermission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_to_merge: Vec<BranchPermission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_owner_approval_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_force_push: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectedTag {
    pub name: String,
    #[serde(default)]
    pub create_access_levels: Vec<AccessDescription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtectTagOptions {
    pub name: String,
    pub create_access_level: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    pub access_level: i32,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddMemberOptions {
    pub user_id: i64,
    pub access_level: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditMemberOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveMemberOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_subresources: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unassign_issuables: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edit_options_accept_the_config_spelling_of_visibility() {
        let opts: EditProjectOptions = serde_json::from_value(json!({"visibility_level": "private", "archived_ignored": 1})).unwrap();
        assert_eq!(opts.visibility.as_deref(), Some("private"));
        assert_eq!(serde_json::to_value(&opts).unwrap(), json!({"visibility": "private"}));
    }

    #[test]
    fn create_options_flatten_settings() {
        let opts = CreateProjectOptions {
            settings: EditProjectOptions { name: Some("svc".into()), ..Default::default() },
            import_url: Some("https://example.com/x.git".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&opts).unwrap(), json!({"name": "svc", "import_url": "https://example.com/x.git"}));
    }

    #[test]
    fn role_rules_have_no_principal() {
        assert!(AccessDescription::role(40).is_role());
        let user = AccessDescription { access_level: 30, user_id: Some(7), ..Default::default() };
        assert!(!user.is_role());
        let zeroed: AccessDescription = serde_json::from_value(json!({"access_level": 40, "user_id": 0, "group_id": null})).unwrap();
        assert!(zeroed.is_role());
    }
}
