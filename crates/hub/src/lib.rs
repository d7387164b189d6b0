//! Tanuki hub: the GitLab side of reconciliation.
//!
//! [`GitlabApi`] is the one seam between orchestrators and the network. [`RestClient`] talks to
//! a real instance over the v4 REST API; [`MockGitlab`] keeps everything in memory, counts calls
//! and replays scripted progressions (imports, deletions, branch protection) for tests.

#![forbid(unsafe_code)]

pub mod config;
pub mod mock;
pub mod models;
pub mod rest;

pub use config::{ClientConfig, ProviderConfig};
pub use mock::MockGitlab;
pub use models::*;
pub use rest::RestClient;

use tanuki_core::TanukiResult;

/// Remote GitLab operations used by the resource orchestrators.
///
/// `project` and `group` accept either a numeric id or a full path. Absent objects are reported
/// as [`tanuki_core::TanukiError::NotFound`]; every other non-success status is a transport error.
#[async_trait::async_trait]
pub trait GitlabApi: Send + Sync {
    async fn current_user(&self) -> TanukiResult<User>;
    async fn get_settings(&self) -> TanukiResult<Settings>;
    async fn get_group(&self, group: &str) -> TanukiResult<Group>;

    async fn get_project(&self, project: &str) -> TanukiResult<Project>;
    async fn create_project(&self, opts: &CreateProjectOptions) -> TanukiResult<Project>;
    async fn edit_project(&self, project: &str, opts: &EditProjectOptions) -> TanukiResult<Project>;
    async fn transfer_project(&self, project: &str, namespace_id: i64) -> TanukiResult<Project>;
    async fn archive_project(&self, project: &str) -> TanukiResult<Project>;
    async fn unarchive_project(&self, project: &str) -> TanukiResult<Project>;
    async fn delete_project(&self, project: &str) -> TanukiResult<()>;
    async fn import_status(&self, project: &str) -> TanukiResult<ImportStatus>;

    async fn get_branch(&self, project: &str, branch: &str) -> TanukiResult<Branch>;
    async fn create_branch(&self, project: &str, branch: &str, git_ref: &str) -> TanukiResult<Branch>;
    async fn delete_branch(&self, project: &str, branch: &str) -> TanukiResult<()>;

    async fn get_protected_branch(&self, project: &str, branch: &str) -> TanukiResult<ProtectedBranch>;
    async fn protect_branch(&self, project: &str, opts: &ProtectBranchOptions) -> TanukiResult<ProtectedBranch>;
    async fn unprotect_branch(&self, project: &str, branch: &str) -> TanukiResult<()>;
    async fn require_code_owner_approvals(&self, project: &str, branch: &str, required: bool) -> TanukiResult<()>;

    async fn get_protected_tag(&self, project: &str, tag: &str) -> TanukiResult<ProtectedTag>;
    async fn protect_tag(&self, project: &str, opts: &ProtectTagOptions) -> TanukiResult<ProtectedTag>;
    async fn unprotect_tag(&self, project: &str, tag: &str) -> TanukiResult<()>;

    async fn get_project_member(&self, project: &str, user_id: i64) -> TanukiResult<Member>;
    async fn add_project_member(&self, project: &str, opts: &AddMemberOptions) -> TanukiResult<Member>;
    async fn edit_project_member(&self, project: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member>;
    async fn remove_project_member(&self, project: &str, user_id: i64) -> TanukiResult<()>;

    async fn get_group_member(&self, group: &str, user_id: i64) -> TanukiResult<Member>;
    async fn add_group_member(&self, group: &str, opts: &AddMemberOptions) -> TanukiResult<Member>;
    async fn edit_group_member(&self, group: &str, user_id: i64, opts: &EditMemberOptions) -> TanukiResult<Member>;
    async fn remove_group_member(&self, group: &str, user_id: i64, opts: &RemoveMemberOptions) -> TanukiResult<()>;
}
