//! Named probes for the asynchronous GitLab operations orchestrators wait on.

use std::sync::Arc;

use tanuki_converge::{Probe, ProbeResult};
use tanuki_hub::GitlabApi;

/// Import status of a project: `scheduled`, `started`, `finished`, `failed`, `none`.
pub struct ImportProbe {
    pub api: Arc<dyn GitlabApi>,
    pub project: String,
}

#[async_trait::async_trait]
impl Probe for ImportProbe {
    async fn probe(&mut self) -> ProbeResult { Ok(self.api.import_status(&self.project).await?.import_status) }
}

/// `Deleting` until the project is gone; a 404 or the soft-delete marker both read as `Deleted`.
pub struct ProjectDeletionProbe {
    pub api: Arc<dyn GitlabApi>,
    pub project: String,
}

#[async_trait::async_trait]
impl Probe for ProjectDeletionProbe {
    async fn probe(&mut self) -> ProbeResult {
        match self.api.get_project(&self.project).await {
            Ok(p) if p.marked_for_deletion_at.is_some() => Ok("Deleted".into()),
            Ok(_) => Ok("Deleting".into()),
            Err(e) if e.is_not_found() => Ok("Deleted".into()),
            Err(e) => Err(e),
        }
    }
}

/// `"true"` once the branch is protected. A missing branch also reads as `"true"`: there is
/// nothing left to wait for.
pub struct BranchProtectedProbe {
    pub api: Arc<dyn GitlabApi>,
    pub project: String,
    pub branch: String,
}

#[async_trait::async_trait]
impl Probe for BranchProtectedProbe {
    async fn probe(&mut self) -> ProbeResult {
        match self.api.get_branch(&self.project, &self.branch).await {
            Ok(b) => Ok(b.protected.to_string()),
            Err(e) if e.is_not_found() => Ok("true".into()),
            Err(e) => Err(e),
        }
    }
}

/// `absent` until a freshly created branch shows up on reads.
pub struct BranchPresenceProbe {
    pub api: Arc<dyn GitlabApi>,
    pub project: String,
    pub branch: String,
}

#[async_trait::async_trait]
impl Probe for BranchPresenceProbe {
    async fn probe(&mut self) -> ProbeResult {
        match self.api.get_branch(&self.project, &self.branch).await {
            Ok(_) => Ok("present".into()),
            Err(e) if e.is_not_found() => Ok("absent".into()),
            Err(e) => Err(e),
        }
    }
}
