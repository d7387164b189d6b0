//! Decide what to do when a newly declared resource may already exist remotely.
//!
//! GitLab creates some objects implicitly, most visibly the protection of a new project's default
//! branch. Declaring that protection explicitly must adopt the implicit object instead of failing,
//! while a clash with anything an operator created by hand must be reported, not overwritten.
//!
//! The decision is taken from one read, and the reset happens on a later call. Callers narrow
//! that window by re-reading right before the reset and refusing if the object changed; GitLab
//! offers no conditional write for these endpoints.

use metrics::counter;
use serde::{Deserialize, Serialize};
use tanuki_core::TanukiError;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdoptionDecision {
    /// Nothing exists; take the normal create path.
    Create,
    /// An implicit default exists; remove it, then create as normal.
    AdoptByReset,
    /// Something operator-made exists; refuse and name it.
    Conflict { object: String },
}

/// `existing` names the remote object found under the resource's key, if any.
/// Returns `None` when the resource is already tracked (`newly_declared == false`).
pub fn resolve(existing: Option<&str>, newly_declared: bool, default_child: bool) -> Option<AdoptionDecision> {
    if !newly_declared {
        return None;
    }
    let decision = match existing {
        None => AdoptionDecision::Create,
        Some(_) if default_child => AdoptionDecision::AdoptByReset,
        Some(object) => AdoptionDecision::Conflict { object: object.to_string() },
    };
    match &decision {
        AdoptionDecision::AdoptByReset => {
            counter!("adopt_reset_total", 1u64);
            info!(object = existing.unwrap_or_default(), "adopt: resetting implicit default");
        }
        AdoptionDecision::Conflict { object } => {
            counter!("adopt_conflict_total", 1u64);
            info!(object = %object, "adopt: conflict");
        }
        AdoptionDecision::Create => {}
    }
    Some(decision)
}

impl AdoptionDecision {
    /// The error reported for a [`AdoptionDecision::Conflict`].
    pub fn conflict_error(object: &str) -> TanukiError {
        TanukiError::conflict(object, "already exists and was not created by this configuration; import it or remove it first")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_existing_means_create() {
        assert_eq!(resolve(None, true, true), Some(AdoptionDecision::Create));
        assert_eq!(resolve(None, true, false), Some(AdoptionDecision::Create));
    }

    #[test]
    fn implicit_default_is_adopted_by_reset() {
        assert_eq!(resolve(Some("protected branch main"), true, true), Some(AdoptionDecision::AdoptByReset));
    }

    #[test]
    fn operator_made_object_conflicts_and_is_named() {
        match resolve(Some("protected branch release"), true, false) {
            Some(AdoptionDecision::Conflict { object }) => assert_eq!(object, "protected branch release"),
            other => panic!("unexpected {:?}", other),
        }
        let err = AdoptionDecision::conflict_error("protected branch release");
        assert_eq!(err.kind(), tanuki_core::ErrorKind::Conflict);
        assert!(err.to_string().contains("protected branch release"));
    }

    #[test]
    fn tracked_resources_are_not_resolved() {
        assert_eq!(resolve(Some("x"), false, true), None);
        assert_eq!(resolve(None, false, false), None);
    }
}
