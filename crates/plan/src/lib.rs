//! Tanuki plan: the narrowest update request between desired and observed attributes.
//!
//! Only keys the operator declared are ever sent. GitLab treats "not specified" and
//! "explicitly cleared" differently, so an absent desired key must never be diffed against
//! whatever the remote happens to hold.

#![forbid(unsafe_code)]

use metrics::counter;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tanuki_core::{state::to_attr_map, TanukiError};
use tracing::debug;

/// Changed fields to send on an update. An empty request means "skip the call".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateRequest {
    fields: Map<String, Json>,
}

impl UpdateRequest {
    /// The no-op request.
    pub fn noop() -> Self { Self::default() }

    pub fn is_noop(&self) -> bool { self.fields.is_empty() }

    pub fn len(&self) -> usize { self.fields.len() }

    pub fn fields(&self) -> &Map<String, Json> { &self.fields }

    pub fn get(&self, key: &str) -> Option<&Json> { self.fields.get(key) }

    pub fn contains(&self, key: &str) -> bool { self.fields.contains_key(key) }

    pub fn keys(&self) -> impl Iterator<Item = &str> { self.fields.keys().map(String::as_str) }

    /// Remove a field that is served by a different endpoint than the main update call.
    pub fn take(&mut self, key: &str) -> Option<Json> { self.fields.remove(key) }

    pub fn into_map(self) -> Map<String, Json> { self.fields }

    /// Deserialize the changed fields into a typed API options struct.
    pub fn into_options<O: DeserializeOwned>(self) -> Result<O, TanukiError> {
        serde_json::from_value(Json::Object(self.fields)).map_err(|e| TanukiError::validation(format!("building update options: {}", e)))
    }
}

/// What a plan changed, for logs and CLI output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub changed: Vec<String>,
    pub unchanged: usize,
}

/// Compare `desired` against `observed` key by key (deep equality) and keep the differences.
/// Keys missing from `desired` are ignored; a desired key missing from `observed` counts as changed.
/// Arrays are compared as a whole and sent whole.
pub fn plan(desired: &Map<String, Json>, observed: &Map<String, Json>) -> UpdateRequest {
    let mut fields = Map::new();
    for (k, want) in desired.iter() {
        if observed.get(k) != Some(want) {
            fields.insert(k.clone(), want.clone());
        }
    }
    if fields.is_empty() {
        counter!("plan_noop_total", 1u64);
    } else {
        counter!("plan_changed_fields_total", fields.len() as u64);
    }
    debug!(desired = desired.len(), changed = fields.len(), "plan: computed");
    UpdateRequest { fields }
}

/// [`plan`] over the serde projection of two typed config structs. Optional fields should use
/// `skip_serializing_if = "Option::is_none"` so that "unset" stays absent.
pub fn plan_typed<T: Serialize>(desired: &T, observed: &T) -> Result<UpdateRequest, TanukiError> {
    Ok(plan(&to_attr_map(desired)?, &to_attr_map(observed)?))
}

pub fn summarize(desired: &Map<String, Json>, req: &UpdateRequest) -> PlanSummary {
    PlanSummary { changed: req.keys().map(str::to_string).collect(), unchanged: desired.len().saturating_sub(req.len()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn obj(v: Json) -> Map<String, Json> { v.as_object().cloned().unwrap() }

    #[test]
    fn only_changed_declared_keys_are_sent() {
        let req = plan(&obj(json!({"a": 1, "b": 2})), &obj(json!({"a": 1, "b": 3, "c": 9})));
        assert_eq!(req.fields(), &obj(json!({"b": 2})));
        assert!(!req.contains("c"));
    }

    #[test]
    fn identical_inputs_produce_the_noop_sentinel() {
        let same = obj(json!({"a": 1, "tags": ["x", "y"], "nested": {"k": true}}));
        let req = plan(&same, &same.clone());
        assert!(req.is_noop());
        assert_eq!(req, UpdateRequest::noop());
    }

    #[test]
    fn zero_values_are_significant() {
        let req = plan(&obj(json!({"archived": false, "build_timeout": 0})), &obj(json!({})));
        assert_eq!(req.get("archived"), Some(&json!(false)));
        assert_eq!(req.get("build_timeout"), Some(&json!(0)));

        let req = plan(&obj(json!({"archived": false})), &obj(json!({"archived": null})));
        assert!(req.contains("archived"));
    }

    #[test]
    fn explicit_null_clears_but_absent_does_not() {
        let req = plan(&obj(json!({"description": null})), &obj(json!({"description": "old"})));
        assert_eq!(req.get("description"), Some(&Json::Null));
        let req = plan(&obj(json!({})), &obj(json!({"description": "old"})));
        assert!(req.is_noop());
    }

    #[test]
    fn lists_are_replaced_wholesale() {
        let req = plan(&obj(json!({"topics": ["a", "b", "c"]})), &obj(json!({"topics": ["a", "x", "c"]})));
        assert_eq!(req.get("topics"), Some(&json!(["a", "b", "c"])));
    }

    #[derive(Serialize, Deserialize, Default)]
    struct Cfg {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        archived: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topics: Option<BTreeSet<String>>,
    }

    #[derive(Deserialize, Debug, PartialEq)]
    struct EditOpts {
        name: Option<String>,
        archived: Option<bool>,
    }

    #[test]
    fn typed_plans_ignore_unset_fields_and_set_order() {
        let desired = Cfg { name: Some("n".into()), archived: None, topics: Some(["b", "a"].iter().map(|s| s.to_string()).collect()) };
        let observed = Cfg { name: Some("old".into()), archived: Some(true), topics: Some(["a", "b"].iter().map(|s| s.to_string()).collect()) };
        let req = plan_typed(&desired, &observed).unwrap();
        assert_eq!(req.keys().collect::<Vec<_>>(), vec!["name"]);
        let opts: EditOpts = req.into_options().unwrap();
        assert_eq!(opts, EditOpts { name: Some("n".into()), archived: None });
    }

    #[test]
    fn take_splits_off_fields_and_summary_counts() {
        let desired = obj(json!({"name": "n", "archived": true, "path": "p"}));
        let mut req = plan(&desired, &obj(json!({"name": "o", "archived": false, "path": "p"})));
        let s = summarize(&desired, &req);
        assert_eq!(s.unchanged, 1);
        assert_eq!(s.changed.len(), 2);
        assert_eq!(req.take("archived"), Some(json!(true)));
        assert_eq!(req.len(), 1);
        assert!(!req.is_noop());
    }
}
