use std::sync::Arc;

use serde_json::json;
use tanuki_api::{bootstrap, PlanAction, Provider};
use tanuki_core::{AttrMap, ErrorKind, ResourceState};
use tanuki_hub::MockGitlab;
use tokio_util::sync::CancellationToken;

fn attrs(v: serde_json::Value) -> AttrMap { v.as_object().cloned().expect("object") }

fn setup() -> (Arc<MockGitlab>, Provider) {
    let mock = Arc::new(MockGitlab::new());
    let provider = Provider::new(bootstrap().expect("registry"), mock.clone());
    (mock, provider)
}

#[tokio::test(start_paused = true)]
async fn planning_is_offline() {
    let (mock, provider) = setup();
    let p = mock.seed_project("svc", "main");
    mock.reset_calls();
    let desired = attrs(json!({"project": p.id.to_string(), "tag": "v*", "create_access_level": "developer"}));
    let prior = ResourceState::new(format!("{}:v*", p.id), desired.clone());

    assert_eq!(provider.plan("gitlab_tag_protection", None, Some(&desired)).unwrap(), PlanAction::Create);
    assert_eq!(provider.plan("gitlab_tag_protection", Some(&prior), Some(&desired)).unwrap(), PlanAction::NoOp);
    assert_eq!(provider.plan("gitlab_tag_protection", Some(&prior), None).unwrap(), PlanAction::Delete);
    let mut renamed = desired.clone();
    renamed.insert("tag".into(), json!("release-*"));
    assert_eq!(
        provider.plan("gitlab_tag_protection", Some(&prior), Some(&renamed)).unwrap(),
        PlanAction::Replace { attributes: vec!["tag".into()] }
    );
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn legacy_spelling_plans_as_noop() {
    let (_mock, provider) = setup();
    let prior = ResourceState::new(
        "7:42",
        attrs(json!({"project_id": "7", "user_id": 42, "access_level": "maintainer", "username": "dev", "state": "active"})),
    );
    let desired = attrs(json!({"project_id": "7", "user_id": 42, "access_level": "master"}));

    assert!(provider.plan("gitlab_project_membership", Some(&prior), Some(&desired)).unwrap().is_noop());
}

#[tokio::test(start_paused = true)]
async fn in_place_changes_plan_as_updates() {
    let (mock, provider) = setup();
    let cancel = CancellationToken::new();
    let desired = attrs(json!({"name": "svc", "description": "one"}));
    let st = provider.apply("gitlab_project", None, Some(&desired), &cancel).await.expect("create").expect("state");

    let edited = attrs(json!({"name": "svc", "description": "two"}));
    assert_eq!(
        provider.plan("gitlab_project", Some(&st), Some(&edited)).unwrap(),
        PlanAction::Update { changed: vec!["description".into()] }
    );

    mock.reset_calls();
    let st = provider.apply("gitlab_project", Some(&st), Some(&edited), &cancel).await.expect("update").expect("state");
    assert_eq!(mock.calls("edit_project"), 1);
    assert_eq!(st.attributes["description"], json!("two"));

    mock.reset_calls();
    let again = provider.apply("gitlab_project", Some(&st), Some(&edited), &cancel).await.expect("noop").expect("state");
    assert_eq!(again, st);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn replacement_destroys_then_creates() {
    let (mock, provider) = setup();
    let cancel = CancellationToken::new();
    let p = mock.seed_project("svc", "main");
    let desired = attrs(json!({"project": p.id.to_string(), "tag": "v*"}));
    let st = provider.apply("gitlab_tag_protection", None, Some(&desired), &cancel).await.expect("create").expect("state");

    let renamed = attrs(json!({"project": p.id.to_string(), "tag": "release-*"}));
    let st = provider.apply("gitlab_tag_protection", Some(&st), Some(&renamed), &cancel).await.expect("replace").expect("state");

    assert_eq!(st.id, format!("{}:release-*", p.id));
    assert!(mock.protected_tag(p.id, "v*").is_none());
    assert!(mock.protected_tag(p.id, "release-*").is_some());

    let gone = provider.apply("gitlab_tag_protection", Some(&st), None, &cancel).await.expect("delete");
    assert!(gone.is_none());
    assert!(mock.protected_tag(p.id, "release-*").is_none());
}

#[tokio::test(start_paused = true)]
async fn import_then_read_round_trips_through_the_provider() {
    let (mock, provider) = setup();
    let cancel = CancellationToken::new();
    let p = mock.seed_project("svc", "main");

    let st = provider.import("gitlab_branch_protection", &format!("{}:main", p.id), &cancel).await.expect("import");
    let read = provider.read("gitlab_branch_protection", &st, &cancel).await.expect("read");

    assert_eq!(read, Some(st));
}

#[tokio::test]
async fn unknown_types_and_cancelled_calls_are_reported() {
    let (mock, provider) = setup();
    let cancel = CancellationToken::new();

    let err = provider.plan("gitlab_runner", None, Some(&AttrMap::new())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("gitlab_runner"), "{}", err);

    cancel.cancel();
    let err = provider.import("gitlab_project", "1", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn explicit_clear_plans_and_applies_as_an_update() {
    let (mock, provider) = setup();
    let cancel = CancellationToken::new();
    let st = provider
        .apply("gitlab_project", None, Some(&attrs(json!({"name": "svc", "description": "old"}))), &cancel)
        .await
        .expect("create")
        .expect("state");
    let cleared = attrs(json!({"name": "svc", "description": null}));

    assert_eq!(
        provider.plan("gitlab_project", Some(&st), Some(&cleared)).unwrap(),
        PlanAction::Update { changed: vec!["description".into()] }
    );
    let st = provider.apply("gitlab_project", Some(&st), Some(&cleared), &cancel).await.expect("clear").expect("state");
    assert_eq!(st.attributes["description"], json!(""));
    assert!(provider.plan("gitlab_project", Some(&st), Some(&cleared)).unwrap().is_noop());
    assert_eq!(mock.calls("edit_project"), 1);
}
