use std::sync::Arc;

use serde_json::json;
use tanuki_apply::resources::membership::{GroupMembershipResource, ProjectMembershipResource};
use tanuki_apply::{Invocation, Resource};
use tanuki_core::{AttrMap, ErrorKind, ResourceState};
use tanuki_hub::{Member, MockGitlab};

fn attrs(v: serde_json::Value) -> AttrMap { v.as_object().cloned().expect("object") }

fn setup() -> (Arc<MockGitlab>, Invocation) {
    let mock = Arc::new(MockGitlab::new());
    let inv = Invocation::new(mock.clone());
    (mock, inv)
}

#[tokio::test]
async fn project_member_lifecycle() {
    let (mock, inv) = setup();
    let p = mock.seed_project("svc", "main");
    let project = p.id.to_string();
    let desired = attrs(json!({"project_id": project, "user_id": 42, "access_level": "developer", "expires_at": "2030-01-31"}));

    let st = ProjectMembershipResource.create(&inv, &desired).await.expect("create");
    assert_eq!(st.id, format!("{}:42", project));
    assert_eq!(mock.project_member(p.id, 42).expect("member").access_level, 30);

    mock.reset_calls();
    let st = ProjectMembershipResource.update(&inv, &st, &desired).await.expect("noop");
    assert_eq!(mock.total_calls(), 0);

    let promoted = attrs(json!({"project_id": project, "user_id": 42, "access_level": "maintainer", "expires_at": "2030-01-31"}));
    let st = ProjectMembershipResource.update(&inv, &st, &promoted).await.expect("promote");
    assert_eq!(mock.calls("edit_project_member"), 1);
    assert_eq!(st.attributes["access_level"], json!("maintainer"));
    assert_eq!(mock.project_member(p.id, 42).expect("member").access_level, 40);

    ProjectMembershipResource.delete(&inv, &st).await.expect("delete");
    assert!(mock.project_member(p.id, 42).is_none());
    assert!(ProjectMembershipResource.read(&inv, &st).await.expect("read").is_none());
    ProjectMembershipResource.delete(&inv, &st).await.expect("already gone");
}

#[tokio::test]
async fn legacy_master_does_not_drift() {
    let (mock, inv) = setup();
    let group = mock.add_group("platform", 2);
    let desired = attrs(json!({"group_id": group.id.to_string(), "user_id": 7, "access_level": "master"}));

    let st = GroupMembershipResource.create(&inv, &desired).await.expect("create");
    assert_eq!(st.attributes["access_level"], json!("maintainer"));

    mock.reset_calls();
    GroupMembershipResource.update(&inv, &st, &desired).await.expect("noop");
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn bad_expiry_is_rejected_offline() {
    let (mock, inv) = setup();
    let p = mock.seed_project("svc", "main");
    mock.reset_calls();
    let desired = attrs(json!({"project_id": p.id.to_string(), "user_id": 3, "access_level": "guest", "expires_at": "2030-13-01"}));

    let err = ProjectMembershipResource.create(&inv, &desired).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn existing_member_is_a_conflict() {
    let (mock, inv) = setup();
    let group = mock.add_group("platform", 2);
    mock.seed_group_member(group.id, Member { id: 9, username: "ops".into(), access_level: 50, ..Default::default() });
    let desired = attrs(json!({"group_id": "platform", "user_id": 9, "access_level": "developer"}));

    let err = GroupMembershipResource.create(&inv, &desired).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(mock.calls("add_group_member"), 0);
}

#[tokio::test]
async fn group_destroy_flags_are_local() {
    let (mock, inv) = setup();
    let group = mock.add_group("platform", 2);
    let gid = group.id.to_string();
    let desired = attrs(json!({"group_id": gid, "user_id": 5, "access_level": "reporter"}));
    let st = GroupMembershipResource.create(&inv, &desired).await.expect("create");
    mock.reset_calls();

    let flagged = attrs(json!({"group_id": gid, "user_id": 5, "access_level": "reporter", "skip_subresources_on_destroy": true}));
    let st = GroupMembershipResource.update(&inv, &st, &flagged).await.expect("flag");

    assert_eq!(mock.total_calls(), 0);
    assert_eq!(st.attributes["skip_subresources_on_destroy"], json!(true));
    GroupMembershipResource.delete(&inv, &st).await.expect("delete");
    assert!(mock.group_member(group.id, 5).is_none());
}

#[tokio::test]
async fn member_ids_must_name_a_numeric_user() {
    let (mock, inv) = setup();

    let err = ProjectMembershipResource.import(&inv, "5").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = ProjectMembershipResource.read(&inv, &ResourceState::new("5:alice", AttrMap::new())).await.unwrap_err();
    assert!(err.to_string().contains("not a number"), "{}", err);
    assert_eq!(mock.total_calls(), 0);
}
