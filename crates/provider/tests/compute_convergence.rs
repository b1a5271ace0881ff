//! End-to-end convergence of compute instances against a scripted
//! control plane.

mod common;

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use driftless_common::{AccessType, Error, UserAccess};
use driftless_provider::testing::{FakeApi, Reply};
use driftless_provider::{ComputeResource, CreateOptions, Engine};

use common::*;

#[tokio::test]
async fn second_convergence_issues_no_mutations() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    script_compute(&fake, compute_record(42, "ENABLED", "STARTED"));

    let converged = engine(&fake)
        .update::<ComputeResource>(42, &compute_spec(), Some(&compute_spec()))
        .await
        .unwrap();

    assert!(converged.is_clean());
    assert_eq!(converged.value.id, 42);
    assert!(fake.mutations().is_empty(), "unexpected calls: {:?}", fake.mutations());
}

#[tokio::test]
async fn create_attaches_everything_then_starts() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    fake.ok("/cloudapi/kvmx86/create", "42");
    script_compute(&fake, compute_record(42, "ENABLED", "STARTED"));

    let converged = engine(&fake)
        .create::<ComputeResource>(&compute_spec(), CreateOptions::default())
        .await
        .unwrap();

    assert!(converged.is_clean());
    assert_eq!(
        fake.mutations(),
        vec![
            "/cloudapi/kvmx86/create",
            "/cloudapi/compute/diskAdd",
            "/cloudapi/compute/netAttach",
            "/cloudapi/compute/affinityLabelSet",
            "/cloudapi/compute/tagAdd",
            "/cloudapi/compute/affinityRuleAdd",
            "/cloudapi/compute/pfwAdd",
            "/cloudapi/compute/userGrant",
            "/cloudapi/compute/snapshotCreate",
            "/cloudapi/compute/start",
        ]
    );
    let create = &fake.calls_to("/cloudapi/kvmx86/create")[0];
    assert_eq!(create.get("start"), Some("false"));
    assert_eq!(create.get("netType"), Some("NONE"));
}

#[tokio::test]
async fn failed_disk_attach_deletes_the_new_compute() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    fake.ok("/cloudapi/kvmx86/create", "42");
    fake.fail("/cloudapi/compute/diskAdd", "sep is full");

    let err = engine(&fake)
        .create::<ComputeResource>(&compute_spec(), CreateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RemoteCall { ref operation, ref message }
            if operation == "/cloudapi/compute/diskAdd" && message == "sep is full"
    ));
    assert_eq!(
        fake.mutations(),
        vec![
            "/cloudapi/kvmx86/create",
            "/cloudapi/compute/diskAdd",
            "/cloudapi/compute/delete",
        ]
    );
    let delete = &fake.calls_to("/cloudapi/compute/delete")[0];
    assert_eq!(delete.get("computeId"), Some("42"));
    assert_eq!(delete.get("permanently"), Some("true"));
}

#[tokio::test]
async fn compensation_can_be_turned_off() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    fake.ok("/cloudapi/kvmx86/create", "42");
    fake.fail("/cloudapi/compute/netAttach", "no free address");

    let err = engine(&fake)
        .create::<ComputeResource>(&compute_spec(), CreateOptions { compensate: false })
        .await
        .unwrap_err();

    assert!(err.is_remote());
    assert_eq!(fake.count("/cloudapi/compute/delete"), 0);
}

#[tokio::test]
async fn missing_reference_blocks_create() {
    let fake = Arc::new(FakeApi::new());
    fake.json("/cloudapi/rg/get", json!({"id": 10}));
    fake.missing("/cloudapi/image/get");

    let err = engine(&fake)
        .create::<ComputeResource>(&compute_spec(), CreateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { id: 20, .. }));
    assert!(fake.mutations().is_empty());
}

#[tokio::test]
async fn failed_best_effort_items_become_warnings() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    script_compute(&fake, compute_record(42, "ENABLED", "STARTED"));
    fake.fail("/cloudapi/compute/tagAdd", "tag quota reached");

    let mut spec = compute_spec();
    spec.tags.insert("team".to_string(), "core".to_string());
    spec.users.push(UserAccess {
        username: "bob".to_string(),
        access_type: AccessType::Read,
    });

    let converged = engine(&fake)
        .update::<ComputeResource>(42, &spec, None)
        .await
        .unwrap();

    assert!(!converged.is_clean());
    assert_eq!(converged.warnings.operations(), vec!["tag add team=core"]);
    assert!(converged.diagnostic().unwrap().contains("tag quota reached"));
    assert_eq!(
        fake.calls_to("/cloudapi/compute/userGrant")[0].get("userName"),
        Some("bob")
    );
}

#[tokio::test]
async fn destroyed_compute_is_recreated() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    script_compute_lists(&fake);
    fake.on(COMPUTE_GET, |params| match params.get("computeId") {
        Some("42") => Reply::json(compute_record(42, "DESTROYED", "STOPPED")),
        _ => Reply::json(compute_record(77, "ENABLED", "STARTED")),
    });
    fake.ok("/cloudapi/kvmx86/create", "77");

    let converged = engine(&fake)
        .update::<ComputeResource>(42, &compute_spec(), None)
        .await
        .unwrap();

    assert_eq!(converged.value.id, 77);
    assert_eq!(fake.mutations()[0], "/cloudapi/kvmx86/create");
    assert_eq!(fake.count("/cloudapi/compute/restore"), 0);
}

#[tokio::test]
async fn cancelled_convergence_makes_no_calls() {
    let fake = Arc::new(FakeApi::new());
    script_references(&fake);
    script_compute(&fake, compute_record(42, "ENABLED", "STARTED"));

    let token = CancellationToken::new();
    token.cancel();
    let engine = Engine::with_api_lookup(fake.api().with_cancellation(token));

    let err = engine
        .update::<ComputeResource>(42, &compute_spec(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(err.is_retryable_later());
    assert!(fake.calls().is_empty());
}
