// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hard and Soft enforcement at the merge gate, and vote idempotency.

use change_request::{
    Actor, ChangeSet, Notification, ProjectCapabilities, ProposedOp, RequestEngine, RequestError,
};
use integration_tests::{setup_project, RecordingNotifier};
use secret_store::{EnforcementLevel, ReviewStatus};

fn open_create(
    engine: &RequestEngine,
    project: &integration_tests::TestProject,
    name: &str,
) -> change_request::Result<secret_store::RequestRow> {
    engine.open_request(
        &project.db,
        &project.crypto,
        ProjectCapabilities::default(),
        &Actor::user("alice"),
        &ChangeSet {
            folder_id: project.root_folder_id.clone(),
            operations: vec![ProposedOp::Create {
                name: name.into(),
                value: "v".into(),
                comment: None,
            }],
        },
    )
}

#[test]
fn test_hard_enforcement_requires_two_approvals() {
    let project = setup_project();
    let engine = RequestEngine::new();
    let caps = ProjectCapabilities::default();

    change_request::create_policy(
        &project.db,
        &project.env_id,
        change_request::PolicyDraft::new("*", vec!["bob".into(), "carol".into()], 2)
            .with_enforcement(EnforcementLevel::Hard),
    )
    .unwrap();

    let request = open_create(&engine, &project, "GATED").unwrap();

    engine
        .review(
            &project.db,
            caps,
            &Actor::user("bob"),
            &request.id,
            ReviewStatus::Approved,
            None,
        )
        .unwrap();

    assert!(matches!(
        engine.merge(&project.db, caps, &Actor::user("alice"), &request.id, None),
        Err(RequestError::ApprovalsUnmet {
            approved: 1,
            required: 2
        })
    ));

    engine
        .review(
            &project.db,
            caps,
            &Actor::user("carol"),
            &request.id,
            ReviewStatus::Approved,
            None,
        )
        .unwrap();

    let outcome = engine
        .merge(&project.db, caps, &Actor::user("alice"), &request.id, None)
        .unwrap();
    assert!(outcome.request.has_merged);
}

#[test]
fn test_vote_idempotency_single_row_per_reviewer() {
    let project = setup_project();
    let engine = RequestEngine::new();
    let caps = ProjectCapabilities::default();

    change_request::create_policy(
        &project.db,
        &project.env_id,
        change_request::PolicyDraft::new("*", vec!["bob".into(), "carol".into()], 2)
            .with_enforcement(EnforcementLevel::Hard),
    )
    .unwrap();

    let request = open_create(&engine, &project, "VOTED").unwrap();

    // The same vote cast twice leaves exactly one row, and does not double
    // toward the threshold.
    for _ in 0..2 {
        engine
            .review(
                &project.db,
                caps,
                &Actor::user("bob"),
                &request.id,
                ReviewStatus::Approved,
                None,
            )
            .unwrap();
    }

    let current = engine.get_request(&project.db, &request.id).unwrap();
    assert_eq!(current.reviews.len(), 1);

    assert!(matches!(
        engine.merge(&project.db, caps, &Actor::user("alice"), &request.id, None),
        Err(RequestError::ApprovalsUnmet {
            approved: 1,
            required: 2
        })
    ));
}

#[test]
fn test_soft_enforcement_bypasses_with_reason_and_notifies() {
    let project = setup_project();
    let notifier = RecordingNotifier::new();
    let engine = RequestEngine::new().with_notifier(notifier.clone());
    let caps = ProjectCapabilities::default();

    change_request::create_policy(
        &project.db,
        &project.env_id,
        change_request::PolicyDraft::new("*", vec!["bob".into()], 1)
            .with_enforcement(EnforcementLevel::Soft),
    )
    .unwrap();

    let request = open_create(&engine, &project, "BYPASSED").unwrap();

    // Zero approvals, but a reason is supplied under Soft enforcement.
    let outcome = engine
        .merge(
            &project.db,
            caps,
            &Actor::user("alice"),
            &request.id,
            Some("emergency rotation"),
        )
        .unwrap();

    assert!(outcome.request.has_merged);
    assert_eq!(
        outcome.request.bypass_reason.as_deref(),
        Some("emergency rotation")
    );

    let events = notifier.events();
    assert!(events.iter().any(|e| matches!(
        e,
        Notification::SoftBypassMerge { request_id, reason, .. }
            if *request_id == request.id && reason == "emergency rotation"
    )));
}

#[test]
fn test_soft_enforcement_without_reason_still_blocks() {
    let project = setup_project();
    let engine = RequestEngine::new();
    let caps = ProjectCapabilities::default();

    change_request::create_policy(
        &project.db,
        &project.env_id,
        change_request::PolicyDraft::new("*", vec!["bob".into()], 1)
            .with_enforcement(EnforcementLevel::Soft),
    )
    .unwrap();

    let request = open_create(&engine, &project, "HELD").unwrap();

    assert!(matches!(
        engine.merge(&project.db, caps, &Actor::user("alice"), &request.id, None),
        Err(RequestError::ApprovalsUnmet { .. })
    ));
}
