// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request claiming: exactly-once, merging, priority, cancellation.

use crate::harness::*;
use forge_core::{Properties, Results, StepSpec};
use forge_engine::{EngineConfig, EngineError, Submission};
use forge_store::Datastore;
use forge_wire::CancelOutcome;

#[tokio::test]
async fn submitted_request_is_claimed_run_and_resolved_once() {
    let mut rig = Rig::new(single_builder_config("make"));
    let worker = rig.attach("w1");

    let id = rig.submit("ci").await;
    let (_, results) = rig.next_finished().await;

    assert_eq!(results, Results::Success);
    assert_eq!(worker.seen(), vec!["make"]);
    assert_eq!(rig.store.request_results(&id), Some(Results::Success));
    assert_eq!(rig.engine.running_count(), 0);
}

#[tokio::test]
async fn request_waits_until_a_worker_attaches() {
    let mut rig = Rig::new(single_builder_config("make"));

    let id = rig.submit("ci").await;
    // nothing eligible yet
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(rig.store.request_results(&id), None);

    rig.attach("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(rig.store.request_results(&id), Some(Results::Success));
}

#[tokio::test]
async fn compatible_requests_merge_into_one_build() {
    let mut rig = Rig::new(single_builder_config("make"));

    let a = rig.submit("ci").await;
    let b = rig.submit("ci").await;

    let worker = rig.attach("w1");
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Success);
    // one build ran one command and satisfied both requests
    assert_eq!(worker.seen().len(), 1);
    assert_eq!(rig.store.request_results(&a), Some(Results::Success));
    assert_eq!(rig.store.request_results(&b), Some(Results::Success));

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.requests.len(), 2);
}

#[tokio::test]
async fn duplicate_idempotency_key_yields_one_logical_request() {
    let mut rig = Rig::new(single_builder_config("make"));

    let first = rig
        .engine
        .submit(Submission::to("ci").dedup_key("push-123"))
        .await
        .unwrap();
    let err = rig.engine.submit(Submission::to("ci").dedup_key("push-123")).await;
    match err {
        Err(EngineError::DuplicateRequest { existing, .. }) => assert_eq!(existing, first),
        other => panic!("expected duplicate rejection, got {other:?}"),
    }

    let worker = rig.attach("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(worker.seen().len(), 1);
}

#[tokio::test]
async fn higher_priority_requests_run_first() {
    let mut rig = Rig::new(single_builder_config("build ${n}"));

    let mut low = Properties::new();
    low.set("n", "low");
    let mut high = Properties::new();
    high.set("n", "high");

    rig.engine.submit(Submission::to("ci").props(low)).await.unwrap();
    rig.engine
        .submit(Submission::to("ci").props(high).priority(5))
        .await
        .unwrap();

    let worker = rig.attach("w1");
    rig.next_finished().await;
    rig.next_finished().await;

    assert_eq!(worker.seen(), vec!["build high", "build low"]);
}

#[tokio::test]
async fn cancelled_pending_request_never_runs() {
    let mut rig = Rig::new(single_builder_config("make"));

    let doomed = rig.submit("ci").await;
    let outcome = rig.engine.cancel(&doomed).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Removed);
    assert_eq!(rig.store.request_results(&doomed), Some(Results::Cancelled));

    // a later request still flows normally
    let kept = rig.submit("ci").await;
    let worker = rig.attach("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(rig.store.request_results(&kept), Some(Results::Success));
    assert_eq!(worker.seen().len(), 1);
}

#[tokio::test]
async fn builders_with_urgent_requests_match_first() {
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .builder(builder("slow", &["w1"], vec![StepSpec::shell("build", "run slow")]))
        .builder(builder("urgent", &["w1"], vec![StepSpec::shell("build", "run urgent")]));
    let mut rig = Rig::new(cfg);

    rig.engine.submit(Submission::to("slow")).await.unwrap();
    rig.engine.submit(Submission::to("urgent").priority(9)).await.unwrap();

    let worker = rig.attach("w1");
    rig.next_finished().await;
    rig.next_finished().await;

    assert_eq!(worker.seen(), vec!["run urgent", "run slow"]);
}
