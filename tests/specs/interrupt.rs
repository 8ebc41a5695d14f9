// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interruption: cancelling a claimed request drives the running step
//! to completion (worker acknowledgement or bounded timeout) and
//! starts nothing further.

use crate::harness::*;
use forge_core::{Results, StepSpec};
use forge_engine::{EngineConfig, Submission};
use forge_store::Datastore;
use forge_wire::CancelOutcome;
use std::time::Duration;

fn config_with_interrupt_timeout(timeout: Duration) -> EngineConfig {
    EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .builder(builder(
            "ci",
            &["w1"],
            vec![
                StepSpec::shell("a", "run a"),
                StepSpec::shell("b", "run b"),
                StepSpec::shell("c", "run c"),
            ],
        ))
        .interrupt_timeout(timeout)
}

#[tokio::test]
async fn cancel_of_claimed_request_interrupts_the_build() {
    let mut rig = Rig::new(config_with_interrupt_timeout(Duration::from_secs(5)));
    let worker = rig.attach("w1");
    worker.plan("run b", Plan::Hold); // acknowledges cancels

    let id = rig.submit("ci").await;
    wait_until(|| worker.held_count() == 1).await;

    let outcome = rig.engine.cancel(&id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Interrupting);

    let (build_id, results) = rig.next_finished().await;
    assert_eq!(results, Results::Cancelled);
    assert_eq!(worker.cancel_count(), 1);

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[0].results, Some(Results::Success));
    assert_eq!(build.steps[1].results, Some(Results::Cancelled));
    assert_eq!(build.steps[2].results, Some(Results::Cancelled));
    // step c never dispatched
    assert_eq!(worker.seen(), vec!["run a", "run b"]);
}

#[tokio::test]
async fn unacknowledged_cancel_is_forced_after_the_timeout() {
    let mut rig = Rig::new(config_with_interrupt_timeout(Duration::from_millis(100)));
    let worker = rig.attach("w1");
    worker.plan("run b", Plan::Sinkhole); // swallows cancels

    let id = rig.submit("ci").await;
    wait_until(|| worker.held_count() == 1).await;

    rig.engine.cancel(&id).await.unwrap();
    let started = tokio::time::Instant::now();
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2), "forced completion took too long");
    assert_eq!(worker.cancel_count(), 1);

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[1].results, Some(Results::Exception));

    // the unresponsive connection is treated as suspect and dropped
    let status = rig.engine.status();
    assert!(!status.workers[0].attached);
}

#[tokio::test]
async fn interrupt_while_waiting_for_a_lock_cancels_cleanly() {
    let lock = forge_core::LockSpec::exclusive("db");
    let mut alpha = builder("alpha", &["w1"], vec![StepSpec::shell("build", "alpha job")]);
    alpha.locks = vec!["db".into()];
    let mut beta = builder("beta", &["w2"], vec![StepSpec::shell("build", "beta job")]);
    beta.locks = vec!["db".into()];
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .worker(worker("w2", 1))
        .builder(alpha)
        .builder(beta)
        .lock(lock);
    let mut rig = Rig::new(cfg);
    let w1 = rig.attach("w1");
    let w2 = rig.attach("w2");
    w1.plan("alpha job", Plan::Hold);

    rig.engine.submit(Submission::to("alpha")).await.unwrap();
    wait_until(|| w1.held_count() == 1).await;

    // beta claims its worker but blocks on the lock
    let blocked = rig.engine.submit(Submission::to("beta")).await.unwrap();
    wait_until(|| rig.engine.running_count() == 2).await;
    assert_eq!(w2.seen().len(), 0);

    let outcome = rig.engine.cancel(&blocked).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Interrupting);
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Cancelled);

    // the holder is untouched
    w1.release_all();
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(w2.seen().len(), 0, "cancelled build must never dispatch");
}

#[tokio::test]
async fn shutdown_interrupts_stragglers_after_the_grace_period() {
    let mut rig = Rig::new(config_with_interrupt_timeout(Duration::from_millis(100)));
    let worker = rig.attach("w1");
    worker.plan("run a", Plan::Hold);

    rig.submit("ci").await;
    wait_until(|| worker.held_count() == 1).await;

    rig.engine.shutdown(Duration::from_millis(100)).await;
    // the held build was interrupted and resolved
    assert_eq!(rig.engine.running_count(), 0);

    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Cancelled);
}
