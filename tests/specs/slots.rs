// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker slot accounting: a worker never runs more concurrent builds
//! than its configured slot count, even when builders share it.

use crate::harness::*;
use forge_core::{Properties, StepSpec};
use forge_engine::{EngineConfig, Submission};

async fn submit_distinct(rig: &Rig, builder: &str, tag: &str) {
    let mut props = Properties::new();
    props.set("tag", tag);
    rig.engine.submit(Submission::to(builder).props(props)).await.unwrap();
}

#[tokio::test]
async fn single_slot_worker_runs_builds_sequentially() {
    let mut rig = Rig::new(single_builder_config("job ${tag}"));
    let worker = rig.attach("w1");
    // hold both jobs so concurrency is observable
    worker.plan("job a", Plan::Hold);
    worker.plan("job b", Plan::Hold);

    submit_distinct(&rig, "ci", "a").await;
    submit_distinct(&rig, "ci", "b").await;

    wait_until(|| worker.held_count() == 1).await;
    // second build must not start while the slot is taken
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(worker.held_count(), 1);
    assert_eq!(worker.seen().len(), 1);

    worker.release_all();
    rig.next_finished().await;

    wait_until(|| worker.held_count() == 1).await;
    worker.release_all();
    rig.next_finished().await;
    assert_eq!(worker.seen().len(), 2);
}

#[tokio::test]
async fn two_slot_worker_runs_two_builds_concurrently() {
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 2))
        .builder(builder("ci", &["w1"], vec![StepSpec::shell("build", "job ${tag}")]));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    worker.plan("job a", Plan::Hold);
    worker.plan("job b", Plan::Hold);
    worker.plan("job c", Plan::Hold);

    for tag in ["a", "b", "c"] {
        submit_distinct(&rig, "ci", tag).await;
    }

    wait_until(|| worker.held_count() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(worker.held_count(), 2, "third build exceeded the slot count");

    worker.release_all();
    rig.next_finished().await;
    rig.next_finished().await;
    wait_until(|| worker.held_count() == 1).await;
    worker.release_all();
    rig.next_finished().await;
}

#[tokio::test]
async fn builders_sharing_a_worker_cannot_double_reserve_it() {
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .builder(builder("alpha", &["w1"], vec![StepSpec::shell("build", "alpha job")]))
        .builder(builder("beta", &["w1"], vec![StepSpec::shell("build", "beta job")]));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    worker.plan("alpha job", Plan::Hold);
    worker.plan("beta job", Plan::Hold);

    rig.engine.submit(Submission::to("alpha")).await.unwrap();
    rig.engine.submit(Submission::to("beta")).await.unwrap();

    wait_until(|| worker.held_count() == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(worker.held_count(), 1, "worker slot was double-reserved");

    worker.release_all();
    rig.next_finished().await;
    wait_until(|| worker.held_count() == 1).await;
    worker.release_all();
    rig.next_finished().await;

    let status = rig.engine.status();
    assert_eq!(status.workers[0].busy, 0);
}

#[tokio::test]
async fn second_worker_picks_up_overflow() {
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .worker(worker("w2", 1))
        .builder(builder("ci", &["w1", "w2"], vec![StepSpec::shell("build", "job ${tag}")]));
    let mut rig = Rig::new(cfg);
    let w1 = rig.attach("w1");
    let w2 = rig.attach("w2");
    w1.plan("job a", Plan::Hold);
    w1.plan("job b", Plan::Hold);
    w2.plan("job a", Plan::Hold);
    w2.plan("job b", Plan::Hold);

    submit_distinct(&rig, "ci", "a").await;
    submit_distinct(&rig, "ci", "b").await;

    wait_until(|| w1.held_count() + w2.held_count() == 2).await;
    assert_eq!(w1.held_count(), 1);
    assert_eq!(w2.held_count(), 1);

    w1.release_all();
    w2.release_all();
    rig.next_finished().await;
    rig.next_finished().await;
}
