// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock discipline across builds: exclusive sections never overlap,
//! counting locks admit their configured capacity, per-worker locks
//! are independent per worker.

use crate::harness::*;
use forge_core::{LockSpec, StepSpec};
use forge_engine::{EngineConfig, Submission};

/// Two builders on two workers, both holding the same build-level lock.
fn contended_config(lock: LockSpec) -> EngineConfig {
    let mut alpha = builder("alpha", &["w1"], vec![StepSpec::shell("build", "alpha job")]);
    alpha.locks = vec![lock.name.clone()];
    let mut beta = builder("beta", &["w2"], vec![StepSpec::shell("build", "beta job")]);
    beta.locks = vec![lock.name.clone()];
    EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .worker(worker("w2", 1))
        .builder(alpha)
        .builder(beta)
        .lock(lock)
}

#[tokio::test]
async fn exclusive_lock_holders_never_overlap() {
    let mut rig = Rig::new(contended_config(LockSpec::exclusive("db")));
    let w1 = rig.attach("w1");
    let w2 = rig.attach("w2");
    w1.plan("alpha job", Plan::Hold);
    w2.plan("beta job", Plan::Hold);

    rig.engine.submit(Submission::to("alpha")).await.unwrap();
    rig.engine.submit(Submission::to("beta")).await.unwrap();

    // exactly one build enters its critical section
    wait_until(|| w1.held_count() + w2.held_count() == 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(w1.held_count() + w2.held_count(), 1, "exclusive lock admitted two holders");

    w1.release_all();
    w2.release_all();
    rig.next_finished().await;

    // the loser acquires only after the winner released
    wait_until(|| w1.held_count() + w2.held_count() == 1).await;
    w1.release_all();
    w2.release_all();
    rig.next_finished().await;
}

#[tokio::test]
async fn counting_lock_admits_configured_capacity() {
    let lock = LockSpec::counting("pool", 2);
    let mut cfg = EngineConfig::new("forge-test").lock(lock);
    for (name, job) in [("a", "a job"), ("b", "b job"), ("c", "c job")] {
        let worker_name = format!("w-{name}");
        cfg = cfg.worker(worker(&worker_name, 1));
        let mut b = builder(name, &[worker_name.as_str()], vec![StepSpec::shell("build", job)]);
        b.locks = vec!["pool".into()];
        cfg = cfg.builder(b);
    }

    let mut rig = Rig::new(cfg);
    let workers = [rig.attach("w-a"), rig.attach("w-b"), rig.attach("w-c")];
    for (w, job) in workers.iter().zip(["a job", "b job", "c job"]) {
        w.plan(job, Plan::Hold);
    }

    for name in ["a", "b", "c"] {
        rig.engine.submit(Submission::to(name)).await.unwrap();
    }

    let held = || workers.iter().map(|w| w.held_count()).sum::<usize>();
    wait_until(|| held() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(held(), 2, "counting lock admitted more than its capacity");

    for w in &workers {
        w.release_all();
    }
    rig.next_finished().await;
    rig.next_finished().await;

    // the queued third build gets its turn
    wait_until(|| held() == 1).await;
    for w in &workers {
        w.release_all();
    }
    rig.next_finished().await;
}

#[tokio::test]
async fn per_worker_lock_does_not_cross_workers() {
    let lock = LockSpec::exclusive("scratch").per_worker();
    let mut ci = builder("ci", &["w1", "w2"], vec![StepSpec::shell("build", "job ${tag}")]);
    ci.locks = vec!["scratch".into()];
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .worker(worker("w2", 1))
        .builder(ci)
        .lock(lock);
    let mut rig = Rig::new(cfg);
    let w1 = rig.attach("w1");
    let w2 = rig.attach("w2");
    for w in [&w1, &w2] {
        w.plan("job x", Plan::Hold);
        w.plan("job y", Plan::Hold);
    }

    for tag in ["x", "y"] {
        let mut props = forge_core::Properties::new();
        props.set("tag", tag);
        rig.engine.submit(Submission::to("ci").props(props)).await.unwrap();
    }

    // same nominal lock, different workers: both run concurrently
    wait_until(|| w1.held_count() + w2.held_count() == 2).await;

    w1.release_all();
    w2.release_all();
    rig.next_finished().await;
    rig.next_finished().await;
}

#[tokio::test]
async fn step_locks_are_released_when_the_step_ends() {
    let mut guarded = StepSpec::shell("guarded", "guarded job");
    guarded.locks = vec!["db".into()];
    let tail = StepSpec::shell("tail", "tail job");
    let mut other = builder("other", &["w2"], vec![StepSpec::shell("build", "other job")]);
    other.locks = vec!["db".into()];

    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .worker(worker("w2", 1))
        .builder(builder("ci", &["w1"], vec![guarded, tail]))
        .builder(other)
        .lock(LockSpec::exclusive("db"));
    let mut rig = Rig::new(cfg);
    let w1 = rig.attach("w1");
    let w2 = rig.attach("w2");
    w1.plan("guarded job", Plan::Hold);
    w1.plan("tail job", Plan::Hold);
    w2.plan("other job", Plan::Hold);

    rig.engine.submit(Submission::to("ci")).await.unwrap();
    wait_until(|| w1.held_count() == 1).await;

    // while the guarded step holds "db", the other build cannot start
    rig.engine.submit(Submission::to("other")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(w2.held_count(), 0);

    // finishing the guarded step releases the lock even though the
    // build itself keeps running
    w1.release_all();
    wait_until(|| w2.held_count() == 1).await;
    assert_eq!(rig.engine.running_count(), 2);

    w1.release_all();
    w2.release_all();
    rig.next_finished().await;
    rig.next_finished().await;
}

#[tokio::test]
async fn unknown_lock_reference_is_rejected_at_construction() {
    let mut ci = builder("ci", &["w1"], vec![StepSpec::shell("build", "make")]);
    ci.locks = vec!["ghost".into()];
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(ci);
    let store = std::sync::Arc::new(forge_store::MemStore::new());
    let (reporter, _events) = forge_engine::ChannelReporter::channel();
    let err = forge_engine::Engine::new(
        cfg,
        store,
        std::sync::Arc::new(reporter),
        forge_core::FakeClock::new(),
    )
    .err();
    assert!(matches!(err, Some(forge_engine::ConfigError::UnknownLock { .. })));
}
