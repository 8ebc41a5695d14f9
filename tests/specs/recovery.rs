// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Disconnect recovery: in-flight steps fail with `Exception`, later
//! steps are cancelled, the slot frees, and pending work rematches.

use crate::harness::*;
use forge_core::{Results, StepSpec};
use forge_engine::{EngineConfig, Submission};
use forge_store::Datastore;

fn three_step_config() -> EngineConfig {
    EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![
            StepSpec::shell("a", "run a"),
            StepSpec::shell("b", "run b"),
            StepSpec::shell("c", "run c"),
        ],
    ))
}

#[tokio::test]
async fn disconnect_mid_step_finalizes_the_build_as_exception() {
    let mut rig = Rig::new(three_step_config());
    let worker = rig.attach("w1");
    worker.plan("run b", Plan::Sinkhole);

    rig.submit("ci").await;
    wait_until(|| worker.held_count() == 1).await;

    rig.engine.worker_detached("w1");
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Exception);
    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[0].results, Some(Results::Success));
    assert_eq!(build.steps[1].results, Some(Results::Exception));
    assert_eq!(build.steps[2].results, Some(Results::Cancelled));

    // the slot is free again
    let status = rig.engine.status();
    assert_eq!(status.workers[0].busy, 0);
    assert!(!status.workers[0].attached);
}

#[tokio::test]
async fn freed_slot_is_eligible_for_a_fresh_match_pass() {
    let mut rig = Rig::new(three_step_config());
    let worker = rig.attach("w1");
    worker.plan("run b", Plan::Sinkhole);

    rig.submit("ci").await;
    wait_until(|| worker.held_count() == 1).await;
    rig.engine.worker_detached("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Exception);

    // pending demand submitted while detached rematches on reattach
    let second = rig.submit("ci").await;
    let worker = rig.attach("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(rig.store.request_results(&second), Some(Results::Success));
    assert_eq!(worker.seen(), vec!["run a", "run b", "run c"]);
}

#[tokio::test]
async fn replacement_connection_severs_in_flight_work_first() {
    let mut rig = Rig::new(three_step_config());
    let first = rig.attach("w1");
    first.plan("run a", Plan::Sinkhole);

    rig.submit("ci").await;
    wait_until(|| first.held_count() == 1).await;

    // the same worker reconnects; at most one live connection
    let second = rig.attach("w1");
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Exception);

    // the replacement connection carries new builds
    rig.submit("ci").await;
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(second.seen(), vec!["run a", "run b", "run c"]);
}

#[tokio::test]
async fn journal_backed_store_survives_an_engine_restart() {
    use forge_engine::{ChannelReporter, Engine};
    use forge_store::{Datastore, JournalStore};

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forge.journal");

    let pending_id = {
        let store = std::sync::Arc::new(JournalStore::open(&path).unwrap());
        let (reporter, _events) = ChannelReporter::channel();
        let engine = Engine::new(
            single_builder_config("make"),
            store,
            std::sync::Arc::new(reporter),
            forge_core::FakeClock::new(),
        )
        .unwrap();
        engine.submit(Submission::to("ci")).await.unwrap()
    };

    // a new engine over the same journal picks the request back up
    let store = std::sync::Arc::new(JournalStore::open(&path).unwrap());
    let pending = store.pending_requests().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pending_id);

    let (reporter, mut events) = ChannelReporter::channel();
    let engine = Engine::new(
        single_builder_config("make"),
        store.clone(),
        std::sync::Arc::new(reporter),
        forge_core::FakeClock::new(),
    )
    .unwrap();
    assert_eq!(engine.restore_pending().await.unwrap(), 1);

    let (worker, conn) = FakeWorker::spawn("w1", engine.clone());
    engine.worker_attached(forge_core::WorkerInfo::new("w1"), conn).unwrap();

    loop {
        match tokio::time::timeout(WAIT, events.recv()).await {
            Ok(Some(forge_engine::ReportEvent::BuildFinished { results, .. })) => {
                assert_eq!(results, Results::Success);
                break;
            }
            Ok(Some(_)) => continue,
            other => panic!("no completion after restart: {other:?}"),
        }
    }
    assert_eq!(worker.seen(), vec!["make"]);
}
