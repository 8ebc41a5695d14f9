// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step sequencing, halt/skip semantics, and result aggregation.

use crate::harness::*;
use forge_core::{Properties, Results, SourceRev, StepSpec};
use forge_engine::{EngineConfig, Submission};
use forge_store::Datastore;

fn three_step_config(halt_on_a: bool) -> EngineConfig {
    let mut step_a = StepSpec::shell("a", "run a");
    step_a.halt_on_failure = halt_on_a;
    EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![step_a, StepSpec::shell("b", "run b"), StepSpec::shell("c", "run c")],
    ))
}

#[tokio::test]
async fn halting_failure_skips_the_rest() {
    let mut rig = Rig::new(three_step_config(true));
    let worker = rig.attach("w1");
    worker.plan("run a", Plan::Fail { exit: 2 });

    rig.submit("ci").await;
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Failure);
    assert_eq!(worker.seen(), vec!["run a"], "halted steps must not dispatch");

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[0].results, Some(Results::Failure));
    assert_eq!(build.steps[1].results, Some(Results::Skipped));
    assert_eq!(build.steps[2].results, Some(Results::Skipped));
}

#[tokio::test]
async fn non_halting_failure_lets_later_steps_run() {
    let mut rig = Rig::new(three_step_config(false));
    let worker = rig.attach("w1");
    worker.plan("run a", Plan::Fail { exit: 2 });

    rig.submit("ci").await;
    let (build_id, results) = rig.next_finished().await;

    // worst-of aggregation over all executed steps
    assert_eq!(results, Results::Failure);
    assert_eq!(worker.seen(), vec!["run a", "run b", "run c"]);

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[1].results, Some(Results::Success));
}

#[tokio::test]
async fn informational_steps_run_after_a_halt_and_do_not_count() {
    let mut cleanup = StepSpec::shell("cleanup", "run cleanup");
    cleanup.informational = true;
    let mut compile = StepSpec::shell("compile", "run compile");
    compile.halt_on_failure = true;
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![compile, StepSpec::shell("test", "run test"), cleanup],
    ));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    worker.plan("run compile", Plan::Fail { exit: 1 });

    rig.submit("ci").await;
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Failure);
    // the informational cleanup ran even though the sequence halted
    assert_eq!(worker.seen(), vec!["run compile", "run cleanup"]);

    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[1].results, Some(Results::Skipped));
    assert_eq!(build.steps[2].results, Some(Results::Success));
}

#[tokio::test]
async fn informational_failure_does_not_dirty_the_build() {
    let mut lint = StepSpec::shell("lint", "run lint");
    lint.informational = true;
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![StepSpec::shell("build", "run build"), lint],
    ));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    worker.plan("run lint", Plan::Fail { exit: 1 });

    rig.submit("ci").await;
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
}

#[tokio::test]
async fn warning_output_downgrades_success_to_warnings() {
    let mut step = StepSpec::shell("build", "make");
    step.warn_on_output = Some("warning:".into());
    let cfg = EngineConfig::new("forge-test")
        .worker(worker("w1", 1))
        .builder(builder("ci", &["w1"], vec![step]));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    worker.plan("make", Plan::ok_with_logs(&["compiling...", "warning: unused variable", "done"]));

    rig.submit("ci").await;
    let (build_id, results) = rig.next_finished().await;
    assert_eq!(results, Results::Warnings);

    // log lines arrive in order
    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    let lines: Vec<&str> = build.steps[0]
        .log
        .iter()
        .filter(|l| l.stream == forge_core::LogStream::Stdout)
        .map(|l| l.line.as_str())
        .collect();
    assert_eq!(lines, vec!["compiling...", "warning: unused variable", "done"]);
}

#[tokio::test]
async fn properties_flow_from_step_to_step() {
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![StepSpec::shell("configure", "detect"), StepSpec::shell("build", "make ${target}")],
    ));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");
    let mut out = Properties::new();
    out.set("target", "release");
    worker.plan("detect", Plan::ok_with_props(out));

    rig.submit("ci").await;
    let (_, results) = rig.next_finished().await;
    assert_eq!(results, Results::Success);
    assert_eq!(worker.seen(), vec!["detect", "make release"]);
}

#[tokio::test]
async fn unmet_precondition_skips_without_side_effects() {
    let mut deploy = StepSpec::shell("deploy", "push it");
    deploy.only_if = Some("deploy_ok".into());
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![StepSpec::shell("build", "make"), deploy],
    ));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");

    rig.submit("ci").await;
    let (build_id, results) = rig.next_finished().await;

    assert_eq!(results, Results::Success);
    assert_eq!(worker.seen(), vec!["make"], "skipped step must not dispatch");
    let build = rig.store.get_build(&build_id).await.unwrap().unwrap();
    assert_eq!(build.steps[1].results, Some(Results::Skipped));
}

#[tokio::test]
async fn checkout_carries_the_requested_revisions() {
    let cfg = EngineConfig::new("forge-test").worker(worker("w1", 1)).builder(builder(
        "ci",
        &["w1"],
        vec![StepSpec::checkout("sync"), StepSpec::shell("build", "make")],
    ));
    let mut rig = Rig::new(cfg);
    let worker = rig.attach("w1");

    rig.engine
        .submit(
            Submission::to("ci")
                .revisions(vec![SourceRev::new("git://repo", "main").at("abc123")]),
        )
        .await
        .unwrap();
    let (_, results) = rig.next_finished().await;

    assert_eq!(results, Results::Success);
    assert_eq!(worker.seen(), vec!["checkout", "make"]);
}
