// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step runner: drives one step through its remote-command lifecycle.
//!
//! `Pending → Started → Running → Complete`, with
//! `Running → Interrupting → Complete` when the build is interrupted.
//! Transitions only move forward. The precondition check and local
//! behaviors complete without dispatching; everything else rides the
//! generic command protocol.

use crate::engine::Inner;
use crate::registry::StepEvent;
use forge_core::{
    remote_command, Build, Clock, CommandId, LogLine, Results, StepBehaviorSpec, StepSpec,
    StepState,
};
use forge_wire::MasterMessage;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// What the build controller needs to know about a finished step.
pub(crate) struct StepOutcome {
    pub results: Results,
    /// The worker's connection is gone or suspect; steps after this one
    /// cannot run.
    pub worker_lost: bool,
    /// The step ended because the build was interrupted.
    pub interrupted: bool,
}

impl StepOutcome {
    fn done(results: Results) -> Self {
        Self { results, worker_lost: false, interrupted: false }
    }

    fn lost(interrupted: bool) -> Self {
        Self { results: Results::Exception, worker_lost: true, interrupted }
    }
}

/// Map a command completion message to a result.
fn completion_results(exit_code: Option<i32>, cancelled: bool, warned: bool) -> Results {
    if cancelled {
        return Results::Cancelled;
    }
    match exit_code {
        Some(0) if warned => Results::Warnings,
        Some(0) => Results::Success,
        Some(_) => Results::Failure,
        // The worker could not run the command at all.
        None => Results::Exception,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Bool(false)) | Some(Value::Null))
}

/// Run one step of a build to a terminal state.
pub(crate) async fn run_step<C: Clock>(
    inner: &Inner<C>,
    build: &mut Build,
    idx: usize,
    spec: &StepSpec,
    token: &CancellationToken,
) -> StepOutcome {
    let Build { ref id, ref worker, ref revisions, ref mut props, ref mut steps, .. } = *build;
    let record = &mut steps[idx];

    record.advance(StepState::Started, inner.clock.epoch_ms());

    // Precondition check. Nothing has been dispatched yet, so an unmet
    // precondition leaves no trace on the worker.
    if let Some(name) = &spec.only_if {
        if !truthy(props.get(name)) {
            record.append_log(LogLine::header(format!("skipped: property '{name}' not set")));
            record.finalize(Results::Skipped, inner.clock.epoch_ms());
            return StepOutcome::done(Results::Skipped);
        }
    }

    // Local behaviors complete without touching the worker.
    if let StepBehaviorSpec::SetProperties { props: to_set } = &spec.behavior {
        for (k, v) in to_set {
            props.set(k.clone(), v.clone());
        }
        record.ran = true;
        record.append_log(LogLine::header(format!("set {} propert{}", to_set.len(),
            if to_set.len() == 1 { "y" } else { "ies" })));
        record.finalize(Results::Success, inner.clock.epoch_ms());
        return StepOutcome::done(Results::Success);
    }
    if matches!(spec.behavior, StepBehaviorSpec::Checkout) && revisions.is_empty() {
        record.append_log(LogLine::header("skipped: no revisions to sync"));
        record.finalize(Results::Skipped, inner.clock.epoch_ms());
        return StepOutcome::done(Results::Skipped);
    }

    let Some((cmd_name, args)) = remote_command(&spec.behavior, props, revisions) else {
        record.finalize(Results::Success, inner.clock.epoch_ms());
        return StepOutcome::done(Results::Success);
    };
    if let Some(Value::String(rendered)) = args.get("command") {
        record.append_log(LogLine::header(format!("$ {rendered}")));
    }

    let command_id = CommandId::new();
    let mut rx = inner.registry.open_channel(command_id.clone(), worker);
    let msg =
        MasterMessage::RunCommand { command_id: command_id.clone(), name: cmd_name, args };
    if let Err(e) = inner.registry.dispatch(worker, msg) {
        // Connection loss at dispatch time is never silently retried
        // here; any retry policy lives above this engine as a fresh
        // request.
        inner.registry.close_channel(&command_id);
        record.ran = true;
        record.append_log(LogLine::header(format!("dispatch failed: {e}")));
        record.finalize(Results::Exception, inner.clock.epoch_ms());
        tracing::warn!(build = %id, step = spec.name.as_str(), worker = worker.as_str(),
            "step failed: worker not connected");
        return StepOutcome::lost(false);
    }
    record.ran = true;
    record.advance(StepState::Running, inner.clock.epoch_ms());

    let mut warned = false;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = inner.registry.dispatch(
                    worker,
                    MasterMessage::CancelCommand { command_id: command_id.clone() },
                );
                record.advance(StepState::Interrupting, inner.clock.epoch_ms());
                tracing::info!(build = %id, step = spec.name.as_str(), "interrupting step");

                // Bounded wait for the worker's acknowledgement.
                let deadline = tokio::time::Instant::now() + inner.cfg.interrupt_timeout;
                loop {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(Some(StepEvent::Progress)) => {}
                        Ok(Some(StepEvent::Log(line))) => {
                            if let Some(pat) = &spec.warn_on_output {
                                warned = warned || line.line.contains(pat);
                            }
                            record.append_log(line.clone());
                            inner.reporter.step_log(id, &record.name, &line);
                        }
                        Ok(Some(StepEvent::Done { exit_code, cancelled, props: out })) => {
                            inner.registry.close_channel(&command_id);
                            props.merge(&out);
                            let results = completion_results(exit_code, cancelled, warned);
                            record.finalize(results, inner.clock.epoch_ms());
                            return StepOutcome {
                                results,
                                worker_lost: false,
                                interrupted: true,
                            };
                        }
                        Ok(Some(StepEvent::WorkerLost)) | Ok(None) => {
                            inner.registry.close_channel(&command_id);
                            record.append_log(LogLine::header("worker connection lost"));
                            record.finalize(Results::Exception, inner.clock.epoch_ms());
                            return StepOutcome::lost(true);
                        }
                        Err(_) => {
                            // No acknowledgement in time: force the step
                            // closed and treat the connection as suspect.
                            inner.registry.close_channel(&command_id);
                            record.append_log(LogLine::header(
                                "cancel not acknowledged; abandoning command",
                            ));
                            record.finalize(Results::Exception, inner.clock.epoch_ms());
                            inner.sever_worker(worker, "interrupt timeout");
                            return StepOutcome::lost(true);
                        }
                    }
                }
            }
            ev = rx.recv() => match ev {
                Some(StepEvent::Progress) => {}
                Some(StepEvent::Log(line)) => {
                    if let Some(pat) = &spec.warn_on_output {
                        warned = warned || line.line.contains(pat);
                    }
                    record.append_log(line.clone());
                    inner.reporter.step_log(id, &record.name, &line);
                }
                Some(StepEvent::Done { exit_code, cancelled, props: out }) => {
                    inner.registry.close_channel(&command_id);
                    props.merge(&out);
                    let results = completion_results(exit_code, cancelled, warned);
                    record.finalize(results, inner.clock.epoch_ms());
                    return StepOutcome::done(results);
                }
                Some(StepEvent::WorkerLost) | None => {
                    inner.registry.close_channel(&command_id);
                    record.append_log(LogLine::header("worker connection lost"));
                    record.finalize(Results::Exception, inner.clock.epoch_ms());
                    return StepOutcome::lost(false);
                }
            }
        }
    }
}

