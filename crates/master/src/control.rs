// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control listener: the trigger surface on a Unix socket.
//!
//! Each connection carries length-prefixed JSON control requests;
//! every request gets exactly one response frame.

use forge_engine::{Engine, EngineError, Submission};
use forge_wire::{read_frame, write_frame, ControlRequest, ControlResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accept control connections until shutdown.
pub async fn run(engine: Engine, listener: UnixListener, shutdown: CancellationToken) {
    info!("control listener ready");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(engine, stream).await {
                            debug!(error = %e, "control connection closed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "control accept failed"),
            }
        }
    }
    debug!("control listener stopped");
}

async fn serve(engine: Engine, stream: UnixStream) -> Result<(), forge_wire::ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let request: ControlRequest = match read_frame(&mut reader).await {
            Ok(req) => req,
            Err(forge_wire::ProtocolError::Io(_)) => return Ok(()), // client hung up
            Err(e) => return Err(e),
        };
        let response = handle(&engine, request).await;
        write_frame(&mut writer, &response).await?;
    }
}

async fn handle(engine: &Engine, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Submit { builder, props, revisions, priority, dedup_key } => {
            let sub = Submission { builder, props, revisions, priority, dedup_key };
            match engine.submit(sub).await {
                Ok(request_id) => ControlResponse::Submitted { request_id },
                Err(EngineError::DuplicateRequest { existing, .. }) => {
                    ControlResponse::Duplicate { request_id: existing }
                }
                Err(e) => ControlResponse::Error { message: e.to_string() },
            }
        }
        ControlRequest::Cancel { request_id } => match engine.cancel(&request_id).await {
            Ok(outcome) => ControlResponse::Cancelled { outcome },
            Err(e) => ControlResponse::Error { message: e.to_string() },
        },
        ControlRequest::Status => ControlResponse::Status { snapshot: engine.status() },
    }
}
