//! # Transcription Workers
//!
//! Each session spawns a small pool of workers that pull windows off the
//! dispatch queue, run the speech engine on a blocking thread, and feed the
//! recognized segments through the session's stabilizer. Caption events
//! come out the far side on an unbounded channel; the WebSocket actor
//! forwards them to the client.
//!
//! A failed or panicked engine call drops that one window with a warning;
//! the worker keeps running. Workers exit when the queue closes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::DispatchQueue;
use crate::config::EngineConfig;
use crate::stabilize::{CaptionEvent, Stabilizer};

use super::engine::{SpeechEngine, TranscribeRequest};

/// Spawn `count` workers for one session. Handles are returned so the
/// caller can await drain on shutdown.
pub fn spawn_workers(
    count: usize,
    queue: Arc<DispatchQueue>,
    engine: Arc<dyn SpeechEngine>,
    stabilizer: Arc<Stabilizer>,
    engine_config: EngineConfig,
    sink: mpsc::UnboundedSender<CaptionEvent>,
    session_id: String,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_index| {
            let queue = Arc::clone(&queue);
            let engine = Arc::clone(&engine);
            let stabilizer = Arc::clone(&stabilizer);
            let engine_config = engine_config.clone();
            let sink = sink.clone();
            let session_id = session_id.clone();

            tokio::spawn(async move {
                run_worker(
                    worker_index,
                    queue,
                    engine,
                    stabilizer,
                    engine_config,
                    sink,
                    session_id,
                )
                .await;
            })
        })
        .collect()
}

async fn run_worker(
    worker_index: usize,
    queue: Arc<DispatchQueue>,
    engine: Arc<dyn SpeechEngine>,
    stabilizer: Arc<Stabilizer>,
    engine_config: EngineConfig,
    sink: mpsc::UnboundedSender<CaptionEvent>,
    session_id: String,
) {
    debug!(session_id = %session_id, worker_index, "Transcription worker started");

    while let Some(window) = queue.take().await {
        let sequence = window.sequence;
        let start_sample = window.start_sample;

        let hint = stabilizer.continuation_hint();
        let request = TranscribeRequest::from_config(&engine_config, hint);

        let samples = window.samples;
        let engine_call = {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || engine.transcribe(&samples, &request))
        };

        let segments = match engine_call.await {
            Ok(Ok(segments)) => segments,
            Ok(Err(error)) => {
                warn!(
                    session_id = %session_id,
                    sequence,
                    %error,
                    "Engine failed on window, dropping it"
                );
                continue;
            }
            Err(join_error) => {
                warn!(
                    session_id = %session_id,
                    sequence,
                    %join_error,
                    "Engine task aborted, dropping window"
                );
                continue;
            }
        };

        for event in stabilizer.ingest(start_sample, &segments) {
            if sink.send(event).is_err() {
                // Receiver dropped: the session is gone
                debug!(session_id = %session_id, worker_index, "Event sink closed");
                return;
            }
        }
    }

    debug!(session_id = %session_id, worker_index, "Transcription worker drained");
}
