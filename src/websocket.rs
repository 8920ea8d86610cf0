//! # WebSocket Transcription Endpoint
//!
//! One actor per connection. The actor owns the session pipeline (frame
//! normalizer, segmenter, dispatch queue) and spawns the session's worker
//! pool; caption events flow back from the workers over an unbounded
//! channel and a forwarder task delivers them to the actor's mailbox.
//!
//! ## Protocol:
//! - Binary messages are 16-bit LE mono PCM frames.
//! - A text message `ping:<payload>` is echoed back verbatim (client RTT
//!   probes).
//! - A text message `<sessionId>:<speakerId>` before the first audio frame
//!   names the session; afterwards text messages are ignored.
//! - Outbound captions are JSON `{"type":"partial"|"final","text":...}`,
//!   or plain text with a `~` prefix marking partials when
//!   `structured_events` is off.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio::{DispatchQueue, SessionPipeline};
use crate::config::AppConfig;
use crate::stabilize::{CaptionEvent, CaptionKind, CounterStore, Stabilizer};
use crate::state::AppState;
use crate::transcription::{spawn_workers, SpeechEngine};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Close the connection if the client stays silent this long.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Caption event delivered from a worker to the session actor.
#[derive(Message)]
#[rtype(result = "()")]
struct Caption(CaptionEvent);

pub struct TranscribeSession {
    session_id: String,
    speaker_id: Option<String>,
    hb: Instant,
    config: AppConfig,
    state: web::Data<RwLock<AppState>>,
    engine: Arc<dyn SpeechEngine>,
    store: Arc<dyn CounterStore>,
    queue: Arc<DispatchQueue>,
    pipeline: Option<SessionPipeline>,
    audio_started: bool,
}

impl TranscribeSession {
    pub fn new(
        config: AppConfig,
        state: web::Data<RwLock<AppState>>,
        engine: Arc<dyn SpeechEngine>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        let queue = Arc::new(DispatchQueue::new(config.dispatch.queue_capacity));
        Self {
            session_id: Uuid::new_v4().to_string(),
            speaker_id: None,
            hb: Instant::now(),
            config,
            state,
            engine,
            store,
            queue,
            pipeline: None,
            audio_started: false,
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |actor, ctx| {
            if Instant::now().duration_since(actor.hb) > CLIENT_TIMEOUT {
                info!(session_id = %actor.session_id, "Client heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        // Latency probes are echoed untouched.
        if text.starts_with("ping:") {
            ctx.text(text.to_string());
            return;
        }

        if self.audio_started {
            warn!(session_id = %self.session_id, "Ignoring text message after audio started");
            return;
        }

        if let Some((session_id, speaker_id)) = parse_session_init(text) {
            info!(
                old_session_id = %self.session_id,
                session_id = %session_id,
                speaker_id = %speaker_id,
                "Session renamed by client"
            );
            {
                let mut state = self.state.write().unwrap();
                state.rename_session(
                    &self.session_id,
                    session_id.clone(),
                    Some(speaker_id.clone()),
                );
            }
            self.session_id = session_id;
            self.speaker_id = Some(speaker_id);
        } else {
            warn!(session_id = %self.session_id, "Unrecognized text message");
        }
    }

    fn handle_audio(&mut self, frame: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        self.audio_started = true;

        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline,
            None => return,
        };

        match pipeline.ingest_frame(frame) {
            Ok(stats) => {
                let mut state = self.state.write().unwrap();
                state.metrics.windows_dispatched += stats.windows_dispatched;
                state.metrics.windows_dropped += stats.windows_dropped;
                if let Some(info) = state.sessions.get_mut(&self.session_id) {
                    info.frames_received += 1;
                    info.windows_emitted += stats.windows_dispatched;
                }
            }
            Err(error) => {
                // A misaligned PCM stream never recovers on its own.
                warn!(session_id = %self.session_id, %error, "Rejecting malformed audio frame");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Invalid,
                    description: Some(error.to_string()),
                }));
                ctx.stop();
            }
        }
    }
}

impl Actor for TranscribeSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);

        let registered = {
            let mut state = self.state.write().unwrap();
            state.register_session(self.session_id.clone())
        };
        if !registered {
            warn!(session_id = %self.session_id, "Session limit reached, refusing connection");
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Again,
                description: Some("Server at session capacity".to_string()),
            }));
            ctx.stop();
            return;
        }

        let stabilizer = match Stabilizer::new(&self.config.stabilizer, Arc::clone(&self.store)) {
            Ok(stabilizer) => Arc::new(stabilizer),
            Err(error) => {
                error!(session_id = %self.session_id, %error, "Failed to build stabilizer");
                ctx.stop();
                return;
            }
        };

        let backpressure = match self.config.dispatch.backpressure_mode() {
            Ok(mode) => mode,
            Err(error) => {
                error!(session_id = %self.session_id, %error, "Invalid backpressure mode");
                ctx.stop();
                return;
            }
        };

        self.pipeline = Some(SessionPipeline::new(
            &self.config,
            Arc::clone(&self.queue),
            backpressure,
            self.session_id.clone(),
        ));

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        spawn_workers(
            self.config.dispatch.workers_per_session,
            Arc::clone(&self.queue),
            Arc::clone(&self.engine),
            stabilizer,
            self.config.engine.clone(),
            event_tx,
            self.session_id.clone(),
        );

        // Workers can't touch the actor directly; bridge the channel into
        // the mailbox.
        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                addr.do_send(Caption(event));
            }
        });

        info!(
            session_id = %self.session_id,
            engine = self.engine.name(),
            "Transcription session started"
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.queue.close();
        let mut state = self.state.write().unwrap();
        state.remove_session(&self.session_id);
        info!(
            session_id = %self.session_id,
            speaker_id = ?self.speaker_id,
            "Transcription session ended"
        );
    }
}

impl Handler<Caption> for TranscribeSession {
    type Result = ();

    fn handle(&mut self, msg: Caption, ctx: &mut Self::Context) {
        {
            let mut state = self.state.write().unwrap();
            state.metrics.events_emitted += 1;
        }
        ctx.text(format_event(&msg.0, self.config.server.structured_events));
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscribeSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(frame)) => {
                self.hb = Instant::now();
                self.handle_audio(&frame, ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(error) => {
                warn!(session_id = %self.session_id, %error, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Parse a `<sessionId>:<speakerId>` init message. Both halves must be
/// non-empty, and `ping:` probes are handled before this is called.
fn parse_session_init(text: &str) -> Option<(String, String)> {
    let (session_id, speaker_id) = text.split_once(':')?;
    let session_id = session_id.trim();
    let speaker_id = speaker_id.trim();
    if session_id.is_empty() || speaker_id.is_empty() {
        return None;
    }
    Some((session_id.to_string(), speaker_id.to_string()))
}

/// Render a caption event for the wire.
fn format_event(event: &CaptionEvent, structured: bool) -> String {
    if structured {
        // CaptionEvent's fields are plain strings; serialization can't fail
        serde_json::to_string(event).unwrap_or_else(|_| event.text.clone())
    } else {
        match event.kind {
            CaptionKind::Partial => format!("~{}", event.text),
            CaptionKind::Final => event.text.clone(),
        }
    }
}

/// `GET /ws/audio` upgrade handler.
pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<RwLock<AppState>>,
    engine: web::Data<Arc<dyn SpeechEngine>>,
    store: web::Data<Arc<dyn CounterStore>>,
) -> Result<HttpResponse, Error> {
    let config = {
        let state = state.read().unwrap();
        state.config.clone()
    };

    ws::start(
        TranscribeSession::new(
            config,
            state.clone(),
            engine.get_ref().clone(),
            store.get_ref().clone(),
        ),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_init() {
        assert_eq!(
            parse_session_init("lecture-42:kim"),
            Some(("lecture-42".to_string(), "kim".to_string()))
        );
        assert_eq!(parse_session_init("no-delimiter"), None);
        assert_eq!(parse_session_init(":speaker"), None);
        assert_eq!(parse_session_init("session:"), None);
    }

    #[test]
    fn test_format_event_structured() {
        let event = CaptionEvent {
            kind: CaptionKind::Partial,
            text: "안녕".to_string(),
        };
        assert_eq!(format_event(&event, true), r#"{"type":"partial","text":"안녕"}"#);
    }

    #[test]
    fn test_format_event_plain() {
        let partial = CaptionEvent {
            kind: CaptionKind::Partial,
            text: "안녕".to_string(),
        };
        let fina = CaptionEvent {
            kind: CaptionKind::Final,
            text: "안녕하세요".to_string(),
        };
        assert_eq!(format_event(&partial, false), "~안녕");
        assert_eq!(format_event(&fina, false), "안녕하세요");
    }
}
