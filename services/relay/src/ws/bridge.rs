//! The per-connection relay state machine.
//!
//! `ConnectionPair` owns no sockets. Every transport callback is translated
//! into a method call that returns the ordered list of [`Outbound`] effects
//! the driver in `session.rs` must perform. Because the driver applies the
//! whole list before polling either socket again, the handshake, readiness
//! flip and queue flush of [`ConnectionPair::on_upstream_open`] happen
//! atomically with respect to later local messages.

use super::protocol::{
    FunctionCallArgumentsDone, FunctionCallResult, LocalMessage, READY_NOTICE, RelayEvent,
    SessionConfig, UpstreamEvent,
};
use crate::{
    audio_utils::{self, OPENAI_REALTIME_API_PCM16_SAMPLE_RATE},
    config::{Config, OverflowPolicy, UnknownFunctionPolicy},
};
use anyhow::Result;
use bytes::Bytes;
use jarvis_core::{ActionExecutor, ActionKind};
use serde::Serialize;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, error, info, warn};

const INVALID_LOCAL_JSON: &str = "Invalid JSON format sent to server.";
const UPSTREAM_FAILED: &str = "Connection to OpenAI failed";
const QUEUE_FULL: &str = "Pending message queue is full";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Upstream link is still opening; local messages are queued.
    Connecting,
    /// Upstream link is open and the session configuration is being sent.
    Handshaking,
    /// Session configuration sent; local messages flow straight upstream.
    Ready,
    /// A close has been requested on at least one side.
    Closing,
    Closed,
}

/// A side effect requested by the state machine, in the order it must happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Upstream(String),
    LocalText(String),
    LocalBinary(Bytes),
    CloseLocal,
    CloseUpstream,
}

/// The subset of [`Config`] a bridge needs.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub unknown_function_policy: UnknownFunctionPolicy,
    pub sample_rate: u32,
}

impl From<&Config> for BridgeSettings {
    fn from(config: &Config) -> Self {
        Self {
            queue_capacity: config.pending_queue_capacity,
            overflow_policy: config.overflow_policy,
            unknown_function_policy: config.unknown_function_policy,
            sample_rate: OPENAI_REALTIME_API_PCM16_SAMPLE_RATE,
        }
    }
}

pub struct ConnectionPair {
    state: BridgeState,
    pending: VecDeque<String>,
    settings: BridgeSettings,
    session: Arc<SessionConfig>,
    executor: Arc<ActionExecutor>,
}

impl ConnectionPair {
    pub fn new(
        settings: BridgeSettings,
        session: Arc<SessionConfig>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            state: BridgeState::Connecting,
            pending: VecDeque::new(),
            settings,
            session,
            executor,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == BridgeState::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.state == BridgeState::Closed
    }

    /// True once either side has been asked to close.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, BridgeState::Closing | BridgeState::Closed)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends the session configuration, flips readiness and flushes the queue.
    pub fn on_upstream_open(&mut self) -> Result<Vec<Outbound>> {
        if self.state != BridgeState::Connecting {
            warn!(state = ?self.state, "Upstream opened outside of Connecting; ignoring");
            return Ok(Vec::new());
        }
        self.state = BridgeState::Handshaking;

        let mut out = Vec::with_capacity(self.pending.len() + 2);
        out.push(Outbound::Upstream(encode(&RelayEvent::SessionUpdate {
            session: &self.session,
        })?));
        info!(tools = self.session.tools.len(), "Sent session configuration upstream");

        self.state = BridgeState::Ready;
        if !self.pending.is_empty() {
            info!(count = self.pending.len(), "Flushing queued client messages");
        }
        out.extend(self.pending.drain(..).map(Outbound::Upstream));
        out.push(Outbound::LocalText(READY_NOTICE.to_string()));
        Ok(out)
    }

    /// Handles a text frame from the local client.
    pub fn on_local_message(&mut self, text: &str) -> Vec<Outbound> {
        match self.state {
            BridgeState::Closing | BridgeState::Closed => return Vec::new(),
            _ => {}
        }

        let event: serde_json::Value = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Invalid JSON from client");
                return vec![local_error(INVALID_LOCAL_JSON, e.to_string())];
            }
        };
        let normalized = event.to_string();

        if self.is_ready() {
            debug!("Forwarded client message upstream");
            return vec![Outbound::Upstream(normalized)];
        }

        if self.pending.len() >= self.settings.queue_capacity {
            let details = format!(
                "{} messages are already waiting for the upstream link",
                self.pending.len()
            );
            warn!(capacity = self.settings.queue_capacity, policy = ?self.settings.overflow_policy, "Pending queue overflow");
            return match self.settings.overflow_policy {
                OverflowPolicy::RejectNewest => vec![local_error(QUEUE_FULL, details)],
                OverflowPolicy::CloseBridge => {
                    self.state = BridgeState::Closing;
                    vec![
                        local_error(QUEUE_FULL, details),
                        Outbound::CloseUpstream,
                        Outbound::CloseLocal,
                    ]
                }
            };
        }

        debug!("Queueing message until upstream is ready");
        self.pending.push_back(normalized);
        Vec::new()
    }

    /// Handles a text frame from upstream.
    pub fn on_upstream_message(&mut self, text: &str) -> Result<Vec<Outbound>> {
        let event = match UpstreamEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, raw = %text, "Error parsing upstream message");
                return Ok(Vec::new());
            }
        };
        debug!(event_type = event.type_tag(), "Upstream event");

        match event {
            UpstreamEvent::FunctionCallArgumentsDone(call) => self.dispatch_function_call(call),
            UpstreamEvent::AudioDelta(audio) => {
                match audio_utils::reassemble(&audio.delta, self.settings.sample_rate) {
                    Ok(wav) => Ok(vec![Outbound::LocalBinary(wav)]),
                    Err(e) => {
                        error!(error = %e, "Dropping invalid audio delta");
                        Ok(Vec::new())
                    }
                }
            }
            UpstreamEvent::Error(value) => {
                error!(error = %value["error"], "Upstream reported an error");
                Ok(vec![Outbound::LocalText(value.to_string())])
            }
            UpstreamEvent::Opaque(value) => Ok(vec![Outbound::LocalText(value.to_string())]),
        }
    }

    /// Reports a transport error on the upstream link. The bridge stays up.
    pub fn on_upstream_error(&mut self, details: &str) -> Vec<Outbound> {
        error!(%details, "Upstream WebSocket error");
        match self.state {
            BridgeState::Closed => Vec::new(),
            _ => vec![local_error(UPSTREAM_FAILED, details)],
        }
    }

    pub fn on_upstream_closed(&mut self) -> Vec<Outbound> {
        info!("Upstream WebSocket closed");
        match std::mem::replace(&mut self.state, BridgeState::Closed) {
            BridgeState::Closed => Vec::new(),
            _ => vec![Outbound::CloseLocal],
        }
    }

    pub fn on_local_closed(&mut self) -> Vec<Outbound> {
        info!("Client disconnected");
        match std::mem::replace(&mut self.state, BridgeState::Closed) {
            BridgeState::Handshaking | BridgeState::Ready | BridgeState::Closing => {
                vec![Outbound::CloseUpstream]
            }
            BridgeState::Connecting | BridgeState::Closed => Vec::new(),
        }
    }

    fn dispatch_function_call(&mut self, call: FunctionCallArgumentsDone) -> Result<Vec<Outbound>> {
        info!(name = %call.name, call_id = %call.call_id, arguments = ?call.arguments, "Function call detected");
        if !self.is_ready() {
            warn!(state = ?self.state, "Function call before readiness; dropping");
            return Ok(Vec::new());
        }

        let outcome = match ActionKind::from_name(&call.name) {
            Some(kind) => {
                let args = call.parsed_arguments();
                self.executor.execute(kind, &args).map_err(|e| {
                    error!(error = %e, action = %kind, "Action failed");
                    e.to_string()
                })
            }
            None => match self.settings.unknown_function_policy {
                UnknownFunctionPolicy::Ignore => {
                    warn!(name = %call.name, "Function not found in actions; no result sent");
                    return Ok(Vec::new());
                }
                UnknownFunctionPolicy::Report => {
                    warn!(name = %call.name, "Function not found in actions; reporting failure");
                    Err(format!("Unknown function: {}", call.name))
                }
            },
        };
        if let Ok(receipt) = &outcome {
            info!(result = %receipt.summary, "Action executed");
        }

        let result = FunctionCallResult {
            call_id: call.call_id,
            outcome,
        };
        Ok(vec![
            Outbound::Upstream(encode(&result.into_event())?),
            Outbound::Upstream(encode(&RelayEvent::ResponseCreate)?),
        ])
    }
}

fn encode<T: Serialize>(event: &T) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

fn local_error(message: &str, details: impl Into<String>) -> Outbound {
    let text = serde_json::to_string(&LocalMessage::error(message, details))
        .unwrap_or_else(|_| "{}".to_string());
    Outbound::LocalText(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarvis_core::{
        actions::{DEFAULT_BROWSER, LaunchRequest, Launcher},
        tools::{INSTRUCTIONS, tool_schema},
    };
    use serde_json::{Value, json};
    use std::{io, sync::Mutex};

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<LaunchRequest>>,
        fail: bool,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, request: &LaunchRequest) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            self.launched.lock().unwrap().push(request.clone());
            Ok(())
        }

        fn command_line(&self, request: &LaunchRequest) -> String {
            request.command_line("open")
        }
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            queue_capacity: 4,
            overflow_policy: OverflowPolicy::RejectNewest,
            unknown_function_policy: UnknownFunctionPolicy::Ignore,
            sample_rate: OPENAI_REALTIME_API_PCM16_SAMPLE_RATE,
        }
    }

    fn pair_with(settings: BridgeSettings, launcher: Arc<RecordingLauncher>) -> ConnectionPair {
        ConnectionPair::new(
            settings,
            Arc::new(SessionConfig::new(INSTRUCTIONS, tool_schema())),
            Arc::new(ActionExecutor::new(launcher, DEFAULT_BROWSER)),
        )
    }

    fn ready_pair(settings: BridgeSettings, launcher: Arc<RecordingLauncher>) -> ConnectionPair {
        let mut pair = pair_with(settings, launcher);
        pair.on_upstream_open().unwrap();
        pair
    }

    fn upstream_json(out: &Outbound) -> Value {
        match out {
            Outbound::Upstream(text) => serde_json::from_str(text).unwrap(),
            other => panic!("expected an upstream message, got {other:?}"),
        }
    }

    fn local_json(out: &Outbound) -> Value {
        match out {
            Outbound::LocalText(text) => serde_json::from_str(text).unwrap(),
            other => panic!("expected a local text message, got {other:?}"),
        }
    }

    fn function_call(name: &str, arguments: &str) -> String {
        json!({
            "type": "response.function_call_arguments.done",
            "name": name,
            "call_id": "call_42",
            "arguments": arguments,
        })
        .to_string()
    }

    #[test]
    fn test_messages_before_readiness_are_flushed_after_session_update() {
        let mut pair = pair_with(settings(), Arc::default());
        assert_eq!(pair.state(), BridgeState::Connecting);

        assert!(pair.on_local_message(r#"{"type":"foo"}"#).is_empty());
        assert!(pair.on_local_message(r#"{ "type": "bar" }"#).is_empty());
        assert_eq!(pair.pending_len(), 2);

        let out = pair.on_upstream_open().unwrap();
        assert_eq!(out.len(), 4);
        let session_update = upstream_json(&out[0]);
        assert_eq!(session_update["type"], "session.update");
        assert_eq!(session_update["session"]["tool_choice"], "auto");
        assert_eq!(session_update["session"]["tools"].as_array().unwrap().len(), 3);
        assert_eq!(out[1], Outbound::Upstream(r#"{"type":"foo"}"#.into()));
        assert_eq!(out[2], Outbound::Upstream(r#"{"type":"bar"}"#.into()));
        assert_eq!(out[3], Outbound::LocalText(READY_NOTICE.into()));

        assert!(pair.is_ready());
        assert_eq!(pair.pending_len(), 0);
    }

    #[test]
    fn test_messages_after_readiness_are_never_queued() {
        let mut pair = ready_pair(settings(), Arc::default());
        let out = pair.on_local_message(r#"{"type":"input_audio_buffer.commit"}"#);
        assert_eq!(
            out,
            vec![Outbound::Upstream(r#"{"type":"input_audio_buffer.commit"}"#.into())]
        );
        assert_eq!(pair.pending_len(), 0);
    }

    #[test]
    fn test_invalid_local_json_is_reported_and_not_forwarded() {
        for mut pair in [pair_with(settings(), Arc::default()), ready_pair(settings(), Arc::default())] {
            let out = pair.on_local_message("{oops");
            assert_eq!(out.len(), 1);
            let error = local_json(&out[0]);
            assert_eq!(error["type"], "error");
            assert_eq!(error["error"]["message"], "Invalid JSON format sent to server.");
            assert_eq!(pair.pending_len(), 0);
        }
    }

    #[test]
    fn test_queue_overflow_rejects_newest() {
        let mut pair = pair_with(settings(), Arc::default());
        for i in 0..4 {
            assert!(pair.on_local_message(&json!({ "n": i }).to_string()).is_empty());
        }
        let out = pair.on_local_message(r#"{"n":4}"#);
        assert_eq!(local_json(&out[0])["error"]["message"], "Pending message queue is full");
        assert_eq!(pair.pending_len(), 4);

        let flushed = pair.on_upstream_open().unwrap();
        assert_eq!(flushed[4], Outbound::Upstream(r#"{"n":3}"#.into()));
    }

    #[test]
    fn test_queue_overflow_can_close_the_bridge() {
        let settings = BridgeSettings {
            queue_capacity: 1,
            overflow_policy: OverflowPolicy::CloseBridge,
            ..settings()
        };
        let mut pair = pair_with(settings, Arc::default());
        assert!(pair.on_local_message(r#"{"n":0}"#).is_empty());

        let out = pair.on_local_message(r#"{"n":1}"#);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], Outbound::CloseUpstream);
        assert_eq!(out[2], Outbound::CloseLocal);
        assert_eq!(pair.state(), BridgeState::Closing);
        assert!(pair.on_local_message(r#"{"n":2}"#).is_empty());
    }

    #[test]
    fn test_open_app_call_reports_success_then_triggers_response() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut pair = ready_pair(settings(), launcher.clone());

        let out = pair
            .on_upstream_message(&function_call("openApp", r#"{"appName":"vscode"}"#))
            .unwrap();

        assert_eq!(out.len(), 2);
        let item = upstream_json(&out[0]);
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["type"], "function_call_output");
        assert_eq!(item["item"]["call_id"], "call_42");
        let output: Value = serde_json::from_str(item["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], true);
        assert_eq!(output["message"], "Successfully opened vscode");
        assert_eq!(output["result"], "Opening Visual Studio Code");
        assert_eq!(upstream_json(&out[1]), json!({ "type": "response.create" }));

        assert_eq!(
            *launcher.launched.lock().unwrap(),
            vec![LaunchRequest::Application("Visual Studio Code".into())]
        );
    }

    #[test]
    fn test_failed_action_still_triggers_response() {
        let launcher = Arc::new(RecordingLauncher {
            fail: true,
            ..Default::default()
        });
        let mut pair = ready_pair(settings(), launcher);

        let out = pair
            .on_upstream_message(&function_call("openUrl", r#"{"url":"example.com"}"#))
            .unwrap();

        assert_eq!(out.len(), 2);
        let item = upstream_json(&out[0]);
        let output: Value = serde_json::from_str(item["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], false);
        assert!(output["error"].as_str().unwrap().contains("denied"));
        assert_eq!(upstream_json(&out[1])["type"], "response.create");
    }

    #[test]
    fn test_malformed_arguments_become_a_failure_result() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut pair = ready_pair(settings(), launcher.clone());

        let out = pair
            .on_upstream_message(&function_call("searchGoogle", "{broken"))
            .unwrap();

        assert_eq!(out.len(), 2);
        let output: Value =
            serde_json::from_str(upstream_json(&out[0])["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], false);
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_string_arguments_still_produce_one_result() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut pair = ready_pair(settings(), launcher.clone());
        let call = json!({
            "type": "response.function_call_arguments.done",
            "name": "openApp",
            "call_id": "call_7",
            "arguments": { "appName": "vscode" },
        });

        let out = pair.on_upstream_message(&call.to_string()).unwrap();

        assert_eq!(out.len(), 2);
        let item = upstream_json(&out[0]);
        assert_eq!(item["item"]["call_id"], "call_7");
        let output: Value = serde_json::from_str(item["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], false);
        assert_eq!(upstream_json(&out[1])["type"], "response.create");
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn test_nameless_call_follows_unknown_function_policy() {
        let call = r#"{"type":"response.function_call_arguments.done","call_id":"call_8","arguments":"{}"}"#;

        let mut pair = ready_pair(settings(), Arc::default());
        assert!(pair.on_upstream_message(call).unwrap().is_empty());

        let settings = BridgeSettings {
            unknown_function_policy: UnknownFunctionPolicy::Report,
            ..settings()
        };
        let mut pair = ready_pair(settings, Arc::default());
        let out = pair.on_upstream_message(call).unwrap();
        assert_eq!(out.len(), 2);
        let item = upstream_json(&out[0]);
        assert_eq!(item["item"]["call_id"], "call_8");
        let output: Value = serde_json::from_str(item["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], false);
        assert_eq!(upstream_json(&out[1])["type"], "response.create");
    }

    #[test]
    fn test_unknown_function_is_ignored_by_default() {
        let mut pair = ready_pair(settings(), Arc::default());
        let out = pair
            .on_upstream_message(&function_call("formatDisk", "{}"))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_function_can_be_reported() {
        let settings = BridgeSettings {
            unknown_function_policy: UnknownFunctionPolicy::Report,
            ..settings()
        };
        let mut pair = ready_pair(settings, Arc::default());
        let out = pair
            .on_upstream_message(&function_call("formatDisk", "{}"))
            .unwrap();

        assert_eq!(out.len(), 2);
        let item = upstream_json(&out[0]);
        assert_eq!(item["item"]["call_id"], "call_42");
        let output: Value = serde_json::from_str(item["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output, json!({ "success": false, "error": "Unknown function: formatDisk" }));
        assert_eq!(upstream_json(&out[1])["type"], "response.create");
    }

    #[test]
    fn test_audio_delta_is_forwarded_as_wav() {
        let mut pair = ready_pair(settings(), Arc::default());
        let out = pair
            .on_upstream_message(r#"{"type":"response.audio.delta","delta":"AAAAAA=="}"#)
            .unwrap();
        let [Outbound::LocalBinary(wav)] = out.as_slice() else {
            panic!("expected a single binary frame, got {out:?}");
        };
        assert_eq!(wav.len(), audio_utils::WAV_HEADER_LEN + 4);
        assert_eq!(&wav[..4], b"RIFF");
    }

    #[test]
    fn test_other_events_pass_through() {
        let mut pair = ready_pair(settings(), Arc::default());
        let raw = r#"{"type":"response.text.delta","delta":"hi","extra":{"nested":[1,2]}}"#;
        let out = pair.on_upstream_message(raw).unwrap();
        assert_eq!(local_json(&out[0]), serde_json::from_str::<Value>(raw).unwrap());

        // Key order survives the round trip through `Value`.
        let unsorted = r#"{"type":"response.done","b":1,"a":2}"#;
        let out = pair.on_upstream_message(unsorted).unwrap();
        assert_eq!(out, vec![Outbound::LocalText(unsorted.into())]);

        let error = r#"{"type":"error","error":{"message":"rate limited"}}"#;
        let out = pair.on_upstream_message(error).unwrap();
        assert_eq!(local_json(&out[0])["error"]["message"], "rate limited");
    }

    #[test]
    fn test_malformed_upstream_messages_are_dropped() {
        let mut pair = ready_pair(settings(), Arc::default());
        assert!(pair.on_upstream_message("not json").unwrap().is_empty());
        assert!(pair
            .on_upstream_message(r#"{"type":"response.audio.delta","delta":"%%%"}"#)
            .unwrap()
            .is_empty());
        assert!(pair.is_ready());
    }

    #[test]
    fn test_upstream_error_keeps_bridge_open() {
        let mut pair = ready_pair(settings(), Arc::default());
        let out = pair.on_upstream_error("connection reset");
        let error = local_json(&out[0]);
        assert_eq!(error["error"]["message"], "Connection to OpenAI failed");
        assert_eq!(error["error"]["details"], "connection reset");
        assert!(pair.is_ready());
    }

    #[test]
    fn test_close_propagates_to_the_other_side() {
        let mut pair = ready_pair(settings(), Arc::default());
        assert_eq!(pair.on_upstream_closed(), vec![Outbound::CloseLocal]);
        assert!(pair.is_closed());
        assert!(pair.on_local_closed().is_empty());

        let mut pair = ready_pair(settings(), Arc::default());
        assert_eq!(pair.on_local_closed(), vec![Outbound::CloseUpstream]);
        assert!(pair.is_closed());
        assert!(pair.on_upstream_closed().is_empty());

        // Nothing to close upstream while it is still connecting.
        let mut pair = pair_with(settings(), Arc::default());
        assert!(pair.on_local_closed().is_empty());
        assert!(pair.is_closed());
    }
}
