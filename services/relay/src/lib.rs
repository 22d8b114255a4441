//! Jarvis Relay Library Crate
//!
//! A realtime duplex relay between one local voice/text client and the
//! OpenAI Realtime API. Each accepted WebSocket gets its own upstream link;
//! tool calls from the model are executed locally through `jarvis-core` and
//! streamed audio is rewrapped as WAV before it reaches the client. The
//! `relay` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
