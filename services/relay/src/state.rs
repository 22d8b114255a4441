//! Shared Application State
//!
//! Everything a relay session needs, built once at startup and handed to the
//! router. Nothing here is mutated after construction.

use crate::{config::Config, ws::protocol::SessionConfig};
use jarvis_core::{
    ActionExecutor, Launcher,
    tools::{INSTRUCTIONS, tool_schema},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub executor: Arc<ActionExecutor>,
    /// Session configuration sent upstream by every bridge during its handshake.
    pub session: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(config: Config, launcher: Arc<dyn Launcher>) -> Self {
        let executor = ActionExecutor::new(launcher, config.browser_app.clone());
        Self {
            session: Arc::new(SessionConfig::new(INSTRUCTIONS, tool_schema())),
            executor: Arc::new(executor),
            config: Arc::new(config),
        }
    }
}
