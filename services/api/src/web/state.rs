//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every request.

use std::sync::Arc;

use clicker_core::{EnginePorts, SessionEngine};

use crate::config::Config;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(ports: EnginePorts, config: Arc<Config>) -> Self {
        let engine = SessionEngine::new(ports, config.engine_settings());
        Self {
            engine: Arc::new(engine),
            config,
        }
    }
}
