//! HTTP server state

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};
use chrono::{DateTime, Utc};

use crate::{clock::Clock, engine::TimerEngine};

/// State shared by the HTTP handlers
pub struct AppState {
    pub engine: Arc<TimerEngine>,
    pub started: Instant,
    pub port: u16,
    pub host: String,
    last_action: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl AppState {
    pub fn new(engine: Arc<TimerEngine>, port: u16, host: String) -> Self {
        Self {
            engine,
            started: Instant::now(),
            port,
            host,
            last_action: Mutex::new(None),
        }
    }

    /// Remember the last command issued through the API
    pub fn record_action(&self, action: &str) {
        let at = self.engine.clock().now();
        *self.last_action.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((action.to_string(), at));
    }

    /// Uptime as `1h 2m 3s`, leading zero units omitted
    pub fn get_uptime(&self) -> String {
        let secs = self.started.elapsed().as_secs();
        match (secs / 3600, secs % 3600 / 60, secs % 60) {
            (0, 0, s) => format!("{}s", s),
            (0, m, s) => format!("{}m {}s", m, s),
            (h, m, s) => format!("{}h {}m {}s", h, m, s),
        }
    }

    pub fn get_last_action(&self) -> (Option<String>, Option<DateTime<Utc>>) {
        match self
            .last_action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some((action, at)) => (Some(action), Some(at)),
            None => (None, None),
        }
    }
}
