//! Wiring from configuration to the dispatch stack, plus operator reports

use std::sync::Arc;

use content::GenerationSettings;
use key_pool::{Dispatcher, KeyPool, classify};
use provider::{ErrorClassification, UpstreamError};
use serde_json::{Value, json};
use tracing::info;

use crate::config::Config;

/// The shared key pool and dispatcher for one process.
pub struct Runtime {
    pool: Arc<KeyPool>,
    dispatcher: Arc<Dispatcher>,
    generation: GenerationSettings,
}

impl Runtime {
    pub fn from_config(config: &Config) -> Self {
        let pool = Arc::new(KeyPool::load(&config.keys.sources));
        let dispatcher = Arc::new(Dispatcher::new(pool.clone(), config.dispatch.clone()));
        info!(
            keys = pool.len(),
            model = %config.generation.model,
            "runtime initialized"
        );
        Self {
            pool,
            dispatcher,
            generation: config.generation.clone(),
        }
    }

    /// Pool health plus dispatcher capacity and model settings.
    pub async fn health(&self) -> Value {
        let mut report = self.pool.health().await;
        let config = self.dispatcher.config();
        report["dispatch"] = json!({
            "concurrency": config.concurrency,
            "available_slots": self.dispatcher.available_slots(),
            "max_attempts": config.max_attempts,
            "sticky_max_attempts": config.sticky_max_attempts,
            "cooldown_secs": config.cooldown_secs,
        });
        report["generation"] = json!(self.generation);
        report
    }
}

/// How the dispatcher would treat an upstream error with this status and text.
pub fn classification_report(status: Option<u16>, message: &str) -> Value {
    let error = UpstreamError::new(status, message);
    match classify(&error) {
        ErrorClassification::RateLimited { wait } => json!({
            "classification": "rate_limited",
            "wait_secs": wait.as_secs_f64(),
        }),
        ErrorClassification::Fatal => json!({
            "classification": "fatal",
        }),
    }
}
