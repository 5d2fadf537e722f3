//! Shared application state
//!
//! One context object is constructed at process start and handed to every
//! HTTP handler and background task. Nothing orchestration-related lives in
//! module-level globals, which keeps handlers testable with doubles.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::events::EventBus;
use crate::service::assignment::AssignmentEngine;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub events: EventBus,
    pub assignment: Arc<AssignmentEngine>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            events: EventBus::default(),
            assignment: Arc::new(AssignmentEngine::new()),
        }
    }
}
