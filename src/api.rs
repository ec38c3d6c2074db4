//! Operator-facing HTTP surface
//!
//! A thin control plane over the core: login status, QR retrieval, and
//! re-arm. It never drives conversations — the watcher and queue own that.

mod handlers;

pub use handlers::create_router;

use crate::login::ProductionLogin;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub login: Arc<ProductionLogin>,
}

impl AppState {
    pub fn new(login: Arc<ProductionLogin>) -> Self {
        Self { login }
    }
}
