use std::sync::Arc;

use crate::auth::token::TokenSet;
use crate::config::GateConfig;
use crate::ratelimit::tracker::AttemptTracker;

pub struct AppState {
    pub gate: GateConfig,
    pub tokens: TokenSet,
    pub tracker: Arc<AttemptTracker>,
}

impl AppState {
    pub fn new(gate: GateConfig) -> Self {
        let tokens = TokenSet::new(&gate.allowed_tokens);
        let tracker = Arc::new(AttemptTracker::with_config(gate.limiter_config()));
        AppState {
            gate,
            tokens,
            tracker,
        }
    }
}
