use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Commands slower than this are logged at warn level.
pub const COMMAND_BUDGET_US: u128 = 5_000;

/// Timing for one command applied by a session actor.
#[derive(Debug, Clone)]
pub struct CommandMetrics {
    pub session_id: String,
    pub command: &'static str,
    pub duration_us: u128,
    /// Number of events handed to the fan-out layer.
    pub deliveries: usize,
    pub accepted: bool,
}

impl CommandMetrics {
    pub fn over_budget(&self) -> bool {
        self.duration_us > COMMAND_BUDGET_US
    }

    pub fn log(&self) {
        if self.over_budget() {
            tracing::warn!(
                session_id = %self.session_id,
                command = self.command,
                duration_us = self.duration_us,
                deliveries = self.deliveries,
                accepted = self.accepted,
                "command exceeded budget ({}us > {}us)",
                self.duration_us,
                COMMAND_BUDGET_US
            );
        } else {
            tracing::debug!(
                session_id = %self.session_id,
                command = self.command,
                duration_us = self.duration_us,
                deliveries = self.deliveries,
                accepted = self.accepted,
                "command applied"
            );
        }
    }
}
