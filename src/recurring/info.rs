use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of one recurrence's configuration and counters, as returned
/// by [`crate::RecurringEngine::get`]/`list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringInfo {
    pub recurring_id: String,
    pub cron_expression: String,
    pub max_concurrent: usize,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
    pub total_runs: u64,
    pub total_failures: u64,
    pub created_at: DateTime<Utc>,
    pub active_children: usize,
}
