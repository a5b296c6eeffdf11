/// Synchronizer configuration constants.
///
/// Timeouts bounding every remote call and every cross-context request.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::LiveSource;

/// Upper bound on one `last_height` or `block_header` request.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Upper bound on connecting to one server, including its first height query.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// How long a blocking caller waits for the runtime to answer.
pub const BRIDGE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub live_source: LiveSource,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            live_source: LiveSource::default(),
        }
    }
}
