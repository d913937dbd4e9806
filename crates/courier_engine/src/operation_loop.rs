//! Drains strategy requests through a transport.

use crate::error::SyncResult;
use crate::strategy::SyncStrategy;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, warn};

/// Statistics of one [`OperationLoop::run_until_idle`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Requests sent.
    pub requests: u64,
    /// Responses received, whatever their status.
    pub responses: u64,
    /// Responses the transcoder could not handle.
    pub errors: u64,
    /// The loop stopped because the transport failed.
    pub transport_failed: bool,
    /// The loop stopped at the request limit.
    pub limited: bool,
}

/// Sends the strategy's requests one at a time.
pub struct OperationLoop {
    strategy: Arc<SyncStrategy>,
    transport: Arc<dyn Transport>,
}

impl OperationLoop {
    /// Creates a loop.
    pub fn new(strategy: Arc<SyncStrategy>, transport: Arc<dyn Transport>) -> Self {
        Self {
            strategy,
            transport,
        }
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &Arc<SyncStrategy> {
        &self.strategy
    }

    /// Sends requests until no transcoder has one, the transport fails, or
    /// `max_requests` were sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot schedule a request.
    pub fn run_until_idle(&self, max_requests: u64) -> SyncResult<LoopStats> {
        let mut stats = LoopStats::default();

        while let Some(scheduled) = self.strategy.next_request()? {
            stats.requests += 1;
            match self.transport.send(&scheduled.request) {
                Ok(response) => {
                    stats.responses += 1;
                    if let Err(err) = self.strategy.did_receive_response(scheduled.id, &response) {
                        stats.errors += 1;
                        warn!(request = %scheduled.request, error = %err, "response not handled");
                    }
                }
                Err(err) => {
                    self.strategy.did_fail_request(scheduled.id, &err)?;
                    stats.transport_failed = true;
                    break;
                }
            }
            if stats.requests >= max_requests {
                stats.limited = true;
                break;
            }
        }

        debug!(?stats, "operation loop idle");
        Ok(stats)
    }
}

impl std::fmt::Debug for OperationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLoop")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
