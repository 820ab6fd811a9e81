// Counting & Completion Engine
//
// Counters are updated with single-field atomic increments. Two reporters can
// both observe pending == 0; dispatch itself is deduplicated by the fired flag.

use super::{BatchService, DispatchOutcome};
use crate::domain::{field, BatchEvent, BatchId};
use crate::error::Result;
use tracing::{debug, info, warn};

/// Terminal outcome of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// What a completion report did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Record already cleaned up (or never existed); nothing changed
    Missing,
    /// Jobs still outstanding
    Pending(i64),
    /// Counter went below zero (duplicate or late report); no dispatch
    Overdrawn(i64),
    /// Pending reached zero
    Finished {
        complete: DispatchOutcome,
        /// None when at least one job failed
        success: Option<DispatchOutcome>,
    },
}

impl BatchService {
    /// Count one more job in `bid` (pending + 1, total + 1)
    pub async fn increment_counts(&self, bid: &BatchId) -> Result<()> {
        let key = bid.record_key();
        let pending = self.store.hash_incr_by(&key, field::PENDING, 1).await?;
        let total = self.store.hash_incr_by(&key, field::TOTAL, 1).await?;
        self.touch(&key).await?;

        debug!(bid = %bid, pending, total, "Batch counters incremented");
        Ok(())
    }

    pub async fn report_success(&self, bid: &BatchId, job_id: &str) -> Result<ReportOutcome> {
        self.report_outcome(bid, job_id, JobOutcome::Success).await
    }

    /// Records `job_id` in the failed set (idempotent) before counting it down
    pub async fn report_failure(&self, bid: &BatchId, job_id: &str) -> Result<ReportOutcome> {
        self.report_outcome(bid, job_id, JobOutcome::Failure).await
    }

    /// Count down one terminal job outcome and fire events when pending hits zero
    pub async fn report_outcome(
        &self,
        bid: &BatchId,
        job_id: &str,
        outcome: JobOutcome,
    ) -> Result<ReportOutcome> {
        let key = bid.record_key();
        if !self.store.exists(&key).await? {
            debug!(bid = %bid, job_id, "Report for missing batch record ignored");
            return Ok(ReportOutcome::Missing);
        }

        if outcome == JobOutcome::Failure {
            let failed_key = bid.failed_key();
            self.store.set_add(&failed_key, job_id).await?;
            self.touch(&failed_key).await?;
        }

        let pending = self.store.hash_incr_by(&key, field::PENDING, -1).await?;
        debug!(bid = %bid, job_id, ?outcome, pending, "Batch job reported");

        if pending > 0 {
            return Ok(ReportOutcome::Pending(pending));
        }
        if pending < 0 {
            if self.recreated_by_report(bid).await? {
                debug!(bid = %bid, job_id, "Batch record cleaned up during report");
                return Ok(ReportOutcome::Missing);
            }
            warn!(bid = %bid, job_id, pending, "Batch pending counter below zero");
            return Ok(ReportOutcome::Overdrawn(pending));
        }

        match self.fire_finished(bid).await {
            Ok((complete, success)) => Ok(ReportOutcome::Finished { complete, success }),
            Err(e) => {
                // Count the job again so its rerun report brings pending back to zero
                self.store.hash_incr_by(&key, field::PENDING, 1).await?;
                warn!(bid = %bid, job_id, error = %e, "Batch dispatch failed, pending restored");
                Err(e)
            }
        }
    }

    /// Fire `complete`, then `success` when no job failed
    async fn fire_finished(
        &self,
        bid: &BatchId,
    ) -> Result<(DispatchOutcome, Option<DispatchOutcome>)> {
        let failures = self.store.set_len(&bid.failed_key()).await?;
        info!(bid = %bid, failures, "Batch complete");

        let complete = self.enqueue_callbacks(BatchEvent::Complete, bid).await?;
        if failures > 0 {
            return Ok((complete, None));
        }

        let success = self.enqueue_callbacks(BatchEvent::Success, bid).await?;
        if success == DispatchOutcome::AlreadyFired {
            // Callbacks went out on an earlier report whose cleanup did not finish
            self.cleanup(bid).await?;
        }
        Ok((complete, Some(success)))
    }

    /// True when the decrement landed after cleanup and left a lone counter behind
    async fn recreated_by_report(&self, bid: &BatchId) -> Result<bool> {
        let fields = self.store.hash_get_all(&bid.record_key()).await?;
        if fields.len() == 1 && fields.contains_key(field::PENDING) {
            self.cleanup(bid).await?;
            return Ok(true);
        }
        Ok(false)
    }
}
