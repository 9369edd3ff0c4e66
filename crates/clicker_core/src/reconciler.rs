//! crates/clicker_core/src/reconciler.rs
//!
//! Resolves which of possibly several records sharing a code is canonical,
//! and cleans up the leftovers.
//!
//! [`resolve_canonical`] is the only selection rule in the engine. Every read
//! and write path for a code goes through [`Reconciler::canonical`], which
//! loads the full record set and applies it; nothing caches the result.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Session, SessionCode, SessionStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::{Clock, SessionStore};
use crate::retry::RetryPolicy;
use crate::writer::SessionWriter;

/// Picks the canonical record: an `active` one if any, otherwise the most
/// recently created. Remaining ties go to the greatest id so the choice never
/// depends on the order records were loaded in.
pub fn resolve_canonical(records: &[Session]) -> Option<&Session> {
    records.iter().max_by(|a, b| canonical_order(a, b))
}

fn canonical_order(a: &Session, b: &Session) -> Ordering {
    let a_active = a.status == SessionStatus::Active;
    let b_active = b.status == SessionStatus::Active;
    a_active
        .cmp(&b_active)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// Outcome of one duplicate sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub codes_examined: usize,
    pub deleted: Vec<Uuid>,
    /// Non-canonical records holding responses, kept and marked `needs_review`.
    pub flagged: Vec<Uuid>,
    /// Records that changed while the sweep ran; left for the next pass.
    pub skipped: Vec<Uuid>,
    /// Codes the sweep could not process.
    pub failed_codes: Vec<SessionCode>,
}

pub struct Reconciler {
    store: Arc<dyn SessionStore>,
    writer: SessionWriter,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        writer: SessionWriter,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            writer,
            clock,
            retry,
            stale_after,
        }
    }

    /// All records stored under the code.
    pub async fn records(&self, code: &SessionCode) -> EngineResult<Vec<Session>> {
        let store = &self.store;
        let records = self
            .retry
            .run("find_sessions_by_code", || store.find_sessions_by_code(code))
            .await?;
        Ok(records)
    }

    /// The canonical record for the code.
    pub async fn canonical(&self, code: &SessionCode) -> EngineResult<Session> {
        let records = self.records(code).await?;
        resolve_canonical(&records)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Session {}", code)))
    }

    /// Deletes every non-canonical record without responses and flags the rest.
    /// Safe to re-run and to run alongside live traffic: deletes are conditional
    /// on the version read here, so a record touched in the meantime survives.
    pub async fn sweep_duplicates(&self) -> EngineResult<SweepReport> {
        let store = &self.store;
        let codes = self
            .retry
            .run("find_duplicate_codes", || store.find_duplicate_codes())
            .await?;

        let mut report = SweepReport::default();
        for code in codes {
            report.codes_examined += 1;
            if let Err(e) = self.sweep_code(&code, &mut report).await {
                warn!(%code, "Failed to sweep duplicate sessions: {}", e);
                report.failed_codes.push(code);
            }
        }
        info!(
            codes = report.codes_examined,
            deleted = report.deleted.len(),
            flagged = report.flagged.len(),
            "Duplicate session sweep finished"
        );
        Ok(report)
    }

    async fn sweep_code(&self, code: &SessionCode, report: &mut SweepReport) -> EngineResult<()> {
        let records = self.records(code).await?;
        let Some(canonical_id) = resolve_canonical(&records).map(|s| s.id) else {
            return Ok(());
        };

        for record in records.into_iter().filter(|s| s.id != canonical_id) {
            if record.responses.is_empty() {
                let store = &self.store;
                let (id, version) = (record.id, record.version);
                let deleted = self
                    .retry
                    .run("delete_session", || store.delete_session(id, version))
                    .await?;
                if deleted {
                    info!(%code, session_id = %id, "Deleted duplicate session record");
                    report.deleted.push(id);
                } else {
                    report.skipped.push(id);
                }
            } else if record.needs_review {
                report.flagged.push(record.id);
            } else {
                let id = record.id;
                self.writer
                    .mutate(record, |session| {
                        session.needs_review = true;
                        Ok(())
                    })
                    .await?;
                warn!(%code, session_id = %id, "Duplicate session holds responses; flagged for review");
                report.flagged.push(id);
            }
        }
        Ok(())
    }

    /// Deletes `waiting` records for the code that have outlived the stale TTL.
    /// Returns how many were removed.
    pub async fn reclaim_stale(&self, code: &SessionCode) -> EngineResult<usize> {
        let cutoff = self.clock.now() - self.stale_after;
        let records = self.records(code).await?;
        let mut reclaimed = 0;
        for record in records.iter().filter(|s| {
            s.status == SessionStatus::Waiting && s.created_at < cutoff && s.responses.is_empty()
        }) {
            let store = &self.store;
            let (id, version) = (record.id, record.version);
            let deleted = self
                .retry
                .run("delete_session", || store.delete_session(id, version))
                .await?;
            if deleted {
                info!(%code, session_id = %id, "Reclaimed stale waiting session");
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionSettings;
    use chrono::{TimeZone, Utc};

    fn record(status: SessionStatus, created_minute: u32) -> Session {
        let created = Utc.with_ymd_and_hms(2026, 3, 2, 9, created_minute, 0).unwrap();
        let mut s = Session::new(
            SessionCode::parse("ABCD").unwrap(),
            "Quiz".to_string(),
            Uuid::new_v4(),
            SessionSettings::default(),
            created,
        );
        s.status = status;
        s
    }

    #[test]
    fn active_record_wins_regardless_of_position() {
        let active = record(SessionStatus::Active, 0);
        let active_id = active.id;
        let mut records = vec![
            record(SessionStatus::Waiting, 10),
            record(SessionStatus::Ended, 20),
            active,
            record(SessionStatus::Waiting, 30),
        ];
        for _ in 0..records.len() {
            assert_eq!(resolve_canonical(&records).unwrap().id, active_id);
            records.rotate_left(1);
        }
    }

    #[test]
    fn newest_record_wins_without_an_active_one() {
        let newest = record(SessionStatus::Waiting, 45);
        let newest_id = newest.id;
        let records = vec![record(SessionStatus::Ended, 5), newest, record(SessionStatus::Waiting, 15)];
        assert_eq!(resolve_canonical(&records).unwrap().id, newest_id);
    }

    #[test]
    fn empty_set_has_no_canonical_record() {
        assert!(resolve_canonical(&[]).is_none());
    }
}
