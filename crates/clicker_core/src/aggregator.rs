//! crates/clicker_core/src/aggregator.rs
//!
//! Turns an ended session into progress updates: points, experience, levels,
//! streaks, achievements and class leaderboard ranks.
//!
//! Each student is processed independently. A failure for one student is
//! logged and reported, and the student is picked up again by the next pass
//! (see `SessionEngine::rescore_session` and
//! `SessionEngine::aggregate_pending`). Streaks, windows and achievements are
//! dated by the session's end, not by when the pass runs. Re-running a pass is safe: a
//! progress record remembers which sessions it already absorbed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::achievements::award_achievements;
use crate::domain::{AchievementDefinition, Progress, Session};
use crate::error::{EngineError, EngineResult};
use crate::leaderboard::assign_ranks;
use crate::ports::{AchievementCatalog, Clock, PortError, ProgressStore};
use crate::retry::RetryPolicy;
use crate::scoring::{apply_session_score, score_session, ParticipantScore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub student_id: Uuid,
    pub participant_id: Uuid,
    pub points_awarded: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub leveled_up: bool,
    pub current_streak: u32,
    pub new_achievements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationFailure {
    pub participant_id: Uuid,
    pub student_id: Option<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    pub session_id: Uuid,
    pub class_id: Option<Uuid>,
    /// Every participant who answered at least once.
    pub scores: Vec<ParticipantScore>,
    pub updates: Vec<ProgressUpdate>,
    /// Students whose progress already contained this session.
    pub already_applied: Vec<Uuid>,
    pub failures: Vec<AggregationFailure>,
    pub ranks_updated: bool,
}

/// One pass over every ended session still marked `aggregation_pending`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingAggregationReport {
    pub sessions_examined: usize,
    /// Sessions whose scores are now fully applied.
    pub settled: Vec<Uuid>,
    /// Sessions that still have unscored students or could not be aggregated.
    pub still_pending: Vec<Uuid>,
}

enum StudentOutcome {
    Applied(ProgressUpdate),
    AlreadyApplied,
}

pub struct Aggregator {
    progress: Arc<dyn ProgressStore>,
    catalog: Arc<dyn AchievementCatalog>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    max_write_attempts: u32,
}

impl Aggregator {
    pub fn new(
        progress: Arc<dyn ProgressStore>,
        catalog: Arc<dyn AchievementCatalog>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        max_write_attempts: u32,
    ) -> Self {
        Self {
            progress,
            catalog,
            clock,
            retry,
            max_write_attempts: max_write_attempts.max(1),
        }
    }

    pub async fn aggregate(&self, session: &Session) -> EngineResult<AggregationReport> {
        if !session.is_ended() {
            return Err(EngineError::Validation(format!(
                "session {} has not ended yet",
                session.code
            )));
        }

        let scores = score_session(session);
        let class_id = session.settings.class_id;
        let mut report = AggregationReport {
            session_id: session.id,
            class_id,
            scores: scores.clone(),
            updates: Vec::new(),
            already_applied: Vec::new(),
            failures: Vec::new(),
            ranks_updated: false,
        };

        let Some(class_id) = class_id else {
            info!(code = %session.code, "Session has no class; scores computed, progress untouched");
            return Ok(report);
        };

        let catalog = &self.catalog;
        let definitions = self
            .retry
            .run("active_achievements", || catalog.active_achievements())
            .await?;

        let per_student = best_score_per_student(&scores);
        let held_at = session.ended_at.unwrap_or_else(|| self.clock.now());
        let results = join_all(per_student.iter().map(|(student_id, score)| {
            self.apply_for_student(session.id, class_id, held_at, *student_id, score, &definitions)
        }))
        .await;

        for ((student_id, score), result) in per_student.iter().zip(results) {
            match result {
                Ok(StudentOutcome::Applied(update)) => report.updates.push(update),
                Ok(StudentOutcome::AlreadyApplied) => report.already_applied.push(*student_id),
                Err(e) => {
                    error!(
                        code = %session.code,
                        %student_id,
                        participant_id = %score.participant_id,
                        "Failed to apply session score; will retry on next pass: {}",
                        e
                    );
                    report.failures.push(AggregationFailure {
                        participant_id: score.participant_id,
                        student_id: Some(*student_id),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match self.refresh_ranks(class_id).await {
            Ok(()) => report.ranks_updated = true,
            Err(e) => warn!(%class_id, "Failed to refresh class leaderboard: {}", e),
        }

        info!(
            code = %session.code,
            scored = report.scores.len(),
            updated = report.updates.len(),
            failed = report.failures.len(),
            "Session aggregation finished"
        );
        Ok(report)
    }

    async fn apply_for_student(
        &self,
        session_id: Uuid,
        class_id: Uuid,
        held_at: DateTime<Utc>,
        student_id: Uuid,
        score: &ParticipantScore,
        definitions: &[AchievementDefinition],
    ) -> EngineResult<StudentOutcome> {
        let store = &self.progress;
        for _ in 0..self.max_write_attempts {
            let now = self.clock.now();
            let mut progress = self
                .retry
                .run("get_progress", || store.get_progress(student_id, class_id))
                .await?
                .unwrap_or_else(|| Progress::new(student_id, class_id, now));
            if progress.scored_sessions.contains(&session_id) {
                return Ok(StudentOutcome::AlreadyApplied);
            }

            let expected = progress.version;
            let change = apply_session_score(&mut progress, session_id, score, held_at);
            let awarded = award_achievements(&mut progress, definitions, held_at);
            progress.updated_at = now;
            progress.version = expected + 1;

            let saved = self
                .retry
                .run("save_progress", || store.save_progress(&progress, expected))
                .await;
            match saved {
                Ok(()) => {
                    let achievement_points: u64 = awarded.iter().map(|a| u64::from(a.points)).sum();
                    return Ok(StudentOutcome::Applied(ProgressUpdate {
                        student_id,
                        participant_id: score.participant_id,
                        points_awarded: score.points + achievement_points,
                        old_level: change.old_level,
                        new_level: progress.level,
                        leveled_up: progress.level > change.old_level,
                        current_streak: progress.current_streak,
                        new_achievements: awarded.into_iter().map(|a| a.code).collect(),
                    }));
                }
                Err(PortError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ServiceUnavailable(format!(
            "progress for student {} kept changing under concurrent writes",
            student_id
        )))
    }

    /// Recomputes all-time, weekly and monthly ranks for the whole class.
    pub async fn refresh_ranks(&self, class_id: Uuid) -> EngineResult<()> {
        let store = &self.progress;
        let rows = self
            .retry
            .run("list_class_progress", || store.list_class_progress(class_id))
            .await?;
        let ranks = assign_ranks(&rows, self.clock.now().date_naive());
        self.retry
            .run("save_ranks", || store.save_ranks(class_id, &ranks))
            .await?;
        Ok(())
    }
}

/// A student who joined from several devices has several participants; the
/// highest-scoring one counts, earliest join order breaking ties.
fn best_score_per_student(scores: &[ParticipantScore]) -> BTreeMap<Uuid, &ParticipantScore> {
    let mut best: BTreeMap<Uuid, &ParticipantScore> = BTreeMap::new();
    for score in scores {
        let Some(student_id) = score.user_id else {
            continue;
        };
        best.entry(student_id)
            .and_modify(|current| {
                if score.points > current.points {
                    *current = score;
                }
            })
            .or_insert(score);
    }
    best
}
