//! crates/clicker_core/src/memory.rs
//!
//! In-memory implementations of every port. They honor the same
//! compare-and-swap contract as the database adapters, which makes them
//! suitable for tests and for running the service without Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{AchievementDefinition, ClassSummary, Progress, RankAssignment, Session, SessionCode};
use crate::ports::{
    AchievementCatalog, Clock, EnrollmentScope, EnrollmentService, PortError, PortResult, ProgressStore,
    SessionStore,
};

//=========================================================================================
// Sessions
//=========================================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    records: Mutex<HashMap<Uuid, Session>>,
    /// Number of upcoming calls that fail with `PortError::Unavailable`.
    outages: AtomicU32,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `calls` store operations fail as if the store were down.
    pub fn fail_next(&self, calls: u32) {
        self.outages.store(calls, Ordering::SeqCst);
    }

    /// Every stored record, for assertions.
    pub async fn all(&self) -> Vec<Session> {
        self.records.lock().await.values().cloned().collect()
    }

    fn check_outage(&self) -> PortResult<()> {
        let tripped = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(PortError::Unavailable("session store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: &Session) -> PortResult<()> {
        self.check_outage()?;
        let mut records = self.records.lock().await;
        if records.contains_key(&session.id) {
            return Err(PortError::Conflict(format!("session {} already exists", session.id)));
        }
        records.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.check_outage()?;
        self.records
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {}", session_id)))
    }

    async fn find_sessions_by_code(&self, code: &SessionCode) -> PortResult<Vec<Session>> {
        self.check_outage()?;
        Ok(self
            .records
            .lock()
            .await
            .values()
            .filter(|s| &s.code == code)
            .cloned()
            .collect())
    }

    async fn replace_session(&self, session: &Session, expected_version: u64) -> PortResult<()> {
        self.check_outage()?;
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&session.id)
            .ok_or_else(|| PortError::NotFound(format!("Session {}", session.id)))?;
        if stored.version != expected_version {
            return Err(PortError::Conflict(format!(
                "session {} is at version {}, expected {}",
                session.id, stored.version, expected_version
            )));
        }
        *stored = session.clone();
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid, expected_version: u64) -> PortResult<bool> {
        self.check_outage()?;
        let mut records = self.records.lock().await;
        match records.get(&session_id) {
            Some(stored) if stored.version == expected_version => {
                records.remove(&session_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_duplicate_codes(&self) -> PortResult<Vec<SessionCode>> {
        self.check_outage()?;
        let records = self.records.lock().await;
        let mut counts: HashMap<&SessionCode, usize> = HashMap::new();
        for session in records.values() {
            *counts.entry(&session.code).or_insert(0) += 1;
        }
        let mut codes: Vec<SessionCode> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(code, _)| code.clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn find_pending_aggregation(&self) -> PortResult<Vec<Session>> {
        self.check_outage()?;
        let mut pending: Vec<Session> = self
            .records
            .lock()
            .await
            .values()
            .filter(|s| s.is_ended() && s.aggregation_pending)
            .cloned()
            .collect();
        pending.sort_by_key(|s| (s.ended_at, s.id));
        Ok(pending)
    }
}

//=========================================================================================
// Progress
//=========================================================================================

#[derive(Default)]
pub struct InMemoryProgressStore {
    records: Mutex<HashMap<(Uuid, Uuid), Progress>>,
    /// Students whose writes fail with `PortError::Unavailable`.
    failing_students: StdMutex<HashSet<Uuid>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write for `student_id` fail until [`Self::recover`] is called.
    pub fn fail_writes_for(&self, student_id: Uuid) {
        if let Ok(mut failing) = self.failing_students.lock() {
            failing.insert(student_id);
        }
    }

    pub fn recover(&self, student_id: Uuid) {
        if let Ok(mut failing) = self.failing_students.lock() {
            failing.remove(&student_id);
        }
    }

    fn is_failing(&self, student_id: Uuid) -> bool {
        self.failing_students
            .lock()
            .map(|failing| failing.contains(&student_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get_progress(&self, student_id: Uuid, class_id: Uuid) -> PortResult<Option<Progress>> {
        Ok(self.records.lock().await.get(&(student_id, class_id)).cloned())
    }

    async fn save_progress(&self, progress: &Progress, expected_version: u64) -> PortResult<()> {
        if self.is_failing(progress.student_id) {
            return Err(PortError::Unavailable("progress store offline".to_string()));
        }
        let key = (progress.student_id, progress.class_id);
        let mut records = self.records.lock().await;
        let stored_version = records.get(&key).map(|p| p.version).unwrap_or(0);
        if stored_version != expected_version {
            return Err(PortError::Conflict(format!(
                "progress for {} is at version {}, expected {}",
                progress.student_id, stored_version, expected_version
            )));
        }
        records.insert(key, progress.clone());
        Ok(())
    }

    async fn list_class_progress(&self, class_id: Uuid) -> PortResult<Vec<Progress>> {
        let mut rows: Vec<Progress> = self
            .records
            .lock()
            .await
            .values()
            .filter(|p| p.class_id == class_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.total_points.cmp(&a.total_points));
        Ok(rows)
    }

    async fn save_ranks(&self, class_id: Uuid, ranks: &[RankAssignment]) -> PortResult<()> {
        let mut records = self.records.lock().await;
        for assignment in ranks {
            if let Some(p) = records.get_mut(&(assignment.student_id, class_id)) {
                p.class_rank = Some(assignment.class_rank);
                p.weekly_rank = Some(assignment.weekly_rank);
                p.monthly_rank = Some(assignment.monthly_rank);
            }
        }
        Ok(())
    }
}

//=========================================================================================
// Roster & Catalog
//=========================================================================================

/// A fixed roster: classes, their owners, and enrolled users.
#[derive(Default)]
pub struct StaticRoster {
    classes: HashMap<Uuid, (Uuid, ClassSummary)>,
    enrollments: HashSet<(Uuid, Uuid)>,
    offline: bool,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, owner_id: Uuid, class: ClassSummary) -> Self {
        self.classes.insert(class.class_id, (owner_id, class));
        self
    }

    pub fn with_enrollment(mut self, user_id: Uuid, class_id: Uuid) -> Self {
        self.enrollments.insert((user_id, class_id));
        self
    }

    /// Every lookup fails with `PortError::Unavailable`.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn classes_in_scope(&self, scope: EnrollmentScope) -> Vec<&ClassSummary> {
        self.classes
            .values()
            .filter(|(owner, class)| match scope {
                EnrollmentScope::Class(id) => class.class_id == id,
                EnrollmentScope::Owner(id) => *owner == id,
            })
            .map(|(_, class)| class)
            .collect()
    }
}

#[async_trait]
impl EnrollmentService for StaticRoster {
    async fn check_enrollment(&self, user_id: Uuid, scope: EnrollmentScope) -> PortResult<bool> {
        if self.offline {
            return Err(PortError::Unavailable("roster service unreachable".to_string()));
        }
        if let EnrollmentScope::Class(class_id) = scope {
            return Ok(self.enrollments.contains(&(user_id, class_id)));
        }
        Ok(self
            .classes_in_scope(scope)
            .iter()
            .any(|class| self.enrollments.contains(&(user_id, class.class_id))))
    }

    async fn class_summary(&self, scope: EnrollmentScope) -> PortResult<Option<ClassSummary>> {
        if self.offline {
            return Err(PortError::Unavailable("roster service unreachable".to_string()));
        }
        let classes = self.classes_in_scope(scope);
        // An owner with several classes has no single class to point at.
        if classes.len() == 1 {
            return Ok(Some(classes[0].clone()));
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct StaticAchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl StaticAchievementCatalog {
    pub fn new(definitions: Vec<AchievementDefinition>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl AchievementCatalog for StaticAchievementCatalog {
    async fn active_achievements(&self) -> PortResult<Vec<AchievementDefinition>> {
        Ok(self
            .definitions
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Clock
//=========================================================================================

/// A clock that only moves when told to.
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}
