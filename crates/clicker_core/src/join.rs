//! crates/clicker_core/src/join.rs
//!
//! Turns a client's identity claim into a stable participant record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AccessContext, ClassSummary, Participant, Session, SessionCode};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::ensure_not_ended;
use crate::ports::{Clock, EnrollmentScope, EnrollmentService};
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;
use crate::writer::SessionWriter;

const MAX_NAME_LEN: usize = 80;
const MAX_DEVICE_ID_LEN: usize = 128;

/// Who is joining. `device_id` is the reconnect key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinIdentity {
    pub user_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session: Session,
    pub participant: Participant,
    /// True when an existing participant was found by device id.
    pub is_reconnect: bool,
}

pub struct JoinResolver {
    reconciler: Arc<Reconciler>,
    writer: SessionWriter,
    enrollment: Arc<dyn EnrollmentService>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl JoinResolver {
    pub fn new(
        reconciler: Arc<Reconciler>,
        writer: SessionWriter,
        enrollment: Arc<dyn EnrollmentService>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reconciler,
            writer,
            enrollment,
            clock,
            retry,
        }
    }

    pub async fn join(&self, code: &SessionCode, identity: JoinIdentity) -> EngineResult<JoinOutcome> {
        let name = identity.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::Validation(format!(
                "name must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }
        let device_id = identity
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if device_id.as_ref().is_some_and(|d| d.chars().count() > MAX_DEVICE_ID_LEN) {
            return Err(EngineError::Validation(format!(
                "device id must be at most {} characters",
                MAX_DEVICE_ID_LEN
            )));
        }

        let session = self.reconciler.canonical(code).await?;
        ensure_not_ended(&session)?;
        let is_enrolled = self.admit(&session, identity.user_id).await?;

        let now = self.clock.now();
        let fresh_id = Uuid::new_v4();
        let (session, (participant, is_reconnect)) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                if let Some(device) = device_id.as_deref() {
                    if let Some(existing) = s.rejoin_target_mut(device, identity.user_id) {
                        existing.name = name.clone();
                        existing.last_joined_at = now;
                        if existing.user_id.is_none() {
                            existing.user_id = identity.user_id;
                        }
                        existing.is_enrolled |= is_enrolled;
                        return Ok((existing.clone(), true));
                    }
                }
                let participant = Participant {
                    participant_id: fresh_id,
                    user_id: identity.user_id,
                    device_id: device_id.clone(),
                    name: name.clone(),
                    is_enrolled,
                    joined_at: now,
                    last_joined_at: now,
                };
                s.participants.push(participant.clone());
                Ok((participant, false))
            })
            .await?;

        if !is_reconnect {
            if let Some(device) = device_id.as_deref() {
                let shared = session.participants.iter().any(|p| {
                    p.device_id.as_deref() == Some(device) && p.participant_id != participant.participant_id
                });
                if shared {
                    warn!(
                        code = %session.code,
                        device_id = device,
                        "Device already holds another user's participant; joined as a new participant"
                    );
                }
            }
        }
        info!(
            code = %session.code,
            participant_id = %participant.participant_id,
            is_reconnect,
            "Participant joined"
        );
        Ok(JoinOutcome {
            session,
            participant,
            is_reconnect,
        })
    }

    /// Applies the login and enrollment gates. Returns whether the user is
    /// enrolled, for analytics; it gates nothing after this point.
    async fn admit(&self, session: &Session, user_id: Option<Uuid>) -> EngineResult<bool> {
        let settings = &session.settings;
        let scope = enrollment_scope(session);

        let Some(user_id) = user_id else {
            if settings.require_login || settings.restrict_to_enrolled {
                let class = self.class_summary_best_effort(scope).await;
                return Err(EngineError::AuthRequired(AccessContext::for_session(session, class)));
            }
            return Ok(false);
        };

        let enrollment = &self.enrollment;
        let checked = self
            .retry
            .run("check_enrollment", || enrollment.check_enrollment(user_id, scope))
            .await;

        match checked {
            Ok(true) => Ok(true),
            Ok(false) if settings.restrict_to_enrolled => {
                let class = self.class_summary_best_effort(scope).await;
                info!(code = %session.code, %user_id, "Join refused: not enrolled");
                Err(EngineError::NotEnrolled(AccessContext::for_session(session, class)))
            }
            Ok(false) => Ok(false),
            Err(e) if settings.restrict_to_enrolled => Err(e.into()),
            Err(e) => {
                warn!(code = %session.code, %user_id, "Enrollment lookup failed, continuing: {}", e);
                Ok(false)
            }
        }
    }

    async fn class_summary_best_effort(&self, scope: EnrollmentScope) -> Option<ClassSummary> {
        let enrollment = &self.enrollment;
        match self
            .retry
            .run("class_summary", || enrollment.class_summary(scope))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Could not load class details for error context: {}", e);
                None
            }
        }
    }
}

fn enrollment_scope(session: &Session) -> EnrollmentScope {
    match session.settings.class_id {
        Some(class_id) => EnrollmentScope::Class(class_id),
        None => EnrollmentScope::Owner(session.owner_id),
    }
}
