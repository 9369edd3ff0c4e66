//! crates/clicker_core/src/responses.rs
//!
//! Accepts answer submissions with at most one effective response per
//! participant and question.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::answer::validate_answer;
use crate::domain::{AnswerValue, Response, SessionCode};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::ensure_not_ended;
use crate::ports::Clock;
use crate::reconciler::Reconciler;
use crate::writer::SessionWriter;

/// Result of a submission. A duplicate is a success, not an error, so
/// retried requests from a client never fail visibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub response_id: Uuid,
    pub is_update: bool,
    pub is_duplicate: bool,
}

pub struct ResponseCollector {
    reconciler: Arc<Reconciler>,
    writer: SessionWriter,
    clock: Arc<dyn Clock>,
}

impl ResponseCollector {
    pub fn new(reconciler: Arc<Reconciler>, writer: SessionWriter, clock: Arc<dyn Clock>) -> Self {
        Self {
            reconciler,
            writer,
            clock,
        }
    }

    /// Records `answer` for the currently active question.
    ///
    /// Only the current question accepts answers; anything else, including a
    /// question closed a moment ago, is a `LateSubmission`.
    pub async fn submit(
        &self,
        code: &SessionCode,
        participant_id: Uuid,
        question_id: Uuid,
        answer: AnswerValue,
    ) -> EngineResult<SubmitOutcome> {
        let session = self.reconciler.canonical(code).await?;
        ensure_not_ended(&session)?;

        let now = self.clock.now();
        let (session, outcome) = self
            .writer
            .mutate(session, |s| {
                ensure_not_ended(s)?;
                if s.participant(participant_id).is_none() {
                    return Err(EngineError::NotFound(format!("Participant {}", participant_id)));
                }
                let question = match &s.current_question {
                    Some(q) if q.id == question_id => q.clone(),
                    _ => return Err(EngineError::LateSubmission(question_id)),
                };
                validate_answer(&question.kind, &answer)?;

                let allow_change = s.settings.allow_answer_change;
                if let Some(existing) = s.response_mut(participant_id, question_id) {
                    if !allow_change {
                        return Ok(SubmitOutcome {
                            response_id: existing.response_id,
                            is_update: false,
                            is_duplicate: true,
                        });
                    }
                    existing.answer = answer.clone();
                    existing.submitted_at = now;
                    existing.revision += 1;
                    return Ok(SubmitOutcome {
                        response_id: existing.response_id,
                        is_update: true,
                        is_duplicate: false,
                    });
                }

                let response = Response {
                    response_id: Uuid::new_v4(),
                    participant_id,
                    question_id,
                    answer: answer.clone(),
                    submitted_at: now,
                    first_submitted_at: now,
                    revision: 0,
                    question_text: question.text.clone(),
                    correct_answer: question.kind.correct_answer(),
                };
                let response_id = response.response_id;
                s.responses.push(response);
                Ok(SubmitOutcome {
                    response_id,
                    is_update: false,
                    is_duplicate: false,
                })
            })
            .await?;

        if outcome.is_duplicate {
            debug!(code = %session.code, %participant_id, %question_id, "Duplicate submission ignored");
        } else {
            info!(
                code = %session.code,
                %participant_id,
                %question_id,
                is_update = outcome.is_update,
                "Response recorded"
            );
        }
        Ok(outcome)
    }
}
