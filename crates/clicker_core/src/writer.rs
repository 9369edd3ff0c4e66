//! The single write path for session records.
//!
//! Every mutation of a stored session goes through [`SessionWriter::mutate`]:
//! the mutation is applied to a copy, written with a compare-and-swap on
//! `version`, and re-applied to a fresh read whenever another writer got there
//! first. Mutations therefore never lose concurrent updates (two timer
//! extensions both land, two answers from one participant resolve to exactly
//! one effective response).

use std::sync::Arc;

use tracing::debug;

use crate::domain::Session;
use crate::error::{EngineError, EngineResult};
use crate::ports::{PortError, SessionStore};
use crate::retry::RetryPolicy;

#[derive(Clone)]
pub struct SessionWriter {
    store: Arc<dyn SessionStore>,
    retry: RetryPolicy,
    max_attempts: u32,
}

impl SessionWriter {
    pub fn new(store: Arc<dyn SessionStore>, retry: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            store,
            retry,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Applies `apply` to `current` and persists the result atomically.
    ///
    /// `apply` may run several times and must re-check its preconditions on the
    /// session it is handed. When it leaves the session unchanged nothing is
    /// written and the stored record is returned as-is.
    pub async fn mutate<T, F>(&self, current: Session, mut apply: F) -> EngineResult<(Session, T)>
    where
        F: FnMut(&mut Session) -> EngineResult<T> + Send,
        T: Send,
    {
        let session_id = current.id;
        let mut current = current;
        for attempt in 1..=self.max_attempts {
            let expected = current.version;
            let mut next = current.clone();
            let value = apply(&mut next)?;
            if next == current {
                return Ok((current, value));
            }
            next.version = expected + 1;

            let store = &self.store;
            let written = self
                .retry
                .run("replace_session", || store.replace_session(&next, expected))
                .await;
            match written {
                Ok(()) => return Ok((next, value)),
                Err(PortError::Conflict(_)) => {
                    debug!(%session_id, attempt, "Session changed concurrently, re-reading");
                    current = self
                        .retry
                        .run("get_session", || store.get_session(session_id))
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ServiceUnavailable(format!(
            "session {} kept changing under concurrent writes",
            session_id
        )))
    }
}
