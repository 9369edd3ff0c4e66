//! services/api/src/adapters/roster.rs
//!
//! `EnrollmentService` backed by the replicated `classes` and `enrollments`
//! tables.

use async_trait::async_trait;
use clicker_core::domain::ClassSummary;
use clicker_core::ports::{EnrollmentScope, EnrollmentService, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::db::map_db_err;

#[derive(Clone)]
pub struct PgRoster {
    pool: PgPool,
}

impl PgRoster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ClassRecord {
    id: Uuid,
    name: String,
    join_code: Option<String>,
}

impl ClassRecord {
    fn to_domain(self) -> ClassSummary {
        ClassSummary {
            class_id: self.id,
            name: self.name,
            join_code: self.join_code,
        }
    }
}

#[async_trait]
impl EnrollmentService for PgRoster {
    async fn check_enrollment(&self, user_id: Uuid, scope: EnrollmentScope) -> PortResult<bool> {
        let query = match scope {
            EnrollmentScope::Class(class_id) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM enrollments WHERE user_id = $1 AND class_id = $2)",
            )
            .bind(user_id)
            .bind(class_id),
            EnrollmentScope::Owner(owner_id) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM enrollments e JOIN classes c ON c.id = e.class_id \
                 WHERE e.user_id = $1 AND c.owner_id = $2)",
            )
            .bind(user_id)
            .bind(owner_id),
        };
        query.fetch_one(&self.pool).await.map_err(map_db_err)
    }

    async fn class_summary(&self, scope: EnrollmentScope) -> PortResult<Option<ClassSummary>> {
        let mut classes = match scope {
            EnrollmentScope::Class(class_id) => {
                sqlx::query_as::<_, ClassRecord>("SELECT id, name, join_code FROM classes WHERE id = $1")
                    .bind(class_id)
                    .fetch_all(&self.pool)
                    .await
            }
            // Two rows are enough to know the owner's class is ambiguous.
            EnrollmentScope::Owner(owner_id) => {
                sqlx::query_as::<_, ClassRecord>(
                    "SELECT id, name, join_code FROM classes WHERE owner_id = $1 LIMIT 2",
                )
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_db_err)?;

        if classes.len() == 1 {
            return Ok(classes.pop().map(ClassRecord::to_domain));
        }
        Ok(None)
    }
}
