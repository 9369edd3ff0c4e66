pub mod achievements;
pub mod aggregator;
pub mod answer;
pub mod domain;
pub mod engine;
pub mod error;
pub mod join;
pub mod leaderboard;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod reconciler;
pub mod responses;
pub mod retry;
pub mod scoring;
pub mod views;
pub mod writer;

pub use domain::{
    AccessContext, AchievementCriteria, AchievementDefinition, AnswerValue, ClassSummary, CriteriaKind,
    LeaderboardEntry, LeaderboardWindow, Participant, Progress, Question, QuestionDraft, QuestionKind,
    Rarity, Response, Session, SessionCode, SessionSettings, SessionStatus,
};
pub use engine::{EndOutcome, EnginePorts, EngineSettings, SessionEngine};
pub use error::{EngineError, EngineResult};
pub use join::{JoinIdentity, JoinOutcome};
pub use ports::{
    AchievementCatalog, Clock, EnrollmentScope, EnrollmentService, PortError, PortResult, ProgressStore,
    SessionStore, SystemClock,
};
pub use responses::SubmitOutcome;
pub use retry::RetryPolicy;
