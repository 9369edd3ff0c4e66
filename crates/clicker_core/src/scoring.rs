//! crates/clicker_core/src/scoring.rs
//!
//! Pure scoring rules: per-participant points for a finished session, the
//! level schedule, streaks and leaderboard windows. Nothing here touches a
//! port, so the same inputs always produce the same outputs.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::answer::answers_match;
use crate::domain::{Participant, Progress, Session};

pub const PARTICIPATION_POINTS: u64 = 10;
pub const CORRECT_POINTS: u64 = 5;
pub const FAST_CORRECT_POINTS: u64 = 1;
pub const PERFECT_BONUS_POINTS: u64 = 50;
pub const PERFECT_BONUS_MIN_QUESTIONS: usize = 5;
/// A correct answer submitted within this many seconds of activation is "fast".
pub const FAST_RESPONSE_SECONDS: i64 = 5;

/// One participant's result for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantScore {
    pub participant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub total_questions: usize,
    pub answered: usize,
    pub correct: usize,
    pub fast_correct: usize,
    /// Fraction of logged questions answered correctly, 0.0-1.0.
    pub accuracy: f64,
    pub points: u64,
    pub is_perfect: bool,
}

/// Scores every participant with at least one response, in join order.
pub fn score_session(session: &Session) -> Vec<ParticipantScore> {
    let started: HashMap<Uuid, DateTime<Utc>> = session
        .question_log
        .iter()
        .map(|entry| (entry.question.id, entry.question.started_at))
        .collect();

    session
        .participants
        .iter()
        .filter_map(|p| score_participant(session, p, &started))
        .collect()
}

/// Responses to questions missing from the log are ignored. Correctness uses
/// the answer key snapshotted on the response.
fn score_participant(
    session: &Session,
    participant: &Participant,
    started: &HashMap<Uuid, DateTime<Utc>>,
) -> Option<ParticipantScore> {
    let mut answered = 0;
    let mut correct = 0;
    let mut fast_correct = 0;
    for response in session
        .responses
        .iter()
        .filter(|r| r.participant_id == participant.participant_id)
    {
        let Some(started_at) = started.get(&response.question_id) else {
            continue;
        };
        answered += 1;
        if answers_match(&response.answer, &response.correct_answer) {
            correct += 1;
            if response.submitted_at - *started_at <= Duration::seconds(FAST_RESPONSE_SECONDS) {
                fast_correct += 1;
            }
        }
    }
    if answered == 0 {
        return None;
    }

    let total_questions = session.question_log.len();
    let accuracy = correct as f64 / total_questions as f64;
    let is_perfect = correct == total_questions;
    let mut points = PARTICIPATION_POINTS
        + CORRECT_POINTS * correct as u64
        + FAST_CORRECT_POINTS * fast_correct as u64;
    if is_perfect && total_questions >= PERFECT_BONUS_MIN_QUESTIONS {
        points += PERFECT_BONUS_POINTS;
    }

    Some(ParticipantScore {
        participant_id: participant.participant_id,
        user_id: participant.user_id,
        name: participant.name.clone(),
        total_questions,
        answered,
        correct,
        fast_correct,
        accuracy,
        points,
        is_perfect,
    })
}

/// Cumulative experience needed to reach `level`: the sum of `100 * k` for
/// `k` in `2..=level`, i.e. `50 * level * (level + 1) - 100`.
pub fn experience_for_level(level: u32) -> u64 {
    if level <= 1 {
        return 0;
    }
    let level = u128::from(level);
    u64::try_from(50 * level * (level + 1) - 100).unwrap_or(u64::MAX)
}

/// The highest level whose cumulative requirement `experience` meets. The
/// schedule has no upper bound.
pub fn level_for_experience(experience: u64) -> u32 {
    // Largest n with n * (n + 1) <= (experience + 100) / 50.
    let budget = (u128::from(experience) + 100) / 50;
    let mut level = ((((1 + 4 * budget) as f64).sqrt() - 1.0) / 2.0) as u128;
    while (level + 1) * (level + 2) <= budget {
        level += 1;
    }
    while level > 1 && level * (level + 1) > budget {
        level -= 1;
    }
    u32::try_from(level.max(1)).unwrap_or(u32::MAX)
}

/// The streak after recording activity on `today`. Activity older than the
/// last recorded day leaves the streak alone.
pub fn next_streak(current: u32, last_activity: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_activity {
        Some(last) if last > today => current,
        Some(last) if last == today => current.max(1),
        Some(last) if last.succ_opt() == Some(today) => current + 1,
        _ => 1,
    }
}

pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

pub fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

/// Adds points earned on `day` to every running total. The weekly and monthly
/// counters reset when `day` opens a newer window, and are left alone when
/// `day` belongs to a window that has already closed.
pub fn add_points(progress: &mut Progress, points: u64, day: NaiveDate) {
    progress.total_points += points;
    progress.experience += points;

    let week = week_start(day);
    match progress.week_start {
        Some(current) if current > week => {}
        Some(current) if current == week => progress.weekly_points += points,
        _ => {
            progress.week_start = Some(week);
            progress.weekly_points = points;
        }
    }
    let month = month_start(day);
    match progress.month_start {
        Some(current) if current > month => {}
        Some(current) if current == month => progress.monthly_points += points,
        _ => {
            progress.month_start = Some(month);
            progress.monthly_points = points;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelChange {
    pub old_level: u32,
    pub new_level: u32,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Folds one session result into a progress record. `at` is when the session
/// took place (its end time), which is what streaks and windows count, even
/// when the score is applied later. The caller is responsible for checking
/// `scored_sessions` first.
pub fn apply_session_score(
    progress: &mut Progress,
    session_id: Uuid,
    score: &ParticipantScore,
    at: DateTime<Utc>,
) -> LevelChange {
    let today = at.date_naive();
    let old_level = progress.level;

    add_points(progress, score.points, today);
    progress.quizzes_taken += 1;
    progress.total_answered += score.total_questions as u32;
    progress.total_correct += score.correct as u32;
    progress.fast_responses += score.fast_correct as u32;
    if score.is_perfect {
        progress.perfect_scores += 1;
    }

    progress.current_streak = next_streak(progress.current_streak, progress.last_activity_date, today);
    progress.longest_streak = progress.longest_streak.max(progress.current_streak);
    progress.last_activity_date = progress.last_activity_date.max(Some(today));

    progress.level = level_for_experience(progress.experience);
    progress.scored_sessions.insert(session_id);
    progress.updated_at = progress.updated_at.max(at);

    LevelChange {
        old_level,
        new_level: progress.level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AnswerValue, Question, QuestionKind, QuestionLogEntry, Response, SessionCode, SessionSettings,
    };
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn session_with_questions(count: usize) -> Session {
        let mut session = Session::new(
            SessionCode::parse("SCORE1").unwrap(),
            "Quiz".to_string(),
            Uuid::new_v4(),
            SessionSettings::default(),
            t(0),
        );
        for i in 0..count {
            let started = t(i as i64 * 60);
            session.question_log.push(QuestionLogEntry {
                question: Question {
                    id: Uuid::new_v4(),
                    text: format!("Q{}", i),
                    kind: QuestionKind::MultipleChoice {
                        options: vec!["A".to_string(), "B".to_string()],
                        correct_answer: "B".to_string(),
                    },
                    points: 1,
                    time_limit_seconds: 30,
                    original_time_limit_seconds: 30,
                    started_at: started,
                },
                closed_at: started + Duration::seconds(30),
            });
        }
        session
    }

    fn add_participant(session: &mut Session, answers: &[(usize, &str, i64)]) -> Uuid {
        let participant_id = Uuid::new_v4();
        session.participants.push(Participant {
            participant_id,
            user_id: Some(Uuid::new_v4()),
            device_id: None,
            name: "Ada".to_string(),
            is_enrolled: true,
            joined_at: t(0),
            last_joined_at: t(0),
        });
        for (index, answer, delay) in answers {
            let q = &session.question_log[*index].question;
            let at = q.started_at + Duration::seconds(*delay);
            session.responses.push(Response {
                response_id: Uuid::new_v4(),
                participant_id,
                question_id: q.id,
                answer: AnswerValue::Text(answer.to_string()),
                submitted_at: at,
                first_submitted_at: at,
                revision: 0,
                question_text: q.text.clone(),
                correct_answer: q.kind.correct_answer(),
            });
        }
        participant_id
    }

    #[test]
    fn single_slow_correct_answer_scores_fifteen() {
        let mut session = session_with_questions(1);
        add_participant(&mut session, &[(0, "B", 10)]);
        let scores = score_session(&session);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].correct, 1);
        assert_eq!(scores[0].fast_correct, 0);
        assert_eq!(scores[0].accuracy, 1.0);
        assert_eq!(scores[0].points, 15);
    }

    #[test]
    fn fast_answers_earn_a_bonus_point_only_when_correct() {
        let mut session = session_with_questions(2);
        add_participant(&mut session, &[(0, "B", 5), (1, "A", 1)]);
        let score = &score_session(&session)[0];
        assert_eq!(score.fast_correct, 1);
        assert_eq!(score.points, 10 + 5 + 1);
        assert_eq!(score.accuracy, 0.5);
    }

    #[test]
    fn perfect_bonus_needs_five_questions() {
        let mut session = session_with_questions(5);
        add_participant(
            &mut session,
            &[(0, "B", 20), (1, "b", 20), (2, " B ", 20), (3, "B", 20), (4, "B", 20)],
        );
        let score = &score_session(&session)[0];
        assert!(score.is_perfect);
        assert_eq!(score.points, 10 + 25 + 50);

        let mut short = session_with_questions(4);
        add_participant(&mut short, &[(0, "B", 20), (1, "B", 20), (2, "B", 20), (3, "B", 20)]);
        assert_eq!(score_session(&short)[0].points, 10 + 20);
    }

    #[test]
    fn silent_participants_are_not_scored() {
        let mut session = session_with_questions(3);
        add_participant(&mut session, &[]);
        add_participant(&mut session, &[(1, "A", 3)]);
        let scores = score_session(&session);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].points, 10);
    }

    #[test]
    fn scoring_is_deterministic() {
        let mut session = session_with_questions(3);
        add_participant(&mut session, &[(0, "B", 1), (2, "B", 9)]);
        add_participant(&mut session, &[(1, "B", 4)]);
        assert_eq!(score_session(&session), score_session(&session));
    }

    #[test]
    fn level_schedule_costs_one_hundred_times_the_level() {
        assert_eq!(experience_for_level(1), 0);
        assert_eq!(experience_for_level(2), 200);
        assert_eq!(experience_for_level(3), 500);
        assert_eq!(experience_for_level(4), 900);
        assert_eq!(level_for_experience(0), 1);
        assert_eq!(level_for_experience(199), 1);
        assert_eq!(level_for_experience(200), 2);
        assert_eq!(level_for_experience(899), 3);
        assert_eq!(level_for_experience(900), 4);
    }

    #[test]
    fn level_schedule_has_no_ceiling() {
        for experience in [1_000_000u64, 987_654_321, 50_000_000_000_000] {
            let level = level_for_experience(experience);
            assert!(experience_for_level(level) <= experience);
            assert!(experience < experience_for_level(level + 1));
        }
        assert!(level_for_experience(50_000_000_000_000) > 100);
    }

    #[test]
    fn streaks_follow_calendar_days() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let last_week = NaiveDate::from_ymd_opt(2026, 2, 23).unwrap();
        assert_eq!(next_streak(0, None, day), 1);
        assert_eq!(next_streak(4, Some(day), day), 4);
        assert_eq!(next_streak(4, Some(yesterday), day), 5);
        assert_eq!(next_streak(4, Some(last_week), day), 1);
        assert_eq!(next_streak(4, Some(day), yesterday), 4);
    }

    #[test]
    fn points_for_a_closed_week_skip_the_weekly_counter() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), t(0));
        let monday = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        add_points(&mut progress, 20, monday);
        add_points(&mut progress, 15, monday - Duration::days(3));
        assert_eq!(progress.week_start, Some(monday));
        assert_eq!(progress.weekly_points, 20);
        assert_eq!(progress.monthly_points, 35);
        assert_eq!(progress.total_points, 35);
    }

    #[test]
    fn late_applied_scores_count_on_the_session_day() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), t(0));
        let mut session = session_with_questions(1);
        add_participant(&mut session, &[(0, "B", 2)]);
        let score = score_session(&session).remove(0);
        let session_day = t(600);
        apply_session_score(&mut progress, session.id, &score, session_day);
        assert_eq!(progress.last_activity_date, Some(session_day.date_naive()));
        assert_eq!(progress.current_streak, 1);
        assert_eq!(progress.weekly_points, 16);
    }

    #[test]
    fn weekly_points_reset_when_the_week_rolls_over() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), t(0));
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        add_points(&mut progress, 30, monday);
        add_points(&mut progress, 5, monday + Duration::days(3));
        assert_eq!(progress.weekly_points, 35);
        add_points(&mut progress, 7, monday + Duration::days(7));
        assert_eq!(progress.weekly_points, 7);
        assert_eq!(progress.monthly_points, 42);
        assert_eq!(progress.total_points, 42);
    }

    #[test]
    fn applying_a_score_updates_counters_and_level() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), t(0));
        progress.experience = 190;
        progress.total_points = 190;
        let mut session = session_with_questions(1);
        add_participant(&mut session, &[(0, "B", 2)]);
        let score = score_session(&session).remove(0);
        let change = apply_session_score(&mut progress, session.id, &score, t(100));
        assert_eq!(score.points, 16);
        assert!(change.leveled_up());
        assert_eq!(progress.level, 2);
        assert_eq!(progress.quizzes_taken, 1);
        assert_eq!(progress.fast_responses, 1);
        assert_eq!(progress.perfect_scores, 1);
        assert_eq!(progress.current_streak, 1);
        assert!(progress.scored_sessions.contains(&session.id));
    }
}
