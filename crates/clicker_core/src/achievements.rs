//! Achievement evaluation against a progress snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AchievementDefinition, CriteriaKind, Progress};
use crate::scoring::{add_points, level_for_experience};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardedAchievement {
    pub achievement_id: Uuid,
    pub code: String,
    pub points: u32,
}

/// The value a criterion compares against its threshold.
pub fn criteria_metric(progress: &Progress, kind: CriteriaKind) -> f64 {
    match kind {
        CriteriaKind::QuizzesTaken => f64::from(progress.quizzes_taken),
        CriteriaKind::TotalPoints => progress.total_points as f64,
        CriteriaKind::CurrentStreak => f64::from(progress.current_streak),
        CriteriaKind::FastResponses => f64::from(progress.fast_responses),
        CriteriaKind::PerfectScores => f64::from(progress.perfect_scores),
        CriteriaKind::Accuracy => progress.lifetime_accuracy(),
        CriteriaKind::Level => f64::from(progress.level),
    }
}

/// Awards every active, not-yet-earned achievement whose criteria the snapshot
/// meets. All definitions are judged against the snapshot as it was before this
/// call; achievement points are added afterwards and the level recomputed.
pub fn award_achievements(
    progress: &mut Progress,
    catalog: &[AchievementDefinition],
    now: DateTime<Utc>,
) -> Vec<AwardedAchievement> {
    let earned: Vec<AwardedAchievement> = catalog
        .iter()
        .filter(|def| def.is_active)
        .filter(|def| !progress.achievements.contains_key(&def.id))
        .filter(|def| criteria_metric(progress, def.criteria.kind) >= def.criteria.threshold)
        .map(|def| AwardedAchievement {
            achievement_id: def.id,
            code: def.code.clone(),
            points: def.points,
        })
        .collect();

    let today = now.date_naive();
    for award in &earned {
        progress.achievements.insert(award.achievement_id, now);
        add_points(progress, u64::from(award.points), today);
    }
    if !earned.is_empty() {
        progress.level = level_for_experience(progress.experience);
        progress.updated_at = now;
    }
    earned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AchievementCriteria, Rarity};
    use chrono::TimeZone;

    fn def(code: &str, kind: CriteriaKind, threshold: f64, points: u32) -> AchievementDefinition {
        AchievementDefinition {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            description: String::new(),
            criteria: AchievementCriteria { kind, threshold },
            points,
            rarity: Rarity::Common,
            is_active: true,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn awards_met_criteria_once() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), now());
        progress.quizzes_taken = 1;
        let catalog = vec![
            def("first_quiz", CriteriaKind::QuizzesTaken, 1.0, 20),
            def("ten_quizzes", CriteriaKind::QuizzesTaken, 10.0, 100),
        ];

        let first = award_achievements(&mut progress, &catalog, now());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].code, "first_quiz");
        assert_eq!(progress.total_points, 20);

        let second = award_achievements(&mut progress, &catalog, now());
        assert!(second.is_empty());
        assert_eq!(progress.total_points, 20);
    }

    #[test]
    fn inactive_definitions_are_ignored() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), now());
        let mut retired = def("level_one", CriteriaKind::Level, 1.0, 5);
        retired.is_active = false;
        assert!(award_achievements(&mut progress, &[retired], now()).is_empty());
    }

    #[test]
    fn accuracy_criteria_use_lifetime_percentages() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), now());
        progress.total_answered = 10;
        progress.total_correct = 9;
        let catalog = vec![
            def("sharp", CriteriaKind::Accuracy, 90.0, 0),
            def("flawless", CriteriaKind::Accuracy, 100.0, 0),
        ];
        let awarded = award_achievements(&mut progress, &catalog, now());
        assert_eq!(awarded.len(), 1);
        assert_eq!(awarded[0].code, "sharp");
    }

    #[test]
    fn achievement_points_can_raise_the_level() {
        let mut progress = Progress::new(Uuid::new_v4(), Uuid::new_v4(), now());
        progress.experience = 150;
        progress.fast_responses = 3;
        award_achievements(&mut progress, &[def("quick", CriteriaKind::FastResponses, 3.0, 60)], now());
        assert_eq!(progress.experience, 210);
        assert_eq!(progress.level, 2);
    }
}
