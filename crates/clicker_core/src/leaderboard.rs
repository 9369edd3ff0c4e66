//! Class leaderboard ordering.
//!
//! Entries are ordered by points descending. Ties go to the student whose
//! progress record was created first (earliest scored activity in the class),
//! then to the lower student id, so ranks never depend on storage order.

use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::domain::{LeaderboardEntry, LeaderboardWindow, Progress, RankAssignment};
use crate::scoring::{month_start, week_start};

/// Points counted for `window`; stale weekly/monthly totals count as zero.
pub fn window_points(progress: &Progress, window: LeaderboardWindow, today: NaiveDate) -> u64 {
    match window {
        LeaderboardWindow::AllTime => progress.total_points,
        LeaderboardWindow::Weekly if progress.week_start == Some(week_start(today)) => {
            progress.weekly_points
        }
        LeaderboardWindow::Monthly if progress.month_start == Some(month_start(today)) => {
            progress.monthly_points
        }
        LeaderboardWindow::Weekly | LeaderboardWindow::Monthly => 0,
    }
}

fn leaderboard_order(a: &Progress, b: &Progress, window: LeaderboardWindow, today: NaiveDate) -> Ordering {
    window_points(b, window, today)
        .cmp(&window_points(a, window, today))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.student_id.cmp(&b.student_id))
}

/// The ranked leaderboard for one window. Ranks start at 1 and are unique.
pub fn rank(progress: &[Progress], window: LeaderboardWindow, today: NaiveDate) -> Vec<LeaderboardEntry> {
    let mut ordered: Vec<&Progress> = progress.iter().collect();
    ordered.sort_by(|a, b| leaderboard_order(a, b, window, today));
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, p)| LeaderboardEntry {
            rank: i as u32 + 1,
            student_id: p.student_id,
            points: window_points(p, window, today),
            level: p.level,
            current_streak: p.current_streak,
        })
        .collect()
}

/// Ranks for every student across all three windows.
pub fn assign_ranks(progress: &[Progress], today: NaiveDate) -> Vec<RankAssignment> {
    let all_time = rank(progress, LeaderboardWindow::AllTime, today);
    let weekly = rank(progress, LeaderboardWindow::Weekly, today);
    let monthly = rank(progress, LeaderboardWindow::Monthly, today);

    let rank_of = |entries: &[LeaderboardEntry], student| {
        entries
            .iter()
            .find(|e| e.student_id == student)
            .map(|e| e.rank)
            .unwrap_or(0)
    };

    all_time
        .iter()
        .map(|entry| RankAssignment {
            student_id: entry.student_id,
            class_rank: entry.rank,
            weekly_rank: rank_of(&weekly, entry.student_id),
            monthly_rank: rank_of(&monthly, entry.student_id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn progress(points: u64, created_offset_days: i64) -> Progress {
        let created = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap() + Duration::days(created_offset_days);
        let mut p = Progress::new(Uuid::new_v4(), Uuid::nil(), created);
        p.total_points = points;
        p
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()
    }

    #[test]
    fn orders_by_points_descending() {
        let rows = vec![progress(10, 0), progress(30, 0), progress(20, 0)];
        let board = rank(&rows, LeaderboardWindow::AllTime, today());
        let points: Vec<u64> = board.iter().map(|e| e.points).collect();
        assert_eq!(points, vec![30, 20, 10]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].rank, 3);
    }

    #[test]
    fn ties_go_to_the_earliest_record() {
        let late = progress(50, 9);
        let early = progress(50, 1);
        let early_id = early.student_id;
        let board = rank(&[late, early], LeaderboardWindow::AllTime, today());
        assert_eq!(board[0].student_id, early_id);
    }

    #[test]
    fn stale_weekly_points_count_as_zero() {
        let mut stale = progress(100, 0);
        stale.weekly_points = 100;
        stale.week_start = Some(NaiveDate::from_ymd_opt(2026, 2, 16).unwrap());
        let mut fresh = progress(10, 0);
        fresh.weekly_points = 10;
        fresh.week_start = Some(week_start(today()));
        let fresh_id = fresh.student_id;

        let board = rank(&[stale, fresh], LeaderboardWindow::Weekly, today());
        assert_eq!(board[0].student_id, fresh_id);
        assert_eq!(board[1].points, 0);
    }

    #[test]
    fn assigns_ranks_for_every_window() {
        let rows = vec![progress(5, 0), progress(15, 0)];
        let ranks = assign_ranks(&rows, today());
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0].student_id, rows[1].student_id);
        assert_eq!(ranks[0].class_rank, 1);
        assert!(ranks.iter().all(|r| r.weekly_rank >= 1 && r.monthly_rank >= 1));
    }
}
