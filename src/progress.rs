//! Post-acceptance updater
//!
//! Runs once per newly accepted (user, problem) pair:
//! 1. Add the problem to the user's solved set if absent
//! 2. Advance the daily streak
//! 3. Award every badge whose threshold is met and that the user lacks
//!
//! All three land in one store write. Step 1 is the idempotence guard: when
//! the problem was already present, nothing else is touched, and a failed
//! write leaves nothing behind for a retry to trip over.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::problem::Difficulty;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub current: u32,
    pub longest: u32,
    pub last_solved: Option<NaiveDate>,
}

impl Streak {
    /// Streak after an accepted solve on `today`
    pub fn advance(&self, today: NaiveDate) -> Streak {
        let current = match self.last_solved {
            None => 1,
            Some(last) => match (today - last).num_days() {
                0 => self.current,
                // Clock went backwards
                d if d < 0 => self.current.max(1),
                1 => self.current + 1,
                _ => 1,
            },
        };

        Streak {
            current,
            longest: self.longest.max(current),
            last_solved: Some(today.max(self.last_solved.unwrap_or(today))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedProblem {
    pub problem_id: String,
    pub difficulty: Difficulty,
    pub solved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub name: String,
    pub description: String,
    pub icon_url: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProgress {
    pub solved: Vec<SolvedProblem>,
    pub streak: Streak,
    pub badges: Vec<Badge>,
}

impl UserProgress {
    pub fn has_solved(&self, problem_id: &str) -> bool {
        self.solved.iter().any(|s| s.problem_id == problem_id)
    }

    pub fn has_badge(&self, name: &str) -> bool {
        self.badges.iter().any(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTrigger {
    /// Total solved problems reached
    Solved(usize),
    /// Current streak in days reached
    Streak(u32),
}

#[derive(Debug)]
pub struct BadgeRule {
    pub trigger: BadgeTrigger,
    pub name: &'static str,
    pub description: &'static str,
    pub icon_url: &'static str,
}

impl BadgeRule {
    fn award(&self, now: DateTime<Utc>) -> Badge {
        Badge {
            name: self.name.to_string(),
            description: self.description.to_string(),
            icon_url: self.icon_url.to_string(),
            earned_at: now,
        }
    }
}

/// Evaluated in order; solved-count rules first, then streak rules
pub static BADGE_RULES: &[BadgeRule] = &[
    BadgeRule {
        trigger: BadgeTrigger::Solved(1),
        name: "First Solve",
        description: "Solved your first problem!",
        icon_url: "https://ik.imagekit.io/tvz1mupab/firstSolve.png?updatedAt=1760933577260",
    },
    BadgeRule {
        trigger: BadgeTrigger::Solved(10),
        name: "Problem Solver",
        description: "Solved 10 problems",
        icon_url: "https://ik.imagekit.io/tvz1mupab/problemSolver.png?updatedAt=1760933649100",
    },
    BadgeRule {
        trigger: BadgeTrigger::Solved(50),
        name: "Coding Enthusiast",
        description: "Solved 50 problems",
        icon_url: "https://ik.imagekit.io/tvz1mupab/codingEnthusiast.png?updatedAt=1760932933830",
    },
    BadgeRule {
        trigger: BadgeTrigger::Solved(100),
        name: "Century Club",
        description: "Solved 100 problems",
        icon_url: "https://ik.imagekit.io/tvz1mupab/centuryClub.png?updatedAt=1760933703775",
    },
    BadgeRule {
        trigger: BadgeTrigger::Streak(7),
        name: "Week Warrior",
        description: "7-day solving streak",
        icon_url: "https://ik.imagekit.io/tvz1mupab/weeklyWarrior.png?updatedAt=1760933522731",
    },
    BadgeRule {
        trigger: BadgeTrigger::Streak(30),
        name: "Monthly Master",
        description: "30-day solving streak",
        icon_url: "https://ik.imagekit.io/tvz1mupab/monthlyMaster.png?updatedAt=1760932393464",
    },
    BadgeRule {
        trigger: BadgeTrigger::Streak(365),
        name: "Yearly Champion",
        description: "365-day solving streak",
        icon_url: "https://ik.imagekit.io/tvz1mupab/yearlyChampion.png?updatedAt=1760933438382",
    },
];

/// A badge offered with a solve, granted only once the solved count reaches `min_solved`
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeGrant {
    pub min_solved: usize,
    pub badge: Badge,
}

/// Everything one accepted solve writes
#[derive(Debug, Clone, PartialEq)]
pub struct SolveUpdate {
    pub solved: SolvedProblem,
    pub streak: Streak,
    pub badges: Vec<BadgeGrant>,
}

/// What the store wrote for a [`SolveUpdate`]
#[derive(Debug, Clone, PartialEq)]
pub struct SolveApplied {
    pub solved_count: usize,
    /// Names of the badges that were granted; held ones are skipped
    pub awarded: Vec<String>,
}

/// User progress persistence
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<UserProgress>;

    /// Apply a solve as one atomic write.
    ///
    /// The solved problem is added only if absent, and the streak and badges
    /// are written only when it was. Returns `None` if the problem was already
    /// present, in which case nothing is written.
    async fn apply_solve(&self, user_id: &str, update: &SolveUpdate) -> Result<Option<SolveApplied>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateSummary {
    AlreadySolved,
    Updated {
        solved_count: usize,
        streak: Streak,
        new_badges: Vec<Badge>,
    },
}

pub struct ProgressUpdater {
    store: Arc<dyn ProgressStore>,
}

impl ProgressUpdater {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub async fn on_accepted(
        &self,
        user_id: &str,
        problem_id: &str,
        difficulty: Difficulty,
    ) -> Result<UpdateSummary> {
        self.on_accepted_at(user_id, problem_id, difficulty, Utc::now())
            .await
    }

    pub async fn on_accepted_at(
        &self,
        user_id: &str,
        problem_id: &str,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> Result<UpdateSummary> {
        let progress = self
            .store
            .load(user_id)
            .await
            .with_context(|| format!("Failed to load progress for user {}", user_id))?;

        if progress.has_solved(problem_id) {
            debug!("User {} already solved {}", user_id, problem_id);
            return Ok(UpdateSummary::AlreadySolved);
        }

        let streak = progress.streak.advance(now.date_naive());
        let update = SolveUpdate {
            solved: SolvedProblem {
                problem_id: problem_id.to_string(),
                difficulty,
                solved_at: now,
            },
            streak,
            badges: badge_grants(&progress, &streak, now),
        };

        // A concurrent acceptance may have won since `load`
        let Some(applied) = self
            .store
            .apply_solve(user_id, &update)
            .await
            .context("Failed to record solved problem")?
        else {
            debug!("User {} solved {} concurrently", user_id, problem_id);
            return Ok(UpdateSummary::AlreadySolved);
        };
        let solved_count = applied.solved_count;

        let new_badges: Vec<Badge> = update
            .badges
            .into_iter()
            .map(|grant| grant.badge)
            .filter(|badge| applied.awarded.contains(&badge.name))
            .collect();

        info!(
            "User {} solved {}: total={}, streak={}, new badges={}",
            user_id,
            problem_id,
            solved_count,
            streak.current,
            new_badges.len()
        );

        Ok(UpdateSummary::Updated {
            solved_count,
            streak,
            new_badges,
        })
    }
}

/// Badges the user lacks that this solve could earn.
///
/// Streak rules are decided here; solved-count rules are left to the store,
/// which knows the count after the insert.
fn badge_grants(progress: &UserProgress, streak: &Streak, now: DateTime<Utc>) -> Vec<BadgeGrant> {
    BADGE_RULES
        .iter()
        .filter(|rule| !progress.has_badge(rule.name))
        .filter_map(|rule| {
            let min_solved = match rule.trigger {
                BadgeTrigger::Solved(n) => n,
                BadgeTrigger::Streak(n) if streak.current >= n => 0,
                BadgeTrigger::Streak(_) => return None,
            };
            Some(BadgeGrant {
                min_solved,
                badge: rule.award(now),
            })
        })
        .collect()
}
