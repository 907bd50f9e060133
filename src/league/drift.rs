// Weekly multiplier drift: pull each league multiplier a capped step toward
// a target derived from the league-local season-points distribution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use super::{LeagueError, LeagueStatus};
use crate::config::DriftConfig;
use crate::db;

/// Result of one drift attempt for one league.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftOutcome {
    /// The snapshot was rewritten.
    Applied { players: usize },
    /// Nothing changed; logged and retried next cycle.
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Fewer than 3 distinct season-point values in the roster.
    InsufficientData { distinct: usize },
    /// The league is not in a driftable state (draft or completed).
    NotDriftable { status: LeagueStatus },
}

/// Distribution statistics over a league roster's season points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSpread {
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

/// Compute min/median/max; `None` with fewer than 3 distinct values.
pub fn score_spread(scores: &[f64]) -> Option<ScoreSpread> {
    let mut distinct: Vec<f64> = Vec::new();
    for &s in scores {
        if !distinct.iter().any(|d| (d - s).abs() < f64::EPSILON) {
            distinct.push(s);
        }
    }
    if distinct.len() < 3 {
        return None;
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("season points are finite"));
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    Some(ScoreSpread {
        min: sorted[0],
        median,
        max: sorted[n - 1],
    })
}

/// The piecewise-linear target: worst scorer maps to the upper bound of the
/// reference scale (5.0), the median to 1.0, the best to 0.69, then clamped
/// to the configured bounds.
pub fn target_multiplier(score: f64, spread: &ScoreSpread, cfg: &DriftConfig) -> f64 {
    let target = if score <= spread.median {
        let span = spread.median - spread.min;
        if span > 0.0 {
            5.0 - 4.0 * (score - spread.min) / span
        } else {
            1.0
        }
    } else {
        let span = spread.max - spread.median;
        if span > 0.0 {
            1.0 - 0.31 * (score - spread.median) / span
        } else {
            1.0
        }
    };
    cfg.clamp(target)
}

/// Capped step from `old` toward `target`.
pub fn drift_step(old: f64, target: f64, cfg: &DriftConfig) -> f64 {
    cfg.clamp(old * (1.0 - cfg.rate) + target * cfg.rate)
}

/// Run one drift step for one league and swap the snapshot atomically.
///
/// The caller holds the league writer lock, so this cannot interleave with a
/// confirm or lock transition.
pub fn drift_league(
    conn: &Connection,
    league_id: i64,
    cfg: &DriftConfig,
    now: DateTime<Utc>,
) -> Result<DriftOutcome, LeagueError> {
    let league = super::lifecycle::fetch(conn, league_id)?;

    if !matches!(league.status, LeagueStatus::Active | LeagueStatus::Locked) {
        debug!(league_id, status = %league.status, "skipping drift");
        return Ok(DriftOutcome::Skipped {
            reason: SkipReason::NotDriftable {
                status: league.status,
            },
        });
    }

    // A non-draft league must carry a snapshot; its absence is an invariant
    // breach and must make noise.
    let old_snapshot = league.snapshot()?.clone();

    let roster = db::roster_entries(conn, league_id)?;
    let mut scores: Vec<(i64, f64)> = Vec::with_capacity(roster.len());
    for entry in &roster {
        scores.push((entry.player_id, db::season_points(conn, entry.player_id)?));
    }

    let values: Vec<f64> = scores.iter().map(|(_, s)| *s).collect();
    let Some(spread) = score_spread(&values) else {
        let distinct = {
            let mut d: Vec<f64> = Vec::new();
            for v in &values {
                if !d.iter().any(|x| (x - v).abs() < f64::EPSILON) {
                    d.push(*v);
                }
            }
            d.len()
        };
        info!(league_id, distinct, "drift skipped: insufficient data");
        return Ok(DriftOutcome::Skipped {
            reason: SkipReason::InsufficientData { distinct },
        });
    };

    let mut new_snapshot: HashMap<i64, f64> = HashMap::with_capacity(scores.len());
    for (player_id, score) in &scores {
        let target = target_multiplier(*score, &spread, cfg);
        // Roster additions missing from the snapshot take the league-computed
        // target directly.
        let new = match old_snapshot.get(player_id) {
            Some(&old) => drift_step(old, target, cfg),
            None => target,
        };
        new_snapshot.insert(*player_id, new);
    }

    db::write_snapshot(conn, league_id, &new_snapshot, now)?;
    info!(league_id, players = new_snapshot.len(), "drift applied");
    Ok(DriftOutcome::Applied {
        players: new_snapshot.len(),
    })
}
