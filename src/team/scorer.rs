// Team scoring: league multiplier x captaincy over stored base points.
//
// Read-only; safe to recompute on every request. Totals are exact floats,
// floored to one decimal only for display.

use rusqlite::Connection;
use serde::Serialize;

use super::Team;
use crate::db;
use crate::league::{League, LeagueError};
use crate::scoring::ruleset::Ruleset;

/// Captaincy factors, applied after the league multiplier.
pub const CAPTAIN_FACTOR: f64 = 2.0;
pub const VICE_CAPTAIN_FACTOR: f64 = 1.5;

/// One squad member's scoring line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerScore {
    pub player_id: i64,
    pub name: String,
    /// Season base points plus the wicket-keeper catch bonus, pre-multiplier.
    pub base_points: f64,
    /// The league snapshot multiplier (baseline fallback for legacy rosters
    /// mid-transition).
    pub multiplier: f64,
    /// Captaincy factor in force: 2.0, 1.5, or 1.0.
    pub captaincy: f64,
    /// `base_points x multiplier x captaincy`, exact.
    pub points: f64,
}

/// A team's full scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamScore {
    pub team_id: i64,
    pub team_name: String,
    pub owner: String,
    pub players: Vec<PlayerScore>,
    /// Exact total; use `display_points` for rendering.
    pub total: f64,
}

/// Floor to one decimal for display. Storage and comparison stay exact.
pub fn display_points(points: f64) -> f64 {
    (points * 10.0).floor() / 10.0
}

/// Score one team against its league's current multiplier snapshot.
pub fn score_team(
    conn: &Connection,
    league: &League,
    team: &Team,
    ruleset: &Ruleset,
) -> Result<TeamScore, LeagueError> {
    let snapshot = league.snapshot()?;
    let wk_extra = ruleset.fielding.wicket_keeper_catch_factor - 1.0;

    let mut players = Vec::new();
    let mut total = 0.0;
    for member in db::squad(conn, team.id)? {
        let player = db::player(conn, member.player_id)?.ok_or_else(|| {
            LeagueError::Db(anyhow::anyhow!(
                "squad references unknown player {}",
                member.player_id
            ))
        })?;

        let mut base_points = 0.0;
        for perf in db::stored_performances(conn, member.player_id)? {
            base_points += perf.base_points;
            if member.is_wicket_keeper {
                base_points += perf.catch_points * wk_extra;
            }
        }

        let multiplier = snapshot
            .get(&member.player_id)
            .copied()
            .unwrap_or(player.baseline_multiplier);

        let captaincy = if member.is_captain {
            CAPTAIN_FACTOR
        } else if member.is_vice_captain {
            VICE_CAPTAIN_FACTOR
        } else {
            1.0
        };

        let points = base_points * multiplier * captaincy;
        total += points;
        players.push(PlayerScore {
            player_id: member.player_id,
            name: player.name,
            base_points,
            multiplier,
            captaincy,
            points,
        });
    }

    Ok(TeamScore {
        team_id: team.id,
        team_name: team.name.clone(),
        owner: team.owner.clone(),
        players,
        total,
    })
}

/// Score every finalized team in a league, best first.
pub fn leaderboard(
    conn: &Connection,
    league: &League,
    ruleset: &Ruleset,
) -> Result<Vec<TeamScore>, LeagueError> {
    let mut scores = Vec::new();
    for team in db::teams_in_league(conn, league.id)? {
        if !team.is_finalized() {
            continue;
        }
        scores.push(score_team(conn, league, &team, ruleset)?);
    }
    scores.sort_by(|a, b| b.total.partial_cmp(&a.total).expect("totals are finite"));
    Ok(scores)
}
