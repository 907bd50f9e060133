// League state machine: draft -> active -> locked -> completed.
//
// All functions run on the caller's connection; the engine serializes them
// per league through the league writer lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use super::{League, LeagueError, LeagueRules, LeagueStatus};
use crate::db;

/// Fetch a league or fail with `UnknownLeague`.
pub fn fetch(conn: &Connection, league_id: i64) -> Result<League, LeagueError> {
    db::league(conn, league_id)?.ok_or(LeagueError::UnknownLeague { id: league_id })
}

/// Create a new draft league with mutable rules.
pub fn create_draft_league(
    conn: &Connection,
    code: &str,
    name: &str,
    rules: &LeagueRules,
) -> Result<i64, LeagueError> {
    if db::league_by_code(conn, code)?.is_some() {
        return Err(LeagueError::DuplicateCode {
            code: code.to_string(),
        });
    }
    let id = db::insert_league(conn, code, name, rules)?;
    info!(league_id = id, code, "created draft league");
    Ok(id)
}

/// Replace the mutable rules. Draft only.
pub fn edit_rules(
    conn: &Connection,
    league_id: i64,
    rules: &LeagueRules,
) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    require_draft(&league, "edit rules of")?;
    db::update_league_rules(conn, league_id, rules)?;
    Ok(())
}

/// Add a player to the roster. Draft only. `legacy` entries start inactive.
pub fn add_roster_player(
    conn: &Connection,
    league_id: i64,
    player_id: i64,
    active: bool,
) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    require_draft(&league, "edit the roster of")?;
    db::add_roster_entry(conn, league_id, player_id, active)?;
    Ok(())
}

/// Remove a player from the roster. Draft only.
pub fn remove_roster_player(
    conn: &Connection,
    league_id: i64,
    player_id: i64,
) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    require_draft(&league, "edit the roster of")?;
    db::remove_roster_entry(conn, league_id, player_id)?;
    Ok(())
}

/// Delete a draft league outright.
pub fn delete_draft_league(conn: &Connection, league_id: i64) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    require_draft(&league, "delete")?;
    db::delete_league(conn, league_id)?;
    info!(league_id, "deleted draft league");
    Ok(())
}

/// Confirm transition: validate the roster, freeze the rules, and capture the
/// first multiplier snapshot from player baselines. Atomic.
pub fn confirm(
    conn: &Connection,
    league_id: i64,
    now: DateTime<Utc>,
) -> Result<League, LeagueError> {
    let league = fetch(conn, league_id)?;
    if league.status != LeagueStatus::Draft {
        return Err(LeagueError::IllegalTransition {
            from: league.status,
            action: "confirm",
        });
    }

    let roster = db::roster_entries(conn, league_id)?;
    if roster.len() < league.rules.squad_size {
        return Err(LeagueError::RosterTooSmall {
            roster: roster.len(),
            squad_size: league.rules.squad_size,
        });
    }

    let mut covered: HashSet<String> = HashSet::new();
    let mut snapshot: HashMap<i64, f64> = HashMap::new();
    for entry in &roster {
        let player = db::player(conn, entry.player_id)?.ok_or_else(|| {
            LeagueError::Db(anyhow::anyhow!(
                "roster references unknown player {}",
                entry.player_id
            ))
        })?;
        covered.insert(player.rl_team.clone());
        snapshot.insert(player.id, player.baseline_multiplier);
    }

    let missing: Vec<String> = league
        .rules
        .real_teams
        .iter()
        .filter(|team| !covered.contains(*team))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(LeagueError::RosterMissingRealTeams { missing });
    }

    db::freeze_league(conn, league_id, &league.rules, &snapshot, now)?;
    info!(
        league_id,
        roster = roster.len(),
        "confirmed league; rules frozen, snapshot captured"
    );
    fetch(conn, league_id)
}

/// Lock transition: requires at least one joined team and every team
/// finalized.
pub fn lock(conn: &Connection, league_id: i64) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    if league.status != LeagueStatus::Active {
        return Err(LeagueError::IllegalTransition {
            from: league.status,
            action: "lock",
        });
    }

    let teams = db::teams_in_league(conn, league_id)?;
    if teams.is_empty() {
        return Err(LeagueError::NoTeamsJoined);
    }
    let offenders: Vec<String> = teams
        .iter()
        .filter(|t| !t.is_finalized())
        .map(|t| t.name.clone())
        .collect();
    if !offenders.is_empty() {
        return Err(LeagueError::TeamsNotFinalized { teams: offenders });
    }

    db::set_league_status(conn, league_id, LeagueStatus::Locked)?;
    info!(league_id, "locked league");
    Ok(())
}

/// Complete transition: flips the state; the drifter stops considering the
/// league from here on.
pub fn complete(conn: &Connection, league_id: i64) -> Result<(), LeagueError> {
    let league = fetch(conn, league_id)?;
    if league.status != LeagueStatus::Locked {
        return Err(LeagueError::IllegalTransition {
            from: league.status,
            action: "complete",
        });
    }
    db::set_league_status(conn, league_id, LeagueStatus::Completed)?;
    info!(league_id, "completed league");
    Ok(())
}

fn require_draft(league: &League, action: &'static str) -> Result<(), LeagueError> {
    if league.status != LeagueStatus::Draft {
        return Err(LeagueError::IllegalTransition {
            from: league.status,
            action,
        });
    }
    Ok(())
}
