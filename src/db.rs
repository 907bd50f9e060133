// SQLite persistence layer for players, performances, leagues, and teams.
//
// `Database` owns the connection; query helpers are free functions over
// `&Connection` so per-match and per-league work can compose inside a single
// transaction (`with_tx`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};

use crate::league::{League, LeagueRules, LeagueStatus};
use crate::scoring::{Performance, ScoreBreakdown};
use crate::team::{SquadMember, Team};

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

/// Playing role, used by squad composition quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerRole {
    Batsman,
    Bowler,
    AllRounder,
    WicketKeeper,
}

impl PlayerRole {
    pub fn from_str_role(s: &str) -> Option<Self> {
        match s {
            "batsman" => Some(PlayerRole::Batsman),
            "bowler" => Some(PlayerRole::Bowler),
            "all-rounder" => Some(PlayerRole::AllRounder),
            "wicket-keeper" => Some(PlayerRole::WicketKeeper),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerRole::Batsman => "batsman",
            PlayerRole::Bowler => "bowler",
            PlayerRole::AllRounder => "all-rounder",
            PlayerRole::WicketKeeper => "wicket-keeper",
        }
    }
}

impl fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered player. Players are process-wide entities shared by all
/// leagues and are never destroyed.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub club: String,
    pub rl_team: String,
    pub role: PlayerRole,
    pub baseline_multiplier: f64,
    pub legacy_import: bool,
}

/// Insertion payload for a player row.
#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub name: String,
    pub club: String,
    pub rl_team: String,
    pub role: PlayerRole,
    pub baseline_multiplier: f64,
    pub legacy_import: bool,
}

/// Primitive season counters for one player. Averages are always derived
/// from these, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerTotals {
    pub player_id: i64,
    pub matches: u32,
    pub runs: u32,
    pub balls_faced: u32,
    pub dismissals: u32,
    pub balls_bowled: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
    pub catches: u32,
    pub stumpings: u32,
    pub runouts: u32,
    pub points: f64,
}

/// A stored performance's scoring output, as consumed by the team scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPerformance {
    pub match_id: String,
    pub base_points: f64,
    pub catch_points: f64,
}

/// A (league, player) roster membership. `active = false` marks a legacy
/// entry that has not yet been matched to a live performance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RosterEntry {
    pub league_id: i64,
    pub player_id: i64,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Database handle
// ---------------------------------------------------------------------------

/// SQLite-backed persistence. The single shared mutable store; every mutation
/// flows through here.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to set PRAGMA foreign_keys")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS players (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                name                TEXT NOT NULL,
                club                TEXT NOT NULL,
                rl_team             TEXT NOT NULL,
                role                TEXT NOT NULL,
                baseline_multiplier REAL NOT NULL,
                legacy_import       INTEGER NOT NULL DEFAULT 0,
                UNIQUE(name, club)
            );

            CREATE TABLE IF NOT EXISTS performances (
                match_id      TEXT NOT NULL,
                player_id     INTEGER NOT NULL REFERENCES players(id),
                did_bat       INTEGER NOT NULL,
                runs          INTEGER NOT NULL,
                balls_faced   INTEGER NOT NULL,
                dismissed     INTEGER NOT NULL,
                did_bowl      INTEGER NOT NULL,
                balls_bowled  INTEGER NOT NULL,
                runs_conceded INTEGER NOT NULL,
                wickets       INTEGER NOT NULL,
                maidens       INTEGER NOT NULL,
                catches       INTEGER NOT NULL,
                stumpings     INTEGER NOT NULL,
                runouts       INTEGER NOT NULL,
                base_points   REAL NOT NULL,
                catch_points  REAL NOT NULL,
                scored_at     TEXT NOT NULL,
                PRIMARY KEY (match_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS player_totals (
                player_id     INTEGER PRIMARY KEY REFERENCES players(id),
                matches       INTEGER NOT NULL DEFAULT 0,
                runs          INTEGER NOT NULL DEFAULT 0,
                balls_faced   INTEGER NOT NULL DEFAULT 0,
                dismissals    INTEGER NOT NULL DEFAULT 0,
                balls_bowled  INTEGER NOT NULL DEFAULT 0,
                runs_conceded INTEGER NOT NULL DEFAULT 0,
                wickets       INTEGER NOT NULL DEFAULT 0,
                maidens       INTEGER NOT NULL DEFAULT 0,
                catches       INTEGER NOT NULL DEFAULT 0,
                stumpings     INTEGER NOT NULL DEFAULT 0,
                runouts       INTEGER NOT NULL DEFAULT 0,
                points        REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS leagues (
                id                    INTEGER PRIMARY KEY AUTOINCREMENT,
                code                  TEXT NOT NULL UNIQUE,
                name                  TEXT NOT NULL,
                status                TEXT NOT NULL,
                rules                 TEXT NOT NULL,
                frozen_rules          TEXT,
                multipliers_snapshot  TEXT,
                multipliers_frozen_at TEXT
            );

            CREATE TABLE IF NOT EXISTS roster_entries (
                league_id INTEGER NOT NULL REFERENCES leagues(id),
                player_id INTEGER NOT NULL REFERENCES players(id),
                active    INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (league_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS teams (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id      INTEGER NOT NULL REFERENCES leagues(id),
                owner          TEXT NOT NULL,
                name           TEXT NOT NULL,
                transfers_used INTEGER NOT NULL DEFAULT 0,
                finalized_at   TEXT,
                UNIQUE(league_id, owner)
            );

            CREATE TABLE IF NOT EXISTS team_players (
                team_id          INTEGER NOT NULL REFERENCES teams(id),
                player_id        INTEGER NOT NULL REFERENCES players(id),
                is_captain       INTEGER NOT NULL DEFAULT 0,
                is_vice_captain  INTEGER NOT NULL DEFAULT 0,
                is_wicket_keeper INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (team_id, player_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the locked connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    /// Run `f` inside a transaction: committed on `Ok`, rolled back on `Err`.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().expect("database mutex poisoned");
        let tx = conn
            .transaction()
            .context("failed to begin transaction")?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().context("failed to commit transaction")?;
                Ok(value)
            }
            // Dropping the transaction rolls it back.
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// Insert a player or update their record if a `(name, club)` row already
/// exists. Returns the player's row id.
pub fn upsert_player(conn: &Connection, new: &NewPlayer) -> Result<i64> {
    conn.execute(
        "INSERT INTO players (name, club, rl_team, role, baseline_multiplier, legacy_import)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(name, club) DO UPDATE SET
            rl_team             = excluded.rl_team,
            role                = excluded.role",
        params![
            new.name,
            new.club,
            new.rl_team,
            new.role.as_str(),
            new.baseline_multiplier,
            new.legacy_import as i64,
        ],
    )
    .context("failed to upsert player")?;

    // When ON CONFLICT triggers an UPDATE, last_insert_rowid() may return a
    // stale id. Always resolve through the unique key.
    conn.query_row(
        "SELECT id FROM players WHERE name = ?1 AND club = ?2",
        params![new.name, new.club],
        |row| row.get(0),
    )
    .context("failed to look up player id")
}

fn player_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, String, f64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn build_player(
    (id, name, club, rl_team, role, baseline_multiplier, legacy): (
        i64,
        String,
        String,
        String,
        String,
        f64,
        i64,
    ),
) -> Result<Player> {
    let role = PlayerRole::from_str_role(&role)
        .with_context(|| format!("unrecognized role {role:?} for player {id}"))?;
    Ok(Player {
        id,
        name,
        club,
        rl_team,
        role,
        baseline_multiplier,
        legacy_import: legacy != 0,
    })
}

const PLAYER_COLUMNS: &str =
    "id, name, club, rl_team, role, baseline_multiplier, legacy_import";

/// Look up a player by id.
pub fn player(conn: &Connection, id: i64) -> Result<Option<Player>> {
    let raw = conn
        .query_row(
            &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1"),
            params![id],
            player_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("failed to query player")?;
    raw.map(build_player).transpose()
}

/// Look up a player by exact `(name, club)`.
pub fn find_player(conn: &Connection, name: &str, club: &str) -> Result<Option<Player>> {
    let raw = conn
        .query_row(
            &format!("SELECT {PLAYER_COLUMNS} FROM players WHERE name = ?1 AND club = ?2"),
            params![name, club],
            player_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("failed to query player by name")?;
    raw.map(build_player).transpose()
}

/// All players registered for `club`, ordered by id.
pub fn players_by_club(conn: &Connection, club: &str) -> Result<Vec<Player>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE club = ?1 ORDER BY id"
        ))
        .context("failed to prepare players_by_club query")?;
    let raws = stmt
        .query_map(params![club], player_from_row)
        .context("failed to query players by club")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map player rows")?;
    raws.into_iter().map(build_player).collect()
}

/// All registered players, ordered by id.
pub fn all_players(conn: &Connection) -> Result<Vec<Player>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {PLAYER_COLUMNS} FROM players ORDER BY id"))
        .context("failed to prepare all_players query")?;
    let raws = stmt
        .query_map([], player_from_row)
        .context("failed to query players")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map player rows")?;
    raws.into_iter().map(build_player).collect()
}

// ---------------------------------------------------------------------------
// Performances and season totals
// ---------------------------------------------------------------------------

/// Whether `(match_id, player_id)` has already been counted.
pub fn performance_exists(conn: &Connection, match_id: &str, player_id: i64) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM performances WHERE match_id = ?1 AND player_id = ?2",
            params![match_id, player_id],
            |row| row.get(0),
        )
        .context("failed to check performance existence")?;
    Ok(count > 0)
}

/// Insert one immutable performance row. The caller is responsible for the
/// existence check and for bumping `player_totals` in the same transaction.
pub fn insert_performance(
    conn: &Connection,
    match_id: &str,
    player_id: i64,
    perf: &Performance,
    breakdown: &ScoreBreakdown,
    scored_at: DateTime<Utc>,
) -> Result<()> {
    let batting = perf.batting.unwrap_or_default();
    let bowling = perf.bowling.unwrap_or_default();
    conn.execute(
        "INSERT INTO performances (
            match_id, player_id,
            did_bat, runs, balls_faced, dismissed,
            did_bowl, balls_bowled, runs_conceded, wickets, maidens,
            catches, stumpings, runouts,
            base_points, catch_points, scored_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            match_id,
            player_id,
            perf.batting.is_some() as i64,
            batting.runs,
            batting.balls_faced,
            batting.dismissed as i64,
            perf.bowling.is_some() as i64,
            bowling.balls_bowled,
            bowling.runs_conceded,
            bowling.wickets,
            bowling.maidens,
            perf.fielding.catches,
            perf.fielding.stumpings,
            perf.fielding.runouts,
            breakdown.total,
            breakdown.catch_points,
            scored_at.to_rfc3339(),
        ],
    )
    .context("failed to insert performance")?;
    Ok(())
}

/// Increment the player's primitive season counters by one performance.
pub fn bump_totals(
    conn: &Connection,
    player_id: i64,
    perf: &Performance,
    total_points: f64,
) -> Result<()> {
    let batting = perf.batting.unwrap_or_default();
    let bowling = perf.bowling.unwrap_or_default();
    conn.execute(
        "INSERT INTO player_totals (
            player_id, matches, runs, balls_faced, dismissals,
            balls_bowled, runs_conceded, wickets, maidens,
            catches, stumpings, runouts, points
         ) VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(player_id) DO UPDATE SET
            matches       = matches + 1,
            runs          = runs + excluded.runs,
            balls_faced   = balls_faced + excluded.balls_faced,
            dismissals    = dismissals + excluded.dismissals,
            balls_bowled  = balls_bowled + excluded.balls_bowled,
            runs_conceded = runs_conceded + excluded.runs_conceded,
            wickets       = wickets + excluded.wickets,
            maidens       = maidens + excluded.maidens,
            catches       = catches + excluded.catches,
            stumpings     = stumpings + excluded.stumpings,
            runouts       = runouts + excluded.runouts,
            points        = points + excluded.points",
        params![
            player_id,
            batting.runs,
            batting.balls_faced,
            batting.dismissed as i64,
            bowling.balls_bowled,
            bowling.runs_conceded,
            bowling.wickets,
            bowling.maidens,
            perf.fielding.catches,
            perf.fielding.stumpings,
            perf.fielding.runouts,
            total_points,
        ],
    )
    .context("failed to bump player totals")?;
    Ok(())
}

/// The primitive season counters for one player, if any performance has been
/// counted.
pub fn player_totals(conn: &Connection, player_id: i64) -> Result<Option<PlayerTotals>> {
    conn.query_row(
        "SELECT player_id, matches, runs, balls_faced, dismissals,
                balls_bowled, runs_conceded, wickets, maidens,
                catches, stumpings, runouts, points
         FROM player_totals WHERE player_id = ?1",
        params![player_id],
        |row| {
            Ok(PlayerTotals {
                player_id: row.get(0)?,
                matches: row.get(1)?,
                runs: row.get(2)?,
                balls_faced: row.get(3)?,
                dismissals: row.get(4)?,
                balls_bowled: row.get(5)?,
                runs_conceded: row.get(6)?,
                wickets: row.get(7)?,
                maidens: row.get(8)?,
                catches: row.get(9)?,
                stumpings: row.get(10)?,
                runouts: row.get(11)?,
                points: row.get(12)?,
            })
        },
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    })
    .context("failed to query player totals")
}

/// Season points for one player (0.0 when nothing has been counted).
pub fn season_points(conn: &Connection, player_id: i64) -> Result<f64> {
    Ok(player_totals(conn, player_id)?.map_or(0.0, |t| t.points))
}

/// All stored performances for a player, in insertion order.
pub fn stored_performances(conn: &Connection, player_id: i64) -> Result<Vec<StoredPerformance>> {
    let mut stmt = conn
        .prepare(
            "SELECT match_id, base_points, catch_points
             FROM performances WHERE player_id = ?1 ORDER BY rowid",
        )
        .context("failed to prepare stored_performances query")?;
    let rows = stmt
        .query_map(params![player_id], |row| {
            Ok(StoredPerformance {
                match_id: row.get(0)?,
                base_points: row.get(1)?,
                catch_points: row.get(2)?,
            })
        })
        .context("failed to query performances")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map performance rows")?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Leagues
// ---------------------------------------------------------------------------

/// Insert a new draft league. Fails on duplicate code.
pub fn insert_league(
    conn: &Connection,
    code: &str,
    name: &str,
    rules: &LeagueRules,
) -> Result<i64> {
    let rules_json = serde_json::to_string(rules).context("failed to serialize league rules")?;
    conn.execute(
        "INSERT INTO leagues (code, name, status, rules) VALUES (?1, ?2, ?3, ?4)",
        params![code, name, LeagueStatus::Draft.as_str(), rules_json],
    )
    .context("failed to insert league")?;
    Ok(conn.last_insert_rowid())
}

type RawLeague = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn league_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawLeague> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn build_league(raw: RawLeague) -> Result<League> {
    let (id, code, name, status, rules, frozen_rules, snapshot, frozen_at) = raw;
    let status = LeagueStatus::from_str_status(&status)
        .with_context(|| format!("unrecognized league status {status:?} for league {id}"))?;
    let rules: LeagueRules =
        serde_json::from_str(&rules).context("failed to deserialize league rules")?;
    let frozen_rules = frozen_rules
        .map(|s| serde_json::from_str(&s).context("failed to deserialize frozen rules"))
        .transpose()?;
    let multipliers_snapshot: Option<HashMap<i64, f64>> = snapshot
        .map(|s| serde_json::from_str(&s).context("failed to deserialize multiplier snapshot"))
        .transpose()?;
    let multipliers_frozen_at = frozen_at
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .context("failed to parse multipliers_frozen_at")
        })
        .transpose()?;
    Ok(League {
        id,
        code,
        name,
        status,
        rules,
        frozen_rules,
        multipliers_snapshot,
        multipliers_frozen_at,
    })
}

const LEAGUE_COLUMNS: &str =
    "id, code, name, status, rules, frozen_rules, multipliers_snapshot, multipliers_frozen_at";

/// Look up a league by id.
pub fn league(conn: &Connection, id: i64) -> Result<Option<League>> {
    let raw = conn
        .query_row(
            &format!("SELECT {LEAGUE_COLUMNS} FROM leagues WHERE id = ?1"),
            params![id],
            league_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("failed to query league")?;
    raw.map(build_league).transpose()
}

/// Look up a league by join code.
pub fn league_by_code(conn: &Connection, code: &str) -> Result<Option<League>> {
    let raw = conn
        .query_row(
            &format!("SELECT {LEAGUE_COLUMNS} FROM leagues WHERE code = ?1"),
            params![code],
            league_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
        .context("failed to query league by code")?;
    raw.map(build_league).transpose()
}

/// All leagues currently in one of `statuses`, ordered by id.
pub fn leagues_with_status(
    conn: &Connection,
    statuses: &[LeagueStatus],
) -> Result<Vec<League>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {LEAGUE_COLUMNS} FROM leagues ORDER BY id"))
        .context("failed to prepare leagues query")?;
    let raws = stmt
        .query_map([], league_from_row)
        .context("failed to query leagues")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map league rows")?;
    let mut leagues = Vec::new();
    for raw in raws {
        let league = build_league(raw)?;
        if statuses.contains(&league.status) {
            leagues.push(league);
        }
    }
    Ok(leagues)
}

/// Replace a draft league's mutable rules. Lifecycle enforcement is the
/// caller's job.
pub fn update_league_rules(conn: &Connection, id: i64, rules: &LeagueRules) -> Result<()> {
    let rules_json = serde_json::to_string(rules).context("failed to serialize league rules")?;
    conn.execute(
        "UPDATE leagues SET rules = ?2 WHERE id = ?1",
        params![id, rules_json],
    )
    .context("failed to update league rules")?;
    Ok(())
}

/// Confirm-time freeze: copy rules into the frozen column, write the first
/// multiplier snapshot, and flip status to active, in one statement.
pub fn freeze_league(
    conn: &Connection,
    id: i64,
    frozen_rules: &LeagueRules,
    snapshot: &HashMap<i64, f64>,
    frozen_at: DateTime<Utc>,
) -> Result<()> {
    let rules_json =
        serde_json::to_string(frozen_rules).context("failed to serialize frozen rules")?;
    let snapshot_json =
        serde_json::to_string(snapshot).context("failed to serialize multiplier snapshot")?;
    conn.execute(
        "UPDATE leagues SET
            status = ?2,
            frozen_rules = ?3,
            multipliers_snapshot = ?4,
            multipliers_frozen_at = ?5
         WHERE id = ?1",
        params![
            id,
            LeagueStatus::Active.as_str(),
            rules_json,
            snapshot_json,
            frozen_at.to_rfc3339(),
        ],
    )
    .context("failed to freeze league")?;
    Ok(())
}

/// Whole-blob snapshot swap (drift step). Readers never see a partial map.
pub fn write_snapshot(
    conn: &Connection,
    id: i64,
    snapshot: &HashMap<i64, f64>,
    frozen_at: DateTime<Utc>,
) -> Result<()> {
    let snapshot_json =
        serde_json::to_string(snapshot).context("failed to serialize multiplier snapshot")?;
    conn.execute(
        "UPDATE leagues SET multipliers_snapshot = ?2, multipliers_frozen_at = ?3 WHERE id = ?1",
        params![id, snapshot_json, frozen_at.to_rfc3339()],
    )
    .context("failed to write multiplier snapshot")?;
    Ok(())
}

/// Flip a league's status.
pub fn set_league_status(conn: &Connection, id: i64, status: LeagueStatus) -> Result<()> {
    conn.execute(
        "UPDATE leagues SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )
    .context("failed to set league status")?;
    Ok(())
}

/// Delete a league and its roster. Only valid for draft leagues, which have
/// no teams; lifecycle enforcement is the caller's job.
pub fn delete_league(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM roster_entries WHERE league_id = ?1",
        params![id],
    )
    .context("failed to delete roster entries")?;
    conn.execute("DELETE FROM leagues WHERE id = ?1", params![id])
        .context("failed to delete league")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Roster entries
// ---------------------------------------------------------------------------

/// Add a player to a league roster. Idempotent; pre-existing entries keep
/// their active flag.
pub fn add_roster_entry(
    conn: &Connection,
    league_id: i64,
    player_id: i64,
    active: bool,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO roster_entries (league_id, player_id, active)
         VALUES (?1, ?2, ?3)",
        params![league_id, player_id, active as i64],
    )
    .context("failed to add roster entry")?;
    Ok(())
}

/// Remove a player from a league roster.
pub fn remove_roster_entry(conn: &Connection, league_id: i64, player_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM roster_entries WHERE league_id = ?1 AND player_id = ?2",
        params![league_id, player_id],
    )
    .context("failed to remove roster entry")?;
    Ok(())
}

/// The full roster of a league, ordered by player id.
pub fn roster_entries(conn: &Connection, league_id: i64) -> Result<Vec<RosterEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT league_id, player_id, active FROM roster_entries
             WHERE league_id = ?1 ORDER BY player_id",
        )
        .context("failed to prepare roster query")?;
    let rows = stmt
        .query_map(params![league_id], |row| {
            Ok(RosterEntry {
                league_id: row.get(0)?,
                player_id: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
            })
        })
        .context("failed to query roster entries")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map roster rows")?;
    Ok(rows)
}

/// Promote every roster entry for this player to active (first matched
/// performance).
pub fn activate_roster_entries(conn: &Connection, player_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE roster_entries SET active = 1 WHERE player_id = ?1",
        params![player_id],
    )
    .context("failed to activate roster entries")?;
    Ok(())
}

/// Distinct leagues whose rosters contain any of `player_ids`.
pub fn leagues_containing_players(conn: &Connection, player_ids: &[i64]) -> Result<Vec<i64>> {
    if player_ids.is_empty() {
        return Ok(vec![]);
    }
    let placeholders = vec!["?"; player_ids.len()].join(", ");
    let mut stmt = conn
        .prepare(&format!(
            "SELECT DISTINCT league_id FROM roster_entries
             WHERE player_id IN ({placeholders}) ORDER BY league_id"
        ))
        .context("failed to prepare league intersection query")?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(player_ids.iter()), |row| {
            row.get(0)
        })
        .context("failed to query league intersection")?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .context("failed to map league ids")?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Teams
// ---------------------------------------------------------------------------

/// Create an empty team for `owner` in a league.
pub fn insert_team(conn: &Connection, league_id: i64, owner: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO teams (league_id, owner, name) VALUES (?1, ?2, ?3)",
        params![league_id, owner, name],
    )
    .context("failed to insert team")?;
    Ok(conn.last_insert_rowid())
}

fn team_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Team> {
    let finalized: Option<String> = row.get(5)?;
    let finalized_at = finalized
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;
    Ok(Team {
        id: row.get(0)?,
        league_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        transfers_used: row.get(4)?,
        finalized_at,
    })
}

const TEAM_COLUMNS: &str = "id, league_id, owner, name, transfers_used, finalized_at";

/// Look up a team by id.
pub fn team(conn: &Connection, id: i64) -> Result<Option<Team>> {
    conn.query_row(
        &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?1"),
        params![id],
        team_from_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    })
    .context("failed to query team")
}

/// All teams joined to a league, ordered by id.
pub fn teams_in_league(conn: &Connection, league_id: i64) -> Result<Vec<Team>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE league_id = ?1 ORDER BY id"
        ))
        .context("failed to prepare teams query")?;
    let rows = stmt
        .query_map(params![league_id], team_from_row)
        .context("failed to query teams")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map team rows")?;
    Ok(rows)
}

/// The squad of a team, ordered by player id.
pub fn squad(conn: &Connection, team_id: i64) -> Result<Vec<SquadMember>> {
    let mut stmt = conn
        .prepare(
            "SELECT player_id, is_captain, is_vice_captain, is_wicket_keeper
             FROM team_players WHERE team_id = ?1 ORDER BY player_id",
        )
        .context("failed to prepare squad query")?;
    let rows = stmt
        .query_map(params![team_id], |row| {
            Ok(SquadMember {
                player_id: row.get(0)?,
                is_captain: row.get::<_, i64>(1)? != 0,
                is_vice_captain: row.get::<_, i64>(2)? != 0,
                is_wicket_keeper: row.get::<_, i64>(3)? != 0,
            })
        })
        .context("failed to query squad")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map squad rows")?;
    Ok(rows)
}

/// Add a squad member with designations.
pub fn add_squad_member(conn: &Connection, team_id: i64, member: &SquadMember) -> Result<()> {
    conn.execute(
        "INSERT INTO team_players (team_id, player_id, is_captain, is_vice_captain, is_wicket_keeper)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            team_id,
            member.player_id,
            member.is_captain as i64,
            member.is_vice_captain as i64,
            member.is_wicket_keeper as i64,
        ],
    )
    .context("failed to add squad member")?;
    Ok(())
}

/// Remove a squad member. Returns whether a row was deleted.
pub fn remove_squad_member(conn: &Connection, team_id: i64, player_id: i64) -> Result<bool> {
    let changed = conn
        .execute(
            "DELETE FROM team_players WHERE team_id = ?1 AND player_id = ?2",
            params![team_id, player_id],
        )
        .context("failed to remove squad member")?;
    Ok(changed > 0)
}

/// Overwrite a member's designation flags. Returns whether the member exists.
pub fn set_designations(conn: &Connection, team_id: i64, member: &SquadMember) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE team_players SET is_captain = ?3, is_vice_captain = ?4, is_wicket_keeper = ?5
             WHERE team_id = ?1 AND player_id = ?2",
            params![
                team_id,
                member.player_id,
                member.is_captain as i64,
                member.is_vice_captain as i64,
                member.is_wicket_keeper as i64,
            ],
        )
        .context("failed to set designations")?;
    Ok(changed > 0)
}

/// Stamp a team as finalized.
pub fn set_team_finalized(conn: &Connection, team_id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE teams SET finalized_at = ?2 WHERE id = ?1",
        params![team_id, at.to_rfc3339()],
    )
    .context("failed to finalize team")?;
    Ok(())
}

/// Count a completed transfer.
pub fn bump_transfers(conn: &Connection, team_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE teams SET transfers_used = transfers_used + 1 WHERE id = ?1",
        params![team_id],
    )
    .context("failed to bump transfer count")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{BattingFacet, FieldingFacet};

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn sample_player(name: &str) -> NewPlayer {
        NewPlayer {
            name: name.to_string(),
            club: "ACC".to_string(),
            rl_team: "ACC 1".to_string(),
            role: PlayerRole::Batsman,
            baseline_multiplier: 1.0,
            legacy_import: false,
        }
    }

    fn sample_rules() -> LeagueRules {
        LeagueRules {
            squad_size: 11,
            min_batsmen: 4,
            min_bowlers: 4,
            max_players_per_real_team: 4,
            require_from_each_real_team: false,
            min_players_per_real_team: 1,
            real_teams: vec!["ACC 1".into(), "ACC 2".into()],
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                    .unwrap();
                let names = stmt
                    .query_map([], |row| row.get(0))
                    .unwrap()
                    .collect::<std::result::Result<Vec<String>, _>>()
                    .unwrap();
                Ok(names)
            })
            .unwrap();

        for table in [
            "players",
            "performances",
            "player_totals",
            "leagues",
            "roster_entries",
            "teams",
            "team_players",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    #[test]
    fn upsert_player_returns_id_and_no_duplicates() {
        let db = test_db();
        db.with_conn(|conn| {
            let id1 = upsert_player(conn, &sample_player("Anil Kandhai"))?;
            assert!(id1 > 0);

            let mut updated = sample_player("Anil Kandhai");
            updated.rl_team = "ACC 2".to_string();
            let id2 = upsert_player(conn, &updated)?;
            assert_eq!(id1, id2);

            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))?;
            assert_eq!(count, 1);

            let stored = player(conn, id1)?.unwrap();
            assert_eq!(stored.rl_team, "ACC 2");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn same_name_different_club_is_a_separate_player() {
        let db = test_db();
        db.with_conn(|conn| {
            let id1 = upsert_player(conn, &sample_player("Ravi Singh"))?;
            let mut other = sample_player("Ravi Singh");
            other.club = "VRA".to_string();
            let id2 = upsert_player(conn, &other)?;
            assert_ne!(id1, id2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn players_by_club_is_scoped() {
        let db = test_db();
        db.with_conn(|conn| {
            upsert_player(conn, &sample_player("A"))?;
            upsert_player(conn, &sample_player("B"))?;
            let mut other = sample_player("C");
            other.club = "VRA".to_string();
            upsert_player(conn, &other)?;

            assert_eq!(players_by_club(conn, "ACC")?.len(), 2);
            assert_eq!(players_by_club(conn, "VRA")?.len(), 1);
            assert_eq!(all_players(conn)?.len(), 3);
            Ok(())
        })
        .unwrap();
    }

    // ------------------------------------------------------------------
    // Performances / totals
    // ------------------------------------------------------------------

    fn sample_perf() -> Performance {
        Performance {
            batting: Some(BattingFacet {
                runs: 42,
                balls_faced: 30,
                dismissed: true,
            }),
            bowling: None,
            fielding: FieldingFacet {
                catches: 1,
                stumpings: 0,
                runouts: 0,
            },
        }
    }

    fn sample_breakdown() -> ScoreBreakdown {
        ScoreBreakdown {
            batting: 60.0,
            bowling: 0.0,
            fielding: 4.0,
            catch_points: 4.0,
            total: 64.0,
        }
    }

    #[test]
    fn performance_round_trip_and_totals() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = upsert_player(conn, &sample_player("Batter"))?;
            assert!(!performance_exists(conn, "m1", id)?);

            insert_performance(conn, "m1", id, &sample_perf(), &sample_breakdown(), Utc::now())?;
            bump_totals(conn, id, &sample_perf(), 64.0)?;

            assert!(performance_exists(conn, "m1", id)?);
            let totals = player_totals(conn, id)?.unwrap();
            assert_eq!(totals.matches, 1);
            assert_eq!(totals.runs, 42);
            assert_eq!(totals.catches, 1);
            assert!((totals.points - 64.0).abs() < 1e-9);
            assert!((season_points(conn, id)? - 64.0).abs() < 1e-9);

            let stored = stored_performances(conn, id)?;
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0].match_id, "m1");
            assert!((stored[0].catch_points - 4.0).abs() < 1e-9);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn season_points_default_to_zero() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = upsert_player(conn, &sample_player("Fresh"))?;
            assert!((season_points(conn, id)?).abs() < f64::EPSILON);
            assert!(player_totals(conn, id)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let db = test_db();
        let id = db
            .with_conn(|conn| upsert_player(conn, &sample_player("Rollback")))
            .unwrap();

        let result: Result<()> = db.with_tx(|tx| {
            insert_performance(tx, "m1", id, &sample_perf(), &sample_breakdown(), Utc::now())?;
            anyhow::bail!("cancelled mid-scorecard")
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            assert!(!performance_exists(conn, "m1", id)?);
            Ok(())
        })
        .unwrap();
    }

    // ------------------------------------------------------------------
    // Leagues / roster
    // ------------------------------------------------------------------

    #[test]
    fn league_round_trip_preserves_rules_json() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert_league(conn, "AMST", "Amsterdam Sixes", &sample_rules())?;
            let league = league(conn, id)?.unwrap();
            assert_eq!(league.code, "AMST");
            assert_eq!(league.status, LeagueStatus::Draft);
            assert_eq!(league.rules, sample_rules());
            assert!(league.frozen_rules.is_none());
            assert!(league.multipliers_snapshot.is_none());

            let by_code = league_by_code(conn, "AMST")?.unwrap();
            assert_eq!(by_code.id, id);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn freeze_league_sets_snapshot_and_status() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert_league(conn, "AMST", "Amsterdam Sixes", &sample_rules())?;
            let mut snapshot = HashMap::new();
            snapshot.insert(1i64, 1.0);
            snapshot.insert(2i64, 0.8);
            freeze_league(conn, id, &sample_rules(), &snapshot, Utc::now())?;

            let league = league(conn, id)?.unwrap();
            assert_eq!(league.status, LeagueStatus::Active);
            assert_eq!(league.frozen_rules.as_ref(), Some(&sample_rules()));
            assert_eq!(league.multipliers_snapshot.as_ref(), Some(&snapshot));
            assert!(league.multipliers_frozen_at.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn roster_entries_activate_across_leagues() {
        let db = test_db();
        db.with_conn(|conn| {
            let p = upsert_player(conn, &sample_player("Legacy"))?;
            let l1 = insert_league(conn, "AAAA", "One", &sample_rules())?;
            let l2 = insert_league(conn, "BBBB", "Two", &sample_rules())?;
            add_roster_entry(conn, l1, p, false)?;
            add_roster_entry(conn, l2, p, false)?;

            activate_roster_entries(conn, p)?;
            assert!(roster_entries(conn, l1)?[0].active);
            assert!(roster_entries(conn, l2)?[0].active);

            assert_eq!(leagues_containing_players(conn, &[p])?, vec![l1, l2]);
            assert!(leagues_containing_players(conn, &[])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_league_removes_roster() {
        let db = test_db();
        db.with_conn(|conn| {
            let p = upsert_player(conn, &sample_player("Roster"))?;
            let id = insert_league(conn, "GONE", "Doomed", &sample_rules())?;
            add_roster_entry(conn, id, p, true)?;

            delete_league(conn, id)?;
            assert!(league(conn, id)?.is_none());
            assert!(roster_entries(conn, id)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    #[test]
    fn team_and_squad_round_trip() {
        let db = test_db();
        db.with_conn(|conn| {
            let league_id = insert_league(conn, "AMST", "Amsterdam Sixes", &sample_rules())?;
            let p = upsert_player(conn, &sample_player("Keeper"))?;
            let team_id = insert_team(conn, league_id, "user-1", "Flying Dutchmen")?;

            let stored = team(conn, team_id)?.unwrap();
            assert_eq!(stored.owner, "user-1");
            assert_eq!(stored.transfers_used, 0);
            assert!(stored.finalized_at.is_none());

            add_squad_member(
                conn,
                team_id,
                &SquadMember {
                    player_id: p,
                    is_captain: true,
                    is_vice_captain: false,
                    is_wicket_keeper: true,
                },
            )?;
            let members = squad(conn, team_id)?;
            assert_eq!(members.len(), 1);
            assert!(members[0].is_captain);
            assert!(members[0].is_wicket_keeper);

            assert!(set_designations(
                conn,
                team_id,
                &SquadMember {
                    player_id: p,
                    is_captain: false,
                    is_vice_captain: true,
                    is_wicket_keeper: false,
                },
            )?);
            assert!(squad(conn, team_id)?[0].is_vice_captain);

            assert!(remove_squad_member(conn, team_id, p)?);
            assert!(!remove_squad_member(conn, team_id, p)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn finalize_and_transfer_counters() {
        let db = test_db();
        db.with_conn(|conn| {
            let league_id = insert_league(conn, "AMST", "Amsterdam Sixes", &sample_rules())?;
            let team_id = insert_team(conn, league_id, "user-1", "Team")?;

            set_team_finalized(conn, team_id, Utc::now())?;
            assert!(team(conn, team_id)?.unwrap().is_finalized());

            bump_transfers(conn, team_id)?;
            bump_transfers(conn, team_id)?;
            assert_eq!(team(conn, team_id)?.unwrap().transfers_used, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn duplicate_owner_in_league_is_rejected() {
        let db = test_db();
        db.with_conn(|conn| {
            let league_id = insert_league(conn, "AMST", "Amsterdam Sixes", &sample_rules())?;
            insert_team(conn, league_id, "user-1", "First")?;
            assert!(insert_team(conn, league_id, "user-1", "Second").is_err());
            Ok(())
        })
        .unwrap();
    }
}
