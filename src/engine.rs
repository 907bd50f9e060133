// The engine handle: configuration, database, ruleset, and per-league writer
// locks, threaded explicitly through every operation.
//
// Admin commands drive the league lifecycle; user commands mutate teams and
// all flow through the validator. Scheduled ingestion lives in `ingest` and
// borrows this handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::aggregate::{self, AggregateError, PlayerFilter, SeasonAggregates};
use crate::config::Config;
use crate::db::{self, Database, Player};
use crate::league::drift::{drift_league, DriftOutcome};
use crate::league::lifecycle;
use crate::league::{League, LeagueError, LeagueRules, LeagueStatus};
use crate::scoring::ruleset::Ruleset;
use crate::team::scorer::{self, TeamScore};
use crate::team::validator::{self, SquadPlayer, Violation};
use crate::team::{Designations, SquadMember, Team, TeamError};

/// Process-wide engine state. Created once at startup and passed explicitly;
/// there is no ambient global.
pub struct Engine {
    db: Database,
    config: Config,
    ruleset: Ruleset,
    /// Lazily created per-league writer locks. State transitions, drift, and
    /// team finalization within one league serialize on these; leagues
    /// proceed independently.
    league_locks: std::sync::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl Engine {
    /// Build the engine: resolves the configured scoring ruleset up front so
    /// an unsupported version fails at startup, not mid-ingest.
    pub fn new(db: Database, config: Config) -> anyhow::Result<Self> {
        let ruleset = Ruleset::for_version(&config.scoring.ruleset_version)
            .context("failed to load scoring ruleset")?;
        Ok(Engine {
            db,
            config,
            ruleset,
            league_locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    fn league_lock(&self, league_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.league_locks.lock().expect("league lock map poisoned");
        locks
            .entry(league_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------
    // Admin commands
    // -----------------------------------------------------------------

    pub fn create_draft_league(
        &self,
        code: &str,
        name: &str,
        rules: &LeagueRules,
    ) -> Result<i64, LeagueError> {
        self.db
            .with_tx(|tx| Ok(lifecycle::create_draft_league(tx, code, name, rules)))?
    }

    pub async fn edit_draft_rules(
        &self,
        league_id: i64,
        rules: &LeagueRules,
    ) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::edit_rules(tx, league_id, rules)))?
    }

    pub async fn add_roster_player(
        &self,
        league_id: i64,
        player_id: i64,
        active: bool,
    ) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::add_roster_player(tx, league_id, player_id, active)))?
    }

    pub async fn remove_roster_player(
        &self,
        league_id: i64,
        player_id: i64,
    ) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::remove_roster_player(tx, league_id, player_id)))?
    }

    pub async fn confirm_league(&self, league_id: i64) -> Result<League, LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::confirm(tx, league_id, Utc::now())))?
    }

    pub async fn lock_league(&self, league_id: i64) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db.with_tx(|tx| Ok(lifecycle::lock(tx, league_id)))?
    }

    pub async fn complete_league(&self, league_id: i64) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::complete(tx, league_id)))?
    }

    pub async fn delete_draft_league(&self, league_id: i64) -> Result<(), LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(lifecycle::delete_draft_league(tx, league_id)))?
    }

    /// One drift step for one league, under its writer lock.
    pub async fn drift_league(&self, league_id: i64) -> Result<DriftOutcome, LeagueError> {
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;
        self.db
            .with_tx(|tx| Ok(drift_league(tx, league_id, &self.config.drift, Utc::now())))?
    }

    /// On-demand ingestion trigger: one full run against `source`, identical
    /// to a scheduled firing.
    pub async fn trigger_ingestion_now(
        &self,
        source: &dyn crate::ingest::scraper::MatchSource,
    ) -> anyhow::Result<crate::ingest::IngestReport> {
        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        crate::ingest::run_ingestion(self, source, &cancel_rx).await
    }

    /// Drift every league in a driftable state. Leagues are independent;
    /// a skip in one never blocks the others.
    pub async fn run_drift_now(&self) -> Result<Vec<(i64, DriftOutcome)>, LeagueError> {
        let candidates = self.db.with_conn(|conn| {
            Ok(db::leagues_with_status(
                conn,
                &[LeagueStatus::Active, LeagueStatus::Locked],
            )?)
        })?;

        let mut outcomes = Vec::new();
        for league in candidates {
            let outcome = self.drift_league(league.id).await?;
            outcomes.push((league.id, outcome));
        }
        Ok(outcomes)
    }

    // -----------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------

    /// Join a league by code; the league must be active.
    pub async fn join_league(
        &self,
        code: &str,
        owner: &str,
        team_name: &str,
    ) -> Result<i64, TeamError> {
        let league = self.db.with_conn(|conn| {
            Ok(db::league_by_code(conn, code)?.ok_or(LeagueError::UnknownCode {
                code: code.to_string(),
            }))
        })??;

        if league.status != LeagueStatus::Active {
            return Err(LeagueError::IllegalTransition {
                from: league.status,
                action: "join",
            }
            .into());
        }

        let lock = self.league_lock(league.id);
        let _guard = lock.lock().await;
        let already = self.db.with_conn(|conn| {
            Ok(db::teams_in_league(conn, league.id)?
                .iter()
                .any(|t| t.owner == owner))
        })?;
        if already {
            return Err(TeamError::AlreadyJoined {
                owner: owner.to_string(),
            });
        }

        let team_id = self
            .db
            .with_tx(|tx| db::insert_team(tx, league.id, owner, team_name))?;
        info!(league_id = league.id, team_id, owner, "team joined league");
        Ok(team_id)
    }

    /// Add a player to an unfinalized team.
    pub async fn add_player(
        &self,
        team_id: i64,
        player_id: i64,
        designations: Designations,
    ) -> Result<(), TeamError> {
        let league_id = self.team_league_id(team_id)?;
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        // Re-read under the writer lock: a concurrent transition cannot slip
        // between the check and the mutation.
        let (team, league) = self.team_and_league(team_id)?;
        require_active(&league, "mutate teams in")?;
        if team.is_finalized() {
            return Err(TeamError::AlreadyFinalized);
        }

        self.db.with_tx(|tx| {
            let squad = load_squad(tx, team_id)?;
            let incoming = db::player(tx, player_id)?
                .ok_or(AggregateError::UnknownPlayer { player_id })
                .map_err(|e| anyhow::anyhow!(e))?;
            let roster = roster_ids(tx, league.id)?;
            let rules = league.effective_rules().map_err(|e| anyhow::anyhow!(e))?;

            let violations =
                validator::validate_add(&squad, &incoming, designations, rules, &roster);
            if !violations.is_empty() {
                return Ok(Err(TeamError::Rejected(violations)));
            }

            db::add_squad_member(
                tx,
                team_id,
                &SquadMember {
                    player_id,
                    is_captain: designations.captain,
                    is_vice_captain: designations.vice_captain,
                    is_wicket_keeper: designations.wicket_keeper,
                },
            )?;
            Ok(Ok(()))
        })?
    }

    /// Remove a player from an unfinalized team.
    pub async fn remove_player(&self, team_id: i64, player_id: i64) -> Result<(), TeamError> {
        let league_id = self.team_league_id(team_id)?;
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        let (team, league) = self.team_and_league(team_id)?;
        require_active(&league, "mutate teams in")?;
        if team.is_finalized() {
            return Err(TeamError::AlreadyFinalized);
        }

        let removed = self
            .db
            .with_tx(|tx| db::remove_squad_member(tx, team_id, player_id))?;
        if !removed {
            return Err(TeamError::NotOnTeam { player_id });
        }
        Ok(())
    }

    /// Re-assign a member's designations.
    pub async fn set_role(
        &self,
        team_id: i64,
        player_id: i64,
        designations: Designations,
    ) -> Result<(), TeamError> {
        let league_id = self.team_league_id(team_id)?;
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        let (_, league) = self.team_and_league(team_id)?;
        require_active(&league, "mutate teams in")?;

        self.db.with_tx(|tx| {
            let squad = load_squad(tx, team_id)?;
            let Some(current) = squad.iter().find(|s| s.player.id == player_id) else {
                return Ok(Err(TeamError::NotOnTeam { player_id }));
            };

            let others: Vec<SquadPlayer> = squad
                .iter()
                .filter(|s| s.player.id != player_id)
                .cloned()
                .collect();
            let rules = league.effective_rules().map_err(|e| anyhow::anyhow!(e))?;
            let roster = roster_ids(tx, league.id)?;
            // Membership rules already hold; only designation checks apply.
            let violations: Vec<Violation> =
                validator::validate_add(&others, &current.player, designations, rules, &roster)
                    .into_iter()
                    .filter(|v| {
                        matches!(
                            v.code,
                            validator::ViolationCode::DuplicateCaptain
                                | validator::ViolationCode::DuplicateViceCaptain
                                | validator::ViolationCode::DuplicateWicketKeeper
                                | validator::ViolationCode::WicketKeeperRoleRequired
                        )
                    })
                    .collect();
            if !violations.is_empty() {
                return Ok(Err(TeamError::Rejected(violations)));
            }

            db::set_designations(
                tx,
                team_id,
                &SquadMember {
                    player_id,
                    is_captain: designations.captain,
                    is_vice_captain: designations.vice_captain,
                    is_wicket_keeper: designations.wicket_keeper,
                },
            )?;
            Ok(Ok(()))
        })?
    }

    /// Finalize a team: the squad must satisfy every enabled quota rule.
    pub async fn finalize_team(&self, team_id: i64) -> Result<(), TeamError> {
        let league_id = self.team_league_id(team_id)?;
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        let (team, league) = self.team_and_league(team_id)?;
        require_active(&league, "finalize teams in")?;
        if team.is_finalized() {
            return Err(TeamError::AlreadyFinalized);
        }

        self.db.with_tx(|tx| {
            let squad = load_squad(tx, team_id)?;
            let rules = league.effective_rules().map_err(|e| anyhow::anyhow!(e))?;
            let violations = validator::validate_finalized_squad(&squad, rules);
            if !violations.is_empty() {
                return Ok(Err(TeamError::Rejected(violations)));
            }
            db::set_team_finalized(tx, team_id, Utc::now())?;
            Ok(Ok(()))
        })??;
        info!(team_id, "team finalized");
        Ok(())
    }

    /// Preflight a transfer without mutating anything.
    pub fn validate_transfer(
        &self,
        team_id: i64,
        p_out: i64,
        p_in: i64,
    ) -> Result<Vec<Violation>, TeamError> {
        let (_, league) = self.team_and_league(team_id)?;
        self.db.with_conn(|conn| {
            let squad = load_squad(conn, team_id)?;
            let incoming = db::player(conn, p_in)?
                .ok_or(AggregateError::UnknownPlayer { player_id: p_in })
                .map_err(|e| anyhow::anyhow!(e))?;
            let rules = league.effective_rules().map_err(|e| anyhow::anyhow!(e))?;
            Ok(validator::validate_transfer(
                &squad,
                p_out,
                &incoming,
                rules,
                &roster_ids(conn, league.id)?,
            ))
        })
        .map_err(TeamError::Db)
    }

    /// Transfer: an atomic (remove, add) pair on a finalized team.
    pub async fn transfer(&self, team_id: i64, p_out: i64, p_in: i64) -> Result<(), TeamError> {
        let league_id = self.team_league_id(team_id)?;
        let lock = self.league_lock(league_id);
        let _guard = lock.lock().await;

        let (team, league) = self.team_and_league(team_id)?;
        require_active(&league, "transfer in")?;
        if !team.is_finalized() {
            return Err(TeamError::NotFinalized);
        }

        self.db.with_tx(|tx| {
            let squad = load_squad(tx, team_id)?;
            if !squad.iter().any(|s| s.player.id == p_out) {
                return Ok(Err(TeamError::NotOnTeam { player_id: p_out }));
            }
            let incoming = db::player(tx, p_in)?
                .ok_or(AggregateError::UnknownPlayer { player_id: p_in })
                .map_err(|e| anyhow::anyhow!(e))?;
            let rules = league.effective_rules().map_err(|e| anyhow::anyhow!(e))?;

            let violations =
                validator::validate_transfer(&squad, p_out, &incoming, rules, &roster_ids(tx, league.id)?);
            if !violations.is_empty() {
                return Ok(Err(TeamError::Rejected(violations)));
            }

            db::remove_squad_member(tx, team_id, p_out)?;
            db::add_squad_member(
                tx,
                team_id,
                &SquadMember {
                    player_id: p_in,
                    is_captain: false,
                    is_vice_captain: false,
                    is_wicket_keeper: false,
                },
            )?;
            db::bump_transfers(tx, team_id)?;
            Ok(Ok(()))
        })??;
        info!(team_id, p_out, p_in, "transfer applied");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Score every finalized team in a league, best first.
    pub fn leaderboard(&self, league_id: i64) -> Result<Vec<TeamScore>, LeagueError> {
        self.db.with_conn(|conn| {
            let league = match lifecycle::fetch(conn, league_id) {
                Ok(league) => league,
                Err(e) => return Ok(Err(e)),
            };
            Ok(scorer::leaderboard(conn, &league, &self.ruleset))
        })?
    }

    /// One team's scoring breakdown.
    pub fn team_score(&self, team_id: i64) -> Result<TeamScore, TeamError> {
        let (team, league) = self.team_and_league(team_id)?;
        Ok(self
            .db
            .with_conn(|conn| Ok(scorer::score_team(conn, &league, &team, &self.ruleset)))??)
    }

    /// Season aggregates for one player.
    pub fn player_totals(&self, player_id: i64) -> Result<SeasonAggregates, AggregateError> {
        self.db
            .with_conn(|conn| Ok(aggregate::player_totals(conn, player_id)))?
    }

    /// All players matching `filter` with their aggregates.
    pub fn players(
        &self,
        filter: &PlayerFilter,
    ) -> Result<Vec<(Player, SeasonAggregates)>, AggregateError> {
        self.db
            .with_conn(|conn| Ok(aggregate::all_players(conn, filter)))?
    }

    // -----------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------

    fn team_league_id(&self, team_id: i64) -> Result<i64, TeamError> {
        self.db.with_conn(|conn| {
            Ok(db::team(conn, team_id)?
                .map(|t| t.league_id)
                .ok_or(TeamError::UnknownTeam { id: team_id }))
        })?
    }

    fn team_and_league(&self, team_id: i64) -> Result<(Team, League), TeamError> {
        self.db.with_conn(|conn| {
            let Some(team) = db::team(conn, team_id)? else {
                return Ok(Err(TeamError::UnknownTeam { id: team_id }));
            };
            let league = match lifecycle::fetch(conn, team.league_id) {
                Ok(league) => league,
                Err(e) => return Ok(Err(e.into())),
            };
            Ok(Ok((team, league)))
        })?
    }
}

fn require_active(league: &League, action: &'static str) -> Result<(), TeamError> {
    if league.status != LeagueStatus::Active {
        return Err(LeagueError::IllegalTransition {
            from: league.status,
            action,
        }
        .into());
    }
    Ok(())
}

/// Join squad slots with their player rows.
fn load_squad(conn: &rusqlite::Connection, team_id: i64) -> anyhow::Result<Vec<SquadPlayer>> {
    let mut squad = Vec::new();
    for member in db::squad(conn, team_id)? {
        let player = db::player(conn, member.player_id)?.ok_or_else(|| {
            anyhow::anyhow!("squad references unknown player {}", member.player_id)
        })?;
        squad.push(SquadPlayer { player, member });
    }
    Ok(squad)
}

fn roster_ids(conn: &rusqlite::Connection, league_id: i64) -> anyhow::Result<HashSet<i64>> {
    Ok(db::roster_entries(conn, league_id)?
        .into_iter()
        .map(|e| e.player_id)
        .collect())
}
