// Aggregator: the only write path to season totals.
//
// Upserts are idempotent through the `(match_id, player_id)` primary key;
// the orchestrator relies on that to make retries and overlapping scrape
// windows safe.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

use crate::db::{self, Player, PlayerRole, PlayerTotals};
use crate::scoring::{score_performance, Performance, ScoringError};
use crate::scoring::ruleset::Ruleset;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AggregateError {
    /// The caller must register the player before recording performances.
    #[error("player {player_id} is not registered")]
    UnknownPlayer { player_id: i64 },

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

/// Result of one upsert attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    /// The performance was scored and counted.
    Applied { base_points: f64 },
    /// The match was already counted for this player; nothing changed.
    AlreadyCounted,
}

/// Record one performance for one player, once.
///
/// Re-applying the same `(match_id, player_id)` is a silent no-op. Runs on
/// the caller's connection so a whole scorecard can share one transaction.
pub fn upsert_performance(
    conn: &Connection,
    ruleset: &Ruleset,
    match_id: &str,
    player_id: i64,
    perf: &Performance,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, AggregateError> {
    if db::player(conn, player_id)?.is_none() {
        return Err(AggregateError::UnknownPlayer { player_id });
    }

    if db::performance_exists(conn, match_id, player_id)? {
        debug!(match_id, player_id, "performance already counted, skipping");
        return Ok(UpsertOutcome::AlreadyCounted);
    }

    let breakdown = score_performance(perf, ruleset)?;
    db::insert_performance(conn, match_id, player_id, perf, &breakdown, now)?;
    db::bump_totals(conn, player_id, perf, breakdown.total)?;
    // First counted performance promotes any legacy roster entries.
    db::activate_roster_entries(conn, player_id)?;

    Ok(UpsertOutcome::Applied {
        base_points: breakdown.total,
    })
}

// ---------------------------------------------------------------------------
// Season aggregates
// ---------------------------------------------------------------------------

/// Primitive counters plus on-the-fly derived averages. The derived values
/// are never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonAggregates {
    pub totals: PlayerTotals,
}

impl SeasonAggregates {
    /// Runs per dismissal; `None` while undismissed.
    pub fn batting_average(&self) -> Option<f64> {
        (self.totals.dismissals > 0)
            .then(|| self.totals.runs as f64 / self.totals.dismissals as f64)
    }

    /// Runs per 100 balls faced; `None` before facing a ball.
    pub fn strike_rate(&self) -> Option<f64> {
        (self.totals.balls_faced > 0)
            .then(|| self.totals.runs as f64 / self.totals.balls_faced as f64 * 100.0)
    }

    /// Runs conceded per over; `None` before bowling a ball.
    pub fn economy(&self) -> Option<f64> {
        (self.totals.balls_bowled > 0)
            .then(|| self.totals.runs_conceded as f64 / (self.totals.balls_bowled as f64 / 6.0))
    }

    /// Base points per counted match; `None` before the first match.
    pub fn points_per_match(&self) -> Option<f64> {
        (self.totals.matches > 0).then(|| self.totals.points / self.totals.matches as f64)
    }
}

/// Season aggregates for one registered player. A player with no counted
/// performances has all-zero primitives.
pub fn player_totals(
    conn: &Connection,
    player_id: i64,
) -> Result<SeasonAggregates, AggregateError> {
    if db::player(conn, player_id)?.is_none() {
        return Err(AggregateError::UnknownPlayer { player_id });
    }
    let totals = db::player_totals(conn, player_id)?.unwrap_or(PlayerTotals {
        player_id,
        ..Default::default()
    });
    Ok(SeasonAggregates { totals })
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Optional filters for `all_players`.
#[derive(Debug, Clone, Default)]
pub struct PlayerFilter {
    pub club: Option<String>,
    pub role: Option<PlayerRole>,
}

/// Every registered player matching `filter`, each with season aggregates.
pub fn all_players(
    conn: &Connection,
    filter: &PlayerFilter,
) -> Result<Vec<(Player, SeasonAggregates)>, AggregateError> {
    let players = match &filter.club {
        Some(club) => db::players_by_club(conn, club)?,
        None => db::all_players(conn)?,
    };

    let mut out = Vec::new();
    for player in players {
        if let Some(role) = filter.role {
            if player.role != role {
                continue;
            }
        }
        let totals = db::player_totals(conn, player.id)?.unwrap_or(PlayerTotals {
            player_id: player.id,
            ..Default::default()
        });
        out.push((player, SeasonAggregates { totals }));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewPlayer};
    use crate::scoring::{BattingFacet, BowlingFacet, FieldingFacet};

    fn test_db() -> Database {
        Database::open(":memory:").unwrap()
    }

    fn ruleset() -> Ruleset {
        Ruleset::for_version("standard-2024").unwrap()
    }

    fn register(db: &Database, name: &str) -> i64 {
        db.with_conn(|conn| {
            db::upsert_player(
                conn,
                &NewPlayer {
                    name: name.to_string(),
                    club: "ACC".to_string(),
                    rl_team: "ACC 1".to_string(),
                    role: PlayerRole::AllRounder,
                    baseline_multiplier: 1.0,
                    legacy_import: false,
                },
            )
        })
        .unwrap()
    }

    fn all_round_perf() -> Performance {
        Performance {
            batting: Some(BattingFacet {
                runs: 30,
                balls_faced: 30,
                dismissed: true,
            }),
            bowling: Some(BowlingFacet {
                balls_bowled: 36,
                runs_conceded: 36,
                wickets: 2,
                maidens: 1,
            }),
            fielding: FieldingFacet {
                catches: 1,
                stumpings: 0,
                runouts: 0,
            },
        }
    }

    // ------------------------------------------------------------------
    // Idempotence
    // ------------------------------------------------------------------

    #[test]
    fn second_upsert_is_a_silent_no_op() {
        let db = test_db();
        let id = register(&db, "Anil");
        let rules = ruleset();

        let (first, second, totals) = db
            .with_conn(|conn| {
                let first =
                    upsert_performance(conn, &rules, "m1", id, &all_round_perf(), Utc::now())
                        .unwrap();
                let second =
                    upsert_performance(conn, &rules, "m1", id, &all_round_perf(), Utc::now())
                        .unwrap();
                let totals = player_totals(conn, id).unwrap();
                Ok((first, second, totals))
            })
            .unwrap();

        assert!(matches!(first, UpsertOutcome::Applied { .. }));
        assert_eq!(second, UpsertOutcome::AlreadyCounted);
        assert_eq!(totals.totals.matches, 1);
        assert_eq!(totals.totals.runs, 30);
    }

    #[test]
    fn totals_are_additive_over_disjoint_matches() {
        let db = test_db();
        let id = register(&db, "Anil");
        let rules = ruleset();

        db.with_conn(|conn| {
            upsert_performance(conn, &rules, "m1", id, &all_round_perf(), Utc::now()).unwrap();
            upsert_performance(conn, &rules, "m2", id, &all_round_perf(), Utc::now()).unwrap();
            Ok(())
        })
        .unwrap();

        let agg = db
            .with_conn(|conn| Ok(player_totals(conn, id).unwrap()))
            .unwrap();
        assert_eq!(agg.totals.matches, 2);
        assert_eq!(agg.totals.runs, 60);
        assert_eq!(agg.totals.wickets, 4);
        assert_eq!(agg.totals.maidens, 2);
        assert_eq!(agg.totals.catches, 2);

        // Single-performance points doubled exactly.
        let single = db
            .with_conn(|conn| {
                let other = register_other(conn);
                upsert_performance(conn, &rules, "m1", other, &all_round_perf(), Utc::now())
                    .unwrap();
                Ok(player_totals(conn, other).unwrap())
            })
            .unwrap();
        assert!((agg.totals.points - 2.0 * single.totals.points).abs() < 1e-9);
    }

    fn register_other(conn: &Connection) -> i64 {
        db::upsert_player(
            conn,
            &NewPlayer {
                name: "Other".to_string(),
                club: "ACC".to_string(),
                rl_team: "ACC 2".to_string(),
                role: PlayerRole::Bowler,
                baseline_multiplier: 1.0,
                legacy_import: false,
            },
        )
        .unwrap()
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    #[test]
    fn unknown_player_is_an_error() {
        let db = test_db();
        let rules = ruleset();
        let err = db
            .with_conn(|conn| {
                Ok(upsert_performance(conn, &rules, "m1", 999, &all_round_perf(), Utc::now()))
            })
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AggregateError::UnknownPlayer { player_id: 999 }));

        let err = db
            .with_conn(|conn| Ok(player_totals(conn, 999)))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AggregateError::UnknownPlayer { .. }));
    }

    #[test]
    fn invalid_performance_propagates_scoring_error() {
        let db = test_db();
        let id = register(&db, "Anil");
        let rules = ruleset();
        let bad = Performance {
            bowling: Some(BowlingFacet {
                balls_bowled: 60,
                runs_conceded: 40,
                wickets: 11,
                maidens: 0,
            }),
            ..Default::default()
        };
        let err = db
            .with_conn(|conn| Ok(upsert_performance(conn, &rules, "m1", id, &bad, Utc::now())))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AggregateError::Scoring(_)));
    }

    // ------------------------------------------------------------------
    // Roster activation
    // ------------------------------------------------------------------

    #[test]
    fn first_performance_activates_legacy_entries() {
        let db = test_db();
        let id = register(&db, "Legacy");
        let rules = ruleset();

        db.with_conn(|conn| {
            let league_id = db::insert_league(
                conn,
                "AAAA",
                "One",
                &crate::league::LeagueRules {
                    squad_size: 11,
                    min_batsmen: 0,
                    min_bowlers: 0,
                    max_players_per_real_team: 11,
                    require_from_each_real_team: false,
                    min_players_per_real_team: 1,
                    real_teams: vec![],
                },
            )?;
            db::add_roster_entry(conn, league_id, id, false)?;
            assert!(!db::roster_entries(conn, league_id)?[0].active);

            upsert_performance(conn, &rules, "m1", id, &all_round_perf(), Utc::now()).unwrap();
            assert!(db::roster_entries(conn, league_id)?[0].active);
            Ok(())
        })
        .unwrap();
    }

    // ------------------------------------------------------------------
    // Derived averages
    // ------------------------------------------------------------------

    #[test]
    fn derived_averages_come_from_primitives() {
        let db = test_db();
        let id = register(&db, "Anil");
        let rules = ruleset();

        db.with_conn(|conn| {
            upsert_performance(conn, &rules, "m1", id, &all_round_perf(), Utc::now()).unwrap();
            upsert_performance(conn, &rules, "m2", id, &all_round_perf(), Utc::now()).unwrap();
            Ok(())
        })
        .unwrap();

        let agg = db
            .with_conn(|conn| Ok(player_totals(conn, id).unwrap()))
            .unwrap();
        // 60 runs / 2 dismissals
        assert!((agg.batting_average().unwrap() - 30.0).abs() < 1e-9);
        // 60 runs / 60 balls * 100
        assert!((agg.strike_rate().unwrap() - 100.0).abs() < 1e-9);
        // 72 conceded / 12 overs
        assert!((agg.economy().unwrap() - 6.0).abs() < 1e-9);
        assert!(agg.points_per_match().is_some());
    }

    #[test]
    fn derived_averages_absent_without_data() {
        let db = test_db();
        let id = register(&db, "Fresh");
        let agg = db
            .with_conn(|conn| Ok(player_totals(conn, id).unwrap()))
            .unwrap();
        assert!(agg.batting_average().is_none());
        assert!(agg.strike_rate().is_none());
        assert!(agg.economy().is_none());
        assert!(agg.points_per_match().is_none());
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    #[test]
    fn all_players_filters_by_club_and_role() {
        let db = test_db();
        register(&db, "A");
        db.with_conn(|conn| {
            register_other(conn);
            Ok(())
        })
        .unwrap();

        let by_role = db
            .with_conn(|conn| {
                Ok(all_players(
                    conn,
                    &PlayerFilter {
                        club: Some("ACC".to_string()),
                        role: Some(PlayerRole::Bowler),
                    },
                )
                .unwrap())
            })
            .unwrap();
        assert_eq!(by_role.len(), 1);
        assert_eq!(by_role[0].0.name, "Other");

        let everyone = db
            .with_conn(|conn| Ok(all_players(conn, &PlayerFilter::default()).unwrap()))
            .unwrap();
        assert_eq!(everyone.len(), 2);
    }
}
