// Ingestion orchestrator: scheduled scrape -> dedupe -> aggregate -> drift.
//
// Per-match errors are isolated; the scraper is retried with exponential
// backoff; every write path is idempotent so a cancelled or overlapping run
// is absorbed on the next cycle.

pub mod import;
pub mod matcher;
pub mod scraper;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Local, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::aggregate::{self, UpsertOutcome};
use crate::config::WeeklySchedule;
use crate::db::{self, NewPlayer, PlayerRole};
use crate::engine::Engine;
use crate::league::drift::DriftOutcome;
use crate::scoring::{BattingFacet, BowlingFacet, Performance};
use matcher::{MatchCandidate, MatchOutcome};
use scraper::{MatchSource, MatchSummary, ScrapeError, Scorecard};

/// First backoff delay; doubles per retry.
const RETRY_BASE_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Counters for one ingestion run, logged at the end and surfaced to the
/// on-demand trigger.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub matches_listed: usize,
    pub matches_ingested: usize,
    pub matches_failed: usize,
    pub clubs_failed: usize,
    pub performances_applied: usize,
    pub performances_skipped: usize,
    pub rows_ambiguous: usize,
    pub players_created: usize,
    pub drift_outcomes: Vec<(i64, DriftOutcome)>,
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run a scraper call with up to `max_retries` retries on transient errors,
/// backing off exponentially.
pub async fn with_retries<T, F, Fut>(
    what: &str,
    max_retries: u32,
    mut call: F,
) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ScrapeError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let backoff = std::time::Duration::from_millis(RETRY_BASE_MS << attempt);
                warn!(what, attempt, error = %e, "transient scraper error, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrated run
// ---------------------------------------------------------------------------

/// One full ingestion pass over every configured club.
///
/// This is also the on-demand trigger: admins call it directly to ingest now.
pub async fn run_ingestion(
    engine: &Engine,
    source: &dyn MatchSource,
    cancel: &watch::Receiver<bool>,
) -> anyhow::Result<IngestReport> {
    let cfg = &engine.config().ingest;
    let since = Utc::now() - Duration::days(cfg.scrape_interval_days);
    info!(since = %since, clubs = cfg.configured_clubs.len(), "ingestion run starting");

    let mut report = IngestReport::default();

    // List matches per club; the same fixture appears under both clubs, so
    // dedupe on match id.
    let mut summaries: Vec<MatchSummary> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for club in &cfg.configured_clubs {
        let listed = with_retries("list_recent_matches", cfg.max_retries, || {
            source.list_recent_matches(club, since)
        })
        .await;
        match listed {
            Ok(matches) => {
                for summary in matches {
                    if seen.insert(summary.match_id.clone()) {
                        summaries.push(summary);
                    }
                }
            }
            Err(e) => {
                warn!(%club, error = %e, "failed to list recent matches");
                report.clubs_failed += 1;
            }
        }
    }
    report.matches_listed = summaries.len();

    let mut touched: HashSet<i64> = HashSet::new();
    for summary in &summaries {
        if *cancel.borrow() {
            info!(match_id = %summary.match_id, "ingestion cancelled between matches");
            report.cancelled = true;
            break;
        }
        match ingest_match(engine, source, summary, cancel).await {
            Ok(stats) => {
                report.matches_ingested += 1;
                report.performances_applied += stats.applied;
                report.performances_skipped += stats.skipped;
                report.rows_ambiguous += stats.ambiguous;
                report.players_created += stats.created;
                touched.extend(stats.touched);
            }
            Err(MatchIngestError::Cancelled) => {
                info!(match_id = %summary.match_id, "ingestion cancelled mid-scorecard");
                report.cancelled = true;
                break;
            }
            Err(MatchIngestError::Failed(e)) => {
                // One broken scorecard must not abort the batch.
                warn!(match_id = %summary.match_id, error = %e, "failed to ingest match");
                report.matches_failed += 1;
            }
        }
    }

    // Drift every league whose roster intersected an updated player.
    let touched: Vec<i64> = touched.into_iter().collect();
    let league_ids = engine
        .db()
        .with_conn(|conn| db::leagues_containing_players(conn, &touched))
        .context("failed to find leagues for drift")?;
    for league_id in league_ids {
        match engine.drift_league(league_id).await {
            Ok(outcome) => report.drift_outcomes.push((league_id, outcome)),
            Err(e) => error!(league_id, error = %e, "drift failed after ingestion"),
        }
    }

    info!(
        matches = report.matches_ingested,
        applied = report.performances_applied,
        skipped = report.performances_skipped,
        ambiguous = report.rows_ambiguous,
        created = report.players_created,
        failed = report.matches_failed,
        cancelled = report.cancelled,
        "ingestion run finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Per-match ingestion
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum MatchIngestError {
    Cancelled,
    Failed(anyhow::Error),
}

#[derive(Debug, Default)]
struct MatchStats {
    applied: usize,
    skipped: usize,
    ambiguous: usize,
    created: usize,
    touched: Vec<i64>,
}

/// Resolved row: who played, and what they did.
struct ResolvedRow {
    resolution: RowResolution,
    perf: Performance,
}

enum RowResolution {
    Known(i64),
    Create(NewPlayer),
}

/// Fetch one scorecard, resolve identities, and apply every row in a single
/// transaction. Cancellation mid-scorecard rolls the whole match back.
async fn ingest_match(
    engine: &Engine,
    source: &dyn MatchSource,
    summary: &MatchSummary,
    cancel: &watch::Receiver<bool>,
) -> Result<MatchStats, MatchIngestError> {
    let cfg = engine.config();
    let scorecard = with_retries("fetch_scorecard", cfg.ingest.max_retries, || {
        source.fetch_scorecard(&summary.match_id)
    })
    .await
    .map_err(|e| MatchIngestError::Failed(e.into()))?;

    let rows = collect_rows(&scorecard);

    // Resolve identities against each club's current candidate set.
    let mut stats = MatchStats::default();
    let mut resolved: Vec<ResolvedRow> = Vec::new();
    for ((club, name), perf) in rows {
        let candidates: Vec<MatchCandidate> = engine
            .db()
            .with_conn(|conn| {
                Ok(db::players_by_club(conn, &club)?
                    .iter()
                    .map(MatchCandidate::from)
                    .collect())
            })
            .map_err(MatchIngestError::Failed)?;

        match matcher::resolve(&name, &club, &candidates, cfg.matching.fuzzy_threshold) {
            MatchOutcome::Matched(player_id) => resolved.push(ResolvedRow {
                resolution: RowResolution::Known(player_id),
                perf,
            }),
            MatchOutcome::Unmatched => {
                let new = NewPlayer {
                    name: name.clone(),
                    club: club.clone(),
                    rl_team: summary.grade.clone().unwrap_or_else(|| club.clone()),
                    role: infer_role(&perf),
                    baseline_multiplier: 1.0,
                    legacy_import: false,
                };
                info!(%name, %club, "scraped row introduces a new player");
                resolved.push(ResolvedRow {
                    resolution: RowResolution::Create(new),
                    perf,
                });
            }
            MatchOutcome::Ambiguous => {
                warn!(%name, %club, match_id = %summary.match_id, "ambiguous name, skipping row");
                stats.ambiguous += 1;
            }
        }
    }

    // Apply the whole scorecard atomically.
    let match_id = summary.match_id.clone();
    let cancel = cancel.clone();
    let ruleset = engine.ruleset();
    let outcome = engine.db().with_tx(|tx| {
        let mut applied = 0usize;
        let mut skipped = 0usize;
        let mut created = 0usize;
        let mut touched = Vec::new();
        for row in &resolved {
            if *cancel.borrow() {
                anyhow::bail!("cancelled mid-scorecard");
            }
            let player_id = match &row.resolution {
                RowResolution::Known(id) => *id,
                RowResolution::Create(new) => {
                    created += 1;
                    db::upsert_player(tx, new)?
                }
            };
            match aggregate::upsert_performance(tx, ruleset, &match_id, player_id, &row.perf, Utc::now())
                .map_err(|e| anyhow::anyhow!(e))?
            {
                UpsertOutcome::Applied { .. } => {
                    applied += 1;
                    touched.push(player_id);
                }
                UpsertOutcome::AlreadyCounted => skipped += 1,
            }
        }
        Ok((applied, skipped, created, touched))
    });

    match outcome {
        Ok((applied, skipped, created, touched)) => {
            stats.applied = applied;
            stats.skipped = skipped;
            stats.created = created;
            stats.touched = touched;
            Ok(stats)
        }
        Err(_) if *cancel.borrow() => Err(MatchIngestError::Cancelled),
        Err(e) => Err(MatchIngestError::Failed(e)),
    }
}

/// Fold batting, bowling, and fielding rows into one `Performance` per
/// `(club, name)`. Insertion order is preserved for deterministic runs.
fn collect_rows(scorecard: &Scorecard) -> Vec<((String, String), Performance)> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut by_player: HashMap<(String, String), Performance> = HashMap::new();

    let entry = |order: &mut Vec<(String, String)>,
                     by_player: &mut HashMap<(String, String), Performance>,
                     club: &str,
                     name: &str|
     -> (String, String) {
        let key = (club.to_string(), name.to_string());
        if !by_player.contains_key(&key) {
            order.push(key.clone());
            by_player.insert(key.clone(), Performance::default());
        }
        key
    };

    for innings in &scorecard.innings {
        for row in &innings.batting {
            let key = entry(&mut order, &mut by_player, &innings.batting_club, &row.name);
            by_player.get_mut(&key).expect("row just inserted").batting = Some(BattingFacet {
                runs: row.runs,
                balls_faced: row.balls_faced,
                dismissed: row.dismissed,
            });
        }
        for row in &innings.bowling {
            let key = entry(&mut order, &mut by_player, &innings.bowling_club, &row.name);
            by_player.get_mut(&key).expect("row just inserted").bowling = Some(BowlingFacet {
                balls_bowled: row.balls,
                runs_conceded: row.runs_conceded,
                wickets: row.wickets,
                maidens: row.maidens,
            });
        }
        for credit in &innings.fielding {
            let key = entry(&mut order, &mut by_player, &innings.bowling_club, &credit.name);
            let fielding = &mut by_player.get_mut(&key).expect("row just inserted").fielding;
            match credit.kind {
                scraper::CreditKind::Catch => fielding.catches += 1,
                scraper::CreditKind::Stumping => fielding.stumpings += 1,
                scraper::CreditKind::Runout => fielding.runouts += 1,
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let perf = by_player.remove(&key).expect("key collected from order");
            (key, perf)
        })
        .collect()
}

/// Role guess for a player first seen in a scorecard; refined by later
/// legacy imports if any.
fn infer_role(perf: &Performance) -> PlayerRole {
    match (perf.batting.is_some(), perf.bowling.is_some()) {
        (true, true) => PlayerRole::AllRounder,
        (false, true) => PlayerRole::Bowler,
        _ => PlayerRole::Batsman,
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Timer-driven loop: sleep until the next weekly slot, run ingestion,
/// repeat. Stops when the shutdown signal flips.
pub async fn run_scheduler(
    engine: Arc<Engine>,
    source: Arc<dyn MatchSource>,
    mut shutdown: watch::Receiver<bool>,
) {
    let schedule = match WeeklySchedule::parse(&engine.config().ingest.scrape_schedule) {
        Ok(schedule) => schedule,
        // Config validation runs at startup; reaching this is a bug.
        Err(e) => {
            error!(error = %e, "unusable scrape schedule, scheduler not starting");
            return;
        }
    };

    loop {
        let now = Local::now();
        let next = schedule.next_occurrence(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, "next ingestion scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = run_ingestion(&engine, source.as_ref(), &shutdown).await {
                    error!(error = %e, "scheduled ingestion run failed");
                }
            }
            _ = shutdown.changed() => {}
        }

        if *shutdown.borrow() {
            info!("ingestion scheduler stopped");
            break;
        }
    }
}
