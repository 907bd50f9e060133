// Legacy roster import: seed players from a prior season's CSV export.
//
// Entries arrive with zero totals and the legacy flag set; they accumulate
// normally once the name matcher attributes a live performance to them.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::db::{self, Database, NewPlayer, PlayerRole};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read roster file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// Raw CSV row. Column headers match the legacy export:
/// `Name,Club,Team,Role,Multiplier`.
#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct RawRosterRow {
    Name: String,
    Club: String,
    Team: String,
    Role: String,
    #[serde(default)]
    Multiplier: Option<f64>,
}

/// Outcome counters for one import.
#[derive(Debug, Default, PartialEq)]
pub struct ImportSummary {
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
}

/// Import a legacy roster file. Idempotent on `(name, club)`: re-importing
/// never duplicates players or resets their totals. Rows with an unknown
/// role or an unusable multiplier are warned about and skipped.
pub fn import_legacy_roster(db: &Database, path: &Path) -> Result<ImportSummary, ImportError> {
    let file = std::fs::File::open(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);

    let mut summary = ImportSummary::default();
    for (index, row) in reader.deserialize::<RawRosterRow>().enumerate() {
        let line = index + 2; // header is line 1
        let row = match row {
            Ok(row) => row,
            Err(source) => {
                return Err(ImportError::Csv {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let Some(role) = PlayerRole::from_str_role(row.Role.trim()) else {
            warn!(line, name = %row.Name, role = %row.Role, "unknown role, skipping row");
            summary.skipped += 1;
            continue;
        };

        let multiplier = row.Multiplier.unwrap_or(1.0);
        if !multiplier.is_finite() || multiplier <= 0.0 {
            warn!(line, name = %row.Name, multiplier, "unusable multiplier, skipping row");
            summary.skipped += 1;
            continue;
        }

        let name = row.Name.trim().to_string();
        let club = row.Club.trim().to_string();
        if name.is_empty() || club.is_empty() {
            warn!(line, "empty name or club, skipping row");
            summary.skipped += 1;
            continue;
        }

        db.with_conn(|conn| {
            if db::find_player(conn, &name, &club)?.is_some() {
                summary.existing += 1;
                return Ok(());
            }
            db::upsert_player(
                conn,
                &NewPlayer {
                    name: name.clone(),
                    club: club.clone(),
                    rl_team: row.Team.trim().to_string(),
                    role,
                    baseline_multiplier: multiplier,
                    legacy_import: true,
                },
            )?;
            summary.created += 1;
            Ok(())
        })?;
    }

    Ok(summary)
}
