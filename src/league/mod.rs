// League types: status machine, quota rules, typed errors.

pub mod drift;
pub mod lifecycle;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// League lifecycle status. Transitions are monotonic:
/// draft -> active -> locked -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeagueStatus {
    Draft,
    Active,
    Locked,
    Completed,
}

impl LeagueStatus {
    /// Parse the stored TEXT column value.
    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(LeagueStatus::Draft),
            "active" => Some(LeagueStatus::Active),
            "locked" => Some(LeagueStatus::Locked),
            "completed" => Some(LeagueStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeagueStatus::Draft => "draft",
            LeagueStatus::Active => "active",
            LeagueStatus::Locked => "locked",
            LeagueStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for LeagueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn default_min_players_per_real_team() -> usize {
    1
}

/// Squad composition rules for one league. Mutable while the league is in
/// draft; frozen verbatim at confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueRules {
    /// Exact squad size at finalize.
    pub squad_size: usize,
    /// Minimum players with the batsman role. All-rounders count toward
    /// neither minimum.
    pub min_batsmen: usize,
    /// Minimum players with the bowler role.
    pub min_bowlers: usize,
    /// Upper bound on squad members sharing one real-life team.
    pub max_players_per_real_team: usize,
    /// When set, every real-life team in `real_teams` must be represented.
    pub require_from_each_real_team: bool,
    /// Lower bound per represented real-life team; only meaningful together
    /// with `require_from_each_real_team`.
    #[serde(default = "default_min_players_per_real_team")]
    pub min_players_per_real_team: usize,
    /// The real-life teams this league's rules reference. The confirm
    /// transition requires the roster to cover all of them.
    pub real_teams: Vec<String>,
}

// ---------------------------------------------------------------------------
// League
// ---------------------------------------------------------------------------

/// One league as stored. `rules` is the mutable draft copy; `frozen_rules`
/// and the multiplier snapshot exist from confirm onward.
#[derive(Debug, Clone)]
pub struct League {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub status: LeagueStatus,
    pub rules: LeagueRules,
    pub frozen_rules: Option<LeagueRules>,
    pub multipliers_snapshot: Option<HashMap<i64, f64>>,
    pub multipliers_frozen_at: Option<DateTime<Utc>>,
}

impl League {
    /// The rules in force: the frozen copy once the league has left draft.
    ///
    /// A non-draft league without frozen rules is an invariant breach and
    /// surfaces as an error rather than silently reading the mutable copy.
    pub fn effective_rules(&self) -> Result<&LeagueRules, LeagueError> {
        match self.status {
            LeagueStatus::Draft => Ok(&self.rules),
            status => self.frozen_rules.as_ref().ok_or(LeagueError::RulesNotFrozen {
                id: self.id,
                status,
            }),
        }
    }

    /// The multiplier snapshot; exists iff the league has been confirmed.
    pub fn snapshot(&self) -> Result<&HashMap<i64, f64>, LeagueError> {
        match self.status {
            LeagueStatus::Draft => Err(LeagueError::SnapshotMissing {
                id: self.id,
                status: self.status,
            }),
            status => self
                .multipliers_snapshot
                .as_ref()
                .ok_or(LeagueError::SnapshotMissing { id: self.id, status }),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LeagueError {
    #[error("league {id} not found")]
    UnknownLeague { id: i64 },

    #[error("no league with code {code:?}")]
    UnknownCode { code: String },

    #[error("cannot {action} a league in the {from} state")]
    IllegalTransition {
        from: LeagueStatus,
        action: &'static str,
    },

    #[error("roster has {roster} players but squad size is {squad_size}")]
    RosterTooSmall { roster: usize, squad_size: usize },

    #[error("roster covers no player from real team(s): {missing:?}")]
    RosterMissingRealTeams { missing: Vec<String> },

    #[error("cannot lock: teams not finalized: {teams:?}")]
    TeamsNotFinalized { teams: Vec<String> },

    #[error("cannot lock: league has no joined teams")]
    NoTeamsJoined,

    #[error("league {id} has no multiplier snapshot despite status {status}")]
    SnapshotMissing { id: i64, status: LeagueStatus },

    #[error("league {id} has no frozen rules despite status {status}")]
    RulesNotFrozen { id: i64, status: LeagueStatus },

    #[error("a league with code {code:?} already exists")]
    DuplicateCode { code: String },

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}
