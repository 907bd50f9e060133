// Fantasy team types.

pub mod scorer;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::league::LeagueError;
use validator::Violation;

/// One user's team within one league.
#[derive(Debug, Clone)]
pub struct Team {
    pub id: i64,
    pub league_id: i64,
    pub owner: String,
    pub name: String,
    pub transfers_used: u32,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Team {
    pub fn is_finalized(&self) -> bool {
        self.finalized_at.is_some()
    }
}

/// A squad slot: the player plus any designations held on this team.
/// A single player may hold several designations at once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquadMember {
    pub player_id: i64,
    pub is_captain: bool,
    pub is_vice_captain: bool,
    pub is_wicket_keeper: bool,
}

/// Designation flags supplied when adding a player or re-assigning roles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Designations {
    pub captain: bool,
    pub vice_captain: bool,
    pub wicket_keeper: bool,
}

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("team {id} not found")]
    UnknownTeam { id: i64 },

    #[error("owner {owner:?} already has a team in this league")]
    AlreadyJoined { owner: String },

    #[error("team is finalized; use transfer instead")]
    AlreadyFinalized,

    #[error("team is not finalized; use add/remove instead of transfer")]
    NotFinalized,

    #[error("player {player_id} is not on this team")]
    NotOnTeam { player_id: i64 },

    #[error("team mutation rejected: {0:?}")]
    Rejected(Vec<Violation>),

    #[error(transparent)]
    League(#[from] LeagueError),

    #[error(transparent)]
    Db(#[from] anyhow::Error),
}
