// Squad composition and transfer validation under a league's frozen rules.
//
// Every check returns structured violations rather than opaque strings, so
// the caller can render a precise user-facing message.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{Designations, SquadMember};
use crate::db::{Player, PlayerRole};
use crate::league::LeagueRules;

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ViolationCode {
    SquadWrongSize,
    SquadFull,
    AlreadyInSquad,
    NotInRoster,
    BelowMinBatsmen,
    BelowMinBowlers,
    ExceedsMaxPerRealTeam,
    MissingRealTeams(Vec<String>),
    BelowMinPerRealTeam,
    LoneRepresentativeRemoved { rl_team: String },
    DuplicateCaptain,
    DuplicateViceCaptain,
    DuplicateWicketKeeper,
    WicketKeeperRoleRequired,
}

/// One rule breach, with enough context for a user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub field: String,
    pub message: String,
}

impl Violation {
    fn new(code: ViolationCode, field: &str, message: String) -> Self {
        Violation {
            code,
            field: field.to_string(),
            message,
        }
    }
}

/// A squad slot joined with its player row, the unit the rules reason over.
#[derive(Debug, Clone)]
pub struct SquadPlayer {
    pub player: Player,
    pub member: SquadMember,
}

// ---------------------------------------------------------------------------
// Construction-time checks
// ---------------------------------------------------------------------------

/// Checks applied when adding `incoming` to a squad under construction.
/// The squad may be smaller than `squad_size` here; only ceilings and
/// designation uniqueness are enforced.
pub fn validate_add(
    squad: &[SquadPlayer],
    incoming: &Player,
    designations: Designations,
    rules: &LeagueRules,
    roster_ids: &HashSet<i64>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !roster_ids.contains(&incoming.id) {
        violations.push(Violation::new(
            ViolationCode::NotInRoster,
            "player_id",
            format!("{} is not in this league's roster", incoming.name),
        ));
    }

    if squad.iter().any(|s| s.player.id == incoming.id) {
        violations.push(Violation::new(
            ViolationCode::AlreadyInSquad,
            "player_id",
            format!("{} is already in the squad", incoming.name),
        ));
    }

    if squad.len() >= rules.squad_size {
        violations.push(Violation::new(
            ViolationCode::SquadFull,
            "squad_size",
            format!("squad already has {} players", rules.squad_size),
        ));
    }

    let same_team = squad
        .iter()
        .filter(|s| s.player.rl_team == incoming.rl_team)
        .count();
    if same_team + 1 > rules.max_players_per_real_team {
        violations.push(Violation::new(
            ViolationCode::ExceedsMaxPerRealTeam,
            "max_players_per_real_team",
            format!(
                "at most {} players from {} allowed",
                rules.max_players_per_real_team, incoming.rl_team
            ),
        ));
    }

    violations.extend(designation_violations(squad, incoming, designations));
    violations
}

fn designation_violations(
    squad: &[SquadPlayer],
    incoming: &Player,
    designations: Designations,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if designations.captain && squad.iter().any(|s| s.member.is_captain) {
        violations.push(Violation::new(
            ViolationCode::DuplicateCaptain,
            "captain",
            "the squad already has a captain".to_string(),
        ));
    }
    if designations.vice_captain && squad.iter().any(|s| s.member.is_vice_captain) {
        violations.push(Violation::new(
            ViolationCode::DuplicateViceCaptain,
            "vice_captain",
            "the squad already has a vice-captain".to_string(),
        ));
    }
    if designations.wicket_keeper {
        if squad.iter().any(|s| s.member.is_wicket_keeper) {
            violations.push(Violation::new(
                ViolationCode::DuplicateWicketKeeper,
                "wicket_keeper",
                "the squad already has a designated wicket-keeper".to_string(),
            ));
        }
        if incoming.role != PlayerRole::WicketKeeper {
            violations.push(Violation::new(
                ViolationCode::WicketKeeperRoleRequired,
                "wicket_keeper",
                format!("{} cannot keep wicket (role: {})", incoming.name, incoming.role),
            ));
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Finalize-time checks
// ---------------------------------------------------------------------------

/// The full rule set a finalized team must satisfy, and keep satisfying
/// through every subsequent transfer.
pub fn validate_finalized_squad(squad: &[SquadPlayer], rules: &LeagueRules) -> Vec<Violation> {
    let mut violations = Vec::new();

    if squad.len() != rules.squad_size {
        violations.push(Violation::new(
            ViolationCode::SquadWrongSize,
            "squad_size",
            format!(
                "squad has {} players, needs exactly {}",
                squad.len(),
                rules.squad_size
            ),
        ));
    }

    // All-rounders count toward neither minimum.
    let batsmen = squad
        .iter()
        .filter(|s| s.player.role == PlayerRole::Batsman)
        .count();
    if batsmen < rules.min_batsmen {
        violations.push(Violation::new(
            ViolationCode::BelowMinBatsmen,
            "min_batsmen",
            format!("{batsmen} batsmen selected, need at least {}", rules.min_batsmen),
        ));
    }
    let bowlers = squad
        .iter()
        .filter(|s| s.player.role == PlayerRole::Bowler)
        .count();
    if bowlers < rules.min_bowlers {
        violations.push(Violation::new(
            ViolationCode::BelowMinBowlers,
            "min_bowlers",
            format!("{bowlers} bowlers selected, need at least {}", rules.min_bowlers),
        ));
    }

    let mut per_team: HashMap<&str, usize> = HashMap::new();
    for s in squad {
        *per_team.entry(s.player.rl_team.as_str()).or_default() += 1;
    }
    for (rl_team, count) in &per_team {
        if *count > rules.max_players_per_real_team {
            violations.push(Violation::new(
                ViolationCode::ExceedsMaxPerRealTeam,
                "max_players_per_real_team",
                format!(
                    "{count} players from {rl_team}, at most {} allowed",
                    rules.max_players_per_real_team
                ),
            ));
        }
    }

    if rules.require_from_each_real_team {
        let missing: Vec<String> = rules
            .real_teams
            .iter()
            .filter(|team| !per_team.contains_key(team.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            violations.push(Violation::new(
                ViolationCode::MissingRealTeams(missing.clone()),
                "require_from_each_real_team",
                format!("no player selected from: {}", missing.join(", ")),
            ));
        }
        for team in &rules.real_teams {
            let count = per_team.get(team.as_str()).copied().unwrap_or(0);
            if count > 0 && count < rules.min_players_per_real_team {
                violations.push(Violation::new(
                    ViolationCode::BelowMinPerRealTeam,
                    "min_players_per_real_team",
                    format!(
                        "{count} players from {team}, need at least {}",
                        rules.min_players_per_real_team
                    ),
                ));
            }
        }
    }

    for (count, code, field, label) in [
        (
            squad.iter().filter(|s| s.member.is_captain).count(),
            ViolationCode::DuplicateCaptain,
            "captain",
            "captain",
        ),
        (
            squad.iter().filter(|s| s.member.is_vice_captain).count(),
            ViolationCode::DuplicateViceCaptain,
            "vice_captain",
            "vice-captain",
        ),
        (
            squad.iter().filter(|s| s.member.is_wicket_keeper).count(),
            ViolationCode::DuplicateWicketKeeper,
            "wicket_keeper",
            "wicket-keeper",
        ),
    ] {
        if count > 1 {
            violations.push(Violation::new(
                code,
                field,
                format!("{count} players hold the {label} designation"),
            ));
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Validate a transfer as an atomic (remove `p_out`, add `p_in`) pair by
/// simulating the post-swap squad and re-running the full rule set.
///
/// Callers use this to preflight a transfer before attempting the mutation.
pub fn validate_transfer(
    squad: &[SquadPlayer],
    p_out: i64,
    p_in: &Player,
    rules: &LeagueRules,
    roster_ids: &HashSet<i64>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !roster_ids.contains(&p_in.id) {
        violations.push(Violation::new(
            ViolationCode::NotInRoster,
            "player_id",
            format!("{} is not in this league's roster", p_in.name),
        ));
    }
    if squad.iter().any(|s| s.player.id == p_in.id) {
        violations.push(Violation::new(
            ViolationCode::AlreadyInSquad,
            "player_id",
            format!("{} is already in the squad", p_in.name),
        ));
    }

    let Some(outgoing) = squad.iter().find(|s| s.player.id == p_out) else {
        // The engine reports a missing p_out before validation; a defensive
        // violation keeps preflight results self-contained.
        violations.push(Violation::new(
            ViolationCode::NotInRoster,
            "player_id",
            format!("player {p_out} is not in the squad"),
        ));
        return violations;
    };

    // Lone-representative guard: removing the only player of a required real
    // team demands a same-team replacement.
    if rules.require_from_each_real_team
        && rules.real_teams.contains(&outgoing.player.rl_team)
        && p_in.rl_team != outgoing.player.rl_team
    {
        let representatives = squad
            .iter()
            .filter(|s| s.player.rl_team == outgoing.player.rl_team)
            .count();
        if representatives == 1 {
            violations.push(Violation::new(
                ViolationCode::LoneRepresentativeRemoved {
                    rl_team: outgoing.player.rl_team.clone(),
                },
                "require_from_each_real_team",
                format!(
                    "{} is the only {} player; transfer in a {} player first, or replace like for like",
                    outgoing.player.name, outgoing.player.rl_team, outgoing.player.rl_team
                ),
            ));
        }
    }

    // Simulate the swap. The incoming player inherits no designations.
    let mut simulated: Vec<SquadPlayer> = squad
        .iter()
        .filter(|s| s.player.id != p_out)
        .cloned()
        .collect();
    simulated.push(SquadPlayer {
        player: p_in.clone(),
        member: SquadMember {
            player_id: p_in.id,
            is_captain: false,
            is_vice_captain: false,
            is_wicket_keeper: false,
        },
    });

    for violation in validate_finalized_squad(&simulated, rules) {
        // The lone-representative guard already names this failure precisely.
        if matches!(violation.code, ViolationCode::MissingRealTeams(_))
            && violations
                .iter()
                .any(|v| matches!(v.code, ViolationCode::LoneRepresentativeRemoved { .. }))
        {
            continue;
        }
        violations.push(violation);
    }

    violations
}
