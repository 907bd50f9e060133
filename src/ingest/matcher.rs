// Name matching: resolve a scraped (name, club) pair to a known player.

use crate::db::Player;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A player considered for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub player_id: i64,
    pub name: String,
    pub club: String,
    /// Legacy-import entries lose ties against already-active players.
    pub legacy: bool,
}

impl From<&Player> for MatchCandidate {
    fn from(player: &Player) -> Self {
        MatchCandidate {
            player_id: player.id,
            name: player.name.clone(),
            club: player.club.clone(),
            legacy: player.legacy_import,
        }
    }
}

/// Outcome of a resolution attempt. Never fatal: the caller decides what an
/// unmatched or ambiguous row means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    Matched(i64),
    Unmatched,
    Ambiguous,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `name` against the candidate set, scoped to `club`.
///
/// Stages, in order: exact normalized equality, initial expansion
/// ("J. de Vries" against "Jan de Vries"), then fuzzy similarity at or above
/// `threshold`. The first stage that produces any hit decides; ties within a
/// stage prefer the non-legacy candidate and are otherwise ambiguous.
pub fn resolve(
    name: &str,
    club: &str,
    candidates: &[MatchCandidate],
    threshold: f64,
) -> MatchOutcome {
    let query = normalize(name);
    if query.is_empty() {
        return MatchOutcome::Unmatched;
    }

    let in_club: Vec<&MatchCandidate> =
        candidates.iter().filter(|c| c.club == club).collect();

    // Stage 1: exact normalized equality.
    let exact: Vec<&MatchCandidate> = in_club
        .iter()
        .copied()
        .filter(|c| normalize(&c.name) == query)
        .collect();
    if !exact.is_empty() {
        return break_tie(&exact);
    }

    // Stage 2: initial expansion.
    let expanded: Vec<&MatchCandidate> = in_club
        .iter()
        .copied()
        .filter(|c| initial_expansion_matches(&query, &normalize(&c.name)))
        .collect();
    if !expanded.is_empty() {
        return break_tie(&expanded);
    }

    // Stage 3: fuzzy similarity.
    let mut best_score = 0.0f64;
    let mut best: Vec<&MatchCandidate> = Vec::new();
    for candidate in in_club.iter().copied() {
        let score = similarity(&query, &normalize(&candidate.name));
        if score < threshold {
            continue;
        }
        if score > best_score + f64::EPSILON {
            best_score = score;
            best = vec![candidate];
        } else if (score - best_score).abs() <= f64::EPSILON {
            best.push(candidate);
        }
    }
    if best.is_empty() {
        MatchOutcome::Unmatched
    } else {
        break_tie(&best)
    }
}

/// Among tied candidates, a single non-legacy entry wins; anything else is
/// ambiguous.
fn break_tie(tied: &[&MatchCandidate]) -> MatchOutcome {
    if tied.len() == 1 {
        return MatchOutcome::Matched(tied[0].player_id);
    }
    let active: Vec<&&MatchCandidate> = tied.iter().filter(|c| !c.legacy).collect();
    if active.len() == 1 {
        MatchOutcome::Matched(active[0].player_id)
    } else {
        MatchOutcome::Ambiguous
    }
}

/// "j de vries" matches candidate "jan de vries": the query's first token is
/// a single initial, the candidate's first token starts with it, and the
/// remaining tokens are equal.
fn initial_expansion_matches(query: &str, candidate: &str) -> bool {
    let q: Vec<&str> = query.split(' ').collect();
    let c: Vec<&str> = candidate.split(' ').collect();
    if q.len() != c.len() || q.len() < 2 {
        return false;
    }
    let (q_first, c_first) = (q[0], c[0]);
    q_first.chars().count() == 1 && c_first.starts_with(q_first) && q[1..] == c[1..]
}

/// The better of token-set Jaccard overlap and normalized edit-distance
/// ratio.
fn similarity(a: &str, b: &str) -> f64 {
    jaccard(a, b).max(strsim::normalized_levenshtein(a, b))
}

fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<&str> = a.split(' ').collect();
    let set_b: std::collections::HashSet<&str> = b.split(' ').collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 0.85;

    fn candidate(id: i64, name: &str, legacy: bool) -> MatchCandidate {
        MatchCandidate {
            player_id: id,
            name: name.to_string(),
            club: "ACC".to_string(),
            legacy,
        }
    }

    // ------------------------------------------------------------------
    // Normalization
    // ------------------------------------------------------------------

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("J. de Vries"), "j de vries");
        assert_eq!(normalize("  Sikander   ZULFIQAR "), "sikander zulfiqar");
        assert_eq!(normalize("O'Brien"), "o brien");
        assert_eq!(normalize(""), "");
    }

    // ------------------------------------------------------------------
    // Stage 1: exact
    // ------------------------------------------------------------------

    #[test]
    fn exact_match_wins() {
        let candidates = vec![
            candidate(1, "Sikander Zulfiqar", false),
            candidate(2, "Ravi Singh", false),
        ];
        assert_eq!(
            resolve("sikander zulfiqar", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(1)
        );
    }

    #[test]
    fn cross_club_candidates_are_never_returned() {
        let mut other_club = candidate(1, "Sikander Zulfiqar", false);
        other_club.club = "VRA".to_string();
        assert_eq!(
            resolve("Sikander Zulfiqar", "ACC", &[other_club], THRESHOLD),
            MatchOutcome::Unmatched
        );
    }

    // ------------------------------------------------------------------
    // Stage 2: initial expansion
    // ------------------------------------------------------------------

    #[test]
    fn initial_expands_to_full_first_name() {
        let candidates = vec![candidate(7, "Sikander Zulfiqar", true)];
        assert_eq!(
            resolve("S. Zulfiqar", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(7)
        );
    }

    #[test]
    fn initial_expansion_handles_particles() {
        let candidates = vec![candidate(3, "Jan de Vries", false)];
        assert_eq!(
            resolve("J. de Vries", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(3)
        );
    }

    #[test]
    fn initial_must_agree() {
        let candidates = vec![candidate(3, "Jan de Vries", false)];
        assert_eq!(
            resolve("K. de Vries", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Unmatched
        );
    }

    #[test]
    fn surname_mismatch_defeats_initial_expansion() {
        let candidates = vec![candidate(3, "Jan de Vries", false)];
        assert_eq!(
            resolve("J. de Boer", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Unmatched
        );
    }

    // ------------------------------------------------------------------
    // Stage 3: fuzzy
    // ------------------------------------------------------------------

    #[test]
    fn single_typo_clears_threshold() {
        let candidates = vec![candidate(5, "Sikander Zulfiqar", false)];
        // One transposed character over 17: ratio well above 0.85.
        assert_eq!(
            resolve("Sikadner Zulfiqar", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(5)
        );
    }

    #[test]
    fn reordered_tokens_match_via_jaccard() {
        let candidates = vec![candidate(5, "Sikander Zulfiqar", false)];
        assert_eq!(
            resolve("Zulfiqar Sikander", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(5)
        );
    }

    #[test]
    fn unrelated_name_is_unmatched() {
        let candidates = vec![candidate(5, "Sikander Zulfiqar", false)];
        assert_eq!(
            resolve("Pieter Janssen", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Unmatched
        );
    }

    // ------------------------------------------------------------------
    // Ties
    // ------------------------------------------------------------------

    #[test]
    fn tie_prefers_active_over_legacy() {
        let candidates = vec![
            candidate(1, "Ravi Singh", true),
            candidate(2, "Ravi Singh", false),
        ];
        assert_eq!(
            resolve("Ravi Singh", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Matched(2)
        );
    }

    #[test]
    fn tie_between_two_legacy_entries_is_ambiguous() {
        let candidates = vec![
            candidate(1, "Ravi Singh", true),
            candidate(2, "Ravi Singh", true),
        ];
        assert_eq!(
            resolve("Ravi Singh", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Ambiguous
        );
    }

    #[test]
    fn tie_between_two_active_entries_is_ambiguous() {
        let candidates = vec![
            candidate(1, "Ravi Singh", false),
            candidate(2, "Ravi Singh", false),
        ];
        assert_eq!(
            resolve("Ravi Singh", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Ambiguous
        );
    }

    #[test]
    fn empty_query_is_unmatched() {
        let candidates = vec![candidate(1, "Ravi Singh", false)];
        assert_eq!(
            resolve("  .  ", "ACC", &candidates, THRESHOLD),
            MatchOutcome::Unmatched
        );
    }
}
