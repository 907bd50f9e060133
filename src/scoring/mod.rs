// Scoring engine: base fantasy points for a single performance.
//
// Pure and stateless. All rates and bonuses come from a versioned `Ruleset`;
// league multipliers and captaincy are applied downstream by the team scorer.

pub mod ruleset;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ruleset::{tier_sum, Ruleset};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid performance: {reason}")]
    InvalidPerformance { reason: String },

    #[error("unsupported scoring ruleset version: {version}")]
    UnsupportedRuleset { version: String },

    #[error("ruleset {version} failed to parse: {source}")]
    RulesetParse {
        version: String,
        source: toml::de::Error,
    },

    #[error("ruleset {version} is malformed: {detail}")]
    MalformedRuleset { version: String, detail: String },
}

// ---------------------------------------------------------------------------
// Facet records
// ---------------------------------------------------------------------------

/// Batting facet of one performance. Absent entirely when the player did not
/// bat; `balls_faced = 0` with the facet present is treated the same way
/// (a diamond-duck run-out carries no run subtotal and no duck penalty).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BattingFacet {
    pub runs: u32,
    pub balls_faced: u32,
    pub dismissed: bool,
}

/// Bowling facet. Overs are carried as a ball count so partial overs stay
/// exact (4.3 overs = 27 balls).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BowlingFacet {
    pub balls_bowled: u32,
    pub runs_conceded: u32,
    pub wickets: u32,
    pub maidens: u32,
}

/// Fielding credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldingFacet {
    pub catches: u32,
    pub stumpings: u32,
    pub runouts: u32,
}

/// One player's complete contribution to one match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub batting: Option<BattingFacet>,
    pub bowling: Option<BowlingFacet>,
    pub fielding: FieldingFacet,
}

// ---------------------------------------------------------------------------
// Score breakdown
// ---------------------------------------------------------------------------

/// Per-facet subtotals for one performance.
///
/// `catch_points` is reported separately (it is also included in `fielding`)
/// so the team scorer can apply the wicket-keeper doubling without re-deriving
/// fielding arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub batting: f64,
    pub bowling: f64,
    pub fielding: f64,
    pub catch_points: f64,
    /// `max(0, batting + bowling + fielding)` -- the duck penalty never
    /// drives a record below zero.
    pub total: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compute the base-points breakdown for one performance under `rules`.
///
/// Identical input always produces identical output.
pub fn score_performance(
    perf: &Performance,
    rules: &Ruleset,
) -> Result<ScoreBreakdown, ScoringError> {
    validate_performance(perf)?;

    let batting = perf.batting.map_or(0.0, |b| batting_points(&b, rules));
    let bowling = perf.bowling.map_or(0.0, |b| bowling_points(&b, rules));
    let catch_points = perf.fielding.catches as f64 * rules.fielding.catch;
    let fielding = catch_points
        + perf.fielding.stumpings as f64 * rules.fielding.stumping
        + perf.fielding.runouts as f64 * rules.fielding.runout;

    let total = (batting + bowling + fielding).max(0.0);

    Ok(ScoreBreakdown {
        batting,
        bowling,
        fielding,
        catch_points,
        total,
    })
}

fn validate_performance(perf: &Performance) -> Result<(), ScoringError> {
    if let Some(bowling) = &perf.bowling {
        if bowling.wickets > 10 {
            return Err(ScoringError::InvalidPerformance {
                reason: format!("{} wickets in a single innings", bowling.wickets),
            });
        }
        // A maiden is a completed over; more maidens than completed overs is
        // corrupt upstream data.
        if bowling.maidens > bowling.balls_bowled / 6 {
            return Err(ScoringError::InvalidPerformance {
                reason: format!(
                    "{} maidens from {} balls bowled",
                    bowling.maidens, bowling.balls_bowled
                ),
            });
        }
    }
    Ok(())
}

/// Tiered run points, scaled by strike rate, plus milestone bonus and duck
/// penalty. With no balls faced the run subtotal does not apply.
fn batting_points(batting: &BattingFacet, rules: &Ruleset) -> f64 {
    let mut points = 0.0;

    if batting.balls_faced > 0 {
        let run_subtotal = tier_sum(batting.runs, &rules.batting.tiers);
        let strike_rate = batting.runs as f64 / batting.balls_faced as f64 * 100.0;
        points += run_subtotal * strike_rate / 100.0;
    }

    // Century bonus replaces the fifty bonus.
    if batting.runs >= 100 {
        points += rules.batting.century_bonus;
    } else if batting.runs >= 50 {
        points += rules.batting.fifty_bonus;
    }

    if batting.runs == 0 && batting.dismissed && batting.balls_faced >= 1 {
        points -= rules.batting.duck_penalty;
    }

    points
}

/// Tiered wicket points scaled by the capped economy multiplier, plus maidens
/// and the five-wicket bonus. With no balls bowled the wicket subtotal stands
/// unscaled.
fn bowling_points(bowling: &BowlingFacet, rules: &Ruleset) -> f64 {
    let wicket_subtotal = tier_sum(bowling.wickets, &rules.bowling.tiers);

    let mut points = if bowling.balls_bowled > 0 {
        let overs = bowling.balls_bowled as f64 / 6.0;
        let economy = bowling.runs_conceded as f64 / overs;
        if economy > 0.0 {
            wicket_subtotal * (6.0 / economy).min(rules.bowling.economy_cap)
        } else {
            // No runs conceded at all: the cap is the best available rate.
            wicket_subtotal * rules.bowling.economy_cap
        }
    } else {
        wicket_subtotal
    };

    points += bowling.maidens as f64 * rules.bowling.maiden_points;

    if bowling.wickets >= 5 {
        points += rules.bowling.five_wicket_bonus;
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Ruleset {
        Ruleset::for_version("standard-2024").unwrap()
    }

    fn bat(runs: u32, balls_faced: u32, dismissed: bool) -> Performance {
        Performance {
            batting: Some(BattingFacet {
                runs,
                balls_faced,
                dismissed,
            }),
            ..Default::default()
        }
    }

    fn bowl(balls_bowled: u32, runs_conceded: u32, wickets: u32, maidens: u32) -> Performance {
        Performance {
            bowling: Some(BowlingFacet {
                balls_bowled,
                runs_conceded,
                wickets,
                maidens,
            }),
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------
    // Batting
    // ------------------------------------------------------------------

    #[test]
    fn century_at_high_strike_rate() {
        // 105 off 84: tiers 139.25, SR multiplier 1.25, century bonus +16.
        let breakdown = score_performance(&bat(105, 84, true), &rules()).unwrap();
        assert!((breakdown.batting - 190.0625).abs() < 1e-9);
        assert!((breakdown.total - 190.0625).abs() < 1e-9);
    }

    #[test]
    fn fifty_bonus_not_cumulative_with_century() {
        let fifty = score_performance(&bat(50, 50, false), &rules()).unwrap();
        // 30*1.0 + 19*1.25 + 1*1.5 = 55.25, SR 1.0, +8 fifty bonus
        assert!((fifty.batting - 63.25).abs() < 1e-9);

        let hundred = score_performance(&bat(100, 100, false), &rules()).unwrap();
        // 30 + 23.75 + 75 + 1.75 = 130.5, SR 1.0, +16 century (no +8)
        assert!((hundred.batting - 146.5).abs() < 1e-9);
    }

    #[test]
    fn duck_clamps_at_zero() {
        let breakdown = score_performance(&bat(0, 4, true), &rules()).unwrap();
        assert!((breakdown.batting - -2.0).abs() < 1e-9);
        assert!((breakdown.total).abs() < f64::EPSILON);
    }

    #[test]
    fn not_out_zero_is_not_a_duck() {
        let breakdown = score_performance(&bat(0, 6, false), &rules()).unwrap();
        assert!((breakdown.batting).abs() < f64::EPSILON);
    }

    #[test]
    fn diamond_duck_carries_no_penalty() {
        // Run out without facing a ball: no run subtotal, no duck penalty.
        let breakdown = score_performance(&bat(0, 0, true), &rules()).unwrap();
        assert!((breakdown.batting).abs() < f64::EPSILON);
    }

    #[test]
    fn did_not_bat_scores_nothing() {
        let breakdown = score_performance(&Performance::default(), &rules()).unwrap();
        assert!((breakdown.total).abs() < f64::EPSILON);
    }

    #[test]
    fn slow_innings_scales_down() {
        // 30 off 60: subtotal 30, SR 0.5 -> 15.
        let breakdown = score_performance(&bat(30, 60, true), &rules()).unwrap();
        assert!((breakdown.batting - 15.0).abs() < 1e-9);
    }

    // ------------------------------------------------------------------
    // Bowling
    // ------------------------------------------------------------------

    #[test]
    fn five_wicket_haul_at_economy_four() {
        // 5-40 off 10 overs: subtotal 100, rate 6/4 = 1.5 -> 150, haul +8.
        let breakdown = score_performance(&bowl(60, 40, 5, 0), &rules()).unwrap();
        assert!((breakdown.bowling - 158.0).abs() < 1e-9);
        assert!((breakdown.total - 158.0).abs() < 1e-9);
    }

    #[test]
    fn economy_multiplier_is_capped() {
        // 2-6 off 6 overs: economy 1.0 would give x6; cap is 3.0.
        let breakdown = score_performance(&bowl(36, 6, 2, 0), &rules()).unwrap();
        assert!((breakdown.bowling - 90.0).abs() < 1e-9);
    }

    #[test]
    fn zero_runs_conceded_uses_cap() {
        let breakdown = score_performance(&bowl(12, 0, 1, 2), &rules()).unwrap();
        // 1 wicket * 15 * cap(3.0) + 2 maidens * 15 = 75
        assert!((breakdown.bowling - 75.0).abs() < 1e-9);
    }

    #[test]
    fn wickets_without_overs_stand_unscaled() {
        // Degenerate upstream row: wickets recorded with no balls bowled.
        let breakdown = score_performance(&bowl(0, 0, 2, 0), &rules()).unwrap();
        assert!((breakdown.bowling - 30.0).abs() < 1e-9);
    }

    #[test]
    fn maidens_are_flat() {
        let breakdown = score_performance(&bowl(48, 24, 0, 3), &rules()).unwrap();
        // 0 wickets; 3 maidens * 15 = 45
        assert!((breakdown.bowling - 45.0).abs() < 1e-9);
    }

    #[test]
    fn partial_overs_use_ball_count() {
        // 4.3 overs = 27 balls, 27 runs: economy 6.0 -> multiplier 1.0.
        let breakdown = score_performance(&bowl(27, 27, 1, 0), &rules()).unwrap();
        assert!((breakdown.bowling - 15.0).abs() < 1e-9);
    }

    // ------------------------------------------------------------------
    // Fielding
    // ------------------------------------------------------------------

    #[test]
    fn fielding_credits_sum() {
        let perf = Performance {
            fielding: FieldingFacet {
                catches: 2,
                stumpings: 1,
                runouts: 1,
            },
            ..Default::default()
        };
        let breakdown = score_performance(&perf, &rules()).unwrap();
        assert!((breakdown.fielding - 20.0).abs() < 1e-9);
        assert!((breakdown.catch_points - 8.0).abs() < 1e-9);
    }

    #[test]
    fn catch_points_reported_separately() {
        let perf = Performance {
            fielding: FieldingFacet {
                catches: 3,
                stumpings: 0,
                runouts: 0,
            },
            ..Default::default()
        };
        let breakdown = score_performance(&perf, &rules()).unwrap();
        assert!((breakdown.catch_points - 12.0).abs() < 1e-9);
        assert!((breakdown.fielding - breakdown.catch_points).abs() < f64::EPSILON);
    }

    // ------------------------------------------------------------------
    // Validation / purity
    // ------------------------------------------------------------------

    #[test]
    fn rejects_more_than_ten_wickets() {
        let err = score_performance(&bowl(60, 40, 11, 0), &rules()).unwrap_err();
        match err {
            ScoringError::InvalidPerformance { reason } => {
                assert!(reason.contains("11 wickets"));
            }
            other => panic!("expected InvalidPerformance, got: {other}"),
        }
    }

    #[test]
    fn rejects_impossible_maiden_count() {
        let err = score_performance(&bowl(12, 0, 0, 3), &rules()).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidPerformance { .. }));
    }

    #[test]
    fn scoring_is_pure() {
        let perf = Performance {
            batting: Some(BattingFacet {
                runs: 73,
                balls_faced: 41,
                dismissed: true,
            }),
            bowling: Some(BowlingFacet {
                balls_bowled: 18,
                runs_conceded: 22,
                wickets: 1,
                maidens: 0,
            }),
            fielding: FieldingFacet {
                catches: 1,
                stumpings: 0,
                runouts: 0,
            },
        };
        let r = rules();
        let first = score_performance(&perf, &r).unwrap();
        for _ in 0..10 {
            let again = score_performance(&perf, &r).unwrap();
            assert_eq!(first.total.to_bits(), again.total.to_bits());
        }
    }

    #[test]
    fn all_round_total_combines_facets() {
        let perf = Performance {
            batting: Some(BattingFacet {
                runs: 30,
                balls_faced: 30,
                dismissed: true,
            }),
            bowling: Some(BowlingFacet {
                balls_bowled: 36,
                runs_conceded: 36,
                wickets: 2,
                maidens: 0,
            }),
            fielding: FieldingFacet {
                catches: 1,
                stumpings: 0,
                runouts: 0,
            },
        };
        let breakdown = score_performance(&perf, &rules()).unwrap();
        // batting 30 (SR 1.0), bowling 30 (economy 6.0 -> x1.0), fielding 4
        assert!((breakdown.total - 64.0).abs() < 1e-9);
    }
}
