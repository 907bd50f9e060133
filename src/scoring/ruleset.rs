// Versioned scoring rulesets, loaded from embedded TOML.

use serde::Deserialize;

use super::ScoringError;

/// The reference ruleset shipped with the binary.
const STANDARD_2024: &str = include_str!("../../rulesets/standard.toml");

/// A contiguous count band with a per-unit rate. `up_to` is inclusive; the
/// final tier of a schedule omits it and is open-ended.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Tier {
    #[serde(default)]
    pub up_to: Option<u32>,
    pub rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BattingRules {
    pub tiers: Vec<Tier>,
    pub fifty_bonus: f64,
    pub century_bonus: f64,
    pub duck_penalty: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BowlingRules {
    pub tiers: Vec<Tier>,
    pub maiden_points: f64,
    pub five_wicket_bonus: f64,
    pub economy_cap: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldingRules {
    pub catch: f64,
    pub stumping: f64,
    pub runout: f64,
    pub wicket_keeper_catch_factor: f64,
}

/// A complete versioned scoring configuration. The engine treats this as
/// opaque data; no scoring constant lives outside a ruleset file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ruleset {
    pub version: String,
    pub batting: BattingRules,
    pub bowling: BowlingRules,
    pub fielding: FieldingRules,
}

impl Ruleset {
    /// Look up a ruleset by version string.
    ///
    /// Returns `ScoringError::UnsupportedRuleset` for versions with no
    /// registry entry.
    pub fn for_version(version: &str) -> Result<Ruleset, ScoringError> {
        let text = match version {
            "standard-2024" => STANDARD_2024,
            _ => {
                return Err(ScoringError::UnsupportedRuleset {
                    version: version.to_string(),
                })
            }
        };

        let ruleset: Ruleset =
            toml::from_str(text).map_err(|source| ScoringError::RulesetParse {
                version: version.to_string(),
                source,
            })?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    /// Structural checks on tier schedules: bounds strictly ascending, and
    /// exactly the final tier open-ended.
    fn validate(&self) -> Result<(), ScoringError> {
        validate_tiers(&self.version, "batting", &self.batting.tiers)?;
        validate_tiers(&self.version, "bowling", &self.bowling.tiers)?;
        Ok(())
    }
}

fn validate_tiers(version: &str, schedule: &str, tiers: &[Tier]) -> Result<(), ScoringError> {
    let malformed = |detail: String| ScoringError::MalformedRuleset {
        version: version.to_string(),
        detail,
    };

    if tiers.is_empty() {
        return Err(malformed(format!("{schedule} tier schedule is empty")));
    }
    let mut prev = 0u32;
    for (i, tier) in tiers.iter().enumerate() {
        match tier.up_to {
            Some(bound) => {
                if i == tiers.len() - 1 {
                    return Err(malformed(format!(
                        "{schedule} schedule must end with an open-ended tier"
                    )));
                }
                if bound <= prev {
                    return Err(malformed(format!(
                        "{schedule} tier bounds must be strictly ascending (got {bound} after {prev})"
                    )));
                }
                prev = bound;
            }
            None => {
                if i != tiers.len() - 1 {
                    return Err(malformed(format!(
                        "{schedule} schedule has an open-ended tier before the last position"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Sum a tiered schedule over `count` units: each tier contributes
/// `units_in_tier * rate`.
pub fn tier_sum(count: u32, tiers: &[Tier]) -> f64 {
    let mut total = 0.0;
    let mut prev = 0u32;
    for tier in tiers {
        let upper = tier.up_to.unwrap_or(u32::MAX);
        if count <= prev {
            break;
        }
        let in_tier = count.min(upper) - prev;
        total += in_tier as f64 * tier.rate;
        prev = upper;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_ruleset_loads() {
        let rules = Ruleset::for_version("standard-2024").expect("embedded ruleset should parse");
        assert_eq!(rules.version, "standard-2024");
        assert_eq!(rules.batting.tiers.len(), 4);
        assert_eq!(rules.bowling.tiers.len(), 3);
        assert!((rules.fielding.catch - 4.0).abs() < f64::EPSILON);
        assert!((rules.fielding.wicket_keeper_catch_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let err = Ruleset::for_version("experimental-9000").unwrap_err();
        match err {
            ScoringError::UnsupportedRuleset { version } => {
                assert_eq!(version, "experimental-9000");
            }
            other => panic!("expected UnsupportedRuleset, got: {other}"),
        }
    }

    #[test]
    fn tier_sum_single_band() {
        let tiers = vec![Tier {
            up_to: None,
            rate: 2.0,
        }];
        assert!((tier_sum(10, &tiers) - 20.0).abs() < f64::EPSILON);
        assert!((tier_sum(0, &tiers)).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_sum_spans_bands() {
        // [1-30]@1.0, [31-49]@1.25, [50-99]@1.5, [100+]@1.75
        let tiers = vec![
            Tier { up_to: Some(30), rate: 1.0 },
            Tier { up_to: Some(49), rate: 1.25 },
            Tier { up_to: Some(99), rate: 1.5 },
            Tier { up_to: None, rate: 1.75 },
        ];
        // 105 runs: 30*1.0 + 19*1.25 + 50*1.5 + 6*1.75 = 139.25
        assert!((tier_sum(105, &tiers) - 139.25).abs() < 1e-9);
        // Exactly on a boundary
        assert!((tier_sum(30, &tiers) - 30.0).abs() < 1e-9);
        assert!((tier_sum(31, &tiers) - 31.25).abs() < 1e-9);
    }

    #[test]
    fn tier_sum_wicket_schedule() {
        let tiers = vec![
            Tier { up_to: Some(2), rate: 15.0 },
            Tier { up_to: Some(4), rate: 20.0 },
            Tier { up_to: None, rate: 30.0 },
        ];
        // 5 wickets: 2*15 + 2*20 + 1*30 = 100
        assert!((tier_sum(5, &tiers) - 100.0).abs() < 1e-9);
        assert!((tier_sum(1, &tiers) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_ascending_tiers() {
        let toml_text = r#"
version = "bad"

[batting]
tiers = [{ up_to = 30, rate = 1.0 }, { up_to = 20, rate = 1.5 }, { rate = 2.0 }]
fifty_bonus = 8.0
century_bonus = 16.0
duck_penalty = 2.0

[bowling]
tiers = [{ rate = 15.0 }]
maiden_points = 15.0
five_wicket_bonus = 8.0
economy_cap = 3.0

[fielding]
catch = 4.0
stumping = 6.0
runout = 6.0
wicket_keeper_catch_factor = 2.0
"#;
        let ruleset: Ruleset = toml::from_str(toml_text).unwrap();
        let err = ruleset.validate().unwrap_err();
        match err {
            ScoringError::MalformedRuleset { detail, .. } => {
                assert!(detail.contains("ascending"));
            }
            other => panic!("expected MalformedRuleset, got: {other}"),
        }
    }

    #[test]
    fn rejects_closed_final_tier() {
        let toml_text = r#"
version = "bad"

[batting]
tiers = [{ up_to = 30, rate = 1.0 }]
fifty_bonus = 8.0
century_bonus = 16.0
duck_penalty = 2.0

[bowling]
tiers = [{ rate = 15.0 }]
maiden_points = 15.0
five_wicket_bonus = 8.0
economy_cap = 3.0

[fielding]
catch = 4.0
stumping = 6.0
runout = 6.0
wicket_keeper_catch_factor = 2.0
"#;
        let ruleset: Ruleset = toml::from_str(toml_text).unwrap();
        let err = ruleset.validate().unwrap_err();
        match err {
            ScoringError::MalformedRuleset { detail, .. } => {
                assert!(detail.contains("open-ended"));
            }
            other => panic!("expected MalformedRuleset, got: {other}"),
        }
    }
}
