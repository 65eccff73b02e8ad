//! Threshold-tier evaluation — the arithmetic heart of the engine.
//!
//! A `TierTable` is an ordered list of (minimum volume, rate) steps.
//! `evaluate` selects the highest step whose threshold the volume meets
//! and prices the whole volume at that step's rate. Pure, no I/O.

use crate::types::round2;
use serde::{Deserialize, Serialize};

/// One (minimum threshold, rate) step of a tier table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierStep {
    #[serde(rename = "min")]
    pub min:  f64,
    pub rate: f64,
}

/// A validated tier table: steps sorted ascending by threshold,
/// deduplicated by threshold, thresholds non-negative.
/// An empty table means the line yields no rebate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TierTable {
    steps: Vec<TierStep>,
}

impl TierTable {
    /// Build a table from raw steps. Negative thresholds are rejected;
    /// duplicate thresholds keep the first occurrence after sorting.
    pub fn new(mut steps: Vec<TierStep>) -> Result<Self, String> {
        for s in &steps {
            if s.min < 0.0 || !s.min.is_finite() || !s.rate.is_finite() {
                return Err(format!("invalid tier step: min={} rate={}", s.min, s.rate));
            }
        }
        steps.sort_by(|a, b| a.min.total_cmp(&b.min));
        steps.dedup_by(|a, b| a.min == b.min);
        Ok(Self { steps })
    }

    /// An empty table, usable in const/static position.
    pub const fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Parse from a JSON payload (`[{"min": 20000, "rate": 0.01}, ...]`).
    /// Anything that is not a list of valid steps is rejected.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let trimmed = json.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::default());
        }
        let steps: Vec<TierStep> =
            serde_json::from_str(trimmed).map_err(|e| format!("malformed tier table: {e}"))?;
        Self::new(steps)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[TierStep] {
        &self.steps
    }

    /// Lowest threshold in the table (UI: "you need at least X").
    pub fn min_threshold(&self) -> Option<f64> {
        self.steps.first().map(|s| s.min)
    }
}

/// Outcome of evaluating one volume against one tier table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierResult {
    pub volume:        f64,
    /// The threshold that was met, if any.
    pub selected_min:  Option<f64>,
    /// Lowest threshold of the table, reported even when unmet.
    pub min_threshold: Option<f64>,
    pub rate:          f64,
    pub triggered:     bool,
    /// volume x rate, rounded to 2 decimals.
    pub value:         f64,
}

impl TierResult {
    fn untriggered(volume: f64, min_threshold: Option<f64>) -> Self {
        Self {
            volume,
            selected_min: None,
            min_threshold,
            rate: 0.0,
            triggered: false,
            value: 0.0,
        }
    }
}

/// Select the highest step with `min <= volume` and price the volume at
/// its rate. Empty table or no step reached yields rate 0 / value 0.
pub fn evaluate(volume: f64, tiers: &TierTable) -> TierResult {
    let min_threshold = tiers.min_threshold();

    let mut selected: Option<&TierStep> = None;
    for step in tiers.steps() {
        if step.min <= volume {
            selected = Some(step);
        } else {
            break;
        }
    }

    match selected {
        None => TierResult::untriggered(volume, min_threshold),
        Some(step) => TierResult {
            volume,
            selected_min: Some(step.min),
            min_threshold,
            rate: step.rate,
            triggered: true,
            value: round2(volume * step.rate),
        },
    }
}

/// Progress of a volume toward the next step of a table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierProgress {
    /// Highest threshold already met.
    pub min_reached: Option<f64>,
    /// Next unmet threshold, if any remains.
    pub next_min:    Option<f64>,
    /// Rate currently earned.
    pub rate:        f64,
    /// Percentage toward `next_min`, capped at 100. When every step is
    /// met, 100; for an empty table, 0.
    pub progress:    f64,
}

/// Compute progression toward the next threshold of `tiers`.
pub fn progress(volume: f64, tiers: &TierTable) -> TierProgress {
    if tiers.is_empty() {
        return TierProgress {
            min_reached: None,
            next_min:    None,
            rate:        0.0,
            progress:    0.0,
        };
    }

    let mut min_reached = None;
    let mut rate = 0.0;
    for step in tiers.steps() {
        if step.min <= volume {
            min_reached = Some(step.min);
            rate = step.rate;
        } else {
            break;
        }
    }

    let next_min = tiers.steps().iter().find(|s| s.min > volume).map(|s| s.min);
    let progress = match next_min {
        Some(next) if next > 0.0 => (volume / next * 100.0).min(100.0),
        Some(_) => 100.0,
        None => 100.0,
    };

    TierProgress {
        min_reached,
        next_min,
        rate,
        progress,
    }
}

/// Rate the table would pay at the given threshold.
pub fn rate_at(tiers: &TierTable, threshold: f64) -> f64 {
    let mut rate = 0.0;
    for step in tiers.steps() {
        if step.min <= threshold {
            rate = step.rate;
        } else {
            break;
        }
    }
    rate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(steps: &[(f64, f64)]) -> TierTable {
        TierTable::new(steps.iter().map(|&(min, rate)| TierStep { min, rate }).collect())
            .unwrap()
    }

    #[test]
    fn unsorted_input_is_sorted_and_deduplicated() {
        let t = table(&[(50_000.0, 0.015), (20_000.0, 0.01), (50_000.0, 0.9)]);
        let mins: Vec<f64> = t.steps().iter().map(|s| s.min).collect();
        assert_eq!(mins, vec![20_000.0, 50_000.0]);
        assert_eq!(t.steps()[1].rate, 0.015);
    }

    #[test]
    fn negative_threshold_rejected() {
        assert!(TierTable::new(vec![TierStep { min: -1.0, rate: 0.01 }]).is_err());
    }

    #[test]
    fn from_json_rejects_non_list() {
        assert!(TierTable::from_json("{\"min\": 1}").is_err());
        assert!(TierTable::from_json("not json").is_err());
        assert!(TierTable::from_json("null").unwrap().is_empty());
        assert!(TierTable::from_json("").unwrap().is_empty());
    }

    #[test]
    fn progress_toward_next_step() {
        let t = table(&[(20_000.0, 0.01), (50_000.0, 0.015)]);
        let p = progress(40_000.0, &t);
        assert_eq!(p.min_reached, Some(20_000.0));
        assert_eq!(p.next_min, Some(50_000.0));
        assert_eq!(p.rate, 0.01);
        assert!((p.progress - 80.0).abs() < 1e-9);

        let done = progress(60_000.0, &t);
        assert_eq!(done.next_min, None);
        assert_eq!(done.progress, 100.0);
    }

    #[test]
    fn rate_at_threshold() {
        let t = table(&[(20_000.0, 0.01), (50_000.0, 0.015)]);
        assert_eq!(rate_at(&t, 50_000.0), 0.015);
        assert_eq!(rate_at(&t, 30_000.0), 0.01);
        assert_eq!(rate_at(&t, 0.0), 0.0);
    }
}
