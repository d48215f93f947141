// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Service Level Objectives and Guard verdicts
//!
//! An objective names a metric query, the threshold each sample is compared
//! against, the evaluation window, and the error budget: the tolerated fraction
//! of failing samples inside the window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default tolerated fraction of failing samples inside a window
pub const DEFAULT_ERROR_BUDGET: f64 = 0.05;

/// Opaque query descriptor handed to the metric-source collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricQuery {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub comparator: Comparator,
    pub value: f64,
}

impl Threshold {
    pub fn new(comparator: Comparator, value: f64) -> Self {
        Self { comparator, value }
    }

    /// Whether an observed value satisfies the objective. NaN never does.
    pub fn is_met(&self, observed: f64) -> bool {
        if observed.is_nan() {
            return false;
        }
        match self.comparator {
            Comparator::LessThan => observed < self.value,
            Comparator::LessOrEqual => observed <= self.value,
            Comparator::GreaterThan => observed > self.value,
            Comparator::GreaterOrEqual => observed >= self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLevelObjective {
    pub name: String,
    pub query: MetricQuery,
    pub threshold: Threshold,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(default = "default_error_budget")]
    pub error_budget: f64,
    /// Overrides the guard's minimum sample count for this objective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<u32>,
}

impl ServiceLevelObjective {
    pub fn new(
        name: impl Into<String>,
        query: MetricQuery,
        threshold: Threshold,
        window: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            query,
            threshold,
            window,
            error_budget: DEFAULT_ERROR_BUDGET,
            min_samples: None,
        }
    }

    pub fn with_error_budget(mut self, budget: f64) -> Self {
        self.error_budget = budget;
        self
    }

    pub fn with_min_samples(mut self, min_samples: u32) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("objective name cannot be empty".to_string());
        }
        if self.query.expression.trim().is_empty() {
            return Err(format!("objective '{}' has an empty metric query", self.name));
        }
        if !self.threshold.value.is_finite() {
            return Err(format!("objective '{}' has a non-finite threshold", self.name));
        }
        if self.window.is_zero() {
            return Err(format!("objective '{}' has a zero evaluation window", self.name));
        }
        if !(0.0..1.0).contains(&self.error_budget) {
            return Err(format!(
                "objective '{}' error budget must be in [0, 1), got {}",
                self.name, self.error_budget
            ));
        }
        if self.min_samples == Some(0) {
            return Err(format!("objective '{}' min_samples must be at least 1", self.name));
        }
        Ok(())
    }
}

fn default_error_budget() -> f64 {
    DEFAULT_ERROR_BUDGET
}

/// Single observation returned by the metric source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(value: f64, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}

/// Control signal emitted by the SLO Guard. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    Pass,
    Breach { objectives: Vec<String> },
    Inconclusive { objectives: Vec<String> },
}

impl GuardVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            GuardVerdict::Pass => "pass",
            GuardVerdict::Breach { .. } => "breach",
            GuardVerdict::Inconclusive { .. } => "inconclusive",
        }
    }
}

impl fmt::Display for GuardVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardVerdict::Pass => f.write_str("pass"),
            GuardVerdict::Breach { objectives } => write!(f, "breach ({})", objectives.join(", ")),
            GuardVerdict::Inconclusive { objectives } => {
                write!(f, "inconclusive ({})", objectives.join(", "))
            }
        }
    }
}

/// Per-objective view of the sliding window at the time of a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveReport {
    pub name: String,
    pub samples: usize,
    pub failing: usize,
    pub verdict: GuardVerdict,
}

impl ObjectiveReport {
    pub fn failing_fraction(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.failing as f64 / self.samples as f64
        }
    }
}

/// Latest-value payload published by the guard on every sampling pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardReport {
    /// Number of completed sampling passes, 0 before the first one
    pub sequence: u64,
    pub verdict: GuardVerdict,
    pub objectives: Vec<ObjectiveReport>,
}

impl GuardReport {
    pub fn initial(objectives: &[ServiceLevelObjective]) -> Self {
        let names: Vec<String> = objectives.iter().map(|o| o.name.clone()).collect();
        let verdict = if names.is_empty() {
            GuardVerdict::Pass
        } else {
            GuardVerdict::Inconclusive { objectives: names }
        };
        Self {
            sequence: 0,
            verdict,
            objectives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_comparators() {
        assert!(Threshold::new(Comparator::LessThan, 1.0).is_met(0.9));
        assert!(!Threshold::new(Comparator::LessThan, 1.0).is_met(1.0));
        assert!(Threshold::new(Comparator::LessOrEqual, 1.0).is_met(1.0));
        assert!(Threshold::new(Comparator::GreaterOrEqual, 0.99).is_met(0.995));
        assert!(!Threshold::new(Comparator::GreaterThan, 0.5).is_met(f64::NAN));
    }

    #[test]
    fn test_objective_validation() {
        let objective = ServiceLevelObjective::new(
            "p99-latency",
            MetricQuery::new("latency_p99"),
            Threshold::new(Comparator::LessThan, 0.3),
            Duration::from_secs(60),
        );
        assert!(objective.validate().is_ok());
        assert!(objective.clone().with_error_budget(1.5).validate().is_err());

        assert!(objective.clone().with_min_samples(0).validate().is_err());
        assert!(objective.clone().with_min_samples(1).validate().is_ok());

        let mut zero_window = objective;
        zero_window.window = Duration::ZERO;
        assert!(zero_window.validate().is_err());
    }

    #[test]
    fn test_objective_yaml_durations() {
        let yaml = r#"
name: checkout-latency
query:
  expression: "p99(checkout)"
threshold:
  comparator: less_than
  value: 0.25
window: 2m
"#;
        let objective: ServiceLevelObjective = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(objective.window, Duration::from_secs(120));
        assert_eq!(objective.error_budget, DEFAULT_ERROR_BUDGET);
        assert_eq!(objective.min_samples, None);
    }

    #[test]
    fn test_initial_report_is_inconclusive() {
        let objective = ServiceLevelObjective::new(
            "a",
            MetricQuery::new("q"),
            Threshold::new(Comparator::LessThan, 1.0),
            Duration::from_secs(10),
        );
        let report = GuardReport::initial(&[objective]);
        assert_eq!(report.sequence, 0);
        assert!(matches!(report.verdict, GuardVerdict::Inconclusive { .. }));
        assert_eq!(GuardReport::initial(&[]).verdict, GuardVerdict::Pass);
    }
}
