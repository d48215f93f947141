// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! SLO Guard - Background evaluator of a plan's objectives
//!
//! Samples every objective's metric query at a fixed interval and keeps a
//! time-based sliding window of pass/fail outcomes per objective (the
//! objective's own evaluation window). After each sampling pass the aggregate
//! verdict is published on a single-slot `watch` channel; the rollout
//! controller reads the latest value at its decision points.
//!
//! Per objective:
//! - fewer samples in the window than the minimum → `Inconclusive`
//! - failing fraction above the error budget → `Breach`
//! - otherwise `Pass`
//!
//! Aggregate: any breach wins, then any inconclusive, else pass.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Continuous SLO evaluation feeding the rollout controller

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::retry::with_retry;
use crate::domain::collaborators::MetricSource;
use crate::domain::orchestrator_config::{GuardPolicy, RetryPolicy};
use crate::domain::slo::{GuardReport, GuardVerdict, ObjectiveReport, ServiceLevelObjective};

struct ObjectiveWindow {
    objective: ServiceLevelObjective,
    /// (ingested at, met threshold)
    samples: VecDeque<(Instant, bool)>,
}

impl ObjectiveWindow {
    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.objective.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn report(&self, default_min_samples: u32) -> ObjectiveReport {
        let samples = self.samples.len();
        let failing = self.samples.iter().filter(|(_, ok)| !ok).count();
        let min_samples = self.objective.min_samples.unwrap_or(default_min_samples).max(1) as usize;
        let names = vec![self.objective.name.clone()];

        let verdict = if samples < min_samples {
            GuardVerdict::Inconclusive { objectives: names }
        } else if failing as f64 / samples as f64 > self.objective.error_budget {
            GuardVerdict::Breach { objectives: names }
        } else {
            GuardVerdict::Pass
        };

        ObjectiveReport {
            name: self.objective.name.clone(),
            samples,
            failing,
            verdict,
        }
    }
}

pub struct SloGuard {
    windows: Vec<ObjectiveWindow>,
    source: Arc<dyn MetricSource>,
    policy: GuardPolicy,
    retry: RetryPolicy,
    sequence: u64,
}

/// Running guard task
pub struct GuardHandle {
    pub verdicts: watch::Receiver<GuardReport>,
    pub task: tokio::task::JoinHandle<()>,
}

impl SloGuard {
    pub fn new(
        objectives: &[ServiceLevelObjective],
        source: Arc<dyn MetricSource>,
        policy: GuardPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            windows: objectives
                .iter()
                .map(|objective| ObjectiveWindow {
                    objective: objective.clone(),
                    samples: VecDeque::new(),
                })
                .collect(),
            source,
            policy,
            retry,
            sequence: 0,
        }
    }

    /// Query every objective once, fold the samples into the windows and
    /// return the resulting report
    pub async fn sample_once(&mut self) -> GuardReport {
        let lookback = self.policy.sample_interval;
        for window in &mut self.windows {
            let source = Arc::clone(&self.source);
            let query = window.objective.query.clone();
            let result = with_retry(&self.retry, "metric_query", || {
                let source = Arc::clone(&source);
                let query = query.clone();
                async move { source.query(&query, lookback).await }
            })
            .await;

            let now = Instant::now();
            match result {
                Ok(samples) => {
                    for sample in samples.value {
                        let met = window.objective.threshold.is_met(sample.value);
                        debug!(
                            objective = %window.objective.name,
                            value = sample.value,
                            met,
                            "Guard sample"
                        );
                        window.samples.push_back((now, met));
                    }
                }
                Err(e) => warn!(
                    objective = %window.objective.name,
                    error = %e,
                    "Metric query failed; no samples this pass"
                ),
            }
            window.evict(now);
        }

        self.sequence += 1;
        self.evaluate()
    }

    /// Verdict over the current windows without sampling
    pub fn evaluate(&self) -> GuardReport {
        let objectives: Vec<ObjectiveReport> = self
            .windows
            .iter()
            .map(|w| w.report(self.policy.min_samples))
            .collect();

        let mut breached = Vec::new();
        let mut inconclusive = Vec::new();
        for report in &objectives {
            match &report.verdict {
                GuardVerdict::Breach { .. } => breached.push(report.name.clone()),
                GuardVerdict::Inconclusive { .. } => inconclusive.push(report.name.clone()),
                GuardVerdict::Pass => {}
            }
        }

        let verdict = if !breached.is_empty() {
            GuardVerdict::Breach { objectives: breached }
        } else if !inconclusive.is_empty() {
            GuardVerdict::Inconclusive {
                objectives: inconclusive,
            }
        } else {
            GuardVerdict::Pass
        };

        GuardReport {
            sequence: self.sequence,
            verdict,
            objectives,
        }
    }

    /// Start sampling in a background task until `cancel` fires
    pub fn spawn(mut self, cancel: CancellationToken) -> GuardHandle {
        let objectives: Vec<ServiceLevelObjective> =
            self.windows.iter().map(|w| w.objective.clone()).collect();
        let (tx, rx) = watch::channel(GuardReport::initial(&objectives));

        let task = tokio::spawn(async move {
            info!(
                objectives = objectives.len(),
                interval = ?self.policy.sample_interval,
                "Starting SLO guard"
            );

            let mut tick = interval(self.policy.sample_interval.max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("SLO guard cancelled");
                        break;
                    }
                    _ = tick.tick() => {
                        let report = self.sample_once().await;
                        metrics::counter!("keel_guard_verdicts_total", "verdict" => report.verdict.label())
                            .increment(1);
                        if tx.send(report).is_err() {
                            debug!("No verdict receivers left; stopping SLO guard");
                            break;
                        }
                    }
                }
            }
        });

        GuardHandle { verdicts: rx, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::CollaboratorError;
    use crate::domain::slo::{Comparator, MetricQuery, MetricSample, Threshold};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Returns one sample per query, cycling through `values`
    struct ScriptedSource {
        values: Mutex<VecDeque<f64>>,
        fallback: f64,
    }

    impl ScriptedSource {
        fn new(values: &[f64], fallback: f64) -> Arc<Self> {
            Arc::new(Self {
                values: Mutex::new(values.iter().copied().collect()),
                fallback,
            })
        }
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn query(&self, _query: &MetricQuery, _window: Duration) -> Result<Vec<MetricSample>, CollaboratorError> {
            let value = self.values.lock().pop_front().unwrap_or(self.fallback);
            Ok(vec![MetricSample::new(value, Utc::now())])
        }
    }

    fn latency(window_secs: u64) -> ServiceLevelObjective {
        ServiceLevelObjective::new(
            "p99-latency",
            MetricQuery::new("p99(http_request_duration_seconds)"),
            Threshold::new(Comparator::LessOrEqual, 0.5),
            Duration::from_secs(window_secs),
        )
        .with_error_budget(0.2)
    }

    fn policy(min_samples: u32) -> GuardPolicy {
        GuardPolicy {
            sample_interval: Duration::from_secs(10),
            min_samples,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconclusive_until_min_samples() {
        let source = ScriptedSource::new(&[], 0.1);
        let mut guard = SloGuard::new(&[latency(600)], source, policy(3), RetryPolicy::default());

        assert!(matches!(guard.sample_once().await.verdict, GuardVerdict::Inconclusive { .. }));
        assert!(matches!(guard.sample_once().await.verdict, GuardVerdict::Inconclusive { .. }));
        let report = guard.sample_once().await;
        assert_eq!(report.verdict, GuardVerdict::Pass);
        assert_eq!(report.sequence, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breach_when_failing_fraction_exceeds_budget() {
        // 1 of 5 failing is exactly the 0.2 budget; the second failure breaches
        let source = ScriptedSource::new(&[0.1, 0.9, 0.1, 0.1, 0.1, 0.9], 0.1);
        let mut guard = SloGuard::new(&[latency(600)], source, policy(5), RetryPolicy::default());

        for _ in 0..5 {
            guard.sample_once().await;
        }
        assert_eq!(guard.evaluate().verdict, GuardVerdict::Pass);

        let report = guard.sample_once().await;
        assert_eq!(
            report.verdict,
            GuardVerdict::Breach {
                objectives: vec!["p99-latency".to_string()]
            }
        );
        assert_eq!(report.objectives[0].failing, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_samples_leave_the_window() {
        let source = ScriptedSource::new(&[0.9, 0.9], 0.1);
        let mut guard = SloGuard::new(&[latency(30)], source, policy(2), RetryPolicy::default());

        guard.sample_once().await;
        guard.sample_once().await;
        assert!(matches!(guard.evaluate().verdict, GuardVerdict::Breach { .. }));

        tokio::time::advance(Duration::from_secs(31)).await;
        let report = guard.sample_once().await;
        // both failures evicted, one fresh passing sample
        assert_eq!(report.objectives[0].samples, 1);
        assert!(matches!(report.verdict, GuardVerdict::Inconclusive { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_guard_publishes_latest_report() {
        let source = ScriptedSource::new(&[], 0.1);
        let guard = SloGuard::new(&[latency(600)], source, policy(2), RetryPolicy::default());
        let cancel = CancellationToken::new();
        let mut handle = guard.spawn(cancel.clone());

        assert_eq!(handle.verdicts.borrow().sequence, 0);
        handle.verdicts.changed().await.unwrap();
        handle.verdicts.changed().await.unwrap();
        assert_eq!(handle.verdicts.borrow().verdict, GuardVerdict::Pass);

        cancel.cancel();
        handle.task.await.unwrap();
    }

    #[test]
    fn test_empty_window_never_passes() {
        let guard = SloGuard::new(
            &[latency(600).with_min_samples(0)],
            ScriptedSource::new(&[], 0.1),
            policy(0),
            RetryPolicy::default(),
        );
        assert!(matches!(guard.evaluate().verdict, GuardVerdict::Inconclusive { .. }));
    }

    #[test]
    fn test_no_objectives_pass() {
        let guard = SloGuard::new(&[], ScriptedSource::new(&[], 0.0), policy(5), RetryPolicy::default());
        assert_eq!(guard.evaluate().verdict, GuardVerdict::Pass);
    }
}
