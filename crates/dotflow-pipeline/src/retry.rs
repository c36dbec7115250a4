//! Retry policy and backoff computation for node execution.
//!
//! Policies are resolved per node from attributes:
//!
//! | attribute            | scope | default       |
//! |----------------------|-------|---------------|
//! | `max_retries`        | node  | graph `default_max_retry`, else 0 |
//! | `allow_partial`      | node  | `false`       |
//! | `retry_backoff`      | node  | `exponential` |
//! | `retry_backoff_ms`   | node  | 500           |
//! | `retry_jitter`       | node  | `true`        |
//! | `max_retry_delay_ms` | graph | 30000 (floor 100) |

use std::time::Duration;

use dotflow_dot::Node;
use dotflow_types::{Outcome, StageStatus};

use crate::graph::PipelineGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

impl BackoffStrategy {
    /// Case-insensitive; anything unrecognised is exponential.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "constant" => BackoffStrategy::Constant,
            "linear" => BackoffStrategy::Linear,
            _ => BackoffStrategy::Exponential,
        }
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn for_node(node: &Node, graph: &PipelineGraph) -> Self {
        Self {
            strategy: BackoffStrategy::parse(node.str_attr("retry_backoff").unwrap_or("exponential")),
            base_ms: node.int_attr("retry_backoff_ms", 500).max(0) as u64,
            max_delay_ms: graph.int_attr("max_retry_delay_ms", 30_000).max(100) as u64,
            jitter: node.bool_attr("retry_jitter", true),
        }
    }

    /// Delay before clamping and jitter.
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        match self.strategy {
            BackoffStrategy::Constant => self.base_ms,
            BackoffStrategy::Linear => self.base_ms.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Exponential => self
                .base_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        }
    }

    /// Clamped delay with jitter applied when enabled.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let delay = self.raw_delay_ms(attempt).min(self.max_delay_ms);
        if self.jitter {
            apply_jitter(delay, uuid::Uuid::new_v4().as_u128())
        } else {
            delay
        }
    }

    /// Sleep duration before retry `attempt`; jitter is sampled once per call.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }
}

/// Shift `delay_ms` by a uniform amount in `[-v, v]` where `v` is 20% of the
/// delay (at least 1). `sample` is any uniformly distributed value.
pub fn apply_jitter(delay_ms: u64, sample: u128) -> u64 {
    let variance = (delay_ms / 5).max(1);
    let span = u128::from(variance) * 2 + 1;
    let offset = (sample % span) as i128 - i128::from(variance);
    (i128::from(delay_ms) + offset).max(0) as u64
}

/// Bounded retry for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub allow_partial: bool,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn for_node(node: &Node, graph: &PipelineGraph) -> Self {
        let max_retries = if node.is_explicit("max_retries") {
            node.int_attr("max_retries", 0)
        } else {
            graph.int_attr("default_max_retry", 0)
        };
        Self {
            max_retries: max_retries.clamp(0, i64::from(u32::MAX)) as u32,
            allow_partial: node.bool_attr("allow_partial", false),
            backoff: BackoffPolicy::for_node(node, graph),
        }
    }

    /// True when `outcome` ends the attempt loop regardless of remaining retries.
    pub fn accepts(&self, outcome: &Outcome) -> bool {
        match outcome.status {
            StageStatus::Success => true,
            StageStatus::PartialSuccess => self.allow_partial,
            _ => false,
        }
    }

    /// True when another attempt should follow `outcome`, given how many
    /// retries have already been used.
    pub fn should_retry(&self, outcome: &Outcome, retries_used: u32) -> bool {
        matches!(outcome.status, StageStatus::Retry | StageStatus::Fail)
            && retries_used < self.max_retries
    }

    /// Final outcome once no retry remains. With `allow_partial`, a `fail`
    /// becomes `partial_success`.
    pub fn finish(&self, mut outcome: Outcome) -> Outcome {
        if self.allow_partial && outcome.status == StageStatus::Fail {
            outcome.status = StageStatus::PartialSuccess;
            if outcome.notes.is_none() {
                outcome.notes = Some("allow_partial converted fail to partial_success".into());
            }
        }
        outcome
    }
}

/// Coerce a status outside the known set into `fail`, noting the original.
pub fn normalize_outcome(mut outcome: Outcome) -> Outcome {
    if let StageStatus::Unknown(raw) = &outcome.status {
        let notes = match outcome.notes.as_deref() {
            Some(notes) if !notes.is_empty() => format!("{notes} (invalid status '{raw}')"),
            _ => format!("Invalid status '{raw}'"),
        };
        outcome.status = StageStatus::Fail;
        outcome.notes = Some(notes);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy, base_ms: u64) -> BackoffPolicy {
        BackoffPolicy {
            strategy,
            base_ms,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }

    fn graph(dot: &str) -> PipelineGraph {
        PipelineGraph::new(dotflow_dot::parse(dot).unwrap())
    }

    #[test]
    fn exponential_attempt_two_is_four_times_base() {
        let p = policy(BackoffStrategy::Exponential, 500);
        assert_eq!(p.raw_delay_ms(2), 2000);
        assert_eq!(p.delay_ms(2), 2000);
    }

    #[test]
    fn strategies() {
        assert_eq!(policy(BackoffStrategy::Constant, 300).raw_delay_ms(5), 300);
        assert_eq!(policy(BackoffStrategy::Linear, 300).raw_delay_ms(1), 600);
        assert_eq!(policy(BackoffStrategy::Linear, 300).raw_delay_ms(3), 1200);
        assert_eq!(policy(BackoffStrategy::Exponential, 100).raw_delay_ms(0), 100);
        assert_eq!(BackoffStrategy::parse("LINEAR"), BackoffStrategy::Linear);
        assert_eq!(BackoffStrategy::parse("weird"), BackoffStrategy::Exponential);
    }

    #[test]
    fn delay_is_clamped() {
        let mut p = policy(BackoffStrategy::Exponential, 1000);
        p.max_delay_ms = 5000;
        assert_eq!(p.delay_ms(10), 5000);
        assert_eq!(p.raw_delay_ms(200), u64::MAX);
    }

    #[test]
    fn delay_for_attempt_matches_clamped_millis() {
        let mut p = policy(BackoffStrategy::Linear, 250);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(500));
        p.max_delay_ms = 400;
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
        assert!(policy(BackoffStrategy::Constant, 0).delay_for_attempt(4).is_zero());
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        assert_eq!(apply_jitter(1000, 0), 800);
        assert_eq!(apply_jitter(1000, 200), 1000);
        assert_eq!(apply_jitter(1000, 400), 1200);
        assert_eq!(apply_jitter(0, 0), 0);
        assert_eq!(apply_jitter(0, 2), 1);

        let mut p = policy(BackoffStrategy::Constant, 1000);
        p.jitter = true;
        for _ in 0..50 {
            let d = p.delay_ms(1);
            assert!((800..=1200).contains(&d), "{d}");
        }
    }

    #[test]
    fn policy_from_attributes() {
        let g = graph(
            r#"digraph G {
                default_max_retry=2
                max_retry_delay_ms=10
                a [retry_backoff="Linear", retry_backoff_ms=-5, retry_jitter=false, allow_partial=true]
                b [max_retries=0]
                c [max_retries=-3]
            }"#,
        );
        let a = RetryPolicy::for_node(g.node("a").unwrap(), &g);
        assert_eq!(a.max_retries, 2);
        assert!(a.allow_partial);
        assert_eq!(
            a.backoff,
            BackoffPolicy {
                strategy: BackoffStrategy::Linear,
                base_ms: 0,
                max_delay_ms: 100,
                jitter: false,
            }
        );

        assert_eq!(RetryPolicy::for_node(g.node("b").unwrap(), &g).max_retries, 0);
        assert_eq!(RetryPolicy::for_node(g.node("c").unwrap(), &g).max_retries, 0);
    }

    #[test]
    fn defaults_without_attributes() {
        let g = graph("digraph G { a }");
        let p = RetryPolicy::for_node(g.node("a").unwrap(), &g);
        assert_eq!(p.max_retries, 0);
        assert!(!p.allow_partial);
        assert_eq!(p.backoff, BackoffPolicy::default());
    }

    #[test]
    fn accept_retry_and_finish() {
        let strict = RetryPolicy {
            max_retries: 1,
            allow_partial: false,
            backoff: BackoffPolicy::default(),
        };
        let lenient = RetryPolicy {
            allow_partial: true,
            ..strict.clone()
        };

        let partial = Outcome::new(StageStatus::PartialSuccess);
        assert!(!strict.accepts(&partial));
        assert!(lenient.accepts(&partial));

        let retry = Outcome::new(StageStatus::Retry);
        assert!(strict.should_retry(&retry, 0));
        assert!(!strict.should_retry(&retry, 1));
        assert!(!strict.should_retry(&partial, 0));

        let finished = lenient.finish(Outcome::new(StageStatus::Fail));
        assert_eq!(finished.status, StageStatus::PartialSuccess);
        assert_eq!(
            finished.notes.as_deref(),
            Some("allow_partial converted fail to partial_success")
        );
        assert_eq!(lenient.finish(Outcome::fail("boom")).notes.as_deref(), Some("boom"));
        assert_eq!(strict.finish(Outcome::fail("boom")).status, StageStatus::Fail);
        assert_eq!(lenient.finish(retry).status, StageStatus::Retry);
    }

    #[test]
    fn unknown_status_becomes_fail() {
        let bare = normalize_outcome(Outcome::new(StageStatus::parse("maybe")));
        assert_eq!(bare.status, StageStatus::Fail);
        assert_eq!(bare.notes.as_deref(), Some("Invalid status 'maybe'"));

        let noted = normalize_outcome(Outcome::new(StageStatus::parse("later")).with_notes("waited"));
        assert_eq!(noted.notes.as_deref(), Some("waited (invalid status 'later')"));

        let ok = normalize_outcome(Outcome::success("fine"));
        assert_eq!(ok.status, StageStatus::Success);
        assert_eq!(ok.notes.as_deref(), Some("fine"));
    }
}
