//! Trigger evaluation
//!
//! Decides whether a claimed scheduler row fires for a given time and market
//! snapshot. Evaluation is pure: no store or network access happens here.

use chrono::{DateTime, Duration, Utc};
use shared::error::{EngineError, EngineResult};
use shared::models::{AdvanceCondition, CrossDirection, MarketMetric, Scheduler, SchedulerStatus, Trigger};
use std::fmt;

use super::cron::CronSchedule;

/// What the evaluator is allowed to look at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSnapshot {
    pub now: DateTime<Utc>,
    /// Volume or open interest of the order's asset, only read for advance triggers
    pub market_figure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionReason {
    NotArmed(SchedulerStatus),
    NotDue { due_at: DateTime<Utc> },
    ScheduledTimeReached,
    CronOccurrenceReached,
    /// Later slices of a started TWAP only wait for their due time
    TwapSliceDue { slice_index: u32 },
    ThresholdCrossed {
        metric: MarketMetric,
        figure: f64,
        threshold: f64,
    },
    ThresholdNotMet {
        metric: MarketMetric,
        figure: f64,
        threshold: f64,
    },
    MarketFigureMissing(MarketMetric),
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotArmed(status) => write!(f, "scheduler is {}", status),
            Self::NotDue { due_at } => write!(f, "not due until {}", due_at),
            Self::ScheduledTimeReached => f.write_str("scheduled time reached"),
            Self::CronOccurrenceReached => f.write_str("cron occurrence reached"),
            Self::TwapSliceDue { slice_index } => write!(f, "TWAP slice {} due", slice_index),
            Self::ThresholdCrossed { metric, figure, threshold } => {
                write!(f, "{} {} crossed threshold {}", metric, figure, threshold)
            }
            Self::ThresholdNotMet { metric, figure, threshold } => {
                write!(f, "{} {} has not reached threshold {}", metric, figure, threshold)
            }
            Self::MarketFigureMissing(metric) => write!(f, "no {} figure in snapshot", metric),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    pub fire: bool,
    pub reason: DecisionReason,
}

impl TriggerDecision {
    fn fire(reason: DecisionReason) -> Self {
        Self { fire: true, reason }
    }

    fn hold(reason: DecisionReason) -> Self {
        Self { fire: false, reason }
    }
}

/// Evaluate a scheduler against a snapshot.
///
/// `next_execution_at` gates every trigger kind: it carries TWAP slice due
/// points, the next cron occurrence and the advance re-arm cooldown. Once a
/// TWAP run has started its remaining slices fire on time alone.
pub fn evaluate(scheduler: &Scheduler, snapshot: &EvaluationSnapshot) -> TriggerDecision {
    if !scheduler.status.is_armed() {
        return TriggerDecision::hold(DecisionReason::NotArmed(scheduler.status));
    }
    if snapshot.now < scheduler.next_execution_at {
        return TriggerDecision::hold(DecisionReason::NotDue {
            due_at: scheduler.next_execution_at,
        });
    }
    if let Some(progress) = scheduler.twap.filter(|p| p.started_at.is_some()) {
        return TriggerDecision::fire(DecisionReason::TwapSliceDue {
            slice_index: progress.slice_index,
        });
    }

    match &scheduler.trigger {
        Trigger::AtTime { scheduled_at } => {
            if snapshot.now < *scheduled_at {
                TriggerDecision::hold(DecisionReason::NotDue { due_at: *scheduled_at })
            } else {
                TriggerDecision::fire(DecisionReason::ScheduledTimeReached)
            }
        }
        Trigger::Cron { .. } => TriggerDecision::fire(DecisionReason::CronOccurrenceReached),
        Trigger::Advance(condition) => evaluate_condition(condition, snapshot.market_figure),
    }
}

fn evaluate_condition(condition: &AdvanceCondition, figure: Option<f64>) -> TriggerDecision {
    let Some(figure) = figure.filter(|f| f.is_finite()) else {
        return TriggerDecision::hold(DecisionReason::MarketFigureMissing(condition.metric));
    };

    let crossed = match condition.direction {
        CrossDirection::Above => figure >= condition.threshold,
        CrossDirection::Below => figure <= condition.threshold,
    };

    let (metric, threshold) = (condition.metric, condition.threshold);
    if crossed {
        TriggerDecision::fire(DecisionReason::ThresholdCrossed { metric, figure, threshold })
    } else {
        TriggerDecision::hold(DecisionReason::ThresholdNotMet { metric, figure, threshold })
    }
}

/// When a trigger is next due after firing at `now`, or `None` when the
/// fire was its last one. TWAP continuation is resolved by the slicer.
pub fn next_recurrence(
    trigger: &Trigger,
    now: DateTime<Utc>,
    advance_rearm: Duration,
) -> EngineResult<Option<DateTime<Utc>>> {
    match trigger {
        Trigger::AtTime { .. } => Ok(None),
        Trigger::Cron { expression, timezone } => {
            let next = CronSchedule::parse(expression)?.next_after(now, *timezone)?;
            if next <= now {
                return Err(EngineError::CronResolution(format!(
                    "'{}' resolved to {} which is not after {}",
                    expression, next, now
                )));
            }
            Ok(Some(next))
        }
        Trigger::Advance(condition) if condition.single_shot => Ok(None),
        Trigger::Advance(_) => Ok(Some(now + advance_rearm)),
    }
}
