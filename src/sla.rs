//! SLA assessment rules.
//!
//! Pure computation over an incident's mean-time-to-repair: severity maps to
//! a fixed threshold policy, and the outcome is either a reward scaled by
//! how far under the threshold the repair landed, or a per-minute penalty
//! for the overtime.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ValidationError::UnknownSeverity {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-severity SLA terms.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    /// Repair deadline in minutes.
    pub threshold_minutes: f64,
    /// Penalty charged per minute of overtime.
    pub penalty_per_minute: f64,
    /// Base reward for meeting the deadline.
    pub reward_base: f64,
}

pub fn threshold_policy(severity: Severity) -> ThresholdPolicy {
    match severity {
        Severity::Critical => ThresholdPolicy {
            threshold_minutes: 15.0,
            penalty_per_minute: 100.0,
            reward_base: 750.0,
        },
        Severity::High => ThresholdPolicy {
            threshold_minutes: 30.0,
            penalty_per_minute: 50.0,
            reward_base: 750.0,
        },
        Severity::Medium => ThresholdPolicy {
            threshold_minutes: 60.0,
            penalty_per_minute: 25.0,
            reward_base: 750.0,
        },
        Severity::Low => ThresholdPolicy {
            threshold_minutes: 120.0,
            penalty_per_minute: 10.0,
            reward_base: 600.0,
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaAssessment {
    pub severity: Severity,
    pub mttr_minutes: f64,
    pub threshold_minutes: f64,
    /// `"met"` or `"violated"`.
    pub status: String,
    /// Signed amount: positive rewards, negative penalties.
    pub amount: f64,
    /// `"reward"` or `"penalty"`.
    pub payment_type: String,
    /// `"exceptional"`, `"excellent"`, `"good"`, or `"poor"`.
    pub rating: String,
}

impl SlaAssessment {
    pub fn is_violated(&self) -> bool {
        self.status == "violated"
    }
}

/// Assesses one incident's repair time against its severity's SLA terms.
///
/// Under the threshold the reward base is scaled by how fast the repair was:
/// under half the threshold doubles it, under three quarters adds half.
/// Over the threshold every minute of overtime is charged.
pub fn assess(severity: Severity, mttr_minutes: f64) -> SlaAssessment {
    let policy = threshold_policy(severity);

    if mttr_minutes <= policy.threshold_minutes {
        let ratio = mttr_minutes / policy.threshold_minutes;
        let (multiplier, rating) = if ratio < 0.5 {
            (2.0, "exceptional")
        } else if ratio < 0.75 {
            (1.5, "excellent")
        } else {
            (1.0, "good")
        };
        SlaAssessment {
            severity,
            mttr_minutes,
            threshold_minutes: policy.threshold_minutes,
            status: "met".to_string(),
            amount: policy.reward_base * multiplier,
            payment_type: "reward".to_string(),
            rating: rating.to_string(),
        }
    } else {
        let overtime = mttr_minutes - policy.threshold_minutes;
        SlaAssessment {
            severity,
            mttr_minutes,
            threshold_minutes: policy.threshold_minutes,
            status: "violated".to_string(),
            amount: -(overtime * policy.penalty_per_minute),
            payment_type: "penalty".to_string(),
            rating: "poor".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_str() {
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ] {
            assert_eq!(severity.as_str().parse::<Severity>().unwrap(), severity);
        }
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn fast_repair_earns_doubled_reward() {
        let assessment = assess(Severity::Critical, 7.0);
        assert_eq!(assessment.status, "met");
        assert_eq!(assessment.rating, "exceptional");
        assert_eq!(assessment.amount, 1500.0);
        assert_eq!(assessment.payment_type, "reward");
        assert!(!assessment.is_violated());
    }

    #[test]
    fn reward_tiers_follow_threshold_ratio() {
        // 20 / 30 = 0.666 -> excellent
        let excellent = assess(Severity::High, 20.0);
        assert_eq!(excellent.rating, "excellent");
        assert_eq!(excellent.amount, 1125.0);

        // 55 / 60 = 0.916 -> good
        let good = assess(Severity::Medium, 55.0);
        assert_eq!(good.rating, "good");
        assert_eq!(good.amount, 750.0);
    }

    #[test]
    fn at_threshold_counts_as_met() {
        let assessment = assess(Severity::Low, 120.0);
        assert_eq!(assessment.status, "met");
        assert_eq!(assessment.rating, "good");
        assert_eq!(assessment.amount, 600.0);
    }

    #[test]
    fn overtime_charges_per_minute_penalty() {
        let assessment = assess(Severity::Critical, 25.0);
        assert_eq!(assessment.status, "violated");
        assert_eq!(assessment.rating, "poor");
        assert_eq!(assessment.amount, -1000.0);
        assert_eq!(assessment.payment_type, "penalty");
        assert!(assessment.is_violated());
    }

    #[test]
    fn low_severity_uses_smaller_penalty_rate() {
        let assessment = assess(Severity::Low, 150.0);
        assert_eq!(assessment.amount, -300.0);
    }
}
