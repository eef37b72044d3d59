use serde::{Deserialize, Serialize};

/// Outcome of the automatic decision for a scored application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionOutcome {
    AutoApproved,
    AutoRejected,
    ManualReview,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::AutoApproved => "AUTO_APPROVED",
            DecisionOutcome::AutoRejected => "AUTO_REJECTED",
            DecisionOutcome::ManualReview => "MANUAL_REVIEW",
        }
    }
}

/// Score boundaries separating the three bands.
///
/// `score < approve_below` approves, `score > reject_above` rejects, everything
/// in `[approve_below, reject_above]` goes to manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub approve_below: u8,
    pub reject_above: u8,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            approve_below: 30,
            reject_above: 70,
        }
    }
}

impl DecisionThresholds {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.approve_below > 100 || self.reject_above > 100 {
            anyhow::bail!("Decision thresholds must be between 0 and 100");
        }
        // An empty manual band is allowed (approve_below == reject_above + 1),
        // overlapping bands are not.
        if u16::from(self.approve_below) > u16::from(self.reject_above) + 1 {
            anyhow::bail!(
                "DECISION_APPROVE_BELOW ({}) must not exceed DECISION_REJECT_ABOVE ({}) + 1",
                self.approve_below,
                self.reject_above
            );
        }
        Ok(())
    }

    pub fn is_manual_review(&self, score: u8) -> bool {
        score >= self.approve_below && score <= self.reject_above
    }
}

/// Pure mapping from a risk score to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    thresholds: DecisionThresholds,
}

impl DecisionPolicy {
    pub fn new(thresholds: DecisionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> DecisionThresholds {
        self.thresholds
    }

    pub fn decide(&self, score: u8) -> DecisionOutcome {
        if score < self.thresholds.approve_below {
            DecisionOutcome::AutoApproved
        } else if score > self.thresholds.reject_above {
            DecisionOutcome::AutoRejected
        } else {
            DecisionOutcome::ManualReview
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::new(DecisionThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_are_exact() {
        let policy = DecisionPolicy::default();
        assert_eq!(policy.decide(0), DecisionOutcome::AutoApproved);
        assert_eq!(policy.decide(29), DecisionOutcome::AutoApproved);
        assert_eq!(policy.decide(30), DecisionOutcome::ManualReview);
        assert_eq!(policy.decide(50), DecisionOutcome::ManualReview);
        assert_eq!(policy.decide(70), DecisionOutcome::ManualReview);
        assert_eq!(policy.decide(71), DecisionOutcome::AutoRejected);
        assert_eq!(policy.decide(100), DecisionOutcome::AutoRejected);
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = DecisionPolicy::new(DecisionThresholds {
            approve_below: 20,
            reject_above: 60,
        });
        assert_eq!(policy.decide(19), DecisionOutcome::AutoApproved);
        assert_eq!(policy.decide(20), DecisionOutcome::ManualReview);
        assert_eq!(policy.decide(60), DecisionOutcome::ManualReview);
        assert_eq!(policy.decide(61), DecisionOutcome::AutoRejected);
    }

    #[test]
    fn test_empty_manual_band_is_valid() {
        let thresholds = DecisionThresholds {
            approve_below: 50,
            reject_above: 49,
        };
        assert!(thresholds.validate().is_ok());
        let policy = DecisionPolicy::new(thresholds);
        assert_eq!(policy.decide(49), DecisionOutcome::AutoApproved);
        assert_eq!(policy.decide(50), DecisionOutcome::AutoRejected);
    }

    #[test]
    fn test_overlapping_thresholds_invalid() {
        let thresholds = DecisionThresholds {
            approve_below: 60,
            reject_above: 40,
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_outcome_serializes_screaming_snake() {
        let json = serde_json::to_string(&DecisionOutcome::ManualReview).unwrap();
        assert_eq!(json, "\"MANUAL_REVIEW\"");
        assert_eq!(DecisionOutcome::AutoApproved.as_str(), "AUTO_APPROVED");
    }
}
