use std::fmt;

use crate::rules::{RuleAction, RuleRef};

/// Outcome of evaluating one check in one layer, or after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Ask,
    Deny,
    /// Nothing in the layer applied.
    NoOpinion,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Ask => "ask",
            Verdict::Deny => "deny",
            Verdict::NoOpinion => "no-opinion",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Ask => "ASK",
            Verdict::Deny => "DENY",
            Verdict::NoOpinion => "NONE",
        }
    }

    /// Process exit status of a final decision.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Allow => 0,
            Verdict::Ask | Verdict::NoOpinion => 1,
            Verdict::Deny => 2,
        }
    }

    /// Rank for combining checks: deny > ask > allow > no opinion.
    pub fn restrictiveness(self) -> u8 {
        match self {
            Verdict::NoOpinion => 0,
            Verdict::Allow => 1,
            Verdict::Ask => 2,
            Verdict::Deny => 3,
        }
    }

    /// Rank for merging layers: deny > allow > ask > no opinion.
    pub fn merge_priority(self) -> u8 {
        match self {
            Verdict::NoOpinion => 0,
            Verdict::Ask => 1,
            Verdict::Allow => 2,
            Verdict::Deny => 3,
        }
    }

    pub fn most_restrictive(self, other: Verdict) -> Verdict {
        if other.restrictiveness() > self.restrictiveness() {
            other
        } else {
            self
        }
    }
}

impl From<RuleAction> for Verdict {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::Allow => Verdict::Allow,
            RuleAction::Ask => Verdict::Ask,
            RuleAction::Deny => Verdict::Deny,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final answer for one request. `verdict` is never [`Verdict::NoOpinion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub message: String,
    /// The rule that produced the verdict; `None` for defaults.
    pub matched_rule: Option<RuleRef>,
}

impl Decision {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Verdict::Allow.exit_code(), 0);
        assert_eq!(Verdict::Ask.exit_code(), 1);
        assert_eq!(Verdict::Deny.exit_code(), 2);
    }

    #[test]
    fn restrictive_order() {
        assert_eq!(Verdict::Allow.most_restrictive(Verdict::Ask), Verdict::Ask);
        assert_eq!(Verdict::Deny.most_restrictive(Verdict::Ask), Verdict::Deny);
        assert_eq!(
            Verdict::NoOpinion.most_restrictive(Verdict::Allow),
            Verdict::Allow
        );
    }

    #[test]
    fn merge_order_prefers_allow_over_ask() {
        assert!(Verdict::Allow.merge_priority() > Verdict::Ask.merge_priority());
        assert!(Verdict::Deny.merge_priority() > Verdict::Allow.merge_priority());
    }
}
