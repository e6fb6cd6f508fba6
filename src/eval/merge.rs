//! Cross-layer merge of per-layer outcomes for a single check.

use super::decision::Verdict;
use super::layer::LayerOutcome;

/// Merge layer outcomes: any deny wins, then any allow, then any ask.
///
/// The reported message and rule come from the most specific layer that
/// produced the winning verdict. All-silent layers merge to
/// [`Verdict::NoOpinion`].
pub fn merge(outcomes: &[LayerOutcome]) -> Option<&LayerOutcome> {
    outcomes
        .iter()
        .filter(|o| o.verdict != Verdict::NoOpinion)
        .max_by_key(|o| (o.verdict.merge_priority(), o.layer))
}
