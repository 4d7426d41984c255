use std::collections::BTreeSet;

use serde::Serialize;

use crate::marker::{Decision, ImageRejectionReason, RejectionReasons};

/// Link task payload for the save pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSubmission {
    pub accepted_targets: Vec<String>,
    pub rejected_targets: Vec<String>,
    pub skipped_targets: Vec<String>,
}

impl LinkSubmission {
    /// Partition `(target, decision)` pairs; undecided suggestions are skipped.
    pub fn aggregate<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Decision)>,
    {
        let mut submission = Self::default();
        for (target, decision) in entries {
            match decision {
                Decision::Accepted => submission.accepted_targets.push(target),
                Decision::Rejected => submission.rejected_targets.push(target),
                Decision::Undecided => submission.skipped_targets.push(target),
            }
        }
        submission
    }

    /// No link is added; still submitted so rejections are recorded.
    pub fn is_null_edit(&self) -> bool {
        self.accepted_targets.is_empty()
    }

    pub fn total(&self) -> usize {
        self.accepted_targets.len() + self.rejected_targets.len() + self.skipped_targets.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSubmission {
    pub filename: String,
    pub accepted: bool,
    pub reasons: Vec<String>,
}

impl ImageSubmission {
    pub fn aggregate(
        filename: &str,
        decision: Decision,
        reasons: Option<&BTreeSet<ImageRejectionReason>>,
    ) -> Self {
        let reasons = match (decision, reasons) {
            (Decision::Rejected, Some(reasons)) => reasons.labels(),
            _ => Vec::new(),
        };
        Self {
            filename: filename.to_string(),
            accepted: decision == Decision::Accepted,
            reasons,
        }
    }

    pub fn is_null_edit(&self) -> bool {
        !self.accepted
    }
}

/// Saving is allowed once anything has been decided.
pub fn is_saveable<I>(decisions: I) -> bool
where
    I: IntoIterator<Item = Decision>,
{
    decisions.into_iter().any(Decision::is_terminal)
}
