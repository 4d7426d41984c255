use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::document::NodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionId(pub usize);

impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suggestion-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Undecided,
    Accepted,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Undecided)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkRejectionReason {
    Everyday,
    WrongTarget,
    MoreSpecific,
    Other,
}

impl LinkRejectionReason {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "everyday" => Ok(Self::Everyday),
            "wrong-target" => Ok(Self::WrongTarget),
            "more-specific" => Ok(Self::MoreSpecific),
            "other" => Ok(Self::Other),
            other => bail!("unsupported link rejection reason: {other}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Everyday => "everyday",
            Self::WrongTarget => "wrong-target",
            Self::MoreSpecific => "more-specific",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageRejectionReason {
    NotRelevant,
    NoInfo,
    Offensive,
    LowQuality,
    Unfamiliar,
    ForeignLanguage,
    Other,
}

impl ImageRejectionReason {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notrelevant" => Ok(Self::NotRelevant),
            "noinfo" => Ok(Self::NoInfo),
            "offensive" => Ok(Self::Offensive),
            "lowquality" => Ok(Self::LowQuality),
            "unfamiliar" => Ok(Self::Unfamiliar),
            "foreignlanguage" => Ok(Self::ForeignLanguage),
            "other" => Ok(Self::Other),
            other => bail!("unsupported image rejection reason: {other}"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRelevant => "notrelevant",
            Self::NoInfo => "noinfo",
            Self::Offensive => "offensive",
            Self::LowQuality => "lowquality",
            Self::Unfamiliar => "unfamiliar",
            Self::ForeignLanguage => "foreignlanguage",
            Self::Other => "other",
        }
    }
}

/// Rejection payload carried by a marker. Links take exactly one reason,
/// images take a non-empty set.
pub trait RejectionReasons: Clone + fmt::Debug + PartialEq {
    fn validate(&self) -> Result<()>;
    fn labels(&self) -> Vec<String>;
}

impl RejectionReasons for LinkRejectionReason {
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec![self.as_str().to_string()]
    }
}

impl RejectionReasons for BTreeSet<ImageRejectionReason> {
    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            bail!("rejecting an image suggestion requires at least one reason");
        }
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        self.iter().map(|reason| reason.as_str().to_string()).collect()
    }
}

/// A marker is an immutable value stored inside a document node. Decision
/// transitions build a new marker and replace the node that held the old one.
pub trait ReviewMarker: Clone + fmt::Debug + Sized {
    type Reasons: RejectionReasons;

    fn suggestion_id(&self) -> SuggestionId;
    fn decision(&self) -> Decision;
    fn reasons(&self) -> Option<&Self::Reasons>;
    /// Inert markers are rendered but never reviewed.
    fn is_reviewable(&self) -> bool;
    fn with_decision(&self, decision: Decision, reasons: Option<Self::Reasons>) -> Self;
    fn from_node(kind: &NodeKind) -> Option<&Self>;
    fn into_node(self) -> NodeKind;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMarker {
    pub suggestion_id: SuggestionId,
    pub target: String,
    pub text: String,
    pub occurrence_index: usize,
    pub score: f64,
    pub offset_hint: Option<usize>,
    pub decision: Decision,
    pub reason: Option<LinkRejectionReason>,
    /// Set when the target could not be resolved to a page title.
    pub inert: bool,
}

impl ReviewMarker for LinkMarker {
    type Reasons = LinkRejectionReason;

    fn suggestion_id(&self) -> SuggestionId {
        self.suggestion_id
    }

    fn decision(&self) -> Decision {
        self.decision
    }

    fn reasons(&self) -> Option<&LinkRejectionReason> {
        self.reason.as_ref()
    }

    fn is_reviewable(&self) -> bool {
        !self.inert
    }

    fn with_decision(&self, decision: Decision, reasons: Option<LinkRejectionReason>) -> Self {
        Self {
            decision,
            reason: if decision == Decision::Rejected {
                reasons
            } else {
                None
            },
            ..self.clone()
        }
    }

    fn from_node(kind: &NodeKind) -> Option<&Self> {
        match kind {
            NodeKind::LinkSuggestion(marker) => Some(marker),
            _ => None,
        }
    }

    fn into_node(self) -> NodeKind {
        NodeKind::LinkSuggestion(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMarker {
    pub suggestion_id: SuggestionId,
    pub filename: String,
    pub decision: Decision,
    pub reasons: BTreeSet<ImageRejectionReason>,
}

impl ReviewMarker for ImageMarker {
    type Reasons = BTreeSet<ImageRejectionReason>;

    fn suggestion_id(&self) -> SuggestionId {
        self.suggestion_id
    }

    fn decision(&self) -> Decision {
        self.decision
    }

    fn reasons(&self) -> Option<&BTreeSet<ImageRejectionReason>> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(&self.reasons)
        }
    }

    fn is_reviewable(&self) -> bool {
        true
    }

    fn with_decision(
        &self,
        decision: Decision,
        reasons: Option<BTreeSet<ImageRejectionReason>>,
    ) -> Self {
        Self {
            decision,
            reasons: if decision == Decision::Rejected {
                reasons.unwrap_or_default()
            } else {
                BTreeSet::new()
            },
            ..self.clone()
        }
    }

    fn from_node(kind: &NodeKind) -> Option<&Self> {
        match kind {
            NodeKind::ImageSuggestion(marker) => Some(marker),
            _ => None,
        }
    }

    fn into_node(self) -> NodeKind {
        NodeKind::ImageSuggestion(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_marker() -> LinkMarker {
        LinkMarker {
            suggestion_id: SuggestionId(0),
            target: "Paris".to_string(),
            text: "Paris".to_string(),
            occurrence_index: 0,
            score: 0.9,
            offset_hint: Some(0),
            decision: Decision::Undecided,
            reason: None,
            inert: false,
        }
    }

    #[test]
    fn link_marker_drops_reason_outside_rejection() {
        let rejected =
            link_marker().with_decision(Decision::Rejected, Some(LinkRejectionReason::Everyday));
        assert_eq!(rejected.reason, Some(LinkRejectionReason::Everyday));
        let accepted =
            rejected.with_decision(Decision::Accepted, Some(LinkRejectionReason::Everyday));
        assert_eq!(accepted.reason, None);
        assert_eq!(accepted.target, "Paris");
    }

    #[test]
    fn image_reason_set_must_not_be_empty() {
        let empty = BTreeSet::<ImageRejectionReason>::new();
        assert!(empty.validate().is_err());
        let reasons = BTreeSet::from([
            ImageRejectionReason::Offensive,
            ImageRejectionReason::NotRelevant,
        ]);
        reasons.validate().expect("non-empty reasons");
        assert_eq!(reasons.labels(), vec!["notrelevant", "offensive"]);
    }

    #[test]
    fn rejection_reasons_parse_wire_names() {
        assert_eq!(
            LinkRejectionReason::parse("wrong-target").expect("parse"),
            LinkRejectionReason::WrongTarget
        );
        assert_eq!(
            ImageRejectionReason::parse("LowQuality").expect("parse"),
            ImageRejectionReason::LowQuality
        );
        assert!(LinkRejectionReason::parse("boring").is_err());
    }

    #[test]
    fn suggestion_id_display() {
        assert_eq!(SuggestionId(4).to_string(), "suggestion-4");
    }
}
