use std::collections::BTreeMap;
use std::marker::PhantomData;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::document::Document;
use crate::events::{EventBus, ReviewEvent};
use crate::fragments::FragmentTracker;
use crate::marker::{Decision, RejectionReasons, ReviewMarker, SuggestionId};

/// Answer to the reason-selection step of a rejection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasonResponse<R> {
    Submit(R),
    /// Take back an existing rejection.
    Withdraw,
    /// Dialog dismissed; nothing changes.
    Cancel,
}

/// Open reason-selection step. `prefill` carries the previous reasons when
/// the suggestion is already rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRejection<R> {
    pub suggestion_id: SuggestionId,
    pub current: Decision,
    pub prefill: Option<R>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionOutcome {
    Committed,
    Withdrawn,
    Cancelled,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
struct DecisionRecord<R> {
    decision: Decision,
    reasons: Option<R>,
}

/// Per-suggestion decision lifecycle. Every committed transition replaces
/// the suggestion's marker nodes with new ones carrying the new decision.
#[derive(Debug)]
pub struct DecisionStateMachine<M: ReviewMarker> {
    fragments: FragmentTracker,
    records: BTreeMap<SuggestionId, DecisionRecord<M::Reasons>>,
    pending: Option<SuggestionId>,
    _marker: PhantomData<M>,
}

impl<M: ReviewMarker> DecisionStateMachine<M> {
    pub fn new(doc: &Document, fragments: FragmentTracker) -> Result<Self> {
        let mut records = BTreeMap::new();
        for suggestion_id in fragments.ids() {
            let marker = current_marker::<M>(doc, &fragments, suggestion_id)?;
            records.insert(
                suggestion_id,
                DecisionRecord {
                    decision: marker.decision(),
                    reasons: marker.reasons().cloned(),
                },
            );
        }
        Ok(Self {
            fragments,
            records,
            pending: None,
            _marker: PhantomData,
        })
    }

    pub fn fragments(&self) -> &FragmentTracker {
        &self.fragments
    }

    /// Tracked suggestions in document order.
    pub fn ids(&self) -> Vec<SuggestionId> {
        self.fragments.ids()
    }

    pub fn decision(&self, suggestion_id: SuggestionId) -> Result<Decision> {
        Ok(self.record(suggestion_id)?.decision)
    }

    pub fn reasons(&self, suggestion_id: SuggestionId) -> Result<Option<&M::Reasons>> {
        Ok(self.record(suggestion_id)?.reasons.as_ref())
    }

    pub fn decisions(&self) -> Vec<(SuggestionId, Decision)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.records.get(&id).map(|record| (id, record.decision)))
            .collect()
    }

    /// Decisions as the document still supports them. A suggestion whose
    /// span was deleted by an edit counts as undecided.
    pub fn effective_decisions(&self, doc: &Document) -> Vec<(SuggestionId, Decision)> {
        self.decisions()
            .into_iter()
            .map(|(id, decision)| {
                if decision.is_terminal() && !self.fragments.is_valid(doc, id) {
                    debug!(
                        suggestion = %id,
                        decision = decision.as_str(),
                        "fragment invalidated; dropping decision"
                    );
                    return (id, Decision::Undecided);
                }
                (id, decision)
            })
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<SuggestionId> {
        self.pending
    }

    fn record(&self, suggestion_id: SuggestionId) -> Result<&DecisionRecord<M::Reasons>> {
        self.records
            .get(&suggestion_id)
            .with_context(|| format!("{suggestion_id} is not tracked"))
    }

    fn ensure_idle(&self) -> Result<()> {
        if let Some(pending) = self.pending {
            bail!("a rejection for {pending} is awaiting a reason");
        }
        Ok(())
    }

    /// Undecided or Rejected becomes Accepted; Accepted goes back to Undecided.
    pub fn toggle_accept(
        &mut self,
        doc: &mut Document,
        events: &mut EventBus,
        suggestion_id: SuggestionId,
    ) -> Result<Decision> {
        self.ensure_idle()?;
        let next = match self.decision(suggestion_id)? {
            Decision::Accepted => Decision::Undecided,
            Decision::Undecided | Decision::Rejected => Decision::Accepted,
        };
        self.commit(doc, events, suggestion_id, next, None)?;
        Ok(next)
    }

    pub fn begin_reject(
        &mut self,
        doc: &Document,
        suggestion_id: SuggestionId,
    ) -> Result<PendingRejection<M::Reasons>> {
        self.ensure_idle()?;
        self.fragments.range(doc, suggestion_id)?;
        let record = self.record(suggestion_id)?;
        let prefill = if record.decision == Decision::Rejected {
            record.reasons.clone()
        } else {
            None
        };
        let pending = PendingRejection {
            suggestion_id,
            current: record.decision,
            prefill,
        };
        self.pending = Some(suggestion_id);
        Ok(pending)
    }

    pub fn resolve_rejection(
        &mut self,
        doc: &mut Document,
        events: &mut EventBus,
        response: ReasonResponse<M::Reasons>,
    ) -> Result<RejectionOutcome> {
        let suggestion_id = self.pending.context("no rejection is awaiting a reason")?;
        match response {
            ReasonResponse::Cancel => {
                self.pending = None;
                Ok(RejectionOutcome::Cancelled)
            }
            ReasonResponse::Withdraw => {
                self.pending = None;
                if self.decision(suggestion_id)? != Decision::Rejected {
                    return Ok(RejectionOutcome::Unchanged);
                }
                self.commit(doc, events, suggestion_id, Decision::Undecided, None)?;
                Ok(RejectionOutcome::Withdrawn)
            }
            ReasonResponse::Submit(reasons) => {
                reasons.validate()?;
                self.pending = None;
                let record = self.record(suggestion_id)?;
                if record.decision == Decision::Rejected
                    && record.reasons.as_ref() == Some(&reasons)
                {
                    return Ok(RejectionOutcome::Unchanged);
                }
                self.commit(doc, events, suggestion_id, Decision::Rejected, Some(reasons))?;
                Ok(RejectionOutcome::Committed)
            }
        }
    }

    fn commit(
        &mut self,
        doc: &mut Document,
        events: &mut EventBus,
        suggestion_id: SuggestionId,
        decision: Decision,
        reasons: Option<M::Reasons>,
    ) -> Result<()> {
        let previous = self.decision(suggestion_id)?;
        let nodes = self.fragments.markers::<M>(doc, suggestion_id)?;
        for node in nodes {
            let marker = doc
                .kind(node)
                .and_then(M::from_node)
                .cloned()
                .with_context(|| format!("marker node for {suggestion_id} disappeared"))?;
            let replacement = marker.with_decision(decision, reasons.clone());
            doc.replace_element(node, replacement.into_node())?;
        }

        let labels = reasons
            .as_ref()
            .map(|reasons| reasons.labels())
            .unwrap_or_default();
        self.records
            .insert(suggestion_id, DecisionRecord { decision, reasons });
        debug!(
            suggestion = %suggestion_id,
            previous = previous.as_str(),
            decision = decision.as_str(),
            "decision changed"
        );
        events.publish(&ReviewEvent::DecisionChanged {
            suggestion_id,
            previous,
            decision,
            reasons: labels,
        });
        Ok(())
    }

    pub fn release(&mut self, doc: &mut Document) {
        self.fragments.release(doc);
    }
}

fn current_marker<M: ReviewMarker>(
    doc: &Document,
    fragments: &FragmentTracker,
    suggestion_id: SuggestionId,
) -> Result<M> {
    let nodes = fragments.markers::<M>(doc, suggestion_id)?;
    nodes
        .first()
        .and_then(|node| doc.kind(*node))
        .and_then(M::from_node)
        .cloned()
        .with_context(|| format!("no marker found for {suggestion_id}"))
}
