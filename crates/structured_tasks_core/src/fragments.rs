use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use crate::document::{Document, LinearItem, LiveRangeId, NodeId, Range};
use crate::marker::{ReviewMarker, SuggestionId};

/// Live handle on one suggestion's span. The range itself is owned and
/// rebased by the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub suggestion_id: SuggestionId,
    pub live: LiveRangeId,
    /// Leaf fragments wrap a childless marker and have no text to lose.
    pub leaf: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FragmentTracker {
    fragments: Vec<Fragment>,
}

impl FragmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// One fragment per reviewable suggestion, in order of first marker.
    /// Adjacent marker segments of one suggestion coalesce into one span.
    pub fn build<M: ReviewMarker>(doc: &mut Document) -> Result<Self> {
        let mut groups: Vec<(SuggestionId, Range)> = Vec::new();
        for node in doc.preorder() {
            let Some(marker) = doc.kind(node).and_then(M::from_node) else {
                continue;
            };
            if !marker.is_reviewable() {
                continue;
            }
            let suggestion_id = marker.suggestion_id();
            let range = doc.node_range(node)?;
            match groups.iter_mut().find(|(id, _)| *id == suggestion_id) {
                Some((_, group)) if group.end == range.start => group.end = range.end,
                Some((_, group)) => warn!(
                    suggestion = %suggestion_id,
                    kept_start = group.start,
                    ignored_start = range.start,
                    "suggestion has non-contiguous markers; keeping the first span"
                ),
                None => groups.push((suggestion_id, range)),
            }
        }

        let mut tracker = Self::new();
        for (suggestion_id, range) in groups {
            tracker.track(doc, suggestion_id, range, false)?;
        }
        debug!(fragments = tracker.len(), "built suggestion fragments");
        Ok(tracker)
    }

    pub fn track_node(
        &mut self,
        doc: &mut Document,
        suggestion_id: SuggestionId,
        node: NodeId,
    ) -> Result<()> {
        let range = doc.node_range(node)?;
        let leaf = doc.children(node).is_empty();
        self.track(doc, suggestion_id, range, leaf)
    }

    fn track(
        &mut self,
        doc: &mut Document,
        suggestion_id: SuggestionId,
        range: Range,
        leaf: bool,
    ) -> Result<()> {
        if self.find(suggestion_id).is_some() {
            bail!("{suggestion_id} already has a fragment");
        }
        let live = doc.track_range(range)?;
        self.fragments.push(Fragment {
            suggestion_id,
            live,
            leaf,
        });
        Ok(())
    }

    fn find(&self, suggestion_id: SuggestionId) -> Option<&Fragment> {
        self.fragments
            .iter()
            .find(|fragment| fragment.suggestion_id == suggestion_id)
    }

    pub fn fragment(&self, suggestion_id: SuggestionId) -> Option<Fragment> {
        self.find(suggestion_id).copied()
    }

    pub fn ids(&self) -> Vec<SuggestionId> {
        self.fragments
            .iter()
            .map(|fragment| fragment.suggestion_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn contains(&self, suggestion_id: SuggestionId) -> bool {
        self.find(suggestion_id).is_some()
    }

    /// Current span, or an error once the span's text is gone. A text span
    /// left holding only empty marker elements counts as gone.
    pub fn range(&self, doc: &Document, suggestion_id: SuggestionId) -> Result<Range> {
        let Some(fragment) = self.find(suggestion_id) else {
            bail!("{suggestion_id} has no fragment");
        };
        match doc.live_range(fragment.live) {
            Some(range) if fragment.leaf && !range.is_empty() => Ok(range),
            Some(range) if !fragment.leaf && !doc.text_in(range).is_empty() => Ok(range),
            _ => bail!("fragment for {suggestion_id} was invalidated by a document edit"),
        }
    }

    pub fn is_valid(&self, doc: &Document, suggestion_id: SuggestionId) -> bool {
        self.range(doc, suggestion_id).is_ok()
    }

    /// Marker nodes of `suggestion_id` inside its span, in document order.
    pub fn markers<M: ReviewMarker>(
        &self,
        doc: &Document,
        suggestion_id: SuggestionId,
    ) -> Result<Vec<NodeId>> {
        let range = self.range(doc, suggestion_id)?;
        let nodes = doc
            .linear_items()
            .into_iter()
            .skip(range.start)
            .take(range.len())
            .filter_map(|item| match item {
                LinearItem::Open { node, kind } => M::from_node(kind)
                    .filter(|marker| marker.suggestion_id() == suggestion_id)
                    .map(|_| node),
                _ => None,
            })
            .collect::<Vec<_>>();
        if nodes.is_empty() {
            bail!("no markers remain for {suggestion_id}");
        }
        Ok(nodes)
    }

    pub fn release(&mut self, doc: &mut Document) {
        for fragment in self.fragments.drain(..) {
            doc.release_range(fragment.live);
        }
    }
}
