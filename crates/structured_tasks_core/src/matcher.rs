use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::document::{Document, NodeId, NodeRole};
use crate::events::{EventBus, ReviewEvent};
use crate::marker::{Decision, LinkMarker, ReviewMarker, SuggestionId};
use crate::suggestions::{LinkSuggestion, SuggestionSet};
use crate::wikitext::normalize_title;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedPhrase {
    pub phrase: String,
    pub occurrences_seen: usize,
    pub missing_occurrences: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// Reviewable suggestions that were wrapped, in document order.
    pub matched: Vec<SuggestionId>,
    /// Suggestions that were wrapped but whose target is not a valid title.
    pub inert: Vec<SuggestionId>,
    pub unmatched: Vec<UnmatchedPhrase>,
}

impl MatchReport {
    pub fn wrapped_count(&self) -> usize {
        self.matched.len() + self.inert.len()
    }
}

#[derive(Debug)]
struct PhraseState {
    phrase: String,
    seen: usize,
    pending: BTreeMap<usize, SuggestionId>,
}

/// Per-call matching state. Nothing survives between calls.
#[derive(Debug)]
struct MatchState {
    phrases: Vec<PhraseState>,
    by_phrase: HashMap<String, usize>,
    pattern: Option<Regex>,
}

impl MatchState {
    fn new(suggestions: &SuggestionSet) -> Result<Self> {
        let mut phrases: Vec<PhraseState> = Vec::new();
        let mut by_phrase = HashMap::new();
        for suggestion in suggestions.iter() {
            let slot = *by_phrase.entry(suggestion.text.clone()).or_insert_with(|| {
                phrases.push(PhraseState {
                    phrase: suggestion.text.clone(),
                    seen: 0,
                    pending: BTreeMap::new(),
                });
                phrases.len() - 1
            });
            phrases[slot]
                .pending
                .insert(suggestion.occurrence_index, suggestion.id);
        }
        let mut state = Self {
            phrases,
            by_phrase,
            pattern: None,
        };
        state.rebuild_pattern()?;
        Ok(state)
    }

    /// Alternation over pending phrases, longest first so a shorter phrase
    /// never shadows a longer one starting at the same position.
    fn rebuild_pattern(&mut self) -> Result<()> {
        let mut pending = self
            .phrases
            .iter()
            .filter(|state| !state.pending.is_empty())
            .map(|state| state.phrase.as_str())
            .collect::<Vec<_>>();
        if pending.is_empty() {
            self.pattern = None;
            return Ok(());
        }
        pending.sort_by(|left, right| {
            right
                .chars()
                .count()
                .cmp(&left.chars().count())
                .then_with(|| left.cmp(right))
        });
        let source = pending
            .iter()
            .map(|phrase| regex::escape(phrase))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&source)
            .with_context(|| format!("failed to build phrase pattern for {} phrases", pending.len()))?;
        self.pattern = Some(pattern);
        Ok(())
    }

    /// Count an occurrence of `phrase`; returns the suggestion bound to it.
    fn record(&mut self, phrase: &str) -> Result<Option<SuggestionId>> {
        let Some(slot) = self.by_phrase.get(phrase).copied() else {
            return Ok(None);
        };
        let state = &mut self.phrases[slot];
        let occurrence = state.seen;
        state.seen += 1;
        let Some(id) = state.pending.remove(&occurrence) else {
            return Ok(None);
        };
        if state.pending.is_empty() {
            self.rebuild_pattern()?;
        }
        Ok(Some(id))
    }
}

#[derive(Debug)]
struct PendingWrap {
    start: usize,
    end: usize,
    suggestion: SuggestionId,
}

/// Wrap every located suggestion in a link marker. Phrases that cannot be
/// found are reported, never fatal.
pub fn annotate_suggestions(
    doc: &mut Document,
    suggestions: &SuggestionSet,
    events: &mut EventBus,
) -> Result<MatchReport> {
    let mut state = MatchState::new(suggestions)?;
    let mut report = MatchReport::default();
    let runs = collect_text_runs(doc);
    debug!(runs = runs.len(), phrases = state.phrases.len(), "scanning document text runs");

    for run in runs {
        if state.pattern.is_none() {
            debug!("all phrases located; stopping walk early");
            break;
        }
        let spans = run_spans(doc, &run);
        let text = spans
            .iter()
            .map(|(node, _, _)| doc.node_text(*node))
            .collect::<String>();
        let wraps = scan_run(&text, &mut state)?;
        for wrap in wraps.iter().rev() {
            let suggestion = suggestions
                .get(wrap.suggestion)
                .with_context(|| format!("unknown {}", wrap.suggestion))?;
            let marker = build_marker(suggestion);
            for (node, node_start, node_end) in spans.iter().rev() {
                let start = wrap.start.max(*node_start);
                let end = wrap.end.min(*node_end);
                if start < end {
                    doc.wrap_text(
                        *node,
                        start - node_start,
                        end - node_start,
                        marker.clone().into_node(),
                    )?;
                }
            }
        }
        for wrap in wraps {
            let inert = suggestions
                .get(wrap.suggestion)
                .is_some_and(|suggestion| normalize_title(&suggestion.target).is_none());
            if inert {
                report.inert.push(wrap.suggestion);
            } else {
                report.matched.push(wrap.suggestion);
            }
        }
    }

    for phrase in &state.phrases {
        if phrase.pending.is_empty() {
            continue;
        }
        let missing_occurrences = phrase.pending.keys().copied().collect::<Vec<_>>();
        warn!(
            phrase = %phrase.phrase,
            occurrences_seen = phrase.seen,
            missing = ?missing_occurrences,
            "link suggestion phrase not found in document"
        );
        events.publish(&ReviewEvent::MatchesExhausted {
            phrase: phrase.phrase.clone(),
            occurrences_seen: phrase.seen,
            missing_occurrences: missing_occurrences.clone(),
        });
        report.unmatched.push(UnmatchedPhrase {
            phrase: phrase.phrase.clone(),
            occurrences_seen: phrase.seen,
            missing_occurrences,
        });
    }
    debug!(
        matched = report.matched.len(),
        inert = report.inert.len(),
        unmatched = report.unmatched.len(),
        "link suggestion matching finished"
    );
    Ok(report)
}

fn build_marker(suggestion: &LinkSuggestion) -> LinkMarker {
    let (target, inert) = match normalize_title(&suggestion.target) {
        Some(title) => (title, false),
        None => {
            warn!(
                suggestion = %suggestion.id,
                link_target = %suggestion.target,
                "link suggestion target is not a valid title; marker will be inert"
            );
            (suggestion.target.clone(), true)
        }
    };
    LinkMarker {
        suggestion_id: suggestion.id,
        target,
        text: suggestion.text.clone(),
        occurrence_index: suggestion.occurrence_index,
        score: suggestion.score,
        offset_hint: suggestion.document_offset_hint,
        decision: Decision::Undecided,
        reason: None,
        inert,
    }
}

fn scan_run(text: &str, state: &mut MatchState) -> Result<Vec<PendingWrap>> {
    let char_offsets = text.char_indices().map(|(byte, _)| byte).collect::<Vec<_>>();
    let to_char = |byte: usize| char_offsets.partition_point(|offset| *offset < byte);

    let mut wraps = Vec::new();
    let mut cursor = 0usize;
    while let Some(pattern) = state.pattern.clone() {
        let Some(found) = pattern.find_at(text, cursor) else {
            break;
        };
        cursor = found.end();
        if found.is_empty() {
            break;
        }
        if let Some(suggestion) = state.record(found.as_str())? {
            debug!(%suggestion, phrase = found.as_str(), "wrapping matched phrase");
            wraps.push(PendingWrap {
                start: to_char(found.start()),
                end: to_char(found.end()),
                suggestion,
            });
        }
    }
    Ok(wraps)
}

/// Maximal runs of adjacent text siblings reachable without entering
/// non-prose or marker elements, in document order.
fn collect_text_runs(doc: &Document) -> Vec<Vec<NodeId>> {
    let mut runs = Vec::new();
    collect_runs_in(doc, doc.root(), &mut runs);
    runs
}

fn collect_runs_in(doc: &Document, parent: NodeId, runs: &mut Vec<Vec<NodeId>>) {
    let mut current = Vec::new();
    for child in doc.children(parent) {
        let Some(kind) = doc.kind(*child) else {
            continue;
        };
        match kind.role() {
            NodeRole::Text => {
                current.push(*child);
                continue;
            }
            NodeRole::Root | NodeRole::Structural | NodeRole::ContentBranch => {
                flush_run(&mut current, runs);
                collect_runs_in(doc, *child, runs);
            }
            NodeRole::NonProse | NodeRole::Marker => flush_run(&mut current, runs),
        }
    }
    flush_run(&mut current, runs);
}

fn flush_run(current: &mut Vec<NodeId>, runs: &mut Vec<Vec<NodeId>>) {
    if !current.is_empty() {
        runs.push(std::mem::take(current));
    }
}

/// `(node, first char, end char)` of each text node within its run.
fn run_spans(doc: &Document, run: &[NodeId]) -> Vec<(NodeId, usize, usize)> {
    let mut cursor = 0usize;
    run.iter()
        .map(|node| {
            let width = doc.width(*node);
            let span = (*node, cursor, cursor + width);
            cursor += width;
            span
        })
        .collect()
}
