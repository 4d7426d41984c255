use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LinkFilter;
use crate::marker::SuggestionId;

/// One link recommendation as returned by the recommendation service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkSuggestionInput {
    #[serde(alias = "link_text", alias = "phrase")]
    pub text: String,
    #[serde(alias = "link_target")]
    pub target: String,
    #[serde(default, alias = "match_index", alias = "occurrenceIndex")]
    pub occurrence_index: usize,
    #[serde(default)]
    pub score: f64,
    #[serde(default, alias = "wikitext_offset", alias = "documentOffsetHint")]
    pub document_offset_hint: Option<usize>,
    #[serde(default, alias = "contextBefore")]
    pub context_before: String,
    #[serde(default, alias = "contextAfter")]
    pub context_after: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinkSuggestionDocument {
    Bare(Vec<LinkSuggestionInput>),
    Response { links: Vec<LinkSuggestionInput> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSuggestion {
    pub id: SuggestionId,
    pub text: String,
    pub target: String,
    pub occurrence_index: usize,
    pub score: f64,
    pub document_offset_hint: Option<usize>,
    pub context_before: String,
    pub context_after: String,
}

/// Ordered link suggestions for one document. Ids are dense and follow the
/// order the service returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuggestionSet {
    suggestions: Vec<LinkSuggestion>,
}

impl SuggestionSet {
    pub fn parse_inputs(json: &str) -> Result<Vec<LinkSuggestionInput>> {
        let document: LinkSuggestionDocument =
            serde_json::from_str(json).context("failed to parse link suggestions JSON")?;
        Ok(match document {
            LinkSuggestionDocument::Bare(links) => links,
            LinkSuggestionDocument::Response { links } => links,
        })
    }

    pub fn from_json(json: &str, filter: &LinkFilter) -> Result<Self> {
        Self::filtered(Self::parse_inputs(json)?, filter)
    }

    /// Build a set without score or count thresholds.
    pub fn new(inputs: Vec<LinkSuggestionInput>) -> Self {
        let kept = inputs.into_iter().filter(has_phrase).collect::<Vec<_>>();
        Self::assign_ids(kept)
    }

    /// Apply score threshold, de-duplication and the per-task cap, keeping
    /// the service order for whatever survives.
    pub fn filtered(inputs: Vec<LinkSuggestionInput>, filter: &LinkFilter) -> Result<Self> {
        let total = inputs.len();
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for input in inputs {
            if !has_phrase(&input) {
                continue;
            }
            if input.score < filter.minimum_score {
                debug!(
                    phrase = %input.text,
                    score = input.score,
                    "dropping link suggestion below minimum score"
                );
                continue;
            }
            if !seen.insert((input.text.clone(), input.occurrence_index)) {
                warn!(
                    phrase = %input.text,
                    occurrence = input.occurrence_index,
                    "dropping duplicate link suggestion"
                );
                continue;
            }
            kept.push(input);
        }

        if kept.len() > filter.maximum_links {
            let mut ranked = (0..kept.len()).collect::<Vec<_>>();
            ranked.sort_by(|left, right| kept[*right].score.total_cmp(&kept[*left].score));
            let retained = ranked
                .into_iter()
                .take(filter.maximum_links)
                .collect::<HashSet<_>>();
            kept = kept
                .into_iter()
                .enumerate()
                .filter(|(index, _)| retained.contains(index))
                .map(|(_, input)| input)
                .collect();
        }

        if kept.len() < filter.minimum_links {
            bail!(
                "only {} of {total} link suggestions passed the filter (minimum {})",
                kept.len(),
                filter.minimum_links
            );
        }
        debug!(total, kept = kept.len(), "filtered link suggestions");
        Ok(Self::assign_ids(kept))
    }

    fn assign_ids(inputs: Vec<LinkSuggestionInput>) -> Self {
        let suggestions = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| LinkSuggestion {
                id: SuggestionId(index),
                text: input.text,
                target: input.target,
                occurrence_index: input.occurrence_index,
                score: input.score,
                document_offset_hint: input.document_offset_hint,
                context_before: input.context_before,
                context_after: input.context_after,
            })
            .collect();
        Self { suggestions }
    }

    pub fn get(&self, id: SuggestionId) -> Option<&LinkSuggestion> {
        self.suggestions.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkSuggestion> {
        self.suggestions.iter()
    }

    pub fn ids(&self) -> Vec<SuggestionId> {
        self.suggestions.iter().map(|suggestion| suggestion.id).collect()
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}

fn has_phrase(input: &LinkSuggestionInput) -> bool {
    if input.text.is_empty() {
        warn!(link_target = %input.target, "ignoring link suggestion with empty phrase");
        return false;
    }
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageSource {
    Wikidata,
    Commons,
    Wikipedia,
    WikidataSection,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageRenderMetadata {
    pub description: Option<String>,
    pub caption: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
    #[serde(alias = "thumbUrl", alias = "thumb_url")]
    pub thumbnail_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The single image candidate reviewed in an image task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSuggestion {
    #[serde(alias = "image", alias = "imageId", alias = "filename")]
    pub image_id: String,
    #[serde(default)]
    pub source: ImageSource,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default, alias = "metadata", alias = "renderMetadata")]
    pub render: ImageRenderMetadata,
}

impl ImageSuggestion {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut suggestion: Self =
            serde_json::from_str(json).context("failed to parse image suggestion JSON")?;
        let filename = suggestion.filename().to_string();
        if filename.is_empty() {
            bail!("image suggestion has an empty filename");
        }
        suggestion.image_id = filename;
        Ok(suggestion)
    }

    /// File name without any `File:` namespace prefix.
    pub fn filename(&self) -> &str {
        let trimmed = self.image_id.trim();
        ["File:", "Image:"]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed)
            .trim()
    }
}
