use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::LinkFilter;
use crate::document::Document;
use crate::suggestions::{ImageSuggestion, SuggestionSet};
use crate::wikitext::{WikitextOptions, parse_wikitext};

/// A page read from disk, before it is parsed.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub path: PathBuf,
    pub source: String,
    pub content_hash: String,
}

impl LoadedPage {
    pub fn parse(&self, options: &WikitextOptions) -> Result<Document> {
        parse_wikitext(&self.source, options)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

pub fn load_page(path: &Path) -> Result<LoadedPage> {
    let source =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let content_hash = compute_hash(&source);
    debug!(path = %path.display(), bytes = source.len(), hash = %content_hash, "loaded page");
    Ok(LoadedPage {
        path: path.to_path_buf(),
        source,
        content_hash,
    })
}

pub fn load_link_suggestions(path: &Path, filter: &LinkFilter) -> Result<SuggestionSet> {
    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    SuggestionSet::from_json(&json, filter)
        .with_context(|| format!("invalid link suggestions in {}", path.display()))
}

pub fn load_image_suggestion(path: &Path) -> Result<ImageSuggestion> {
    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    ImageSuggestion::from_json(&json)
        .with_context(|| format!("invalid image suggestion in {}", path.display()))
}

/// First 8 bytes of the SHA-256 digest, hex encoded.
pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_page_and_hashes_content() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("Paris.wiki");
        fs::write(&path, "Paris is a city.").expect("write page");

        let page = load_page(&path).expect("load");
        assert_eq!(page.content_hash.len(), 16);
        assert_eq!(page.content_hash, compute_hash("Paris is a city."));
        assert_ne!(page.content_hash, compute_hash("Paris is a town."));

        let doc = page.parse(&WikitextOptions::default()).expect("parse");
        assert_eq!(doc.node_text(doc.root()), "Paris is a city.");
    }

    #[test]
    fn suggestion_files_report_their_path_on_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("links.json");
        fs::write(&path, "{not json").expect("write");
        let error = load_link_suggestions(&path, &LinkFilter::default())
            .expect_err("invalid json should fail");
        assert!(format!("{error:#}").contains("links.json"));

        let missing = temp.path().join("missing.json");
        assert!(load_image_suggestion(&missing).is_err());
    }

    #[test]
    fn loads_link_suggestion_envelope() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("links.json");
        fs::write(
            &path,
            r#"{"links": [{"text": "Paris", "target": "Paris", "score": 0.9}]}"#,
        )
        .expect("write");
        let set = load_link_suggestions(&path, &LinkFilter::default()).expect("load");
        assert_eq!(set.len(), 1);
    }
}
