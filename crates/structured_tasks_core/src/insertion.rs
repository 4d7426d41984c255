use serde::Serialize;
use tracing::{debug, warn};

use crate::document::{Document, LinearItem, NodeId, NodeKind, NodeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InsertionPoint {
    pub offset: usize,
    /// No content offset was found and the start of the document was used.
    pub fell_back: bool,
}

/// First offset inside a content branch that is not followed by leading
/// boilerplate (templates, comments, invisible metadata, newlines).
pub fn find_insertion_offset(doc: &Document) -> InsertionPoint {
    let items = doc.linear_items();
    let mut enclosing: Vec<NodeRole> = Vec::new();
    let mut offset = 0usize;

    while offset <= items.len() {
        if enclosing.last() == Some(&NodeRole::ContentBranch) {
            match items.get(offset) {
                Some(LinearItem::Char { ch: '\n', .. }) => {
                    offset += 1;
                    continue;
                }
                Some(LinearItem::Open { node, kind }) if is_leading_boilerplate(kind) => {
                    offset = closing_index(&items, offset, *node) + 1;
                    continue;
                }
                // The branch held only boilerplate; keep looking past it.
                Some(LinearItem::Close { .. }) => {}
                _ => {
                    debug!(offset, "found image insertion offset");
                    return InsertionPoint {
                        offset,
                        fell_back: false,
                    };
                }
            }
        }
        match items.get(offset) {
            Some(LinearItem::Open { kind, .. }) => enclosing.push(kind.role()),
            Some(LinearItem::Close { .. }) => {
                enclosing.pop();
            }
            Some(LinearItem::Char { .. }) => {}
            None => break,
        }
        offset += 1;
    }

    warn!(
        length = doc.len(),
        "no content insertion offset found; falling back to the start of the document"
    );
    InsertionPoint {
        offset: 0,
        fell_back: true,
    }
}

fn is_leading_boilerplate(kind: &NodeKind) -> bool {
    match kind {
        NodeKind::Transclusion { .. } | NodeKind::Comment { .. } => true,
        NodeKind::Meta { kind, .. } => kind.is_invisible_boilerplate(),
        _ => false,
    }
}

fn closing_index(items: &[LinearItem<'_>], open: usize, node: NodeId) -> usize {
    items[open..]
        .iter()
        .position(|item| matches!(item, LinearItem::Close { node: closed, .. } if *closed == node))
        .map(|relative| open + relative)
        .unwrap_or(items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::{WikitextOptions, parse_wikitext};

    fn insertion_for(source: &str) -> (Document, InsertionPoint) {
        let doc = parse_wikitext(source, &WikitextOptions::default()).expect("parse");
        let point = find_insertion_offset(&doc);
        (doc, point)
    }

    #[test]
    fn skips_leading_non_prose_blocks() {
        let (doc, point) = insertion_for("{{Infobox}}\n[[File:Paris.jpg]]\n\nParis is a city.");
        assert!(!point.fell_back);
        let paragraph = doc.children(doc.root())[2];
        let first_char = doc.inner_range(paragraph).expect("inner").start;
        assert_eq!(point.offset, first_char);
    }

    #[test]
    fn skips_inline_boilerplate_and_newlines() {
        let (doc, point) = insertion_for(
            "{{Short description|City}}<!-- lead -->\n[[Category:Cities]]\n__NOTOC__Paris is a city.",
        );
        let paragraph = doc.children(doc.root())[0];
        let text = *doc.children(paragraph).last().expect("text");
        assert_eq!(doc.node_text(text), "Paris is a city.");
        // __NOTOC__ is not skipped.
        let toc = doc.children(paragraph)[doc.children(paragraph).len() - 2];
        assert_eq!(point.offset, doc.node_start(toc).expect("start"));
    }

    #[test]
    fn accepts_offset_before_a_wikilink() {
        let (doc, point) = insertion_for("[[Paris]] is a city.");
        let paragraph = doc.children(doc.root())[0];
        assert_eq!(point.offset, doc.node_start(paragraph).expect("start") + 1);
    }

    fn first_paragraph_start(doc: &Document) -> usize {
        let paragraph = doc
            .preorder()
            .into_iter()
            .find(|node| doc.kind(*node).map(NodeKind::label) == Some("paragraph"))
            .expect("paragraph");
        doc.inner_range(paragraph).expect("inner").start
    }

    #[test]
    fn skips_branches_holding_only_boilerplate() {
        let (doc, point) = insertion_for("* {{Infobox}}\n\nParis is a city.");
        let labels = doc
            .children(doc.root())
            .iter()
            .filter_map(|node| doc.kind(*node).map(NodeKind::label))
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["list", "paragraph"]);
        assert!(!point.fell_back);
        assert_eq!(point.offset, first_paragraph_start(&doc));

        let (doc, point) = insertion_for("== {{Lang|fr}} ==\nParis is a city.");
        assert!(!point.fell_back);
        assert_eq!(point.offset, first_paragraph_start(&doc));
    }

    #[test]
    fn falls_back_to_start_without_content() {
        let (_, point) = insertion_for("{{Infobox}}\n[[Category:Cities]]");
        assert_eq!(
            point,
            InsertionPoint {
                offset: 0,
                fell_back: true
            }
        );
        let (_, empty) = insertion_for("");
        assert!(empty.fell_back);
    }
}
