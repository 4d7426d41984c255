use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;

use crate::marker::{ImageMarker, LinkMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    Bold,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaKind {
    Category,
    DefaultSort,
    LanguageLink,
    DisplayTitle,
    Index,
    NoEditSection,
    NoGallery,
    NoTitleConvert,
    NoContentConvert,
    TableOfContents,
    HiddenVariant,
}

impl MetaKind {
    /// Invisible directives that never count as the start of article prose.
    pub fn is_invisible_boilerplate(self) -> bool {
        !matches!(self, Self::NoContentConvert | Self::TableOfContents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Root,
    /// Wrapper that only holds other blocks.
    Structural,
    /// Block whose children are inline content.
    ContentBranch,
    Text,
    NonProse,
    Marker,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Section,
    List { ordered: bool },
    Table,
    TableRow,
    Paragraph,
    Heading { level: u8 },
    ListItem,
    TableCell,
    Preformatted,
    Text { text: String, styles: Vec<TextStyle> },
    Transclusion { source: String },
    Media { target: String },
    Link { target: String, external: bool },
    Extension { name: String, body: String },
    Meta { kind: MetaKind, value: String },
    Comment { text: String },
    LinkSuggestion(LinkMarker),
    ImageSuggestion(ImageMarker),
}

impl NodeKind {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            text: value.into(),
            styles: Vec::new(),
        }
    }

    pub fn role(&self) -> NodeRole {
        match self {
            Self::Document => NodeRole::Root,
            Self::Section | Self::List { .. } | Self::Table | Self::TableRow => {
                NodeRole::Structural
            }
            Self::Paragraph
            | Self::Heading { .. }
            | Self::ListItem
            | Self::TableCell
            | Self::Preformatted => NodeRole::ContentBranch,
            Self::Text { .. } => NodeRole::Text,
            Self::Transclusion { .. }
            | Self::Media { .. }
            | Self::Link { .. }
            | Self::Extension { .. }
            | Self::Meta { .. }
            | Self::Comment { .. } => NodeRole::NonProse,
            Self::LinkSuggestion(_) | Self::ImageSuggestion(_) => NodeRole::Marker,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Whether text may be placed directly inside this element.
    pub fn accepts_text(&self) -> bool {
        self.role() == NodeRole::ContentBranch
            || matches!(self, Self::Link { .. } | Self::LinkSuggestion(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Section => "section",
            Self::List { .. } => "list",
            Self::Table => "table",
            Self::TableRow => "table_row",
            Self::Paragraph => "paragraph",
            Self::Heading { .. } => "heading",
            Self::ListItem => "list_item",
            Self::TableCell => "table_cell",
            Self::Preformatted => "preformatted",
            Self::Text { .. } => "text",
            Self::Transclusion { .. } => "transclusion",
            Self::Media { .. } => "media",
            Self::Link { .. } => "link",
            Self::Extension { .. } => "extension",
            Self::Meta { .. } => "meta",
            Self::Comment { .. } => "comment",
            Self::LinkSuggestion(_) => "link_suggestion",
            Self::ImageSuggestion(_) => "image_suggestion",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains_range(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Map this range through a splice. Returns `None` when the content the
    /// range covered has been removed entirely.
    pub fn rebase(self, splice: &Splice) -> Option<Range> {
        if splice.removed == splice.inserted {
            return Some(self);
        }
        let removed_end = splice.at + splice.removed;
        let start = if self.start < splice.at {
            self.start
        } else if self.start >= removed_end {
            self.start - splice.removed + splice.inserted
        } else {
            splice.at + splice.inserted
        };
        let end = if self.end <= splice.at {
            self.end
        } else if self.end >= removed_end {
            self.end - splice.removed + splice.inserted
        } else {
            splice.at
        };
        if end <= start && !self.is_empty() {
            return None;
        }
        Some(Range::new(start, end.max(start)))
    }
}

/// A change in linear coordinates: `removed` items at `at` were replaced by
/// `inserted` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    pub at: usize,
    pub removed: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LiveRangeId(usize);

#[derive(Debug, Clone, Copy)]
struct LiveRangeState {
    range: Range,
    valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinearItem<'a> {
    Open { node: NodeId, kind: &'a NodeKind },
    Close { node: NodeId, kind: &'a NodeKind },
    Char { node: NodeId, index: usize, ch: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Inside (or at either edge of) a text node, by char index.
    Text { node: NodeId, index: usize },
    /// Between the children of an element.
    Gap { parent: NodeId, index: usize },
}

/// Tree-shaped rich-text document with a flat offset space.
///
/// Every element occupies an open and a close item and every text character
/// one item; offsets address the gaps between items, starting at 0 before the
/// first block. Text nodes have no items of their own, so adjacent text nodes
/// form one uninterrupted run of characters.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    live_ranges: Vec<Option<LiveRangeState>>,
    revision: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                attached: true,
            }],
            live_ranges: Vec::new(),
            revision: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).filter(|node| node.attached)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|node| &node.kind)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(Node::children).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(Node::parent)
    }

    fn attached(&self, id: NodeId) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| anyhow!("node {} is not attached to the document", id.0))
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
            attached: true,
        });
        id
    }

    /// Append a child while building the tree.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId> {
        let parent_kind = &self.attached(parent)?.kind;
        if parent_kind.is_text() {
            bail!("text node {} cannot have children", parent.0);
        }
        if matches!(kind, NodeKind::Document) {
            bail!("a document node cannot be nested");
        }
        let width = match &kind {
            NodeKind::Text { text, .. } => text.chars().count(),
            _ => 2,
        };
        let at = if self.has_live_ranges() {
            let parent_range = self.inner_range(parent)?;
            Some(parent_range.end)
        } else {
            None
        };
        let id = self.alloc(kind, Some(parent));
        self.nodes[parent.0].children.push(id);
        if let Some(at) = at {
            self.apply_splice(Splice {
                at,
                removed: 0,
                inserted: width,
            });
        } else {
            self.revision += 1;
        }
        Ok(id)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str, styles: &[TextStyle]) -> Result<NodeId> {
        self.append(
            parent,
            NodeKind::Text {
                text: text.to_string(),
                styles: styles.to_vec(),
            },
        )
    }

    /// Width of a node in linear items.
    pub fn width(&self, id: NodeId) -> usize {
        let Some(node) = self.node(id) else {
            return 0;
        };
        match &node.kind {
            NodeKind::Text { text, .. } => text.chars().count(),
            NodeKind::Document => node.children.iter().map(|child| self.width(*child)).sum(),
            _ => 2 + node.children.iter().map(|child| self.width(*child)).sum::<usize>(),
        }
    }

    pub fn len(&self) -> usize {
        self.width(self.root())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the first item belonging to `id`.
    pub fn node_start(&self, id: NodeId) -> Result<usize> {
        let node = self.attached(id)?;
        let Some(parent) = node.parent else {
            return Ok(0);
        };
        let mut offset = self.inner_start(parent)?;
        for sibling in &self.attached(parent)?.children {
            if *sibling == id {
                return Ok(offset);
            }
            offset += self.width(*sibling);
        }
        bail!("node {} is missing from its parent's children", id.0)
    }

    fn inner_start(&self, id: NodeId) -> Result<usize> {
        if id == self.root() {
            return Ok(0);
        }
        Ok(self.node_start(id)? + 1)
    }

    /// Outer range of a node: open through close for elements, the characters
    /// for text nodes.
    pub fn node_range(&self, id: NodeId) -> Result<Range> {
        let start = self.node_start(id)?;
        Ok(Range::new(start, start + self.width(id)))
    }

    /// Range strictly between an element's open and close items.
    pub fn inner_range(&self, id: NodeId) -> Result<Range> {
        let node = self.attached(id)?;
        if node.kind.is_text() {
            return self.node_range(id);
        }
        if id == self.root() {
            return Ok(Range::new(0, self.len()));
        }
        let outer = self.node_range(id)?;
        Ok(Range::new(outer.start + 1, outer.end - 1))
    }

    /// Attached node ids in document (pre-)order, root excluded.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_preorder(self.root(), &mut out);
        out
    }

    fn collect_preorder(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            out.push(*child);
            self.collect_preorder(*child, out);
        }
    }

    pub fn linear_items(&self) -> Vec<LinearItem<'_>> {
        let mut out = Vec::with_capacity(self.len());
        for child in self.children(self.root()) {
            self.collect_items(*child, &mut out);
        }
        out
    }

    fn collect_items<'a>(&'a self, id: NodeId, out: &mut Vec<LinearItem<'a>>) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text { text, .. } => {
                for (index, ch) in text.chars().enumerate() {
                    out.push(LinearItem::Char {
                        node: id,
                        index,
                        ch,
                    });
                }
            }
            kind => {
                out.push(LinearItem::Open { node: id, kind });
                for child in &node.children {
                    self.collect_items(*child, out);
                }
                out.push(LinearItem::Close { node: id, kind });
            }
        }
    }

    /// Concatenated characters inside `range`, elements skipped.
    pub fn text_in(&self, range: Range) -> String {
        self.linear_items()
            .iter()
            .skip(range.start)
            .take(range.len())
            .filter_map(|item| match item {
                LinearItem::Char { ch, .. } => Some(*ch),
                _ => None,
            })
            .collect()
    }

    /// All text below a node.
    pub fn node_text(&self, id: NodeId) -> String {
        match self.kind(id) {
            Some(NodeKind::Text { text, .. }) => text.clone(),
            Some(_) => self
                .children(id)
                .iter()
                .map(|child| self.node_text(*child))
                .collect(),
            None => String::new(),
        }
    }

    /// Resolve an offset to a tree position. Offsets touching a text node
    /// resolve into that text node.
    pub fn locate(&self, offset: usize) -> Result<Position> {
        if offset > self.len() {
            bail!("offset {offset} is past the end of the document ({})", self.len());
        }
        let mut parent = self.root();
        let mut cursor = 0usize;
        'descend: loop {
            let children = self.children(parent).to_vec();
            for (index, child) in children.iter().enumerate() {
                let width = self.width(*child);
                let is_text = self.kind(*child).is_some_and(NodeKind::is_text);
                if is_text {
                    if offset >= cursor && offset <= cursor + width {
                        return Ok(Position::Text {
                            node: *child,
                            index: offset - cursor,
                        });
                    }
                } else if offset == cursor {
                    return Ok(Position::Gap { parent, index });
                } else if offset < cursor + width {
                    parent = *child;
                    cursor += 1;
                    continue 'descend;
                }
                cursor += width;
            }
            if offset == cursor {
                let index = self.children(parent).len();
                return Ok(Position::Gap { parent, index });
            }
            bail!("offset {offset} could not be resolved");
        }
    }

    /// Split a text node and wrap chars `start..end` in a new element.
    /// Returns the id of the wrapping element.
    pub fn wrap_text(
        &mut self,
        text_node: NodeId,
        start: usize,
        end: usize,
        wrapper: NodeKind,
    ) -> Result<NodeId> {
        let (text, styles) = match &self.attached(text_node)?.kind {
            NodeKind::Text { text, styles } => (text.clone(), styles.clone()),
            other => bail!("cannot wrap text inside a {} node", other.label()),
        };
        if wrapper.is_text() || wrapper.role() == NodeRole::Root {
            bail!("wrapper must be an element");
        }
        let chars = text.chars().collect::<Vec<_>>();
        if start >= end || end > chars.len() {
            bail!(
                "invalid wrap range {start}..{end} for text of length {}",
                chars.len()
            );
        }
        let parent = self
            .parent(text_node)
            .context("text node has no parent")?;
        let node_start = self.node_start(text_node)?;
        let slot = self.child_index(parent, text_node)?;

        let before = chars[..start].iter().collect::<String>();
        let middle = chars[start..end].iter().collect::<String>();
        let after = chars[end..].iter().collect::<String>();

        let marker = self.alloc(wrapper, Some(parent));
        let middle_node = if start == 0 {
            self.set_text(text_node, middle);
            self.nodes[parent.0].children[slot] = marker;
            self.nodes[text_node.0].parent = Some(marker);
            text_node
        } else {
            self.set_text(text_node, before);
            self.nodes[parent.0].children.insert(slot + 1, marker);
            self.alloc(
                NodeKind::Text {
                    text: middle,
                    styles: styles.clone(),
                },
                Some(marker),
            )
        };
        self.nodes[marker.0].children.push(middle_node);
        if !after.is_empty() {
            let after_node = self.alloc(
                NodeKind::Text {
                    text: after,
                    styles,
                },
                Some(parent),
            );
            let marker_slot = self.child_index(parent, marker)?;
            self.nodes[parent.0]
                .children
                .insert(marker_slot + 1, after_node);
        }

        self.apply_splice(Splice {
            at: node_start + start,
            removed: 0,
            inserted: 1,
        });
        self.apply_splice(Splice {
            at: node_start + end + 1,
            removed: 0,
            inserted: 1,
        });
        Ok(marker)
    }

    /// Replace an element with a new node of the given kind that adopts the
    /// old children. The old id is detached; offsets do not move.
    pub fn replace_element(&mut self, id: NodeId, kind: NodeKind) -> Result<NodeId> {
        let node = self.attached(id)?;
        if node.kind.is_text() || id == self.root() {
            bail!("only elements can be replaced (got {})", node.kind.label());
        }
        if kind.is_text() || kind.role() == NodeRole::Root {
            bail!("replacement must be an element");
        }
        let parent = node.parent.context("element has no parent")?;
        let children = node.children.clone();
        let range = self.node_range(id)?;
        let slot = self.child_index(parent, id)?;

        let replacement = self.alloc(kind, Some(parent));
        for child in &children {
            self.nodes[child.0].parent = Some(replacement);
        }
        self.nodes[replacement.0].children = children;
        self.nodes[parent.0].children[slot] = replacement;
        self.nodes[id.0].attached = false;
        self.nodes[id.0].children.clear();

        self.apply_splice(Splice {
            at: range.start,
            removed: range.len(),
            inserted: range.len(),
        });
        Ok(replacement)
    }

    pub fn insert_text(&mut self, offset: usize, value: &str) -> Result<()> {
        let inserted = value.chars().count();
        if inserted == 0 {
            return Ok(());
        }
        match self.locate(offset)? {
            Position::Text { node, index } => {
                let NodeKind::Text { text, .. } = &self.nodes[node.0].kind else {
                    bail!("position resolved to a non-text node");
                };
                let mut chars = text.chars().collect::<Vec<_>>();
                let tail = chars.split_off(index);
                let updated = chars
                    .into_iter()
                    .chain(value.chars())
                    .chain(tail)
                    .collect::<String>();
                self.set_text(node, updated);
            }
            Position::Gap { parent, index } => {
                let parent_kind = &self.attached(parent)?.kind;
                if !parent_kind.accepts_text() {
                    bail!(
                        "cannot insert text at offset {offset} inside a {} node",
                        parent_kind.label()
                    );
                }
                let node = self.alloc(NodeKind::text(value), Some(parent));
                self.nodes[parent.0].children.insert(index, node);
            }
        }
        self.apply_splice(Splice {
            at: offset,
            removed: 0,
            inserted,
        });
        Ok(())
    }

    /// Delete characters. The range may span several text nodes but must not
    /// cross element boundaries.
    pub fn remove_text(&mut self, range: Range) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        if range.end > self.len() {
            bail!("range {}..{} is past the end of the document", range.start, range.end);
        }
        let mut per_node: Vec<(NodeId, usize, usize)> = Vec::new();
        for item in self.linear_items().iter().skip(range.start).take(range.len()) {
            let LinearItem::Char { node, index, .. } = item else {
                bail!(
                    "range {}..{} crosses an element boundary",
                    range.start,
                    range.end
                );
            };
            match per_node.last_mut() {
                Some((last, _, end)) if *last == *node => *end = index + 1,
                _ => per_node.push((*node, *index, index + 1)),
            }
        }
        for (node, start, end) in per_node {
            let NodeKind::Text { text, .. } = &self.nodes[node.0].kind else {
                continue;
            };
            let remaining = text
                .chars()
                .enumerate()
                .filter(|(index, _)| *index < start || *index >= end)
                .map(|(_, ch)| ch)
                .collect::<String>();
            if remaining.is_empty() {
                self.detach(node)?;
            } else {
                self.set_text(node, remaining);
            }
        }
        self.apply_splice(Splice {
            at: range.start,
            removed: range.len(),
            inserted: 0,
        });
        Ok(())
    }

    /// Insert a childless element at an offset, splitting a text node if the
    /// offset falls inside one.
    pub fn insert_leaf(&mut self, offset: usize, kind: NodeKind) -> Result<NodeId> {
        if kind.is_text() || kind.role() == NodeRole::Root {
            bail!("insert_leaf expects an element");
        }
        let (parent, index) = match self.locate(offset)? {
            Position::Gap { parent, index } => {
                let parent_kind = &self.attached(parent)?.kind;
                if parent_kind.role() == NodeRole::NonProse || parent_kind.role() == NodeRole::Marker
                {
                    bail!(
                        "cannot insert at offset {offset} inside a {} node",
                        parent_kind.label()
                    );
                }
                (parent, index)
            }
            Position::Text { node, index } => {
                let parent = self.parent(node).context("text node has no parent")?;
                let slot = self.child_index(parent, node)?;
                let length = self.width(node);
                if index == 0 {
                    (parent, slot)
                } else if index == length {
                    (parent, slot + 1)
                } else {
                    self.split_text(node, index)?;
                    (parent, slot + 1)
                }
            }
        };
        let leaf = self.alloc(kind, Some(parent));
        self.nodes[parent.0].children.insert(index, leaf);
        self.apply_splice(Splice {
            at: offset,
            removed: 0,
            inserted: 2,
        });
        Ok(leaf)
    }

    /// Split a text node at a char index; the original keeps the head.
    fn split_text(&mut self, node: NodeId, index: usize) -> Result<NodeId> {
        let NodeKind::Text { text, styles } = self.attached(node)?.kind.clone() else {
            bail!("split_text expects a text node");
        };
        let parent = self.parent(node).context("text node has no parent")?;
        let head = text.chars().take(index).collect::<String>();
        let tail = text.chars().skip(index).collect::<String>();
        self.set_text(node, head);
        let tail_node = self.alloc(NodeKind::Text { text: tail, styles }, Some(parent));
        let slot = self.child_index(parent, node)?;
        self.nodes[parent.0].children.insert(slot + 1, tail_node);
        Ok(tail_node)
    }

    fn set_text(&mut self, node: NodeId, value: String) {
        if let NodeKind::Text { text, .. } = &mut self.nodes[node.0].kind {
            *text = value;
        }
    }

    fn detach(&mut self, node: NodeId) -> Result<()> {
        let parent = self.parent(node).context("node has no parent")?;
        let slot = self.child_index(parent, node)?;
        self.nodes[parent.0].children.remove(slot);
        self.nodes[node.0].attached = false;
        Ok(())
    }

    fn child_index(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.children(parent)
            .iter()
            .position(|candidate| *candidate == child)
            .ok_or_else(|| anyhow!("node {} is not a child of node {}", child.0, parent.0))
    }

    pub fn track_range(&mut self, range: Range) -> Result<LiveRangeId> {
        if range.end > self.len() || range.start > range.end {
            bail!(
                "cannot track range {}..{} in a document of length {}",
                range.start,
                range.end,
                self.len()
            );
        }
        let id = LiveRangeId(self.live_ranges.len());
        self.live_ranges.push(Some(LiveRangeState { range, valid: true }));
        Ok(id)
    }

    /// Current value of a live range; `None` once invalidated or released.
    pub fn live_range(&self, id: LiveRangeId) -> Option<Range> {
        self.live_ranges
            .get(id.0)
            .copied()
            .flatten()
            .filter(|state| state.valid)
            .map(|state| state.range)
    }

    pub fn release_range(&mut self, id: LiveRangeId) {
        if let Some(slot) = self.live_ranges.get_mut(id.0) {
            *slot = None;
        }
    }

    fn has_live_ranges(&self) -> bool {
        self.live_ranges
            .iter()
            .any(|slot| slot.is_some_and(|state| state.valid))
    }

    fn apply_splice(&mut self, splice: Splice) {
        self.revision += 1;
        for slot in self.live_ranges.iter_mut().flatten() {
            if !slot.valid {
                continue;
            }
            match slot.range.rebase(&splice) {
                Some(range) => slot.range = range,
                None => slot.valid = false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_kind() -> NodeKind {
        NodeKind::Link {
            target: "Elsewhere".to_string(),
            external: false,
        }
    }

    fn paragraph_doc(text: &str) -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let paragraph = doc.append(doc.root(), NodeKind::Paragraph).expect("paragraph");
        let text_node = doc.append_text(paragraph, text, &[]).expect("text");
        (doc, paragraph, text_node)
    }

    #[test]
    fn linear_model_counts_open_close_and_chars() {
        let (doc, paragraph, text_node) = paragraph_doc("abc");
        assert_eq!(doc.len(), 5);
        assert_eq!(doc.node_range(paragraph).expect("range"), Range::new(0, 5));
        assert_eq!(doc.node_range(text_node).expect("range"), Range::new(1, 4));
        assert_eq!(doc.text_in(Range::new(0, 5)), "abc");
    }

    #[test]
    fn locate_prefers_text_positions() {
        let (doc, _, text_node) = paragraph_doc("abc");
        assert_eq!(
            doc.locate(0).expect("locate"),
            Position::Gap {
                parent: doc.root(),
                index: 0
            }
        );
        assert_eq!(
            doc.locate(1).expect("locate"),
            Position::Text {
                node: text_node,
                index: 0
            }
        );
        assert_eq!(
            doc.locate(4).expect("locate"),
            Position::Text {
                node: text_node,
                index: 3
            }
        );
        assert_eq!(
            doc.locate(5).expect("locate"),
            Position::Gap {
                parent: doc.root(),
                index: 1
            }
        );
        assert!(doc.locate(6).is_err());
    }

    #[test]
    fn wrap_text_splits_and_keeps_head_identity() {
        let (mut doc, paragraph, text_node) = paragraph_doc("Paris is big");
        let wrapper = doc
            .wrap_text(text_node, 6, 8, link_kind())
            .expect("wrap");
        let children = doc.children(paragraph).to_vec();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], text_node);
        assert_eq!(children[1], wrapper);
        assert_eq!(doc.node_text(text_node), "Paris ");
        assert_eq!(doc.node_text(wrapper), "is");
        assert_eq!(doc.node_text(children[2]), " big");
        assert_eq!(doc.len(), 16);
    }

    #[test]
    fn wrap_text_at_start_moves_original_node() {
        let (mut doc, paragraph, text_node) = paragraph_doc("Paris");
        let wrapper = doc
            .wrap_text(text_node, 0, 5, link_kind())
            .expect("wrap");
        assert_eq!(doc.children(paragraph), &[wrapper]);
        assert_eq!(doc.children(wrapper), &[text_node]);
        assert_eq!(doc.parent(text_node), Some(wrapper));
    }

    #[test]
    fn replace_element_issues_new_identity_without_moving_offsets() {
        let (mut doc, _, text_node) = paragraph_doc("Paris is big");
        let wrapper = doc
            .wrap_text(text_node, 0, 5, link_kind())
            .expect("wrap");
        let tracked = doc
            .track_range(doc.node_range(wrapper).expect("range"))
            .expect("track");
        let before = doc.live_range(tracked);
        let replacement = doc
            .replace_element(wrapper, NodeKind::Media { target: "File:Swap.jpg".to_string() })
            .expect("replace");
        assert_ne!(replacement, wrapper);
        assert!(doc.node(wrapper).is_none());
        assert_eq!(doc.node_text(replacement), "Paris");
        assert_eq!(doc.live_range(tracked), before);
    }

    #[test]
    fn live_range_shifts_for_edits_before_and_ignores_edits_after() {
        let (mut doc, _, _) = paragraph_doc("one two three");
        let tracked = doc.track_range(Range::new(5, 8)).expect("track");
        doc.insert_text(1, "zero ").expect("insert before");
        assert_eq!(doc.live_range(tracked), Some(Range::new(10, 13)));
        assert_eq!(doc.text_in(Range::new(10, 13)), "two");
        doc.insert_text(14, "!!").expect("insert after");
        assert_eq!(doc.live_range(tracked), Some(Range::new(10, 13)));
        doc.insert_text(13, "s").expect("insert at end boundary");
        assert_eq!(doc.live_range(tracked), Some(Range::new(10, 13)));
    }

    #[test]
    fn live_range_is_invalidated_when_its_text_is_deleted() {
        let (mut doc, _, _) = paragraph_doc("one two three");
        let tracked = doc.track_range(Range::new(5, 8)).expect("track");
        doc.remove_text(Range::new(4, 9)).expect("remove");
        assert_eq!(doc.live_range(tracked), None);
        assert_eq!(doc.text_in(Range::new(0, doc.len())), "onethree");
    }

    #[test]
    fn partial_deletion_trims_live_range() {
        let (mut doc, _, _) = paragraph_doc("one two three");
        let tracked = doc.track_range(Range::new(5, 8)).expect("track");
        doc.remove_text(Range::new(3, 6)).expect("remove");
        assert_eq!(doc.live_range(tracked), Some(Range::new(3, 5)));
        assert_eq!(doc.text_in(Range::new(3, 5)), "wo");
    }

    #[test]
    fn remove_text_rejects_element_boundaries() {
        let (mut doc, _, _) = paragraph_doc("abc");
        let error = doc.remove_text(Range::new(0, 2)).expect_err("must fail");
        assert!(error.to_string().contains("element boundary"));
    }

    #[test]
    fn insert_text_outside_content_branch_fails() {
        let (mut doc, _, _) = paragraph_doc("abc");
        let error = doc.insert_text(0, "x").expect_err("must fail");
        assert!(error.to_string().contains("cannot insert text"));
    }

    #[test]
    fn insert_leaf_splits_text() {
        let (mut doc, paragraph, text_node) = paragraph_doc("abcd");
        let leaf = doc
            .insert_leaf(3, NodeKind::Media { target: "File:X.jpg".to_string() })
            .expect("insert");
        let children = doc.children(paragraph).to_vec();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], text_node);
        assert_eq!(children[1], leaf);
        assert_eq!(doc.node_range(leaf).expect("range"), Range::new(3, 5));
        assert_eq!(doc.node_text(children[2]), "cd");
    }

    #[test]
    fn released_range_no_longer_resolves() {
        let (mut doc, _, _) = paragraph_doc("abc");
        let tracked = doc.track_range(Range::new(1, 2)).expect("track");
        doc.release_range(tracked);
        assert_eq!(doc.live_range(tracked), None);
    }

    #[test]
    fn append_with_live_ranges_rebases() {
        let mut doc = Document::new();
        let first = doc.append(doc.root(), NodeKind::Paragraph).expect("p");
        doc.append_text(first, "abc", &[]).expect("text");
        let tracked = doc.track_range(Range::new(1, 4)).expect("track");
        let second = doc.append(doc.root(), NodeKind::Paragraph).expect("p");
        doc.append_text(second, "def", &[]).expect("text");
        assert_eq!(doc.live_range(tracked), Some(Range::new(1, 4)));
        assert_eq!(doc.len(), 10);
    }
}
