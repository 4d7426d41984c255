use anyhow::Result;

use crate::document::{Document, MetaKind, NodeId, NodeKind, TextStyle};

pub const DEFAULT_INTERLANGUAGE_PREFIXES: &[&str] = &[
    "ar", "bn", "ca", "cs", "da", "de", "el", "en", "eo", "es", "et", "eu", "fa", "fi", "fr",
    "he", "hi", "hu", "hy", "id", "it", "ja", "ko", "ms", "nl", "no", "pl", "pt", "ro", "ru",
    "sk", "sr", "sv", "ta", "th", "tr", "uk", "ur", "vi", "zh",
];

const EXTENSION_TAGS: &[&str] = &[
    "ref",
    "references",
    "gallery",
    "math",
    "chem",
    "score",
    "syntaxhighlight",
    "source",
    "timeline",
    "graph",
    "templatedata",
    "imagemap",
    "mapframe",
    "maplink",
    "poem",
    "nowiki",
];

#[derive(Debug, Clone)]
pub struct WikitextOptions {
    pub interlanguage_prefixes: Vec<String>,
}

impl Default for WikitextOptions {
    fn default() -> Self {
        Self {
            interlanguage_prefixes: DEFAULT_INTERLANGUAGE_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Inline {
    Text {
        text: String,
        styles: Vec<TextStyle>,
    },
    Element {
        kind: NodeKind,
        children: Vec<Inline>,
    },
}

impl Inline {
    fn is_blank(&self) -> bool {
        matches!(self, Self::Text { text, .. } if text.trim().is_empty())
    }

    /// Constructs that Parsoid renders as blocks when they sit on a line of their own.
    fn is_block_capable(&self) -> bool {
        matches!(
            self,
            Self::Element {
                kind: NodeKind::Transclusion { .. }
                    | NodeKind::Media { .. }
                    | NodeKind::Meta { .. }
                    | NodeKind::Comment { .. }
                    | NodeKind::Extension { .. },
                ..
            }
        )
    }
}

/// Build a document from page wikitext.
pub fn parse_wikitext(source: &str, options: &WikitextOptions) -> Result<Document> {
    let mut builder = BlockBuilder::new(options);
    for line in split_logical_lines(source) {
        builder.line(&line)?;
    }
    builder.finish()
}

/// Normalize a link target to a page title. Returns `None` when the value
/// cannot name a page.
pub fn normalize_title(value: &str) -> Option<String> {
    let mut target = value.trim();
    while let Some(stripped) = target.strip_prefix(':') {
        target = stripped.trim_start();
    }
    if let Some((without_fragment, _)) = target.split_once('#') {
        target = without_fragment.trim_end();
    }
    let target = normalize_spaces(&target.replace('_', " "));
    if target.is_empty() {
        return None;
    }
    if target
        .chars()
        .any(|ch| matches!(ch, '<' | '>' | '[' | ']' | '|' | '{' | '}') || ch.is_control())
    {
        return None;
    }
    let mut chars = target.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

/// Split source into lines, keeping newlines that sit inside templates,
/// links, comments or extension tags within the construct's line.
fn split_logical_lines(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line_start = 0usize;
    let mut cursor = 0usize;

    while cursor < source.len() {
        let rest = &source[cursor..];
        let skip_to = if rest.starts_with("<!--") {
            Some(find_comment_end(source, cursor))
        } else if rest.starts_with("{{") {
            find_balanced_end(source, cursor, "{{", "}}")
        } else if rest.starts_with("[[") {
            find_balanced_end(source, cursor, "[[", "]]")
        } else if rest.starts_with('<') {
            extension_tag_at(source, cursor).map(|tag| tag.end)
        } else {
            None
        };
        if let Some(end) = skip_to {
            cursor = end;
            continue;
        }
        if rest.starts_with('\n') {
            lines.push(source[line_start..cursor].to_string());
            cursor += 1;
            line_start = cursor;
            continue;
        }
        cursor += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    if line_start < source.len() {
        lines.push(source[line_start..].to_string());
    }
    lines
}

fn find_comment_end(source: &str, start: usize) -> usize {
    source[start + 4..]
        .find("-->")
        .map(|relative| start + 4 + relative + 3)
        .unwrap_or(source.len())
}

/// End offset (exclusive) of a construct delimited by nested `open`/`close`
/// pairs starting at `start`.
fn find_balanced_end(source: &str, start: usize, open: &str, close: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut cursor = start;
    while cursor < source.len() {
        let rest = &source[cursor..];
        if rest.starts_with(open) {
            depth += 1;
            cursor += open.len();
        } else if rest.starts_with(close) {
            depth = depth.saturating_sub(1);
            cursor += close.len();
            if depth == 0 {
                return Some(cursor);
            }
        } else {
            cursor += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExtensionTag {
    name: String,
    body: String,
    end: usize,
}

fn extension_tag_at(source: &str, start: usize) -> Option<ExtensionTag> {
    let rest = &source[start..];
    let name_len = rest[1..]
        .find(|ch: char| !ch.is_ascii_alphanumeric())
        .unwrap_or(rest.len() - 1);
    if name_len == 0 {
        return None;
    }
    let name = rest[1..1 + name_len].to_ascii_lowercase();
    if !EXTENSION_TAGS.contains(&name.as_str()) {
        return None;
    }
    let open_end = rest.find('>')?;
    if rest[..open_end].ends_with('/') {
        return Some(ExtensionTag {
            name,
            body: String::new(),
            end: start + open_end + 1,
        });
    }
    let closing = format!("</{name}>");
    let body_start = open_end + 1;
    let lowered = rest.to_ascii_lowercase();
    match lowered[body_start..].find(&closing) {
        Some(relative) => Some(ExtensionTag {
            body: rest[body_start..body_start + relative].to_string(),
            end: start + body_start + relative + closing.len(),
            name,
        }),
        None => Some(ExtensionTag {
            body: rest[body_start..].to_string(),
            end: source.len(),
            name,
        }),
    }
}

struct InlineParser<'a> {
    options: &'a WikitextOptions,
    out: Vec<Inline>,
    buffer: String,
    bold: bool,
    italic: bool,
}

impl<'a> InlineParser<'a> {
    fn new(options: &'a WikitextOptions) -> Self {
        Self {
            options,
            out: Vec::new(),
            buffer: String::new(),
            bold: false,
            italic: false,
        }
    }

    fn styles(&self) -> Vec<TextStyle> {
        let mut styles = Vec::new();
        if self.bold {
            styles.push(TextStyle::Bold);
        }
        if self.italic {
            styles.push(TextStyle::Italic);
        }
        styles
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        let styles = self.styles();
        self.out.push(Inline::Text { text, styles });
    }

    fn element(&mut self, kind: NodeKind, children: Vec<Inline>) {
        self.flush();
        self.out.push(Inline::Element { kind, children });
    }

    fn parse(mut self, source: &str) -> Vec<Inline> {
        let mut cursor = 0usize;
        while cursor < source.len() {
            let rest = &source[cursor..];
            if rest.starts_with("<!--") {
                let body = &source[cursor + 4..];
                let (text, consumed) = match body.find("-->") {
                    Some(close) => (&body[..close], close + 3),
                    None => (body, body.len()),
                };
                self.element(
                    NodeKind::Comment {
                        text: text.to_string(),
                    },
                    Vec::new(),
                );
                cursor += 4 + consumed;
                continue;
            }
            if rest.starts_with("{{")
                && let Some(end) = find_balanced_end(source, cursor, "{{", "}}")
            {
                self.template(&source[cursor..end]);
                cursor = end;
                continue;
            }
            if rest.starts_with("[[")
                && let Some(end) = find_balanced_end(source, cursor, "[[", "]]")
            {
                let trail_len = source[end..]
                    .find(|ch: char| !ch.is_ascii_lowercase())
                    .unwrap_or(source.len() - end);
                self.wikilink(&source[cursor + 2..end - 2], &source[end..end + trail_len]);
                cursor = end + trail_len;
                continue;
            }
            if rest.starts_with('[')
                && is_external_link_start(&rest[1..])
                && let Some(close) = rest.find(']')
            {
                self.external_link(&rest[1..close]);
                cursor += close + 1;
                continue;
            }
            if rest.starts_with("__")
                && let Some((kind, name, len)) = behavior_switch(rest)
            {
                self.element(
                    NodeKind::Meta {
                        kind,
                        value: name.to_string(),
                    },
                    Vec::new(),
                );
                cursor += len;
                continue;
            }
            if rest.starts_with("-{H|")
                && let Some(close) = rest.find("}-")
            {
                self.element(
                    NodeKind::Meta {
                        kind: MetaKind::HiddenVariant,
                        value: rest[4..close].to_string(),
                    },
                    Vec::new(),
                );
                cursor += close + 2;
                continue;
            }
            if rest.starts_with('<')
                && let Some(tag) = extension_tag_at(source, cursor)
            {
                if tag.name == "nowiki" {
                    self.buffer.push_str(&tag.body);
                } else {
                    self.element(
                        NodeKind::Extension {
                            name: tag.name,
                            body: tag.body,
                        },
                        Vec::new(),
                    );
                }
                cursor = tag.end;
                continue;
            }
            if rest.starts_with("'''''") {
                self.flush();
                self.bold = !self.bold;
                self.italic = !self.italic;
                cursor += 5;
                continue;
            }
            if rest.starts_with("'''") {
                self.flush();
                self.bold = !self.bold;
                cursor += 3;
                continue;
            }
            if rest.starts_with("''") {
                self.flush();
                self.italic = !self.italic;
                cursor += 2;
                continue;
            }
            let ch = rest.chars().next().unwrap_or(' ');
            self.buffer.push(ch);
            cursor += ch.len_utf8();
        }
        self.flush();
        self.out
    }

    fn template(&mut self, source: &str) {
        let inner = source[2..source.len() - 2].trim();
        let upper = inner.to_ascii_uppercase();
        let kind = if let Some(value) = strip_magic_word(inner, &upper, "DISPLAYTITLE:") {
            NodeKind::Meta {
                kind: MetaKind::DisplayTitle,
                value,
            }
        } else if let Some(value) = ["DEFAULTSORT:", "DEFAULTSORTKEY:", "DEFAULTCATEGORYSORT:"]
            .iter()
            .find_map(|word| strip_magic_word(inner, &upper, word))
        {
            NodeKind::Meta {
                kind: MetaKind::DefaultSort,
                value,
            }
        } else {
            NodeKind::Transclusion {
                source: source.to_string(),
            }
        };
        self.element(kind, Vec::new());
    }

    fn wikilink(&mut self, inner: &str, trail: &str) {
        let (target_part, label) = match inner.split_once('|') {
            Some((target, label)) => (target.trim(), Some(label)),
            None => (inner.trim(), None),
        };
        let leading_colon = target_part.starts_with(':');
        if !leading_colon && let Some((prefix, rest)) = target_part.split_once(':') {
            let prefix = prefix.trim();
            if prefix.eq_ignore_ascii_case("File") || prefix.eq_ignore_ascii_case("Image") {
                self.element(
                    NodeKind::Media {
                        target: format!("File:{}", rest.trim()),
                    },
                    Vec::new(),
                );
                self.buffer.push_str(trail);
                return;
            }
            if prefix.eq_ignore_ascii_case("Category") {
                self.element(
                    NodeKind::Meta {
                        kind: MetaKind::Category,
                        value: rest.trim().to_string(),
                    },
                    Vec::new(),
                );
                self.buffer.push_str(trail);
                return;
            }
            if self
                .options
                .interlanguage_prefixes
                .iter()
                .any(|code| code == prefix)
            {
                self.element(
                    NodeKind::Meta {
                        kind: MetaKind::LanguageLink,
                        value: target_part.to_string(),
                    },
                    Vec::new(),
                );
                self.buffer.push_str(trail);
                return;
            }
        }

        let shown = label.unwrap_or(target_part.trim_start_matches(':'));
        let mut children = InlineParser::new(self.options).parse(shown);
        if !trail.is_empty() {
            children.push(Inline::Text {
                text: trail.to_string(),
                styles: Vec::new(),
            });
        }
        self.element(
            NodeKind::Link {
                target: target_part.trim_start_matches(':').trim().to_string(),
                external: false,
            },
            children,
        );
    }

    fn external_link(&mut self, inner: &str) {
        let (url, label) = match inner.split_once(' ') {
            Some((url, label)) => (url, label.trim()),
            None => (inner, ""),
        };
        let children = if label.is_empty() {
            Vec::new()
        } else {
            InlineParser::new(self.options).parse(label)
        };
        self.element(
            NodeKind::Link {
                target: url.to_string(),
                external: true,
            },
            children,
        );
    }
}

fn strip_magic_word(inner: &str, upper: &str, word: &str) -> Option<String> {
    if upper.starts_with(word) {
        Some(inner[word.len()..].trim().to_string())
    } else {
        None
    }
}

fn is_external_link_start(value: &str) -> bool {
    ["http://", "https://", "//", "mailto:", "ftp://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

fn behavior_switch(rest: &str) -> Option<(MetaKind, &str, usize)> {
    let body = &rest[2..];
    let name_len = body.find(|ch: char| !ch.is_ascii_uppercase())?;
    if name_len == 0 || !body[name_len..].starts_with("__") {
        return None;
    }
    let name = &body[..name_len];
    let kind = match name {
        "NOTOC" | "FORCETOC" | "TOC" => MetaKind::TableOfContents,
        "NOEDITSECTION" => MetaKind::NoEditSection,
        "NOGALLERY" => MetaKind::NoGallery,
        "NOTITLECONVERT" | "NOTC" => MetaKind::NoTitleConvert,
        "NOCONTENTCONVERT" | "NOCC" => MetaKind::NoContentConvert,
        "INDEX" | "NOINDEX" => MetaKind::Index,
        _ => return None,
    };
    Some((kind, name, name_len + 4))
}

fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let leading = line.chars().take_while(|ch| *ch == '=').count();
    let trailing = line.chars().rev().take_while(|ch| *ch == '=').count();
    let level = leading.min(trailing).min(6);
    if level == 0 || line.len() <= level * 2 {
        return None;
    }
    let inner = line[level..line.len() - level].trim();
    if inner.is_empty() {
        return None;
    }
    Some((level as u8, inner))
}

struct TableState {
    table: NodeId,
    row: Option<NodeId>,
    last_cell: Option<NodeId>,
}

struct BlockBuilder<'a> {
    options: &'a WikitextOptions,
    doc: Document,
    container: NodeId,
    paragraph: Vec<String>,
    list: Option<(NodeId, bool)>,
    preformatted: Option<NodeId>,
    table: Option<TableState>,
}

impl<'a> BlockBuilder<'a> {
    fn new(options: &'a WikitextOptions) -> Self {
        let doc = Document::new();
        let container = doc.root();
        Self {
            options,
            doc,
            container,
            paragraph: Vec::new(),
            list: None,
            preformatted: None,
            table: None,
        }
    }

    fn inline(&self, source: &str) -> Vec<Inline> {
        InlineParser::new(self.options).parse(source)
    }

    fn line(&mut self, line: &str) -> Result<()> {
        let trimmed = line.trim_end();
        if self.table.is_some() {
            return self.table_line(trimmed.trim_start());
        }
        if trimmed.trim_start().is_empty() {
            self.flush_paragraph()?;
            self.close_open_blocks();
            return Ok(());
        }
        if trimmed.starts_with("{|") {
            self.flush_paragraph()?;
            self.close_open_blocks();
            let table = self.doc.append(self.container, NodeKind::Table)?;
            self.table = Some(TableState {
                table,
                row: None,
                last_cell: None,
            });
            return Ok(());
        }
        if let Some((level, title)) = parse_heading(trimmed) {
            self.flush_paragraph()?;
            self.close_open_blocks();
            let root = self.doc.root();
            self.container = self.doc.append(root, NodeKind::Section)?;
            let heading = self.doc.append(self.container, NodeKind::Heading { level })?;
            let inlines = self.inline(title);
            self.append_inlines(heading, inlines)?;
            return Ok(());
        }
        if let Some(first) = trimmed.chars().next()
            && matches!(first, '*' | '#' | ':' | ';')
        {
            self.flush_paragraph()?;
            self.preformatted = None;
            let ordered = first == '#';
            let list = match self.list {
                Some((list, list_ordered)) if list_ordered == ordered => list,
                _ => {
                    let list = self.doc.append(self.container, NodeKind::List { ordered })?;
                    self.list = Some((list, ordered));
                    list
                }
            };
            let item = self.doc.append(list, NodeKind::ListItem)?;
            let body = trimmed.trim_start_matches(['*', '#', ':', ';']).trim_start();
            let inlines = self.inline(body);
            self.append_inlines(item, inlines)?;
            return Ok(());
        }
        if trimmed.starts_with(' ') {
            self.flush_paragraph()?;
            self.list = None;
            let pre = match self.preformatted {
                Some(pre) => {
                    self.doc.append_text(pre, "\n", &[])?;
                    pre
                }
                None => {
                    let pre = self.doc.append(self.container, NodeKind::Preformatted)?;
                    self.preformatted = Some(pre);
                    pre
                }
            };
            let inlines = self.inline(&trimmed[1..]);
            self.append_inlines(pre, inlines)?;
            return Ok(());
        }
        self.close_open_blocks();
        self.paragraph.push(trimmed.to_string());
        Ok(())
    }

    fn table_line(&mut self, line: &str) -> Result<()> {
        let Some(state) = self.table.as_mut() else {
            return Ok(());
        };
        if line.starts_with("|}") {
            self.table = None;
            return Ok(());
        }
        if line.starts_with("|-") {
            state.row = Some(self.doc.append(state.table, NodeKind::TableRow)?);
            state.last_cell = None;
            return Ok(());
        }
        if line.starts_with('|') || line.starts_with('!') {
            let row = match state.row {
                Some(row) => row,
                None => {
                    let row = self.doc.append(state.table, NodeKind::TableRow)?;
                    state.row = Some(row);
                    row
                }
            };
            let body = line[1..].trim_start_matches('+');
            let separator = if line.starts_with('!') { "!!" } else { "||" };
            let mut last_cell = None;
            for raw_cell in body.split(separator) {
                let content = strip_cell_attributes(raw_cell).trim();
                let cell = self.doc.append(row, NodeKind::TableCell)?;
                let inlines = InlineParser::new(self.options).parse(content);
                append_inlines(&mut self.doc, cell, inlines)?;
                last_cell = Some(cell);
            }
            if let Some(state) = self.table.as_mut() {
                state.last_cell = last_cell;
            }
            return Ok(());
        }
        if let Some(cell) = state.last_cell
            && !line.is_empty()
        {
            self.doc.append_text(cell, "\n", &[])?;
            let inlines = InlineParser::new(self.options).parse(line);
            append_inlines(&mut self.doc, cell, inlines)?;
        }
        Ok(())
    }

    fn close_open_blocks(&mut self) {
        self.list = None;
        self.preformatted = None;
    }

    fn flush_paragraph(&mut self) -> Result<()> {
        if self.paragraph.is_empty() {
            return Ok(());
        }
        let joined = std::mem::take(&mut self.paragraph).join("\n");
        let inlines = self.inline(&joined);
        let hoist = inlines
            .iter()
            .all(|inline| inline.is_blank() || inline.is_block_capable());
        if hoist {
            let blocks = inlines
                .into_iter()
                .filter(|inline| !inline.is_blank())
                .collect::<Vec<_>>();
            return append_inlines(&mut self.doc, self.container, blocks);
        }
        let paragraph = self.doc.append(self.container, NodeKind::Paragraph)?;
        append_inlines(&mut self.doc, paragraph, inlines)
    }

    fn append_inlines(&mut self, parent: NodeId, inlines: Vec<Inline>) -> Result<()> {
        append_inlines(&mut self.doc, parent, inlines)
    }

    fn finish(mut self) -> Result<Document> {
        self.flush_paragraph()?;
        Ok(self.doc)
    }
}

fn strip_cell_attributes(cell: &str) -> &str {
    match cell.split_once('|') {
        Some((attributes, content))
            if attributes.contains('=') && !attributes.contains(['[', '{']) =>
        {
            content
        }
        _ => cell,
    }
}

fn append_inlines(doc: &mut Document, parent: NodeId, inlines: Vec<Inline>) -> Result<()> {
    for inline in inlines {
        match inline {
            Inline::Text { text, styles } => {
                doc.append_text(parent, &text, &styles)?;
            }
            Inline::Element { kind, children } => {
                let element = doc.append(parent, kind)?;
                append_inlines(doc, element, children)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeRole;

    fn parse(source: &str) -> Document {
        parse_wikitext(source, &WikitextOptions::default()).expect("parse wikitext")
    }

    fn root_labels(doc: &Document) -> Vec<&'static str> {
        doc.children(doc.root())
            .iter()
            .filter_map(|id| doc.kind(*id).map(NodeKind::label))
            .collect()
    }

    #[test]
    fn normalize_title_matches_page_title_rules() {
        assert_eq!(normalize_title("paris_(mythology)").as_deref(), Some("Paris (mythology)"));
        assert_eq!(normalize_title("  New   York ").as_deref(), Some("New York"));
        assert_eq!(normalize_title("Paris#History").as_deref(), Some("Paris"));
        assert_eq!(normalize_title("#History"), None);
        assert_eq!(normalize_title("Foo|Bar"), None);
        assert_eq!(normalize_title("   "), None);
    }

    #[test]
    fn leading_boilerplate_lines_become_blocks() {
        let doc = parse("{{Infobox city\n| name = Paris\n}}\n[[File:Paris.jpg|thumb]]\n\nParis is a city.");
        assert_eq!(root_labels(&doc), vec!["transclusion", "media", "paragraph"]);
    }

    #[test]
    fn template_followed_by_prose_stays_in_paragraph() {
        let doc = parse("{{Short description|City}}\nParis is a city.");
        assert_eq!(root_labels(&doc), vec!["paragraph"]);
        let paragraph = doc.children(doc.root())[0];
        let labels = doc
            .children(paragraph)
            .iter()
            .filter_map(|id| doc.kind(*id).map(NodeKind::label))
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["transclusion", "text"]);
        assert_eq!(doc.node_text(paragraph), "\nParis is a city.");
    }

    #[test]
    fn classifies_links_categories_and_language_links() {
        let doc = parse("See [[Eiffel Tower|the tower]] and [[Seine]]s.\n[[Category:Capitals]]\n[[fr:Paris]]");
        let kinds = doc
            .preorder()
            .into_iter()
            .filter_map(|id| doc.kind(id).cloned())
            .collect::<Vec<_>>();
        assert!(kinds.contains(&NodeKind::Link {
            target: "Eiffel Tower".to_string(),
            external: false
        }));
        assert!(kinds.contains(&NodeKind::Meta {
            kind: MetaKind::Category,
            value: "Capitals".to_string()
        }));
        assert!(kinds.contains(&NodeKind::Meta {
            kind: MetaKind::LanguageLink,
            value: "fr:Paris".to_string()
        }));
        let link = doc
            .preorder()
            .into_iter()
            .find(|id| {
                matches!(doc.kind(*id), Some(NodeKind::Link { target, .. }) if target == "Seine")
            })
            .expect("seine link");
        assert_eq!(doc.node_text(link), "Seines");
    }

    #[test]
    fn magic_words_switches_and_variants_become_meta() {
        let doc = parse("{{DISPLAYTITLE:''Paris''}}{{DEFAULTSORT:Paris}}__NOTOC__ __NOEDITSECTION__ -{H|zh-cn:巴黎;}-");
        let metas = doc
            .preorder()
            .into_iter()
            .filter_map(|id| match doc.kind(id) {
                Some(NodeKind::Meta { kind, .. }) => Some(*kind),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            metas,
            vec![
                MetaKind::DisplayTitle,
                MetaKind::DefaultSort,
                MetaKind::TableOfContents,
                MetaKind::NoEditSection,
                MetaKind::HiddenVariant,
            ]
        );
    }

    #[test]
    fn quotes_toggle_styles() {
        let doc = parse("'''Paris''' is ''big''.");
        let paragraph = doc.children(doc.root())[0];
        let styles = doc
            .children(paragraph)
            .iter()
            .filter_map(|id| match doc.kind(*id) {
                Some(NodeKind::Text { text, styles }) => Some((text.clone(), styles.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            styles,
            vec![
                ("Paris".to_string(), vec![TextStyle::Bold]),
                (" is ".to_string(), vec![]),
                ("big".to_string(), vec![TextStyle::Italic]),
                (".".to_string(), vec![]),
            ]
        );
    }

    #[test]
    fn headings_open_sections() {
        let doc = parse("Lead.\n\n== History ==\nOld city.\n* one\n* two");
        assert_eq!(root_labels(&doc), vec!["paragraph", "section"]);
        let section = doc.children(doc.root())[1];
        let labels = doc
            .children(section)
            .iter()
            .filter_map(|id| doc.kind(*id).map(NodeKind::label))
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["heading", "paragraph", "list"]);
        let list = doc.children(section)[2];
        assert_eq!(doc.children(list).len(), 2);
    }

    #[test]
    fn references_and_comments_are_non_prose() {
        let doc = parse("Paris<ref name=\"a\">Paris source</ref> is<!-- Paris --> big.<ref name=\"a\" />");
        let paragraph = doc.children(doc.root())[0];
        let roles = doc
            .children(paragraph)
            .iter()
            .filter_map(|id| doc.kind(*id).map(NodeKind::role))
            .collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                NodeRole::Text,
                NodeRole::NonProse,
                NodeRole::Text,
                NodeRole::NonProse,
                NodeRole::Text,
                NodeRole::NonProse,
            ]
        );
    }

    #[test]
    fn tables_produce_rows_and_cells() {
        let doc = parse("{|\n|-\n| Paris || France\n|-\n! style=\"x\" | Rome\n|}\nAfter.");
        assert_eq!(root_labels(&doc), vec!["table", "paragraph"]);
        let table = doc.children(doc.root())[0];
        assert_eq!(doc.children(table).len(), 2);
        let first_row = doc.children(table)[0];
        assert_eq!(doc.children(first_row).len(), 2);
        let second_row = doc.children(table)[1];
        assert_eq!(doc.node_text(second_row), "Rome");
    }
}
