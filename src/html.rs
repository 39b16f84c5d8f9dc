//! Lightweight HTML tokenizer for rich-text descriptions.
//!
//! Descriptions are editor-produced HTML (paragraphs, headings, lists, inline
//! marks), so a tag-level tokenizer is enough: it builds a node tree that the
//! codec writes into a CRDT document and that [`to_prosemirror_json`] turns into
//! the structured JSON rendering stored next to the binary.

use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

// Compile regexes once using LazyLock
static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<(/)?([A-Za-z][A-Za-z0-9-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(/)?>"#,
    )
    .unwrap()
});

static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

/// Elements that never have children or a closing tag.
pub(crate) const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Deepest element nesting kept by [`parse`]. Tags opened below this depth
/// are dropped and their text is kept in the deepest open element.
pub const MAX_DEPTH: usize = 128;

/// A parsed HTML node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Element(HtmlElement),
    Text(String),
}

/// A parsed HTML element with lowercase tag name and attributes in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
}

impl HtmlElement {
    /// Look up an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl HtmlNode {
    /// Concatenated text of this node and its descendants.
    pub fn text_content(&self) -> String {
        match self {
            HtmlNode::Text(text) => text.clone(),
            HtmlNode::Element(element) => element.children.iter().map(Self::text_content).collect(),
        }
    }
}

/// Parse an HTML fragment into a forest of nodes.
///
/// Unclosed elements are closed at the end of input, stray closing tags are
/// ignored and comments are dropped. Whitespace-only text is kept only inside
/// an element and only when it does not span lines. Nesting is capped at
/// [`MAX_DEPTH`].
pub fn parse(html: &str) -> Vec<HtmlNode> {
    let mut stack: Vec<HtmlElement> = Vec::new();
    let mut roots: Vec<HtmlNode> = Vec::new();
    let mut cursor = 0;
    // Open tags dropped past MAX_DEPTH, so their closing tags can be skipped
    let mut dropped: Vec<String> = Vec::new();

    for caps in TAG_REGEX.captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_text(&mut stack, &mut roots, &html[cursor..whole.start()]);
        cursor = whole.end();

        // Comments match without a tag name
        let Some(name) = caps.get(2) else {
            continue;
        };
        let tag = name.as_str().to_ascii_lowercase();

        if caps.get(1).is_some() {
            if dropped.last() == Some(&tag) {
                dropped.pop();
            } else {
                close_element(&mut stack, &mut roots, &tag);
            }
            continue;
        }

        let element = HtmlElement {
            attrs: parse_attrs(caps.get(3).map_or("", |m| m.as_str())),
            tag,
            children: Vec::new(),
        };
        if caps.get(4).is_some() || VOID_TAGS.contains(&element.tag.as_str()) {
            attach(&mut stack, &mut roots, HtmlNode::Element(element));
        } else if stack.len() >= MAX_DEPTH {
            dropped.push(element.tag);
        } else {
            stack.push(element);
        }
    }
    push_text(&mut stack, &mut roots, &html[cursor..]);

    while let Some(open) = stack.pop() {
        attach(&mut stack, &mut roots, HtmlNode::Element(open));
    }
    roots
}

fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    ATTR_REGEX
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn attach(stack: &mut [HtmlElement], roots: &mut Vec<HtmlNode>, node: HtmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

fn push_text(stack: &mut [HtmlElement], roots: &mut Vec<HtmlNode>, raw: &str) {
    if raw.is_empty() {
        return;
    }
    if raw.trim().is_empty() && (stack.is_empty() || raw.contains('\n')) {
        return;
    }
    attach(stack, roots, HtmlNode::Text(decode_entities(raw)));
}

fn close_element(stack: &mut Vec<HtmlElement>, roots: &mut Vec<HtmlNode>, tag: &str) {
    let Some(pos) = stack.iter().rposition(|open| open.tag == tag) else {
        return;
    };
    while stack.len() > pos {
        if let Some(open) = stack.pop() {
            attach(stack, roots, HtmlNode::Element(open));
        }
    }
}

/// Decode the handful of entities editors emit.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Escape text content for HTML output.
pub fn escape_text(text: &str) -> String {
    if !text.contains(['&', '<', '>']) {
        return text.to_string();
    }
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape a double-quoted attribute value for HTML output.
pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Derive the structured JSON rendering (tiptap/ProseMirror shape) from HTML.
pub fn to_prosemirror_json(html: &str) -> Value {
    let nodes = parse(html);
    let content = wrap_inline(convert_nodes(&nodes, &[]));
    json!({ "type": "doc", "content": content })
}

fn convert_nodes(nodes: &[HtmlNode], marks: &[Value]) -> Vec<Value> {
    nodes
        .iter()
        .flat_map(|node| convert_node(node, marks))
        .collect()
}

fn convert_node(node: &HtmlNode, marks: &[Value]) -> Vec<Value> {
    let element = match node {
        HtmlNode::Text(text) => return vec![text_node(text, marks)],
        HtmlNode::Element(element) => element,
    };

    if let Some(mark) = mark_for(element) {
        let mut nested = marks.to_vec();
        nested.push(mark);
        return convert_nodes(&element.children, &nested);
    }

    let children = || convert_nodes(&element.children, marks);
    match element.tag.as_str() {
        "p" => vec![block("paragraph", None, children())],
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level: u64 = element.tag[1..].parse().unwrap_or(1);
            vec![block("heading", Some(json!({ "level": level })), children())]
        }
        "ul" => vec![block("bulletList", None, children())],
        "ol" => {
            let start: u64 = element.attr("start").and_then(|s| s.parse().ok()).unwrap_or(1);
            vec![block("orderedList", Some(json!({ "start": start })), children())]
        }
        "li" => vec![block("listItem", None, wrap_inline(children()))],
        "blockquote" => vec![block("blockquote", None, wrap_inline(children()))],
        "pre" => {
            let text: String = element.children.iter().map(HtmlNode::text_content).collect();
            let content = if text.is_empty() {
                Vec::new()
            } else {
                vec![text_node(&text, &[])]
            };
            vec![block("codeBlock", None, content)]
        }
        "br" => vec![block("hardBreak", None, Vec::new())],
        "hr" => vec![block("horizontalRule", None, Vec::new())],
        "img" => {
            let mut attrs = Map::new();
            attrs.insert("src".into(), json!(element.attr("src").unwrap_or_default()));
            if let Some(alt) = element.attr("alt") {
                attrs.insert("alt".into(), json!(alt));
            }
            vec![block("image", Some(Value::Object(attrs)), Vec::new())]
        }
        // div, span and unknown wrappers are transparent
        _ => children(),
    }
}

fn mark_for(element: &HtmlElement) -> Option<Value> {
    let name = match element.tag.as_str() {
        "strong" | "b" => "bold",
        "em" | "i" => "italic",
        "u" => "underline",
        "s" | "strike" | "del" => "strike",
        "code" => "code",
        "a" => {
            return Some(json!({
                "type": "link",
                "attrs": { "href": element.attr("href").unwrap_or_default() }
            }));
        }
        _ => return None,
    };
    Some(json!({ "type": name }))
}

fn text_node(text: &str, marks: &[Value]) -> Value {
    let mut node = Map::new();
    node.insert("type".into(), json!("text"));
    node.insert("text".into(), json!(text));
    if !marks.is_empty() {
        node.insert("marks".into(), Value::Array(marks.to_vec()));
    }
    Value::Object(node)
}

fn block(kind: &str, attrs: Option<Value>, content: Vec<Value>) -> Value {
    let mut node = Map::new();
    node.insert("type".into(), json!(kind));
    if let Some(attrs) = attrs {
        node.insert("attrs".into(), attrs);
    }
    if !content.is_empty() {
        node.insert("content".into(), Value::Array(content));
    }
    Value::Object(node)
}

fn is_inline(node: &Value) -> bool {
    matches!(
        node.get("type").and_then(Value::as_str),
        Some("text") | Some("hardBreak")
    )
}

/// Wrap runs of inline nodes in paragraphs so block containers only hold blocks.
fn wrap_inline(nodes: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut run: Vec<Value> = Vec::new();
    for node in nodes {
        if is_inline(&node) {
            run.push(node);
            continue;
        }
        if !run.is_empty() {
            out.push(block("paragraph", None, std::mem::take(&mut run)));
        }
        out.push(node);
    }
    if !run.is_empty() {
        out.push(block("paragraph", None, run));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &HtmlNode) -> &HtmlElement {
        match node {
            HtmlNode::Element(e) => e,
            HtmlNode::Text(t) => panic!("Expected element, got text {:?}", t),
        }
    }

    #[test]
    fn test_parse_nested_elements() {
        let nodes = parse("<p>Hello <strong>world</strong></p>");
        assert_eq!(nodes.len(), 1);
        let p = element(&nodes[0]);
        assert_eq!(p.tag, "p");
        assert_eq!(p.children.len(), 2);
        assert_eq!(p.children[0], HtmlNode::Text("Hello ".to_string()));
        assert_eq!(element(&p.children[1]).tag, "strong");
        assert_eq!(nodes[0].text_content(), "Hello world");
    }

    #[test]
    fn test_parse_attributes_in_all_quote_styles() {
        let nodes = parse(r#"<a href="https://x.test" target='_blank' data-id=7 hidden>x</a>"#);
        let a = element(&nodes[0]);
        assert_eq!(a.attr("href"), Some("https://x.test"));
        assert_eq!(a.attr("target"), Some("_blank"));
        assert_eq!(a.attr("data-id"), Some("7"));
        assert_eq!(a.attr("hidden"), Some(""));
    }

    #[test]
    fn test_parse_void_and_self_closing() {
        let nodes = parse("<p>a<br>b<img src=\"x.png\"/></p>");
        let p = element(&nodes[0]);
        assert_eq!(p.children.len(), 4);
        assert_eq!(element(&p.children[1]).tag, "br");
        assert_eq!(element(&p.children[3]).attr("src"), Some("x.png"));
    }

    #[test]
    fn test_parse_recovers_from_unbalanced_tags() {
        let nodes = parse("<p>one</span><p>two");
        // stray </span> ignored, unclosed <p> closed at end
        assert_eq!(nodes.len(), 1);
        let outer = element(&nodes[0]);
        assert_eq!(outer.children.len(), 2);
        assert_eq!(nodes[0].text_content(), "onetwo");
    }

    #[test]
    fn test_parse_drops_comments_and_formatting_whitespace() {
        let nodes = parse("<!-- generated -->\n<p>a</p>\n  <p>b</p>");
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_parse_keeps_inline_space_between_marks() {
        let nodes = parse("<p><b>a</b> <i>b</i></p>");
        assert_eq!(nodes[0].text_content(), "a b");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp;lt; b"), "a &lt; b");
        assert_eq!(decode_entities("&lt;tag&gt; &quot;q&quot;"), "<tag> \"q\"");
        assert_eq!(decode_entities("plain"), "plain");
    }

    #[test]
    fn test_escape_roundtrips_through_decode() {
        let text = "1 < 2 && <b>x</b> > 0";
        assert_eq!(escape_text(text), "1 &lt; 2 &amp;&amp; &lt;b&gt;x&lt;/b&gt; &gt; 0");
        assert_eq!(decode_entities(&escape_text(text)), text);
        assert_eq!(escape_attr(r#"say "hi" & go"#), "say &quot;hi&quot; &amp; go");
        assert_eq!(escape_text("plain"), "plain");
    }

    #[test]
    fn test_parse_entity_text_stays_text() {
        let nodes = parse("<p>a &lt;b&gt; c</p>");
        let p = element(&nodes[0]);
        assert_eq!(p.children, vec![HtmlNode::Text("a <b> c".to_string())]);
    }

    fn depth(nodes: &[HtmlNode]) -> usize {
        nodes
            .iter()
            .map(|node| match node {
                HtmlNode::Text(_) => 0,
                HtmlNode::Element(e) => 1 + depth(&e.children),
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_parse_caps_nesting_depth() {
        let levels = 20_000;
        let html = format!("{}x{}<p>after</p>", "<div>".repeat(levels), "</div>".repeat(levels));
        let nodes = parse(&html);
        assert_eq!(depth(&nodes), MAX_DEPTH);
        // dropped closing tags do not close kept ancestors early
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text_content(), "x");
        assert_eq!(element(&nodes[1]).tag, "p");
    }

    #[test]
    fn test_prosemirror_json_deep_nesting_does_not_overflow() {
        let html = format!("{}deep{}", "<blockquote>".repeat(5_000), "</blockquote>".repeat(5_000));
        let doc = to_prosemirror_json(&html);
        assert_eq!(doc["type"], "doc");
    }

    #[test]
    fn test_prosemirror_json_paragraph_with_marks() {
        let doc = to_prosemirror_json(r#"<p>Hi <strong><a href="/x">there</a></strong></p>"#);
        assert_eq!(doc["type"], "doc");
        let para = &doc["content"][0];
        assert_eq!(para["type"], "paragraph");
        assert_eq!(para["content"][0]["text"], "Hi ");
        assert!(para["content"][0].get("marks").is_none());
        let marked = &para["content"][1];
        assert_eq!(marked["text"], "there");
        assert_eq!(marked["marks"][0]["type"], "bold");
        assert_eq!(marked["marks"][1]["type"], "link");
        assert_eq!(marked["marks"][1]["attrs"]["href"], "/x");
    }

    #[test]
    fn test_prosemirror_json_heading_and_lists() {
        let doc = to_prosemirror_json("<h2>Title</h2><ol start=\"3\"><li>first</li></ol>");
        assert_eq!(doc["content"][0]["type"], "heading");
        assert_eq!(doc["content"][0]["attrs"]["level"], 2);
        let list = &doc["content"][1];
        assert_eq!(list["type"], "orderedList");
        assert_eq!(list["attrs"]["start"], 3);
        let item = &list["content"][0];
        assert_eq!(item["type"], "listItem");
        // inline list content is wrapped in a paragraph
        assert_eq!(item["content"][0]["type"], "paragraph");
        assert_eq!(item["content"][0]["content"][0]["text"], "first");
    }

    #[test]
    fn test_prosemirror_json_code_block_flattens_text() {
        let doc = to_prosemirror_json("<pre><code>let x = 1;</code></pre>");
        let code = &doc["content"][0];
        assert_eq!(code["type"], "codeBlock");
        assert_eq!(code["content"][0]["text"], "let x = 1;");
        assert!(code["content"][0].get("marks").is_none());
    }

    #[test]
    fn test_prosemirror_json_bare_text_becomes_paragraph() {
        let doc = to_prosemirror_json("just text");
        assert_eq!(doc["content"][0]["type"], "paragraph");
        assert_eq!(doc["content"][0]["content"][0]["text"], "just text");
    }

    #[test]
    fn test_prosemirror_json_empty_input() {
        let doc = to_prosemirror_json("");
        assert_eq!(doc, json!({ "type": "doc", "content": [] }));
    }
}
