//! Binary codec adapter.
//!
//! Converts between the three forms a document's binary state takes:
//! base64 text in the persisted envelope, raw update bytes on the wire, and
//! the CRDT document the editor works on. Everything here is pure.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, ReadTxn, StateVector, Transact, TransactionMut, Update, Xml,
    XmlElementPrelim, XmlFragment, XmlOut, XmlTextPrelim,
};

use crate::errors::SyncError;
use crate::html::{self, HtmlNode};

/// Name of the XML fragment that holds rich-text content.
pub const FRAGMENT_NAME: &str = "default";

/// Client id used when deriving binary state from HTML.
///
/// A fixed id keeps derivation deterministic: the same HTML always produces
/// byte-identical updates, so two sessions that bootstrap the same legacy
/// document agree on its binary form.
pub const HTML_DERIVATION_CLIENT_ID: u64 = 0;

/// HTML an empty description starts from.
pub const EMPTY_DOCUMENT_HTML: &str = "<p></p>";

/// Decode a persisted base64 blob. Absent or blank input is "no saved binary"
/// and yields an empty buffer.
pub fn decode_persisted(encoded: Option<&str>) -> Result<Vec<u8>, SyncError> {
    let encoded = encoded.map(str::trim).unwrap_or_default();
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    Ok(STANDARD.decode(encoded)?)
}

/// Encode binary state for the persisted envelope.
pub fn encode_persisted(binary: &[u8]) -> String {
    STANDARD.encode(binary)
}

/// Derive binary document state from HTML.
pub fn derive_from_html(html: &str) -> Vec<u8> {
    let doc = Doc::with_client_id(HTML_DERIVATION_CLIENT_ID);
    let fragment = doc.get_or_insert_xml_fragment(FRAGMENT_NAME);
    {
        let mut txn = doc.transact_mut();
        for node in html::parse(html) {
            write_node(&fragment, &mut txn, &node);
        }
    }
    encode_doc(&doc)
}

fn write_node<F: XmlFragment>(parent: &F, txn: &mut TransactionMut, node: &HtmlNode) {
    match node {
        HtmlNode::Text(text) => {
            parent.push_back(txn, XmlTextPrelim::new(text.as_str()));
        }
        HtmlNode::Element(element) => {
            let xml = parent.push_back(txn, XmlElementPrelim::empty(element.tag.as_str()));
            let mut attrs = element.attrs.clone();
            attrs.sort();
            for (name, value) in attrs {
                xml.insert_attribute(txn, name.as_str(), value);
            }
            for child in &element.children {
                write_node(&xml, txn, child);
            }
        }
    }
}

/// Load binary state into a fresh document under the given client id.
pub(crate) fn load_doc(binary: &[u8], client_id: u64) -> Result<Doc, SyncError> {
    let doc = Doc::with_client_id(client_id);
    // Root types must be registered before a write transaction is open
    doc.get_or_insert_xml_fragment(FRAGMENT_NAME);
    apply_update(&doc, binary)?;
    Ok(doc)
}

/// Apply an update onto an existing document. Empty input is a no-op.
pub(crate) fn apply_update(doc: &Doc, binary: &[u8]) -> Result<(), SyncError> {
    if binary.is_empty() {
        return Ok(());
    }
    let update = Update::decode_v1(binary).map_err(|e| SyncError::Merge(e.to_string()))?;
    let mut txn = doc.transact_mut();
    txn.apply_update(update)
        .map_err(|e| SyncError::Merge(e.to_string()))
}

/// Full state of a document as a v1 update.
pub(crate) fn encode_doc(doc: &Doc) -> Vec<u8> {
    doc.transact()
        .encode_state_as_update_v1(&StateVector::default())
}

/// Render the HTML form of a document from its binary state.
pub fn render_html(binary: &[u8]) -> Result<String, SyncError> {
    let doc = load_doc(binary, HTML_DERIVATION_CLIENT_ID)?;
    Ok(doc_html(&doc))
}

enum RenderStep {
    Node(XmlOut),
    Close(Arc<str>),
}

/// Render the `default` fragment as HTML, escaping text and attribute values.
///
/// Walks the tree with an explicit stack so nesting depth in a remote
/// binary cannot exhaust the call stack.
pub(crate) fn doc_html(doc: &Doc) -> String {
    let fragment = doc.get_or_insert_xml_fragment(FRAGMENT_NAME);
    let txn = doc.transact();
    let mut out = String::new();
    let mut steps: Vec<RenderStep> = fragment.children(&txn).map(RenderStep::Node).collect();
    steps.reverse();

    while let Some(step) = steps.pop() {
        let node = match step {
            RenderStep::Close(tag) => {
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
                continue;
            }
            RenderStep::Node(node) => node,
        };
        match node {
            XmlOut::Text(text) => out.push_str(&html::escape_text(&text.get_string(&txn))),
            XmlOut::Element(element) => {
                let tag = Arc::clone(element.tag());
                let mut attrs: Vec<(&str, String)> = element.attributes(&txn).collect();
                attrs.sort();
                out.push('<');
                out.push_str(&tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html::escape_attr(&value));
                    out.push('"');
                }
                out.push('>');
                if html::VOID_TAGS.contains(&&*tag) {
                    continue;
                }
                steps.push(RenderStep::Close(tag));
                let mut children: Vec<RenderStep> =
                    element.children(&txn).map(RenderStep::Node).collect();
                children.reverse();
                steps.extend(children);
            }
            XmlOut::Fragment(nested) => {
                let mut children: Vec<RenderStep> =
                    nested.children(&txn).map(RenderStep::Node).collect();
                children.reverse();
                steps.extend(children);
            }
        }
    }
    out
}

/// Initial binary state for an editing session: the saved blob when there is
/// one, otherwise state derived from the saved HTML, or from an empty
/// paragraph when no HTML was saved either.
///
/// A corrupt blob is logged and treated as absent.
pub fn initial_binary(saved_base64: Option<&str>, saved_html: Option<&str>) -> Vec<u8> {
    match decode_persisted(saved_base64) {
        Ok(binary) if !binary.is_empty() => return binary,
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "discarding unreadable saved binary"),
    }
    derive_from_html(saved_html.unwrap_or(EMPTY_DOCUMENT_HTML))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_persisted_roundtrip() {
        for bytes in [vec![], vec![0u8], vec![1, 2, 3, 255], (0..=255).collect::<Vec<u8>>()] {
            let encoded = encode_persisted(&bytes);
            assert_eq!(decode_persisted(Some(&encoded)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_decode_persisted_absent_is_empty() {
        assert!(decode_persisted(None).unwrap().is_empty());
        assert!(decode_persisted(Some("")).unwrap().is_empty());
        assert!(decode_persisted(Some("  \n")).unwrap().is_empty());
    }

    #[test]
    fn test_decode_persisted_rejects_garbage() {
        let err = decode_persisted(Some("%%% not base64 %%%")).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn test_derive_from_html_is_deterministic() {
        let html = r#"<h1>Plan</h1><p>Ship <strong>it</strong></p><a href="/a" title="t">x</a>"#;
        let first = derive_from_html(html);
        let second = derive_from_html(html);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_derive_from_html_differs_by_content() {
        assert_ne!(derive_from_html("<p>a</p>"), derive_from_html("<p>b</p>"));
    }

    #[test]
    fn test_render_html_regenerates_content() {
        let binary = derive_from_html("<p>Hello <strong>world</strong></p><p>again</p>");
        let html = render_html(&binary).unwrap();
        assert_eq!(html, "<p>Hello <strong>world</strong></p><p>again</p>");
    }

    #[test]
    fn test_render_html_of_empty_binary() {
        assert_eq!(render_html(&[]).unwrap(), "");
    }

    #[test]
    fn test_render_html_rejects_corrupt_binary() {
        let err = render_html(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, SyncError::Merge(_)));
    }

    #[test]
    fn test_initial_binary_prefers_saved_blob() {
        let saved = derive_from_html("<p>saved</p>");
        let encoded = encode_persisted(&saved);
        let binary = initial_binary(Some(&encoded), Some("<p>stale html</p>"));
        assert_eq!(binary, saved);
    }

    #[test]
    fn test_initial_binary_falls_back_to_html() {
        let expected = derive_from_html("<p>legacy</p>");
        assert_eq!(initial_binary(None, Some("<p>legacy</p>")), expected);
        assert_eq!(initial_binary(Some(""), Some("<p>legacy</p>")), expected);
        assert_eq!(initial_binary(Some("!!corrupt!!"), Some("<p>legacy</p>")), expected);
    }

    #[test]
    fn test_initial_binary_without_html_is_an_empty_paragraph() {
        let binary = initial_binary(None, None);
        assert_eq!(binary, derive_from_html("<p></p>"));
        assert_eq!(render_html(&binary).unwrap(), "<p></p>");
    }

    #[test]
    fn test_render_html_escapes_entity_text() {
        let source = "<p>a &lt;b&gt; c &amp; d</p>";
        let html = render_html(&derive_from_html(source)).unwrap();
        assert_eq!(html, source);
        let json = crate::html::to_prosemirror_json(&html);
        let content = json["content"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["text"], "a <b> c & d");
        assert!(content[0].get("marks").is_none());
    }

    #[test]
    fn test_render_html_escapes_attribute_values() {
        let source = r#"<p><a href="/q?a=1&amp;b=&quot;2&quot;">x</a></p>"#;
        let html = render_html(&derive_from_html(source)).unwrap();
        assert_eq!(html, source);
    }

    #[test]
    fn test_render_html_keeps_void_elements_open() {
        let html = render_html(&derive_from_html("<p>a<br>b</p>")).unwrap();
        assert_eq!(html, "<p>a<br>b</p>");
    }

    #[test]
    fn test_derive_and_render_deeply_nested_html() {
        let levels = 20_000;
        let source = format!("{}x{}", "<div>".repeat(levels), "</div>".repeat(levels));
        let html = render_html(&derive_from_html(&source)).unwrap();
        assert!(html.contains(">x<"));
        assert_eq!(html.matches("<div>").count(), crate::html::MAX_DEPTH);
    }
}
