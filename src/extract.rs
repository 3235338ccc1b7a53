//! Embedded listing payload extraction.
//!
//! Listing pages ship their data inside an attribute-less `<script>` block
//! that starts with a configuration assignment (`window._dida_config_ = {...}`).
//! Locating that block is HTML work; isolating the JSON object from the
//! surrounding JavaScript is a text heuristic kept behind [`PayloadParser`]
//! so a stricter parser can replace it.
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::ExtractionError;

const ITEMS_POINTER: &str = "/data/root/fields/mods/itemList/content";
const PAGE_POINTER: &str = "/data/root/fields/pageInfo/page";
const TOTAL_POINTER: &str = "/data/root/fields/pageInfo/totalResults";

static DATA_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""data"\s*:\s*\{"#).unwrap());

/// Turns the text of the matched script block into structured data rooted
/// at `{"data": ...}`.
pub trait PayloadParser: Send + Sync {
    fn parse(&self, script: &str) -> Result<Value, ExtractionError>;
}

/// Textual scan for `"data": { ... }`, cut at the brace that balances the
/// opening one. Braces inside JSON strings are ignored; no JavaScript is
/// evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct TolerantParser;

impl PayloadParser for TolerantParser {
    fn parse(&self, script: &str) -> Result<Value, ExtractionError> {
        let m = DATA_KEY_RE.find(script).ok_or_else(|| {
            ExtractionError::MalformedPayload("no \"data\" object in payload".into())
        })?;
        let open = m.end() - 1;
        let close = balanced_end(script.as_bytes(), open).ok_or_else(|| {
            ExtractionError::MalformedPayload("unbalanced braces in \"data\" object".into())
        })?;
        let isolated = format!("{{\"data\": {}}}", &script[open..close]);
        serde_json::from_str(&isolated).map_err(|e| ExtractionError::MalformedPayload(e.to_string()))
    }
}

/// Index one past the `}` matching the `{` at `open`.
fn balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub items: Vec<Value>,
    pub current_page: Option<u32>,
    pub total_results: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Page(ListingPage),
    /// Item list absent or empty: the normal end of pagination.
    NoRecords { current_page: Option<u32> },
}

pub struct PayloadExtractor<P = TolerantParser> {
    marker: String,
    parser: P,
}

impl PayloadExtractor<TolerantParser> {
    pub fn new(marker: impl Into<String>) -> Self {
        Self::with_parser(marker, TolerantParser)
    }
}

impl<P: PayloadParser> PayloadExtractor<P> {
    pub fn with_parser(marker: impl Into<String>, parser: P) -> Self {
        Self {
            marker: marker.into(),
            parser,
        }
    }

    pub fn extract(&self, body: &str) -> Result<Extracted, ExtractionError> {
        let script = locate_block(body, &self.marker).ok_or(ExtractionError::NoPayloadBlock)?;
        let payload = self.parser.parse(&script)?;
        Ok(read_listing(&payload))
    }
}

/// Text of the first attribute-less `<script>` whose whitespace-normalised
/// content starts with `marker`.
pub fn locate_block(body: &str, marker: &str) -> Option<String> {
    let selector = Selector::parse("script").ok()?;
    let doc = Html::parse_document(body);
    doc.select(&selector)
        .filter(|el| el.value().attrs().next().is_none())
        .map(|el| el.text().collect::<String>())
        .find(|text| starts_with_collapsed(text, marker))
}

fn starts_with_collapsed(text: &str, marker: &str) -> bool {
    let marker = marker.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut head = String::with_capacity(marker.len() + 1);
    let mut pending_space = false;
    for ch in text.trim_start().chars() {
        if head.len() >= marker.len() {
            break;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            head.push(' ');
            pending_space = false;
        }
        head.push(ch);
    }
    head.starts_with(&marker)
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn read_listing(payload: &Value) -> Extracted {
    let current_page = payload
        .pointer(PAGE_POINTER)
        .and_then(as_u64)
        .and_then(|p| u32::try_from(p).ok());
    let total_results = payload.pointer(TOTAL_POINTER).and_then(as_u64);

    match payload.pointer(ITEMS_POINTER).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => Extracted::Page(ListingPage {
            items: items.clone(),
            current_page,
            total_results,
        }),
        _ => Extracted::NoRecords { current_page },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MARKER: &str = "window._dida_config_ =";

    fn page_html(script: &str) -> String {
        format!(
            r#"<html><head><script src="/app.js"></script></head>
<body><script>var other = 1;</script>
<script>
  {script}
</script></body></html>"#
        )
    }

    fn config_script(data: &Value) -> String {
        format!(
            "window._dida_config_ = {{\"lang\":\"en\",\"data\": {}}};\nwindow._dida_ready_ = function() {{ return {{}}; }};",
            data
        )
    }

    fn listing(items: Value, page: Value) -> Value {
        json!({
            "root": { "fields": {
                "mods": { "itemList": { "content": items } },
                "pageInfo": { "page": page, "totalResults": 1200 }
            }}
        })
    }

    #[test]
    fn extracts_items_page_and_total() {
        let data = listing(json!([{ "productId": "1" }, { "productId": "2" }]), json!(1));
        let body = page_html(&config_script(&data));
        let out = PayloadExtractor::new(MARKER).extract(&body).unwrap();
        match out {
            Extracted::Page(page) => {
                assert_eq!(page.items.len(), 2);
                assert_eq!(page.current_page, Some(1));
                assert_eq!(page.total_results, Some(1200));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn string_page_number_is_accepted() {
        let data = listing(json!([{ "productId": "1" }]), json!("3"));
        let body = page_html(&config_script(&data));
        let out = PayloadExtractor::new(MARKER).extract(&body).unwrap();
        assert!(matches!(out, Extracted::Page(ListingPage { current_page: Some(3), .. })));
    }

    #[test]
    fn empty_item_list_is_no_records() {
        let data = listing(json!([]), json!(4));
        let body = page_html(&config_script(&data));
        let out = PayloadExtractor::new(MARKER).extract(&body).unwrap();
        assert_eq!(out, Extracted::NoRecords { current_page: Some(4) });
    }

    #[test]
    fn missing_item_list_is_no_records() {
        let body = page_html(&config_script(&json!({ "root": {} })));
        let out = PayloadExtractor::new(MARKER).extract(&body).unwrap();
        assert_eq!(out, Extracted::NoRecords { current_page: None });
    }

    #[test]
    fn block_with_attributes_is_ignored() {
        let data = listing(json!([{ "productId": "1" }]), json!(1));
        let body = format!(
            r#"<html><body><script type="text/javascript">{}</script></body></html>"#,
            config_script(&data)
        );
        let err = PayloadExtractor::new(MARKER).extract(&body).unwrap_err();
        assert_eq!(err, ExtractionError::NoPayloadBlock);
    }

    #[test]
    fn page_without_block_fails() {
        let err = PayloadExtractor::new(MARKER)
            .extract("<html><body><p>captcha</p></body></html>")
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoPayloadBlock);
    }

    #[test]
    fn marker_whitespace_is_normalised() {
        let data = listing(json!([{ "productId": "1" }]), json!(1));
        let script = config_script(&data).replacen(" = ", "\n   =  ", 1);
        assert!(locate_block(&page_html(&script), MARKER).is_some());
    }

    #[test]
    fn malformed_payload_is_reported() {
        let body = page_html("window._dida_config_ = {\"data\": {\"root\": [1, 2,, ]}};");
        let err = PayloadExtractor::new(MARKER).extract(&body).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedPayload(_)));
    }

    #[test]
    fn truncated_payload_is_reported() {
        let body = page_html("window._dida_config_ = {\"data\": {\"root\": {\"fields\": {");
        let err = PayloadExtractor::new(MARKER).extract(&body).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedPayload(_)));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let data = listing(json!([{ "productId": "1", "title": { "displayTitle": "a } b {" } }]), json!(1));
        let body = page_html(&config_script(&data));
        let out = PayloadExtractor::new(MARKER).extract(&body).unwrap();
        match out {
            Extracted::Page(page) => {
                assert_eq!(page.items[0]["title"]["displayTitle"], "a } b {");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    struct FixedParser(Value);

    impl PayloadParser for FixedParser {
        fn parse(&self, _script: &str) -> Result<Value, ExtractionError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn parser_is_swappable() {
        let payload = json!({ "data": listing(json!([{ "productId": "9" }]), json!(2)) });
        let extractor = PayloadExtractor::with_parser(MARKER, FixedParser(payload));
        let body = page_html("window._dida_config_ = whatever");
        let out = extractor.extract(&body).unwrap();
        assert!(matches!(out, Extracted::Page(ListingPage { current_page: Some(2), .. })));
    }
}
