//! Raw email body → clean plain text.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)<(?:!doctype\b|/?(?:html|head|body|meta|style|title|p|div|br|hr|table|tbody|thead|tr|td|th|span|a|b|i|u|strong|em|font|img|center|ul|ol|li|h[1-6])\b[^<>]*>)",
        )
        .expect("invalid markup regex")
    })
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("invalid blank lines regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").expect("invalid spaces regex"))
}

const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "title", "img", "svg", "noscript"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "tr", "table", "tbody", "thead", "li", "ul", "ol", "h1", "h2", "h3",
    "h4", "h5", "h6", "section", "article", "header", "footer", "hr", "blockquote", "center",
];

pub fn looks_like_html(body: &str) -> bool {
    markup_re().is_match(body)
}

/// Convert an email body to whitespace-normalized plain text. Never fails.
pub fn normalize(body: &str) -> String {
    let text = if looks_like_html(body) {
        html_to_text(body)
    } else {
        body.to_string()
    };
    collapse_whitespace(&text)
}

/// Zero-width characters that survive entity decoding.
const INVISIBLE: &[char] = &['\u{200b}', '\u{200c}', '\u{200d}', '\u{feff}'];

fn collapse_whitespace(text: &str) -> String {
    let text = text.replace(INVISIBLE, "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = spaces_re().replace_all(&text, " ");
    let lines: Vec<&str> = text.split('\n').map(str::trim).collect();
    let joined = lines.join("\n");
    blank_lines_re()
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Flatten markup to text. Link targets, images and table decoration are dropped;
/// cell contents are kept, separated by spaces.
fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    walk(doc.root_element(), &mut out);
    out
}

fn walk(element: ElementRef, out: &mut String) {
    let name = element.value().name().to_ascii_lowercase();
    if SKIPPED_TAGS.contains(&name.as_str()) {
        return;
    }
    let is_block = BLOCK_TAGS.contains(&name.as_str());
    if is_block {
        out.push('\n');
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk(child_el, out);
                }
            }
            _ => {}
        }
    }
    match name.as_str() {
        "td" | "th" => out.push(' '),
        _ if is_block => out.push('\n'),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_collapsed() {
        let raw = "Dear Customer,\r\n\r\n\r\n\r\nRs.100   debited\t\tfrom a/c  \r\n";
        assert_eq!(normalize(raw), "Dear Customer,\n\nRs.100 debited from a/c");
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\n  "), "");
    }

    #[test]
    fn test_html_is_flattened() {
        let html = r#"<html><head><style>p{color:red}</style></head><body>
            <p>Dear Customer,</p>
            <p>Rs.<b>169.00</b> has been debited</p>
            <a href="https://bank.example/unsubscribe">Unsubscribe</a>
            <img src="logo.png" alt="logo">
        </body></html>"#;
        let text = normalize(html);
        assert!(text.contains("Dear Customer,"));
        assert!(text.contains("Rs.169.00 has been debited"));
        assert!(text.contains("Unsubscribe"));
        assert!(!text.contains("https://"));
        assert!(!text.contains("color:red"));
        assert!(!text.contains("logo"));
    }

    #[test]
    fn test_table_cells_are_separated() {
        let html = "<table><tr><td>Amount</td><td>INR 500.00</td></tr><tr><td>To</td><td>John</td></tr></table>";
        let text = normalize(html);
        assert!(text.contains("Amount INR 500.00"));
        assert!(text.contains("To John"));
    }

    #[test]
    fn test_detects_markup() {
        assert!(looks_like_html("<div>hi</div>"));
        assert!(looks_like_html("text <br/> more"));
        assert!(!looks_like_html("amount < 500 and > 100"));
        assert!(looks_like_html("<!DOCTYPE html><p>x</p>"));
        assert!(looks_like_html("<td class=\"amt\">Rs.5</td>"));
    }

    #[test]
    fn test_bracketed_names_stay_plain_text() {
        let body = "Rs.500.00 debited from your account to <SWIGGY LIMITED> on 01-01-26.";
        assert!(!looks_like_html(body));
        assert_eq!(normalize(body), body);
        assert!(!looks_like_html("Sent to <John Doe> via UPI"));
    }

    #[test]
    fn test_invisible_and_non_breaking_spaces() {
        let html = "<p>Rs.&#8203;169.00 has been&nbsp;&nbsp;debited</p>";
        assert_eq!(normalize(html), "Rs.169.00 has been debited");
        assert_eq!(normalize("to\u{feff} ZEPTO\u{a0}\u{a0}LTD\u{200d}"), "to ZEPTO LTD");
    }
}
