//! Reply formatting and safe rendering
//!
//! Generated replies are split into a small set of segments (plain text,
//! links, highlighted contact details) and only those segments are ever
//! turned into markup. Every character of source text is escaped on the way
//! out, so no tag or attribute can come from the text itself.
//!
//! User-authored text never goes through the formatter: it is rendered as a
//! single literal text run.

use crate::config::ContactInfo;
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("valid URL pattern"));

/// Punctuation that usually ends a sentence rather than a URL
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

const LINK_STYLE: &str = "color: #2563eb; text-decoration: underline;";
const HIGHLIGHT_STYLE: &str = "color: #2563eb; font-weight: 500;";

/// One renderable piece of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    /// Hyperlink whose visible text is the URL itself
    Link { href: String },
    /// Emphasized contact detail
    Highlight { text: String },
}

/// A message broken into whitelisted segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormattedText {
    segments: Vec<Segment>,
}

impl FormattedText {
    /// Render user text with no interpretation at all
    pub fn literal(text: &str) -> Self {
        let mut out = Self::default();
        out.push_text(text);
        out
    }

    #[allow(dead_code)] // Used in tests
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Render to HTML using only `<a>` and `<span>` elements
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text { text } => html.push_str(&encode_text(text)),
                Segment::Link { href } => {
                    html.push_str(&format!(
                        r#"<a href="{}" style="{LINK_STYLE}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                        encode_double_quoted_attribute(href),
                        encode_text(href)
                    ));
                }
                Segment::Highlight { text } => {
                    html.push_str(&format!(
                        r#"<span style="{HIGHLIGHT_STYLE}">{}</span>"#,
                        encode_text(text)
                    ));
                }
            }
        }
        html
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text { text: last }) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text {
                text: text.to_string(),
            });
        }
    }
}

/// Splits assistant replies into links, highlights and text
#[derive(Debug, Clone)]
pub struct Formatter {
    highlights: Option<Regex>,
}

impl Formatter {
    pub fn new(contact: &ContactInfo) -> Self {
        let terms: Vec<String> = [&contact.email, &contact.phone]
            .into_iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(regex::escape)
            .collect();

        let highlights = if terms.is_empty() {
            None
        } else {
            match Regex::new(&terms.join("|")) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(error = %e, "Contact highlighting disabled");
                    None
                }
            }
        };

        Self { highlights }
    }

    /// Format an assistant reply
    pub fn format_reply(&self, text: &str) -> FormattedText {
        let mut out = FormattedText::default();
        let mut cursor = 0;

        for m in URL_PATTERN.find_iter(text) {
            let url = trim_url(m.as_str());
            let has_host = url.split_once("://").is_some_and(|(_, rest)| !rest.is_empty());
            if !has_host {
                continue;
            }
            let url_end = m.start() + url.len();

            self.push_highlighted(&mut out, text.get(cursor..m.start()).unwrap_or_default());
            out.segments.push(Segment::Link {
                href: url.to_string(),
            });
            cursor = url_end;
        }

        self.push_highlighted(&mut out, text.get(cursor..).unwrap_or_default());
        out
    }

    fn push_highlighted(&self, out: &mut FormattedText, text: &str) {
        let Some(re) = &self.highlights else {
            out.push_text(text);
            return;
        };

        let mut cursor = 0;
        for m in re.find_iter(text) {
            out.push_text(text.get(cursor..m.start()).unwrap_or_default());
            out.segments.push(Segment::Highlight {
                text: m.as_str().to_string(),
            });
            cursor = m.end();
        }
        out.push_text(text.get(cursor..).unwrap_or_default());
    }
}

/// Normalize raw generated text before it is stored
///
/// Trims surrounding whitespace and drops control characters other than
/// newlines and tabs.
pub fn clean_generated_text(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Drop trailing characters that belong to the surrounding sentence
///
/// A closing bracket stays when the URL opened it, as in
/// `https://en.wikipedia.org/wiki/Rust_(programming_language)`.
fn trim_url(candidate: &str) -> &str {
    let mut url = candidate;
    loop {
        let unbalanced = |open: char, close: char| {
            url.ends_with(close) && url.matches(open).count() < url.matches(close).count()
        };
        let trimmed = if url.ends_with(URL_TRAILING_PUNCTUATION)
            || unbalanced('(', ')')
            || unbalanced('[', ']')
        {
            url.get(..url.len() - 1).unwrap_or_default()
        } else {
            return url;
        };
        url = trimmed;
    }
}
