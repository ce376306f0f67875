//! Parses generated HTML into ordered section regions and insight blocks.
//!
//! Grammar (informal):
//!
//! ```text
//! document := (text | region)*
//! region   := open-tag[data-section-id=ID] body close-tag   ; same tag name, nesting-aware
//! ```
//!
//! Regions are returned in document order. A region nested inside another
//! region belongs to the outer one. Non-blank text between, before or after
//! regions becomes a `text` section of its own, except for the report's
//! `<h1>` title, which is lifted into [`ParsedReport::title`].

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::model::{Insight, InsightSeverity, SectionType};
use crate::html;

pub const UNTITLED_SECTION: &str = "Untitled Section";

static SECTION_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<([a-z][a-z0-9]*)\b[^>]*?\bdata-section-id\s*=\s*["']([^"']+)["'][^>]*>"#)
        .unwrap()
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*?(/?)>").unwrap());
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>").unwrap());
static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1\s*>").unwrap());
static INSIGHT_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<([a-z][a-z0-9]*)\b[^>]*?\bclass\s*=\s*["'][^"']*\binsight[^"']*["'][^>]*>"#)
        .unwrap()
});
static STRONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(strong|b)\b[^>]*>(.*?)</(strong|b)\s*>").unwrap());

/// Severity keywords, highest priority first.
const SEVERITY_KEYWORDS: &[(InsightSeverity, &[&str])] = &[
    (
        InsightSeverity::Critical,
        &["critical", "danger", "severe", "alert", "urgent", "red"],
    ),
    (
        InsightSeverity::Warning,
        &["warning", "caution", "risk", "amber", "orange", "yellow"],
    ),
    (
        InsightSeverity::Success,
        &["success", "positive", "opportunity", "green"],
    ),
];

/// A marked region lifted out of the HTML.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    pub identifier: String,
    pub section_type: SectionType,
    pub title: String,
    /// Outer HTML of the region, marker element included.
    pub html: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReport {
    pub title: Option<String>,
    pub sections: Vec<ParsedSection>,
    pub insights: Vec<Insight>,
}

/// Parses a complete generation buffer.
///
/// Every non-blank part of `source` ends up in a section: marked regions
/// keep their identifier, unmarked stretches become `section-text-N`. HTML
/// without any marker is therefore a single text section.
pub fn parse_report(source: &str) -> ParsedReport {
    let regions = marked_regions(source);
    let title = H1.captures(source).and_then(|c| {
        let heading = c.get(0)?;
        let text = html::html_to_text(&c[1]);
        (!text.is_empty()).then_some((heading.start()..heading.end(), text))
    });
    // The title element is dropped from the body only when no region owns it.
    let lifted = title
        .as_ref()
        .map(|(span, _)| span.clone())
        .filter(|span| !regions.iter().any(|(r, _)| r.start <= span.start && span.end <= r.end));

    let mut sections = Vec::new();
    let mut gaps = 0;
    let mut cursor = 0;
    let mut push_gap = |from: usize, to: usize, sections: &mut Vec<ParsedSection>| {
        let text = match &lifted {
            Some(span) if from <= span.start && span.end <= to => {
                format!("{}{}", &source[from..span.start], &source[span.end..to])
            }
            _ => source[from..to].to_string(),
        };
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        gaps += 1;
        sections.push(ParsedSection {
            identifier: format!("section-text-{}", gaps),
            section_type: SectionType::Text,
            title: first_heading(text).unwrap_or_else(|| UNTITLED_SECTION.to_string()),
            html: text.to_string(),
        });
    };

    for (span, section) in regions {
        push_gap(cursor, span.start, &mut sections);
        sections.push(section);
        cursor = span.end;
    }
    push_gap(cursor, source.len(), &mut sections);

    // A bare title still yields one section.
    if sections.is_empty() && !source.trim().is_empty() {
        sections.push(ParsedSection {
            identifier: "section-text-1".to_string(),
            section_type: SectionType::Text,
            title: first_heading(source).unwrap_or_else(|| UNTITLED_SECTION.to_string()),
            html: source.trim().to_string(),
        });
    }

    ParsedReport {
        title: title.map(|(_, text)| text),
        sections,
        insights: parse_insights(source),
    }
}

/// Extracts marked regions in document order.
pub fn parse_sections(source: &str) -> Vec<ParsedSection> {
    marked_regions(source)
        .into_iter()
        .map(|(_, section)| section)
        .collect()
}

fn marked_regions(source: &str) -> Vec<(Range<usize>, ParsedSection)> {
    let mut regions = Vec::new();
    let mut pos = 0;

    while let Some(caps) = SECTION_OPEN.captures_at(source, pos) {
        let Some(open) = caps.get(0) else { break };
        let tag = caps[1].to_ascii_lowercase();
        let identifier = caps[2].trim().to_string();

        let end = element_end(source, &tag, open.end());
        let region = &source[open.start()..end];

        regions.push((
            open.start()..end,
            ParsedSection {
                section_type: SectionType::from_identifier(&identifier),
                title: first_heading(region).unwrap_or_else(|| UNTITLED_SECTION.to_string()),
                identifier,
                html: region.to_string(),
            },
        ));

        pos = end.max(open.end());
    }

    regions
}

/// Finds blocks whose class mentions "insight" and grades them.
pub fn parse_insights(source: &str) -> Vec<Insight> {
    let mut insights = Vec::new();
    let mut pos = 0;

    while let Some(caps) = INSIGHT_OPEN.captures_at(source, pos) {
        let Some(open) = caps.get(0) else { break };
        let tag = caps[1].to_ascii_lowercase();
        let end = element_end(source, &tag, open.end());
        let region = &source[open.start()..end];

        let content = html::html_to_text(region);
        if !content.is_empty() {
            let title = first_heading(region).or_else(|| {
                STRONG
                    .captures(region)
                    .map(|c| html::html_to_text(&c[2]))
                    .filter(|t| !t.is_empty())
            });
            insights.push(Insight {
                severity: classify_severity(open.as_str(), &content),
                title,
                content,
            });
        }

        pos = end.max(open.end());
    }

    insights
}

/// Grades an insight from its opening tag (class/style) and text.
/// Critical beats warning beats success; anything else is info.
pub fn classify_severity(open_tag: &str, text: &str) -> InsightSeverity {
    let haystack = format!("{} {}", open_tag, text).to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| words.iter().any(|w| keywords.contains(w)))
        .map(|(severity, _)| *severity)
        .unwrap_or(InsightSeverity::Info)
}

/// Plain-text content of the first `<h1>`–`<h6>` in `fragment`.
pub fn first_heading(fragment: &str) -> Option<String> {
    HEADING
        .captures(fragment)
        .map(|c| html::html_to_text(&c[2]))
        .filter(|t| !t.is_empty())
}

/// Byte offset just past the close tag matching an element of `tag` opened
/// right before `from`. Unclosed elements run to the end of the input.
fn element_end(source: &str, tag: &str, from: usize) -> usize {
    let mut depth = 1usize;

    for caps in ANY_TAG.captures_iter(&source[from..]) {
        if !caps[2].eq_ignore_ascii_case(tag) {
            continue;
        }
        let closing = &caps[1] == "/";
        let self_closing = &caps[3] == "/";
        if closing {
            depth -= 1;
            if depth == 0 {
                if let Some(m) = caps.get(0) {
                    return from + m.end();
                }
            }
        } else if !self_closing {
            depth += 1;
        }
    }

    source.len()
}
