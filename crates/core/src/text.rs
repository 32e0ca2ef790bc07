//! Plain-text extraction and unit tokenisation.
//!
//! Document content is an opaque rich-text string (usually editor HTML). The
//! diff, lineage and merge layers never look at markup directly; they ask a
//! [`TextExtractor`] for the document's paragraphs. Each [`Paragraph`] keeps
//! the byte span it occupies in the raw content so edits can splice a single
//! paragraph while leaving every other byte untouched.
//!
//! [`MarkupExtractor`] is the default extractor. It recognises block-level
//! elements (`<p>`, `<h1>`..`<h6>`, `<li>`, `<blockquote>`, `<pre>`) and
//! falls back to one paragraph per non-blank line for plain text.

use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::diff::Granularity;

static BLOCK_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(p|h[1-6]|li|blockquote|pre)(?:\s[^>]*)?>").expect("block tag regex is valid")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break regex is valid"));

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]+["')\]]*"#).expect("sentence regex is valid"));

/// Lower-cased abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "vs.", "etc.", "e.g.", "i.e.",
    "inc.", "ltd.", "co.", "no.", "fig.", "approx.", "cf.", "al.", "a.m.", "p.m.",
];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One block-level segment of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// Byte range of the segment (including its own markup) in the raw content.
    pub span: Range<usize>,
    /// Plain text with markup stripped and whitespace collapsed. Never empty.
    pub text: String,
}

impl Paragraph {
    /// The raw slice of `content` this paragraph occupies.
    pub fn raw<'a>(&self, content: &'a str) -> &'a str {
        content.get(self.span.clone()).unwrap_or("")
    }
}

/// Collaborator that turns rich-text content into plain paragraphs.
///
/// Implementations must return paragraphs in document order with
/// non-overlapping spans and non-empty text.
pub trait TextExtractor: Send + Sync {
    /// Block-level segments of `content`.
    fn paragraphs(&self, content: &str) -> Vec<Paragraph>;

    /// The document as plain text, one paragraph per line.
    fn plain_text(&self, content: &str) -> String {
        self.paragraphs(content)
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Default extractor for editor HTML and plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupExtractor;

impl TextExtractor for MarkupExtractor {
    fn paragraphs(&self, content: &str) -> Vec<Paragraph> {
        if BLOCK_OPEN.is_match(content) {
            markup_paragraphs(content)
        } else {
            line_paragraphs(content)
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenisation
// ---------------------------------------------------------------------------

/// Split `content` into diff units at the requested granularity.
pub fn units(extractor: &dyn TextExtractor, content: &str, granularity: Granularity) -> Vec<String> {
    let paragraphs = extractor.paragraphs(content);
    match granularity {
        Granularity::Paragraph => paragraphs.into_iter().map(|p| p.text).collect(),
        Granularity::Sentence => paragraphs
            .iter()
            .flat_map(|p| split_sentences(&p.text))
            .collect(),
        Granularity::Word => paragraphs
            .iter()
            .flat_map(|p| p.text.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .collect(),
    }
}

/// Split plain text on `[.!?]+` boundaries that are followed by whitespace
/// or the end of the text. A period ending a known abbreviation or a single
/// initial (`J.`) does not end a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(text) {
        let followed_by_space = text[m.end()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if !followed_by_space {
            continue;
        }
        let punct = m.as_str();
        if punct.starts_with('.') && !punct.contains(['!', '?']) && is_abbreviation(&text[start..m.end()]) {
            continue;
        }
        push_trimmed(&mut sentences, &text[start..m.end()]);
        start = m.end();
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn is_abbreviation(fragment: &str) -> bool {
    let Some(last) = fragment.split_whitespace().last() else {
        return false;
    };
    let lower = last.to_lowercase();
    if ABBREVIATIONS.contains(&lower.as_str()) {
        return true;
    }
    let mut chars = last.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(c), Some('.'), None) if c.is_uppercase()
    )
}

fn push_trimmed(out: &mut Vec<String>, fragment: &str) {
    let trimmed = fragment.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

// ---------------------------------------------------------------------------
// Markup handling
// ---------------------------------------------------------------------------

/// Strip tags, decode the common entities and collapse whitespace.
pub fn strip_markup(fragment: &str) -> String {
    let with_breaks = LINE_BREAK.replace_all(fragment, " ");
    let without_tags = ANY_TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn markup_paragraphs(content: &str) -> Vec<Paragraph> {
    // ASCII lowercasing keeps byte offsets aligned with `content`.
    let lowered = content.to_ascii_lowercase();
    let mut blocks: Vec<Range<usize>> = Vec::new();
    let mut cursor = 0;

    while let Some(caps) = BLOCK_OPEN.captures_at(content, cursor) {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let closing = format!("</{}>", tag.as_str().to_ascii_lowercase());
        let end = match lowered[whole.end()..].find(&closing) {
            Some(offset) => whole.end() + offset + closing.len(),
            None => BLOCK_OPEN
                .find_at(content, whole.end())
                .map_or(content.len(), |next| next.start()),
        };
        blocks.push(whole.start()..end);
        cursor = end;
    }

    // Text sitting between blocks is kept as its own paragraph so nothing
    // in the document is invisible to the diff.
    let mut paragraphs = Vec::new();
    let mut previous_end = 0;
    for block in blocks {
        push_gap(content, previous_end..block.start, &mut paragraphs);
        let text = strip_markup(&content[block.clone()]);
        if !text.is_empty() {
            paragraphs.push(Paragraph { span: block.clone(), text });
        }
        previous_end = block.end;
    }
    push_gap(content, previous_end..content.len(), &mut paragraphs);
    paragraphs
}

fn push_gap(content: &str, gap: Range<usize>, out: &mut Vec<Paragraph>) {
    let slice = &content[gap.clone()];
    let text = strip_markup(slice);
    if text.is_empty() {
        return;
    }
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    out.push(Paragraph {
        span: gap.start + leading..gap.end - trailing,
        text,
    });
}

fn line_paragraphs(content: &str) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut offset = 0;
    for line in content.split('\n') {
        let body = line.strip_suffix('\r').unwrap_or(line);
        let text = strip_markup(body);
        if !text.is_empty() {
            paragraphs.push(Paragraph {
                span: offset..offset + body.len(),
                text,
            });
        }
        offset += line.len() + 1;
    }
    paragraphs
}

/// Separator used between paragraphs when new ones are spliced into
/// `content`: a newline when existing paragraphs are newline separated,
/// nothing otherwise.
pub fn paragraph_separator(content: &str, paragraphs: &[Paragraph]) -> &'static str {
    let newline_between = paragraphs
        .windows(2)
        .any(|pair| content[pair[0].span.end..pair[1].span.start].contains('\n'));
    if newline_between || (paragraphs.len() <= 1 && !BLOCK_OPEN.is_match(content)) {
        "\n"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_lines() {
        let content = "First line.\n\n  Second line.\r\nThird";
        let paragraphs = MarkupExtractor.paragraphs(content);
        let texts: Vec<_> = paragraphs.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["First line.", "Second line.", "Third"]);
        assert_eq!(paragraphs[1].raw(content), "  Second line.");
        assert_eq!(paragraphs[2].raw(content), "Third");
    }

    #[test]
    fn test_html_blocks() {
        let content = "<h1>Title</h1>\n<p>Hello <b>world</b> &amp; friends</p><ul><li>One</li><li>Two</li></ul>";
        let paragraphs = MarkupExtractor.paragraphs(content);
        let texts: Vec<_> = paragraphs.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["Title", "Hello world & friends", "One", "Two"]);
        assert_eq!(paragraphs[0].raw(content), "<h1>Title</h1>");
        assert_eq!(paragraphs[3].raw(content), "<li>Two</li>");
    }

    #[test]
    fn test_html_gap_text_is_kept() {
        let content = "<p>One</p> loose text <p>Two</p>";
        let texts: Vec<_> = MarkupExtractor
            .paragraphs(content)
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(texts, vec!["One", "loose text", "Two"]);
    }

    #[test]
    fn test_empty_blocks_skipped() {
        let content = "<p></p><p> <br> </p><p>Body</p>";
        let paragraphs = MarkupExtractor.paragraphs(content);
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].text, "Body");
    }

    #[test]
    fn test_sentence_split() {
        assert_eq!(
            split_sentences("Intro changed. Body text. Conclusion."),
            vec!["Intro changed.", "Body text.", "Conclusion."]
        );
        assert_eq!(
            split_sentences("Really?! Yes... it works"),
            vec!["Really?!", "Yes...", "it works"]
        );
    }

    #[test]
    fn test_sentence_split_abbreviations() {
        assert_eq!(
            split_sentences("Dr. Smith met J. Doe at 3.15 p.m. today. Then left."),
            vec!["Dr. Smith met J. Doe at 3.15 p.m. today.", "Then left."]
        );
        assert_eq!(
            split_sentences("Bring tools, e.g. hammers. Done."),
            vec!["Bring tools, e.g. hammers.", "Done."]
        );
    }

    #[test]
    fn test_units_by_granularity() {
        let content = "<p>One two. Three.</p><p>Four</p>";
        assert_eq!(units(&MarkupExtractor, content, Granularity::Paragraph).len(), 2);
        assert_eq!(
            units(&MarkupExtractor, content, Granularity::Sentence),
            vec!["One two.", "Three.", "Four"]
        );
        assert_eq!(units(&MarkupExtractor, content, Granularity::Word).len(), 4);
        assert!(units(&MarkupExtractor, "", Granularity::Word).is_empty());
    }

    #[test]
    fn test_paragraph_separator() {
        let plain = "a\nb";
        assert_eq!(paragraph_separator(plain, &MarkupExtractor.paragraphs(plain)), "\n");
        let html = "<p>a</p><p>b</p>";
        assert_eq!(paragraph_separator(html, &MarkupExtractor.paragraphs(html)), "");
    }
}
