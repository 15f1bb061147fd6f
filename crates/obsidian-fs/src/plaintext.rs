//! Markdown to plain text.
//!
//! Reduces a note to low-noise prose for the graph's extraction pass. This is
//! deliberately lossy: links keep their label, headers keep their text,
//! fenced code disappears entirely. The text is never interpreted further.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::frontmatter::split_frontmatter;

static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^\)]+\)").unwrap());
static ATX_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s+").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^\*]+)\*\*").unwrap());
static STAR_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^\*]+)\*").unwrap());
static UNDERSCORE_ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([^_]+)_").unwrap());
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[^`]*```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Strip frontmatter and markdown syntax, leaving readable prose.
pub fn extract_plain_text(raw: &str) -> String {
    let (_, body) = split_frontmatter(raw);

    // Wiki links: prefer the alias when `[[target|label]]`, else the target.
    let text = WIKI_LINK.replace_all(body, |caps: &regex::Captures<'_>| {
        let inner = &caps[1];
        match inner.rsplit_once('|') {
            Some((_, label)) => label.to_string(),
            None => inner.to_string(),
        }
    });
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = ATX_HEADER.replace_all(&text, "");
    let text = BOLD.replace_all(&text, "$1");
    let text = STAR_ITALIC.replace_all(&text, "$1");
    let text = UNDERSCORE_ITALIC.replace_all(&text, "$1");
    let text = CODE_FENCE.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_frontmatter() {
        let raw = "---\ntitle: T\n---\nHello world";
        assert_eq!(extract_plain_text(raw), "Hello world");
    }

    #[test]
    fn wiki_links_keep_label_or_target() {
        assert_eq!(extract_plain_text("see [[Other Note]]"), "see Other Note");
        assert_eq!(extract_plain_text("see [[path/Note|the note]]"), "see the note");
    }

    #[test]
    fn markdown_links_keep_text() {
        assert_eq!(extract_plain_text("read [docs](https://example.com)"), "read docs");
    }

    #[test]
    fn headers_lose_their_hashes() {
        assert_eq!(extract_plain_text("# Title\n## Sub\nbody"), "Title\nSub\nbody");
    }

    #[test]
    fn emphasis_is_unwrapped() {
        assert_eq!(extract_plain_text("**bold** and *it* and _em_"), "bold and it and em");
    }

    #[test]
    fn code_is_removed_or_unwrapped() {
        assert_eq!(extract_plain_text("before\n```rust\nfn x() {}\n```\nafter"), "before\n\nafter");
        assert_eq!(extract_plain_text("call `foo()` now"), "call foo() now");
    }

    #[test]
    fn html_tags_vanish() {
        assert_eq!(extract_plain_text("a <b>bold</b> move"), "a bold move");
    }

    #[test]
    fn blank_runs_collapse() {
        assert_eq!(extract_plain_text("a\n\n\n\nb"), "a\n\nb");
    }
}
