//! Heuristic README digest: a summary paragraph, bullet-list features and a
//! handful of "cool facts". Deterministic and single pass over the text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static HTML_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>\n]*>").unwrap());
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static SENTENCE_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());
static FEATURE_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#{1,3}\s+(features|highlights|benefits)").unwrap());

const FACT_KEYWORDS: [&str; 8] = [
    "supports", "features", "provides", "enables", "allows", "built", "designed", "powered",
];

const MIN_SUMMARY_CHARS: usize = 50;
/// Bullet lines of this length or shorter, marker included, are noise.
const MIN_BULLET_LINE_CHARS: usize = 5;
const MIN_FACT_CHARS: usize = 20;
const MAX_FEATURES: usize = 4;
const MAX_SUMMARY_FACTS: usize = 3;
const MAX_SECTION_FACTS: usize = 2;
const MAX_FACTS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadmeDigest {
    pub summary: String,
    pub key_features: Vec<String>,
    pub cool_facts: Vec<String>,
}

pub fn summarize(markdown: &str) -> ReadmeDigest {
    let text = clean(markdown);
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let summary = pick_summary(&paragraphs);
    let key_features = extract_features(&text);

    let mut cool_facts: Vec<String> = SENTENCE_END_RE
        .split(&summary)
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_FACT_CHARS && mentions_keyword(s))
        .take(MAX_SUMMARY_FACTS)
        .map(String::from)
        .collect();
    cool_facts.extend(feature_section_facts(&text));
    let cool_facts = dedup(cool_facts).into_iter().take(MAX_FACTS).collect();

    ReadmeDigest {
        summary,
        key_features,
        cool_facts,
    }
}

/// Strip comments, fenced code, images, link syntax and HTML tags, then
/// normalise whitespace line by line.
pub fn clean(markdown: &str) -> String {
    let text = markdown.replace("\r\n", "\n");
    let text = HTML_COMMENT_RE.replace_all(&text, "");
    let text = CODE_FENCE_RE.replace_all(&text, "");
    let text = IMAGE_RE.replace_all(&text, "");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = HTML_TAG_RE.replace_all(&text, "");

    let lines: Vec<String> = text
        .lines()
        .map(|line| SPACES_RE.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    BLANK_LINES_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

fn pick_summary(paragraphs: &[&str]) -> String {
    let chosen = paragraphs
        .iter()
        .find(|p| !is_heading(p) && p.chars().count() > MIN_SUMMARY_CHARS && !has_table_or_code(p))
        .or_else(|| {
            paragraphs
                .iter()
                .find(|p| !is_heading(p) && !is_bullet_block(p) && !has_table_or_code(p))
        })
        .or_else(|| paragraphs.first());

    chosen
        .map(|p| p.lines().map(str::trim).collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn extract_features(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.trim().chars().count() > MIN_BULLET_LINE_CHARS)
        .filter_map(strip_bullet)
        .filter(|item| !item.is_empty() && !has_table_or_code(item))
        .take(MAX_FEATURES)
        .map(String::from)
        .collect()
}

/// Lines under a "Features", "Highlights" or "Benefits" heading.
fn feature_section_facts(text: &str) -> Vec<String> {
    let mut lines = text.lines().skip_while(|l| !FEATURE_HEADING_RE.is_match(l));
    if lines.next().is_none() {
        return Vec::new();
    }
    lines
        .take_while(|l| !is_heading(l))
        .map(|l| strip_bullet(l).unwrap_or(l).trim())
        .filter(|l| l.chars().count() > MIN_FACT_CHARS && !has_table_or_code(l))
        .take(MAX_SECTION_FACTS)
        .map(String::from)
        .collect()
}

fn strip_bullet(line: &str) -> Option<&str> {
    let line = line.trim_start();
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
}

fn is_heading(p: &str) -> bool {
    p.starts_with('#')
}

fn is_bullet_block(p: &str) -> bool {
    p.lines().all(|l| strip_bullet(l).is_some())
}

fn has_table_or_code(p: &str) -> bool {
    p.contains('|') || p.contains("```")
}

/// Case-sensitive: "Features a ..." at a sentence start is not a match.
fn mentions_keyword(sentence: &str) -> bool {
    FACT_KEYWORDS.iter().any(|k| sentence.contains(k))
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_readme() {
        let digest = summarize(
            "# Title\n\nThis library supports plugins and provides a CLI.\n\n- Fast\n- Small",
        );
        assert!(digest.summary.contains("supports plugins"), "summary: {}", digest.summary);
        assert_eq!(digest.key_features, vec!["Fast", "Small"]);
        assert!(
            digest.cool_facts.iter().any(|f| f.contains("supports plugins")),
            "facts: {:?}",
            digest.cool_facts
        );
    }

    #[test]
    fn test_clean_strips_markup() {
        let cleaned = clean(
            "<!-- badge -->\n<p align=\"center\">Hello</p>\n![logo](logo.png) See [the docs](https://x.y)   now",
        );
        assert_eq!(cleaned, "Hello\nSee the docs now");
    }

    #[test]
    fn test_summary_skips_headings_tables_and_code() {
        let md = "# Project\n\n\
                  | col | col |\n|-----|-----|\n| a much longer table row that is definitely over fifty chars | x |\n\n\
                  ```\nlet code = \"a fenced code block that is also quite long, over fifty\";\n```\n\n\
                  Project is a realtime database designed for edge deployments and offline sync.";
        let digest = summarize(md);
        assert_eq!(
            digest.summary,
            "Project is a realtime database designed for edge deployments and offline sync."
        );
        assert_eq!(digest.cool_facts.len(), 1);
    }

    #[test]
    fn test_summary_falls_back_to_first_paragraph() {
        let digest = summarize("# Only a heading\n\n- a\n- b");
        assert_eq!(digest.summary, "# Only a heading");
        assert!(digest.cool_facts.is_empty());
        assert_eq!(summarize("").summary, "");
    }

    #[test]
    fn test_multiline_paragraph_is_joined() {
        let digest = summarize("A fast tokenizer\nwritten in Rust that is powered by SIMD and arenas.");
        assert_eq!(
            digest.summary,
            "A fast tokenizer written in Rust that is powered by SIMD and arenas."
        );
    }

    #[test]
    fn test_features_capped_and_filtered() {
        let md = "Intro paragraph that is long enough to be chosen as the project summary here.\n\n\
                  - first\n* second\n- a | b\n- third\n- fourth\n- fifth";
        let digest = summarize(md);
        assert_eq!(digest.key_features, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_very_short_bullets_ignored() {
        let md = "Intro paragraph that is long enough to be chosen as the project summary here.\n\n\
                  - a\n- ok\n* ab\n- Plugin system";
        assert_eq!(summarize(md).key_features, vec!["Plugin system"]);
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        let digest =
            summarize("Features a blazing fast runtime with a tiny memory footprint overall.");
        assert!(digest.cool_facts.is_empty(), "facts: {:?}", digest.cool_facts);

        let digest =
            summarize("The runtime features a blazing fast scheduler with a tiny footprint.");
        assert_eq!(
            digest.cool_facts,
            vec!["The runtime features a blazing fast scheduler with a tiny footprint"]
        );
    }

    #[test]
    fn test_short_prose_after_title_is_preferred_over_heading() {
        let digest = summarize("# Title\n\nShort intro.\n\n- first\n- second");
        assert_eq!(digest.summary, "Short intro.");
        assert_eq!(digest.key_features, vec!["first", "second"]);
    }

    #[test]
    fn test_bullets_inside_code_fences_ignored() {
        let md = "Summary paragraph comfortably longer than fifty characters in total.\n\n\
                  ```diff\n- removed line\n+ added line\n```\n\n- real feature";
        assert_eq!(summarize(md).key_features, vec!["real feature"]);
    }

    #[test]
    fn test_feature_section_facts_and_cap() {
        let md = "Tool supports many formats. It provides streaming APIs. It enables zero-copy parsing. \
                  It allows custom hooks.\n\n\
                  ## Features\n\n\
                  - Incremental compilation across crates\n\
                  - Supports many formats\n\
                  - Hot reloading of configuration files\n\n\
                  ## Install\n\n\
                  - Run the installer script from the release page";
        let digest = summarize(md);
        assert_eq!(
            digest.cool_facts,
            vec![
                "Tool supports many formats",
                "It provides streaming APIs",
                "It enables zero-copy parsing",
                "Incremental compilation across crates",
            ]
        );
    }

    #[test]
    fn test_facts_deduplicated() {
        let md = "This crate provides async bindings for the library. It is neat.\n\n\
                  # Highlights\n\n\
                  This crate provides async bindings for the library\n\
                  Built on top of tokio and hyper for speed";
        let digest = summarize(md);
        assert_eq!(
            digest.cool_facts,
            vec![
                "This crate provides async bindings for the library",
                "Built on top of tokio and hyper for speed",
            ]
        );
    }
}
