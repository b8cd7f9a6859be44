//! Output parsers for LLM completions
//!
//! Two parsers cover every chain in the engine: [`CleanOutputParser`] strips
//! reasoning scratchpads and markup, [`JsonStructOutputParser`] additionally
//! extracts a single well-formed JSON object from a noisy completion.

use crate::core::{FinsightError, Result};
use regex::Regex;

/// Transforms a raw completion into the form a chain hands to its caller
pub trait OutputParser: Send + Sync {
    /// Parse the completion text
    fn parse(&self, text: &str) -> Result<String>;
}

/// Strips `<think>…</think>` spans and markup tags, then normalizes whitespace.
///
/// Idempotent: `parse(parse(x)) == parse(x)`. Tag removal only matches spans
/// that open with a letter, so spaced SQL comparisons (`a < b AND b > c`)
/// survive.
#[derive(Debug, Clone)]
pub struct CleanOutputParser {
    think: Regex,
    tags: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

impl CleanOutputParser {
    /// Build the parser, compiling its patterns
    pub fn new() -> Result<Self> {
        Ok(Self {
            think: Regex::new(r"(?s)<think>.*?</think>")?,
            tags: Regex::new(r"</?[A-Za-z][^>]*>")?,
            spaces: Regex::new(r"[ \t]+")?,
            blank_lines: Regex::new(r"\n{3,}")?,
        })
    }
}

impl OutputParser for CleanOutputParser {
    fn parse(&self, text: &str) -> Result<String> {
        let text = self.think.replace_all(text, "");
        let text = self.tags.replace_all(&text, "");
        let text = self.spaces.replace_all(&text, " ");
        let text = self.blank_lines.replace_all(&text, "\n\n");
        Ok(text.trim().to_string())
    }
}

/// Extracts the first maximal brace-balanced `{…}` substring from a completion.
///
/// Code-fence markers (any ```` ```lang ```` wrapper) and markup are stripped
/// first. Fails with `parse_error` when no balanced object exists.
#[derive(Debug, Clone)]
pub struct JsonStructOutputParser {
    clean: CleanOutputParser,
    fences: Regex,
}

impl JsonStructOutputParser {
    /// Build the parser, compiling its patterns
    pub fn new() -> Result<Self> {
        Ok(Self {
            clean: CleanOutputParser::new()?,
            fences: Regex::new(r"```[ \t]*[A-Za-z0-9]*")?,
        })
    }
}

impl OutputParser for JsonStructOutputParser {
    fn parse(&self, text: &str) -> Result<String> {
        let text = self.clean.parse(text)?;
        let text = self.fences.replace_all(&text, "");
        extract_balanced(&text, '{', '}').ok_or_else(|| FinsightError::Parse {
            message: "no brace-balanced JSON object in completion".to_string(),
        })
    }
}

/// First maximal bracket-balanced `[…]` substring, used for plan arrays
pub fn extract_json_array(text: &str) -> Option<String> {
    extract_balanced(text, '[', ']')
}

/// Scan for the first balanced `open…close` span, honoring JSON string
/// literals and escapes so delimiters inside strings do not count.
fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            },
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_strips_think_spans() {
        let parser = CleanOutputParser::new().unwrap();
        let out = parser
            .parse("<think>let me reason\nabout this</think>The answer is 42.")
            .unwrap();
        assert_eq!(out, "The answer is 42.");
    }

    #[test]
    fn test_clean_strips_tags_and_collapses_whitespace() {
        let parser = CleanOutputParser::new().unwrap();
        let out = parser.parse("  <b>hello</b>   world \t again  ").unwrap();
        assert_eq!(out, "hello world again");
    }

    #[test]
    fn test_clean_preserves_spaced_comparisons() {
        let parser = CleanOutputParser::new().unwrap();
        let out = parser.parse("WHERE a < b AND b > c").unwrap();
        assert_eq!(out, "WHERE a < b AND b > c");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let parser = CleanOutputParser::new().unwrap();
        let samples = [
            "<think>x</think> plain  text\n\n\n\nmore",
            "already clean",
            "<<b>>nested",
            "a < b AND b > c",
        ];
        for sample in samples {
            let once = parser.parse(sample).unwrap();
            let twice = parser.parse(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_json_struct_extracts_fenced_object() {
        let parser = JsonStructOutputParser::new().unwrap();
        let out = parser.parse("``` json\n{\"a\":1}\n``` ").unwrap();
        assert_eq!(out, "{\"a\":1}");
    }

    #[test]
    fn test_json_struct_ignores_braces_in_strings() {
        let parser = JsonStructOutputParser::new().unwrap();
        let out = parser
            .parse("noise {\"sql\": \"SELECT '{'\", \"n\": 1} trailing")
            .unwrap();
        assert_eq!(out, "{\"sql\": \"SELECT '{'\", \"n\": 1}");
        assert!(serde_json::from_str::<serde_json::Value>(&out).is_ok());
    }

    #[test]
    fn test_json_struct_fails_without_object() {
        let parser = JsonStructOutputParser::new().unwrap();
        let err = parser.parse("no json here").unwrap_err();
        assert!(matches!(err, FinsightError::Parse { .. }));
    }

    #[test]
    fn test_extract_json_array() {
        let out = extract_json_array("plan: [\"q1\", \"q2\"] done").unwrap();
        let parsed: Vec<String> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, vec!["q1", "q2"]);

        assert!(extract_json_array("nothing").is_none());
    }

    #[test]
    fn test_extract_balanced_handles_nesting() {
        let out = extract_balanced("x {\"a\": {\"b\": 2}} y {\"c\": 3}", '{', '}').unwrap();
        assert_eq!(out, "{\"a\": {\"b\": 2}}");
    }
}
