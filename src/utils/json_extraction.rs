//! JSON extraction utilities for parsing model replies.
//!
//! Generation replies are expected to carry a JSON array of records, but the
//! array is often wrapped in prose, markdown fences or reasoning text. The
//! helpers here locate the array region and clean it up before parsing.
//!
//! # Example
//!
//! ```
//! use mm_forge::utils::json_extraction::extract_json_array;
//!
//! let reply = "Sure! Here you go:\n[{\"Q\": \"What color?\", \"A\": \"Red\"}]\nDone.";
//! let json = extract_json_array(reply).unwrap();
//! assert!(json.starts_with('[') && json.ends_with(']'));
//! ```

use regex::Regex;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_brackets} unclosed brackets. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_brackets: usize,
    },
    #[error("No JSON array found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Analysis result for JSON structure
#[derive(Debug, Clone, PartialEq)]
struct JsonStructureAnalysis {
    /// Number of unclosed braces ('{' without matching '}')
    pub unclosed_braces: usize,
    /// Number of unclosed brackets ('[' without matching ']')
    pub unclosed_brackets: usize,
    /// Whether we ended inside a string literal
    pub in_string: bool,
}

/// Scans `s` tracking brace/bracket depth outside string literals.
fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_depth += 1,
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => bracket_depth += 1,
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
    }
}

/// Locate the first bracketed array region in a reply.
///
/// The region runs from the first `[` to the last `]`, spanning newlines.
/// A reply that opens an array but never closes it is reported as
/// truncated rather than not found.
pub fn extract_json_array(content: &str) -> Result<String, JsonExtractionError> {
    let re = Regex::new(r"(?s)\[.*\]").map_err(|_| JsonExtractionError::NotFound {
        content_preview: preview(content, 50),
    })?;

    if let Some(m) = re.find(content) {
        return Ok(m.as_str().to_string());
    }

    if let Some(start) = content.find('[') {
        let partial = &content[start..];
        let analysis = analyze_json_structure(partial);
        return Err(JsonExtractionError::Truncated {
            partial_preview: preview(partial, 100),
            unclosed_brackets: analysis.unclosed_brackets.max(1),
        });
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(content.trim(), 50),
    })
}

/// Double every literal backslash so it survives JSON parsing.
///
/// Models often echo Windows paths or LaTeX (`C:\data`, `\frac`, `\nabla`)
/// inside string values, where `\f` or `\n` would otherwise decode to control
/// characters. Only `\\`, `\"` and `\uXXXX` are kept as escapes.
pub fn escape_stray_backslashes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('"' | '\\') => {
                out.push('\\');
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u') if is_unicode_escape(&chars[i + 2..]) => {
                out.push('\\');
                out.push('u');
                i += 2;
            }
            _ => {
                out.push_str("\\\\");
                i += 1;
            }
        }
    }

    out
}

fn is_unicode_escape(rest: &[char]) -> bool {
    rest.len() >= 4 && rest[..4].iter().all(|c| c.is_ascii_hexdigit())
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
