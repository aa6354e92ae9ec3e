//! Pulling code fragments and inline submissions out of model responses

use lazy_static::lazy_static;
use regex::Regex;

/// Literal that marks an explicit final answer.
pub const SUBMIT_MARKER: &str = "SUBMIT";

lazy_static! {
    static ref FRAGMENT: Regex =
        Regex::new(r"(?s)```(?:python|repl)\n(.*?)```").expect("fragment pattern is valid");
    static ref INLINE_SUBMISSION: Regex =
        Regex::new(r#"(?s)SUBMIT\(["']?(.*?)["']?\)"#).expect("submission pattern is valid");
}

/// First ```` ```python ```` or ```` ```repl ```` block, trimmed.
///
/// The fence tag is case-sensitive and must be followed directly by a newline.
pub fn extract_fragment(text: &str) -> Option<String> {
    FRAGMENT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Argument of the first `SUBMIT(...)` written as plain text.
///
/// Quotes around the value are optional and it may span lines.
pub fn extract_inline_submission(text: &str) -> Option<String> {
    if !text.contains(SUBMIT_MARKER) {
        return None;
    }
    INLINE_SUBMISSION
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_fence() {
        let text = "Let me look.\n```python\nprint(len(context))\n```\nthen more";
        assert_eq!(extract_fragment(text).as_deref(), Some("print(len(context))"));
    }

    #[test]
    fn test_repl_fence_and_first_match_only() {
        let text = "```repl\nx = 1\n```\n```python\ny = 2\n```";
        assert_eq!(extract_fragment(text).as_deref(), Some("x = 1"));
    }

    #[test]
    fn test_fence_tag_is_case_sensitive() {
        assert!(extract_fragment("```Python\nx = 1\n```").is_none());
        assert!(extract_fragment("```\nx = 1\n```").is_none());
    }

    #[test]
    fn test_multiline_fragment_trimmed() {
        let text = "```python\n\nfor i in range(2):\n    print(i)\n\n```";
        assert_eq!(
            extract_fragment(text).as_deref(),
            Some("for i in range(2):\n    print(i)")
        );
    }

    #[test]
    fn test_inline_submission_quoted() {
        assert_eq!(
            extract_inline_submission(r#"The result is SUBMIT("inline answer")"#).as_deref(),
            Some("inline answer")
        );
        assert_eq!(
            extract_inline_submission("SUBMIT('single')").as_deref(),
            Some("single")
        );
    }

    #[test]
    fn test_inline_submission_unquoted_multiline() {
        assert_eq!(
            extract_inline_submission("SUBMIT(line one\nline two)").as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn test_marker_without_call() {
        assert!(extract_inline_submission("I will SUBMIT soon").is_none());
        assert!(extract_inline_submission("no marker here").is_none());
    }
}
