//! Rule: Unrecognized Line
//!
//! Warns about non-blank lines that matched no statement grammar. The parser
//! skips them silently, which usually hides a typo in a stage call.

use crate::parser::Script;

use super::super::{ValidationError, ValidationRule};

/// Longest excerpt of the offending line quoted in the message
const EXCERPT_LEN: usize = 40;

pub struct UnrecognizedLineRule;

impl ValidationRule for UnrecognizedLineRule {
    fn id(&self) -> &'static str {
        "unrecognized-line"
    }

    fn description(&self) -> &'static str {
        "Every non-blank line should be a recognised statement"
    }

    fn validate(&self, script: &Script) -> Vec<ValidationError> {
        script
            .unrecognized
            .iter()
            .map(|node| {
                let text = node.raw_text.trim();
                let excerpt: String = text.chars().take(EXCERPT_LEN).collect();
                let ellipsis = if text.chars().count() > EXCERPT_LEN { "..." } else { "" };
                ValidationError::warning(
                    node.line_number,
                    format!("line is not a recognised statement: `{}{}`", excerpt, ellipsis),
                    self.id(),
                )
            })
            .collect()
    }
}
