//! Rule: Duplicate Output
//!
//! Reports an error when a stage call assigns a variable an earlier stage
//! call already assigned. Both calls become steps with the same id, and the
//! later one shadows the earlier in the dependency graph and annotation map.

use std::collections::HashMap;

use crate::parser::Script;

use super::super::{ValidationError, ValidationRule};

pub struct DuplicateOutputRule;

impl ValidationRule for DuplicateOutputRule {
    fn id(&self) -> &'static str {
        "duplicate-output"
    }

    fn description(&self) -> &'static str {
        "Each stage call should assign a distinct variable"
    }

    fn validate(&self, script: &Script) -> Vec<ValidationError> {
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut errors = Vec::new();

        for node in &script.stage_calls {
            let Some(output) = node.output() else {
                continue;
            };
            match first_seen.get(output) {
                Some(first_line) => errors.push(ValidationError::error(
                    node.line_number,
                    format!(
                        "'{}' is already assigned by the stage call on line {}",
                        output, first_line
                    ),
                    self.id(),
                )),
                None => {
                    first_seen.insert(output, node.line_number);
                }
            }
        }

        errors
    }
}
