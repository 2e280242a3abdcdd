//! Rule: Undefined Reference
//!
//! Reports a warning when a stage-call parameter references a name that no
//! statement in the script defines. The compiler drops such references, so
//! the step runs without waiting on anything for that parameter.
//!
//! ```text
//! # Warning: 'draft' is never defined
//! review = stage_call("evaluator", target=draft)
//! ```

use std::collections::HashSet;

use crate::parser::Script;

use super::super::{ValidationError, ValidationRule};

pub struct UndefinedReferenceRule;

impl ValidationRule for UndefinedReferenceRule {
    fn id(&self) -> &'static str {
        "undefined-reference"
    }

    fn description(&self) -> &'static str {
        "Stage-call parameters should reference defined names"
    }

    fn validate(&self, script: &Script) -> Vec<ValidationError> {
        let defined: HashSet<&str> = script.defined_names().collect();

        script
            .stage_calls
            .iter()
            .flat_map(|node| {
                node.references()
                    .filter(|name| !defined.contains(name))
                    .map(|name| {
                        ValidationError::warning(
                            node.line_number,
                            format!("'{}' is not defined anywhere in the script", name),
                            self.id(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
