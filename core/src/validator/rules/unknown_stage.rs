//! Rule: Unknown Stage
//!
//! Hints when a stage call names a stage the catalog does not know. Such
//! steps get default resource estimates, and they fail at run time unless a
//! stage is registered under that exact name.

use crate::compiler::catalog;
use crate::parser::Script;

use super::super::{ValidationError, ValidationRule};

pub struct UnknownStageRule;

impl ValidationRule for UnknownStageRule {
    fn id(&self) -> &'static str {
        "unknown-stage"
    }

    fn description(&self) -> &'static str {
        "Stage names should match a catalogued stage or alias"
    }

    fn validate(&self, script: &Script) -> Vec<ValidationError> {
        script
            .stage_calls
            .iter()
            .filter_map(|node| {
                let stage = node.stage_name()?;
                (!catalog::is_known(stage)).then(|| {
                    ValidationError::hint(
                        node.line_number,
                        format!("stage '{}' is not in the stage catalog", stage),
                        self.id(),
                    )
                })
            })
            .collect()
    }
}
