//! Validation rules, one per file
//!
//! - `duplicate_output.rs` - two stage calls assign the same variable
//! - `undefined_reference.rs` - stage-call parameters naming nothing
//! - `unrecognized_line.rs` - lines no grammar matched
//! - `unknown_stage.rs` - stage names missing from the catalog

mod duplicate_output;
mod undefined_reference;
mod unknown_stage;
mod unrecognized_line;

pub use duplicate_output::DuplicateOutputRule;
pub use undefined_reference::UndefinedReferenceRule;
pub use unknown_stage::UnknownStageRule;
pub use unrecognized_line::UnrecognizedLineRule;
