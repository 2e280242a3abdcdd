//! Script diagnostics
//!
//! A rule-based lint pass that runs over a parsed `Script` and reports things
//! the line grammar and the compiler tolerate but an author probably did not
//! intend. Validation is advisory: it never changes what the parser or the
//! compiler produce.
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to `Validator::new()`

pub mod rules;

use crate::parser::Script;


/* ===================== Diagnostics ===================== */

/// A diagnostic produced by a validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// 1-indexed source line
    pub line: usize,
    pub message: String,
    pub severity: Severity,
    /// Which rule produced this diagnostic
    pub rule_id: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// The script will not compile in strict mode
    Error,
    /// Likely a mistake
    Warning,
    Hint,
}

impl ValidationError {
    pub fn error(line: usize, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self::new(line, message, Severity::Error, rule_id)
    }

    pub fn warning(line: usize, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self::new(line, message, Severity::Warning, rule_id)
    }

    pub fn hint(line: usize, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self::new(line, message, Severity::Hint, rule_id)
    }

    fn new(
        line: usize,
        message: impl Into<String>,
        severity: Severity,
        rule_id: &'static str,
    ) -> Self {
        Self {
            line,
            message: message.into(),
            severity,
            rule_id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Hint => "hint",
        };
        write!(
            f,
            "{} at line {}: {} [{}]",
            severity, self.line, self.message, self.rule_id
        )
    }
}

impl std::error::Error for ValidationError {}

/* ===================== Rules ===================== */

/// One independent check over a parsed script
pub trait ValidationRule: Send + Sync {
    /// Unique identifier, e.g. "duplicate-output"
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Return every issue found; empty means the script is clean
    fn validate(&self, script: &Script) -> Vec<ValidationError>;
}

/// Runs every built-in rule
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(rules::DuplicateOutputRule),
                Box::new(rules::UndefinedReferenceRule),
                Box::new(rules::UnrecognizedLineRule),
                Box::new(rules::UnknownStageRule),
            ],
        }
    }

    /// Diagnostics from all rules, ordered by line then severity
    pub fn validate(&self, script: &Script) -> Vec<ValidationError> {
        let mut found: Vec<ValidationError> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(script))
            .collect();
        found.sort_by_key(|e| (e.line, e.severity));
        found
    }

    /// `(id, description)` of each registered rule
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a script with the built-in rules
pub fn validate_script(script: &Script) -> Vec<ValidationError> {
    Validator::new().validate(script)
}

/// Whether any diagnostic is an error (not just a warning or hint)
pub fn has_errors(script: &Script) -> bool {
    validate_script(script).iter().any(ValidationError::is_error)
}
