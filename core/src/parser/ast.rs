//! Script node types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::{Val, ValMap};

/// Statement kind recognised on a script line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    StageCall,
    Computation,
    Assignment,
    Condition,
    Loop,
    Comment,
    Import,
    /// Non-blank line that matched no statement grammar
    Unparsed,
}

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// 1-indexed source line
    pub line_number: usize,
    pub raw_text: String,
    pub fields: ValMap,
    pub dependencies: Vec<String>,
    pub outputs: Vec<String>,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, line_number: usize, raw_text: &str) -> Self {
        Self {
            kind,
            line_number,
            raw_text: raw_text.to_string(),
            fields: ValMap::new(),
            dependencies: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub(crate) fn with_field(mut self, key: &str, value: impl Into<Val>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Val::as_str)
    }

    /// Stage name of a stage-call node
    pub fn stage_name(&self) -> Option<&str> {
        self.str_field("stage")
    }

    /// Variable assigned by this node, if any
    pub fn output(&self) -> Option<&str> {
        self.str_field("output")
    }

    /// Keyword parameters of a stage-call node
    pub fn parameters(&self) -> Option<&ValMap> {
        self.fields.get("parameters").and_then(Val::as_obj)
    }

    /// Expression text of computation, assignment, condition and loop nodes
    pub fn expression(&self) -> Option<&str> {
        self.str_field("expression")
    }

    /// Names referenced by this node's parameters or expression, excluding
    /// the stage-name dependency signal of stage-call nodes.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        let stage = self.stage_name();
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(move |dep| Some(*dep) != stage)
    }
}

/// A parsed protocol script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub protocol_name: String,
    /// Recognised statements in source order
    pub nodes: Vec<Node>,
    /// Generic assignments: variable name to decoded value
    pub variables: BTreeMap<String, Val>,
    /// Stage-call nodes in source order
    pub stage_calls: Vec<Node>,
    /// Stage-call output variable to the names it depends on
    pub dependency_map: BTreeMap<String, Vec<String>>,
    /// Non-blank lines that matched no statement grammar
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecognized: Vec<Node>,
    pub source: String,
}

impl Script {
    /// Every name some statement defines (stage outputs, assignments,
    /// computations, loop targets and imports).
    pub fn defined_names(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .flat_map(|node| node.outputs.iter().map(String::as_str))
    }
}
