//! Protocol script parser
//!
//! Scripts are parsed line by line with a PEST grammar. Every line is matched
//! against an ordered set of statement grammars (comment, import, stage call,
//! computation, condition, loop, assignment); the first one that consumes the
//! whole line wins. Blank lines produce nothing, and lines that match no
//! grammar are set aside in `Script::unrecognized` rather than failing the
//! parse.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::debug;

use crate::value::{strip_quotes, unescape_string_lit, Val, ValMap};

pub mod ast;
pub mod references;

pub use ast::{Node, NodeKind, Script};
pub use references::collect_references;


/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/script.pest"]
pub(crate) struct ScriptParser;

/* ===================== Public API ===================== */

/// Parse protocol script source into a `Script`.
///
/// Never fails: unrecognised lines are skipped and recorded.
pub fn parse_script(source: &str, protocol_name: &str) -> Script {
    let mut script = Script {
        protocol_name: protocol_name.to_string(),
        nodes: Vec::new(),
        variables: Default::default(),
        stage_calls: Vec::new(),
        dependency_map: Default::default(),
        unrecognized: Vec::new(),
        source: source.to_string(),
    };

    for (idx, raw) in source.lines().enumerate() {
        let line_number = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }

        match parse_line(raw, line_number) {
            Some(node) => record_node(&mut script, node),
            None => {
                debug!(line = line_number, "skipping unrecognized script line");
                script
                    .unrecognized
                    .push(Node::new(NodeKind::Unparsed, line_number, raw));
            }
        }
    }

    debug!(
        protocol = %script.protocol_name,
        nodes = script.nodes.len(),
        stage_calls = script.stage_calls.len(),
        "parsed protocol script"
    );

    script
}

/// Parse a single line into a node. `None` when no statement grammar matches.
pub fn parse_line(raw: &str, line_number: usize) -> Option<Node> {
    let mut pairs = ScriptParser::parse(Rule::line, raw).ok()?;
    let line = pairs.next()?;
    let statement = line.into_inner().find(|p| p.as_rule() != Rule::EOI)?;

    let node = match statement.as_rule() {
        Rule::comment => build_comment(statement, line_number, raw),
        Rule::import_stmt => build_import(statement, line_number, raw),
        Rule::stage_call => build_stage_call(statement, line_number, raw)?,
        Rule::computation => build_computation(statement, line_number, raw)?,
        Rule::condition => build_condition(statement, line_number, raw)?,
        Rule::loop_stmt => build_loop(statement, line_number, raw)?,
        Rule::assignment => build_assignment(statement, line_number, raw)?,
        _ => return None,
    };

    Some(node)
}

fn record_node(script: &mut Script, node: Node) {
    match node.kind {
        NodeKind::StageCall => {
            if let Some(output) = node.output() {
                script
                    .dependency_map
                    .insert(output.to_string(), node.dependencies.clone());
            }
            script.stage_calls.push(node.clone());
        }
        NodeKind::Assignment => {
            if let (Some(target), Some(value)) = (node.output(), node.fields.get("value")) {
                script.variables.insert(target.to_string(), value.clone());
            }
        }
        _ => {}
    }
    script.nodes.push(node);
}

/* ===================== Node Builders ===================== */

fn build_comment(pair: Pair<Rule>, line_number: usize, raw: &str) -> Node {
    let text = pair
        .into_inner()
        .next()
        .map(|p| p.as_str().trim())
        .unwrap_or("");
    Node::new(NodeKind::Comment, line_number, raw).with_field("text", text)
}

fn build_import(pair: Pair<Rule>, line_number: usize, raw: &str) -> Node {
    let mut module = String::new();
    let mut names: Vec<String> = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::module_path => module = inner.as_str().to_string(),
            Rule::import_names => {
                names.extend(inner.into_inner().map(|n| n.as_str().to_string()));
            }
            _ => {}
        }
    }

    // `import a.b` binds `a`; `from m import x, y` binds `x` and `y`
    let outputs: Vec<String> = if names.is_empty() {
        module
            .trim_start_matches('.')
            .split('.')
            .next()
            .map(|root| vec![root.to_string()])
            .unwrap_or_default()
    } else {
        names.iter().filter(|n| *n != "*").cloned().collect()
    };

    let mut node = Node::new(NodeKind::Import, line_number, raw)
        .with_field("module", module)
        .with_field(
            "names",
            Val::List(names.into_iter().map(Val::Str).collect()),
        );
    node.outputs = outputs;
    node
}

fn build_stage_call(pair: Pair<Rule>, line_number: usize, raw: &str) -> Option<Node> {
    let mut inner = pair.into_inner();
    let output = inner.next()?.as_str().to_string();
    let stage = unescape_string_lit(inner.next()?);

    let mut parameters = ValMap::new();
    let mut dependencies = vec![stage.clone()];

    for kwarg in inner.filter(|p| p.as_rule() == Rule::kwarg) {
        let mut kv = kwarg.into_inner();
        let key = kv.next()?.as_str().to_string();
        let text = kv.next()?.as_str().trim();

        let value = match Val::parse_literal(text) {
            Some(value) => value,
            None => {
                push_unique(&mut dependencies, collect_references(text));
                Val::Str(strip_quotes(text).to_string())
            }
        };
        parameters.insert(key, value);
    }

    let mut node = Node::new(NodeKind::StageCall, line_number, raw)
        .with_field("output", output.as_str())
        .with_field("stage", stage)
        .with_field("parameters", parameters);
    node.dependencies = dependencies;
    node.outputs = vec![output];
    Some(node)
}

fn build_computation(pair: Pair<Rule>, line_number: usize, raw: &str) -> Option<Node> {
    let mut inner = pair.into_inner();
    let output = inner.next()?.as_str().to_string();
    let expression = inner.next().map(|p| p.as_str().trim()).unwrap_or("");

    let mut node = Node::new(NodeKind::Computation, line_number, raw)
        .with_field("output", output.as_str())
        .with_field("expression", expression);
    node.dependencies = collect_references(expression);
    node.outputs = vec![output];
    Some(node)
}

fn build_condition(pair: Pair<Rule>, line_number: usize, raw: &str) -> Option<Node> {
    let keyword = if pair.as_str().starts_with("elif") {
        "elif"
    } else {
        "if"
    };
    let expression = pair.into_inner().next()?.as_str().trim();

    let mut node = Node::new(NodeKind::Condition, line_number, raw)
        .with_field("keyword", keyword)
        .with_field("expression", expression);
    node.dependencies = collect_references(expression);
    Some(node)
}

fn build_loop(pair: Pair<Rule>, line_number: usize, raw: &str) -> Option<Node> {
    let mut inner = pair.into_inner();
    let targets: Vec<String> = inner
        .next()?
        .as_str()
        .split(',')
        .map(|t| t.trim().to_string())
        .collect();
    let expression = inner.next()?.as_str().trim();

    let mut node = Node::new(NodeKind::Loop, line_number, raw)
        .with_field(
            "targets",
            Val::List(targets.iter().cloned().map(Val::Str).collect()),
        )
        .with_field("expression", expression);
    node.dependencies = collect_references(expression);
    node.outputs = targets;
    Some(node)
}

fn build_assignment(pair: Pair<Rule>, line_number: usize, raw: &str) -> Option<Node> {
    let mut inner = pair.into_inner();
    let target = inner.next()?.as_str().to_string();
    let expression = inner.next()?.as_str().trim();

    let value = Val::decode_argument(expression);
    let dependencies = match Val::parse_literal(expression) {
        Some(_) => Vec::new(),
        None => collect_references(expression),
    };

    let mut node = Node::new(NodeKind::Assignment, line_number, raw)
        .with_field("output", target.as_str())
        .with_field("expression", expression)
        .with_field("value", value);
    node.dependencies = dependencies;
    node.outputs = vec![target];
    Some(node)
}

fn push_unique(target: &mut Vec<String>, names: Vec<String>) {
    for name in names {
        if !target.contains(&name) {
            target.push(name);
        }
    }
}
