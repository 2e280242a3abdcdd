//! Result annotation of script source
//!
//! The source is walked once. Every original line is emitted unchanged,
//! terminator included; when a step was compiled from that line, a summary
//! line rendered from the step's annotation pattern is inserted directly
//! beneath it.

use std::collections::{BTreeMap, HashMap};

use crate::compiler::AnnotationEntry;
use crate::types::ExecutionResult;
use crate::value::Val;

/// Splice result summaries into `source`
pub fn annotate_script(
    source: &str,
    annotation_map: &BTreeMap<String, AnnotationEntry>,
    results: &[ExecutionResult],
) -> String {
    // Later results for a shadowed step id replace earlier ones
    let by_step: HashMap<&str, &ExecutionResult> =
        results.iter().map(|r| (r.step_id.as_str(), r)).collect();

    let mut by_line: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (step_id, entry) in annotation_map {
        if let Some(result) = by_step.get(step_id.as_str()) {
            let rendered = entry
                .pattern
                .replace("{var}", &entry.var)
                .replace("{result}", &summarize(result));
            by_line.entry(entry.line).or_default().push(rendered);
        }
    }

    // Original terminators are kept, inserted lines reuse their line's one
    let mut out = String::with_capacity(source.len());
    for (idx, chunk) in source.split_inclusive('\n').enumerate() {
        out.push_str(chunk);
        let Some(summaries) = by_line.get(&(idx + 1)) else {
            continue;
        };

        let line = chunk.trim_end_matches(['\r', '\n']);
        let eol = &chunk[line.len()..];
        let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
        for summary in summaries {
            if eol.is_empty() {
                out.push('\n');
                out.push_str(&indent);
                out.push_str(summary);
            } else {
                out.push_str(&indent);
                out.push_str(summary);
                out.push_str(eol);
            }
        }
    }
    out
}

/// Human-readable summary of a step result.
///
/// Successful results show `confidence`, `type`, `findings` and `duration`
/// when the stage output carries them; failures show the error.
pub fn summarize(result: &ExecutionResult) -> String {
    if let Some(error) = &result.error {
        return format!("{{error: {}}}", error);
    }

    let Some(value) = &result.value else {
        return "{}".to_string();
    };

    let mut parts: Vec<String> = Vec::new();

    if let Some(confidence) = value.get("confidence") {
        parts.push(format!("confidence: {}", format_number(confidence, 3)));
    }
    if let Some(kind) = value.get("type") {
        parts.push(format!("type: {}", kind));
    }
    if let Some(findings) = value.get("findings") {
        match findings {
            Val::List(items) => parts.push(format!("findings: {}", items.len())),
            other => parts.push(format!("findings: {}", other)),
        }
    }
    if let Some(duration) = value.get("duration") {
        parts.push(format!("duration: {}s", format_number(duration, 2)));
    }

    format!("{{{}}}", parts.join(", "))
}

fn format_number(val: &Val, precision: usize) -> String {
    match val {
        Val::Num(n) => format!("{:.*}", precision, n),
        other => other.to_string(),
    }
}
