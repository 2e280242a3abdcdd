//! Variable reference scanning for expression text
//!
//! Expressions are never evaluated, so references are recovered lexically:
//! identifiers outside string literals that are not attribute names, call
//! names, keyword-argument names or language keywords.

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "lambda", "None", "True", "False",
    "null", "true", "false",
];

/// Collect referenced variable names in first-seen order, without duplicates
pub fn collect_references(expr: &str) -> Vec<String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut refs: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '"' || ch == '\'' {
            i = skip_string(&chars, i);
            continue;
        }

        if ch.is_ascii_digit() {
            // Numbers, including suffixes like `1e5` or `2x`
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();

            let after_dot = prev_non_space(&chars, start) == Some('.');
            let next = next_non_space(&chars, i);
            let is_call = next == Some('(');
            let is_kwarg = next == Some('=') && next_non_space(&chars, skip_spaces(&chars, i) + 1) != Some('=');

            if !after_dot
                && !is_call
                && !is_kwarg
                && !KEYWORDS.contains(&name.as_str())
                && !refs.contains(&name)
            {
                refs.push(name);
            }
            continue;
        }

        i += 1;
    }

    refs
}

fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn skip_spaces(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn next_non_space(chars: &[char], i: usize) -> Option<char> {
    chars.get(skip_spaces(chars, i)).copied()
}

fn prev_non_space(chars: &[char], i: usize) -> Option<char> {
    chars[..i].iter().rev().find(|c| !c.is_whitespace()).copied()
}
