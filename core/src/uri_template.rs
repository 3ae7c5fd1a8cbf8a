//! RFC 6570 URI templates, the subset resource URIs use in practice.
//!
//! Recognizes `{var}` (single path segment) and `{+var}` (reserved expansion,
//! may span segments). Supports expansion, deterministic example generation
//! for conflict reports, and overlap classification between two templates.

use std::collections::HashMap;

use regex::Regex;

/// How the value sets of two URI templates relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    None,
    ACoversB,
    BCoversA,
    Intersecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable { name: String, reserved: bool },
}

fn parse(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, after_open) = rest.split_at(open);
        literal.push_str(before);
        match after_open[1..].find('}') {
            Some(close) => {
                let body = &after_open[1..1 + close];
                let (name, reserved) = match body.strip_prefix('+') {
                    Some(name) => (name, true),
                    None => (body, false),
                };
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    // Not a variable expression; keep the braces literally.
                    literal.push_str(&after_open[..close + 2]);
                } else {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable {
                        name: name.to_string(),
                        reserved,
                    });
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated brace: treat the remainder as literal text.
                literal.push_str(after_open);
                rest = "";
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Whether a URI contains at least one template variable.
pub fn is_template(uri: &str) -> bool {
    parse(uri)
        .iter()
        .any(|s| matches!(s, Segment::Variable { .. }))
}

/// Variable names in listing order.
pub fn variables(template: &str) -> Vec<String> {
    parse(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Variable { name, .. } => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Expand a template with the given variable values. Variables without a
/// value keep their placeholder.
pub fn expand(template: &str, vars: &HashMap<String, String>) -> String {
    parse(template)
        .into_iter()
        .map(|segment| match segment {
            Segment::Literal(text) => text,
            Segment::Variable { name, reserved } => match vars.get(&name) {
                Some(value) => value.clone(),
                None if reserved => format!("{{+{name}}}"),
                None => format!("{{{name}}}"),
            },
        })
        .collect()
}

fn sample_value(index: usize) -> String {
    match index {
        0 => "example".to_string(),
        1 => "ex".to_string(),
        n => format!("ex{n}"),
    }
}

/// Expand with deterministic sample values ("example", "ex", "ex2", ...),
/// used to produce concrete URIs in conflict reports.
pub fn example_uri(template: &str) -> String {
    let vars: HashMap<String, String> = variables(template)
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, sample_value(i)))
        .collect();
    expand(template, &vars)
}

fn to_regex(template: &str) -> Regex {
    let mut pattern = String::from("^");
    for segment in parse(template) {
        match segment {
            Segment::Literal(text) => pattern.push_str(&regex::escape(&text)),
            Segment::Variable { reserved: true, .. } => pattern.push_str(".+"),
            Segment::Variable { reserved: false, .. } => pattern.push_str("[^/]+"),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("template regex from escaped segments")
}

/// Whether a concrete URI is in the template's value set. A literal
/// "template" matches only itself.
pub fn matches(template: &str, uri: &str) -> bool {
    to_regex(template).is_match(uri)
}

/// Classify the relationship between two URIs, either of which may be a
/// template. Template-template comparison probes each side's example
/// expansion against the other's pattern.
pub fn overlap(a: &str, b: &str) -> Overlap {
    match (is_template(a), is_template(b)) {
        (false, false) => {
            if a == b {
                Overlap::Intersecting
            } else {
                Overlap::None
            }
        }
        (true, false) => {
            if matches(a, b) {
                Overlap::ACoversB
            } else {
                Overlap::None
            }
        }
        (false, true) => {
            if matches(b, a) {
                Overlap::BCoversA
            } else {
                Overlap::None
            }
        }
        (true, true) => {
            let a_covers = matches(a, &example_uri(b));
            let b_covers = matches(b, &example_uri(a));
            match (a_covers, b_covers) {
                (true, true) => Overlap::Intersecting,
                (true, false) => Overlap::ACoversB,
                (false, true) => Overlap::BCoversA,
                (false, false) => Overlap::None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_template() {
        assert!(is_template("file:///logs/{date}"));
        assert!(is_template("http://h/{+path}"));
        assert!(!is_template("file:///logs/today"));
        assert!(!is_template("weird://{}/literal-braces"));
    }

    #[test]
    fn test_variables_in_order() {
        assert_eq!(
            variables("x://{a}/{b}/end/{+rest}"),
            vec!["a".to_string(), "b".to_string(), "rest".to_string()]
        );
    }

    #[test]
    fn test_expand() {
        let mut vars = HashMap::new();
        vars.insert("date".to_string(), "2024-01-01".to_string());
        assert_eq!(
            expand("file:///logs/{date}/app.log", &vars),
            "file:///logs/2024-01-01/app.log"
        );
        // Missing variables keep their placeholder.
        assert_eq!(expand("x://{a}/{b}", &vars), "x://{a}/{b}");
    }

    #[test]
    fn test_example_uri_deterministic() {
        assert_eq!(example_uri("x://{a}"), "x://example");
        assert_eq!(example_uri("x://{a}/{b}"), "x://example/ex");
        assert_eq!(example_uri("x://{a}/{b}/{c}"), "x://example/ex/ex2");
        assert_eq!(example_uri("x://{a}"), example_uri("x://{a}"));
    }

    #[test]
    fn test_matches_single_segment() {
        assert!(matches("file:///logs/{date}", "file:///logs/2024-01-01"));
        assert!(!matches("file:///logs/{date}", "file:///logs/2024/app.log"));
    }

    #[test]
    fn test_matches_reserved_spans_segments() {
        assert!(matches("file:///{+path}", "file:///a/b/c.txt"));
    }

    #[test]
    fn test_overlap_literals() {
        assert_eq!(overlap("x://a", "x://a"), Overlap::Intersecting);
        assert_eq!(overlap("x://a", "x://b"), Overlap::None);
    }

    #[test]
    fn test_overlap_template_vs_literal() {
        assert_eq!(overlap("x://{v}", "x://a"), Overlap::ACoversB);
        assert_eq!(overlap("x://a", "x://{v}"), Overlap::BCoversA);
        assert_eq!(overlap("x://{v}", "y://a"), Overlap::None);
    }

    #[test]
    fn test_overlap_template_vs_template() {
        assert_eq!(overlap("x://{a}/z", "x://{b}/z"), Overlap::Intersecting);
        assert_eq!(overlap("x://{a}", "y://{b}"), Overlap::None);
        // Reserved expansion swallows the narrower template's examples.
        assert_eq!(overlap("x://{+rest}", "x://a/{v}"), Overlap::ACoversB);
    }
}
