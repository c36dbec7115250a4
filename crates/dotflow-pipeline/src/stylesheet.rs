//! CSS-like model configuration for workflow graphs.
//!
//! The `model_stylesheet` graph attribute holds rules such as
//! `box, .fast { model: gpt-5-mini; reasoning_effort: low }`. Selectors are
//! `*`, a bare shape name, `.class`, or `#id`. For every node and property
//! the value from the most specific matching selector wins; ties go to the
//! rule declared later. Explicitly authored node attributes are never
//! overwritten.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use dotflow_dot::{AttrValue, Graph, Node};
use regex::Regex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
    /// Position among accepted rules; later rules win specificity ties.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `*`
    Universal,
    /// A bare word, compared against the node's `shape`.
    Shape(String),
    /// `.class_name`
    Class(String),
    /// `#node_id`
    Id(String),
}

impl Selector {
    fn parse(raw: &str) -> Option<Self> {
        if raw == "*" {
            return Some(Selector::Universal);
        }
        if let Some(id) = raw.strip_prefix('#') {
            let id = id.trim();
            return (!id.is_empty()).then(|| Selector::Id(id.to_string()));
        }
        if let Some(class) = raw.strip_prefix('.') {
            let class = class.trim();
            return (!class.is_empty()).then(|| Selector::Class(class.to_string()));
        }
        Some(Selector::Shape(raw.to_string()))
    }

    pub fn specificity(&self) -> u8 {
        match self {
            Selector::Universal => 0,
            Selector::Shape(_) => 1,
            Selector::Class(_) => 2,
            Selector::Id(_) => 3,
        }
    }

    pub fn matches(&self, node_id: &str, shape: &str, classes: &[String]) -> bool {
        match self {
            Selector::Universal => true,
            Selector::Shape(s) => s == shape,
            Selector::Class(c) => classes.iter().any(|nc| nc == c),
            Selector::Id(id) => id == node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: AttrValue,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn rule_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^{}]+)\{([^{}]*)\}").expect("static regex"))
}

/// Parse stylesheet text. Parsing is lenient: rules without a usable
/// selector or without any declaration are dropped.
pub fn parse_stylesheet(input: &str) -> Stylesheet {
    let mut rules = Vec::new();

    for caps in rule_pattern().captures_iter(input) {
        let selector_part = caps[1].trim();
        let body_part = caps[2].trim();
        if selector_part.is_empty() || body_part.is_empty() {
            continue;
        }

        let selectors: Vec<Selector> = selector_part
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(Selector::parse)
            .collect();
        if selectors.is_empty() {
            continue;
        }

        let declarations = parse_declarations(body_part);
        if declarations.is_empty() {
            continue;
        }

        let order = rules.len();
        rules.push(Rule {
            selectors,
            declarations,
            order,
        });
    }

    Stylesheet { rules }
}

/// `key: value` or `key = value`, separated by `;`. `=` is checked first.
fn parse_declarations(body: &str) -> Vec<Declaration> {
    let mut declarations: Vec<Declaration> = Vec::new();
    for line in body.split(';').map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, raw)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            continue;
        };
        let (key, raw) = (key.trim(), raw.trim());
        if key.is_empty() || raw.is_empty() {
            continue;
        }

        let value = parse_value(raw);
        match declarations.iter_mut().find(|d| d.property == key) {
            Some(existing) => existing.value = value,
            None => declarations.push(Declaration {
                property: key.to_string(),
                value,
            }),
        }
    }
    declarations
}

fn parse_value(raw: &str) -> AttrValue {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return AttrValue::String(raw[1..raw.len() - 1].to_string());
    }
    AttrValue::from_bare(raw)
}

fn canonical_property(property: &str) -> &str {
    match property {
        "model" => "llm_model",
        "provider" => "llm_provider",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Resolve the cascade for one node without mutating it.
pub fn resolve_for_node(stylesheet: &Stylesheet, node: &Node) -> BTreeMap<String, AttrValue> {
    let shape = node.str_attr("shape").unwrap_or("box");
    let classes = node.classes();

    let mut resolved: BTreeMap<String, (AttrValue, u8, usize)> = BTreeMap::new();
    for rule in &stylesheet.rules {
        for selector in &rule.selectors {
            if !selector.matches(&node.id, shape, &classes) {
                continue;
            }
            let specificity = selector.specificity();
            for decl in &rule.declarations {
                let key = canonical_property(&decl.property);
                let wins = match resolved.get(key) {
                    None => true,
                    Some((_, s, o)) => {
                        specificity > *s || (specificity == *s && rule.order > *o)
                    }
                };
                if wins {
                    resolved.insert(key.to_string(), (decl.value.clone(), specificity, rule.order));
                }
            }
        }
    }

    resolved
        .into_iter()
        .map(|(key, (value, _, _))| (key, value))
        .collect()
}

/// Apply a stylesheet to every node of `graph`.
pub fn apply_stylesheet(graph: &mut Graph, stylesheet: &Stylesheet) {
    if stylesheet.rules.is_empty() {
        return;
    }
    for node in graph.nodes.values_mut() {
        for (key, value) in resolve_for_node(stylesheet, node) {
            if !node.set_inherited(&key, value) {
                tracing::trace!(node = %node.id, key = %key, "stylesheet skipped explicit attribute");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn str_value(node: &Node, key: &str) -> Option<String> {
        node.str_attr(key).map(String::from)
    }

    #[test]
    fn parse_selector_kinds() {
        let ss = parse_stylesheet("*, box, .fast, #review { llm_model: m; }");
        assert_eq!(ss.rules.len(), 1);
        assert_eq!(
            ss.rules[0].selectors,
            vec![
                Selector::Universal,
                Selector::Shape("box".into()),
                Selector::Class("fast".into()),
                Selector::Id("review".into()),
            ]
        );
    }

    #[test]
    fn parse_declaration_forms_and_values() {
        let ss = parse_stylesheet(
            r#"* { model = "gpt 5"; reasoning_effort: high; max_retries: 3; auto_status: true }"#,
        );
        let decls = &ss.rules[0].declarations;
        assert_eq!(decls[0].property, "model");
        assert_eq!(decls[0].value, AttrValue::String("gpt 5".into()));
        assert_eq!(decls[1].value, AttrValue::String("high".into()));
        assert_eq!(decls[2].value, AttrValue::Integer(3));
        assert_eq!(decls[3].value, AttrValue::Boolean(true));
    }

    #[test]
    fn parse_skips_unusable_rules() {
        let ss = parse_stylesheet("# { a: b } .x { } * { nothing } .ok { a: b }");
        assert_eq!(ss.rules.len(), 1);
        assert_eq!(ss.rules[0].selectors, vec![Selector::Class("ok".into())]);
        assert_eq!(ss.rules[0].order, 0);
        assert!(parse_stylesheet("   ").rules.is_empty());
    }

    #[test]
    fn specificity_ordering() {
        assert_eq!(Selector::Universal.specificity(), 0);
        assert_eq!(Selector::Shape("box".into()).specificity(), 1);
        assert_eq!(Selector::Class("x".into()).specificity(), 2);
        assert_eq!(Selector::Id("x".into()).specificity(), 3);
    }

    fn graph() -> Graph {
        dotflow_dot::parse(
            r#"digraph G {
                start [shape=Mdiamond]
                analyze [class="fast"]
                review [class="fast,careful", llm_model="pinned"]
                done [shape=Msquare]
                start -> analyze -> review -> done
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn higher_specificity_wins_regardless_of_order() {
        let mut g = graph();
        let ss = parse_stylesheet("#analyze { model: by-id } .fast { model: by-class } * { model: any }");
        apply_stylesheet(&mut g, &ss);
        assert_eq!(str_value(&g.nodes["analyze"], "llm_model").as_deref(), Some("by-id"));
        assert_eq!(str_value(&g.nodes["start"], "llm_model").as_deref(), Some("any"));
    }

    #[test]
    fn later_rule_wins_specificity_tie() {
        let mut g = graph();
        let ss = parse_stylesheet(".fast { provider: first } .careful { provider: second }");
        apply_stylesheet(&mut g, &ss);
        assert_eq!(str_value(&g.nodes["review"], "llm_provider").as_deref(), Some("second"));
        assert_eq!(str_value(&g.nodes["analyze"], "llm_provider").as_deref(), Some("first"));
    }

    #[test]
    fn shape_selector_uses_default_box() {
        let mut g = graph();
        let ss = parse_stylesheet("box { reasoning_effort: low } Msquare { reasoning_effort: none }");
        apply_stylesheet(&mut g, &ss);
        assert_eq!(str_value(&g.nodes["analyze"], "reasoning_effort").as_deref(), Some("low"));
        assert_eq!(str_value(&g.nodes["done"], "reasoning_effort").as_deref(), Some("none"));
        assert_eq!(g.nodes["start"].attr("reasoning_effort"), None);
    }

    #[test]
    fn explicit_attribute_is_never_overwritten() {
        let mut g = graph();
        let ss = parse_stylesheet("#review { model: from-sheet; reasoning_effort: high }");
        apply_stylesheet(&mut g, &ss);
        let review = &g.nodes["review"];
        assert_eq!(str_value(review, "llm_model").as_deref(), Some("pinned"));
        assert_eq!(str_value(review, "reasoning_effort").as_deref(), Some("high"));
    }

    #[test]
    fn aliases_resolve_to_canonical_keys() {
        let g = graph();
        let ss = parse_stylesheet("* { llm_model: long } #analyze { model: short }");
        let resolved = resolve_for_node(&ss, &g.nodes["analyze"]);
        assert_eq!(resolved.get("llm_model"), Some(&AttrValue::String("short".into())));
        assert!(!resolved.contains_key("model"));
    }
}
