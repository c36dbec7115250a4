use std::collections::BTreeSet;

use winnow::ascii::multispace0;
use winnow::combinator::opt;
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::any;
use winnow::{ModalResult, Parser};

use dotflow_types::DotflowError;

use crate::ast::*;

/// Characters that end a bare word.
const SYMBOLS: &[char] = &['{', '}', '[', ']', ',', ';', '=', '"'];

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

/// Blank out `//` line comments and `/* */` block comments, leaving string
/// literals intact. Comment bytes become spaces (newlines are kept) so byte
/// offsets into the result are valid offsets into `input`.
pub(crate) fn strip_comments(input: &str) -> String {
    #[derive(PartialEq)]
    enum Mode {
        Code,
        Str { escaped: bool },
        Line,
        Block,
    }

    let mut out = String::with_capacity(input.len());
    let mut mode = Mode::Code;
    let mut chars = input.chars().peekable();

    let blank = |out: &mut String, c: char| {
        if c == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        }
    };

    while let Some(c) = chars.next() {
        match mode {
            Mode::Code => match (c, chars.peek()) {
                ('/', Some('/')) => {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::Line;
                }
                ('/', Some('*')) => {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::Block;
                }
                _ => {
                    if c == '"' {
                        mode = Mode::Str { escaped: false };
                    }
                    out.push(c);
                }
            },
            Mode::Str { escaped } => {
                out.push(c);
                mode = if escaped {
                    Mode::Str { escaped: false }
                } else if c == '\\' {
                    Mode::Str { escaped: true }
                } else if c == '"' {
                    Mode::Code
                } else {
                    Mode::Str { escaped: false }
                };
            }
            Mode::Line => {
                if c == '\n' {
                    mode = Mode::Code;
                }
                blank(&mut out, c);
            }
            Mode::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    mode = Mode::Code;
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }
    out
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// A run of characters up to whitespace, a symbol, or `->`.
fn bare_word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let mut end = input.len();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        let arrow = c == '-' && matches!(chars.peek(), Some((_, '>')));
        if c.is_whitespace() || SYMBOLS.contains(&c) || arrow {
            end = idx;
            break;
        }
    }
    if end == 0 {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    let (word, rest) = input.split_at(end);
    *input = rest;
    Ok(word)
}

/// Parse a double-quoted string, decoding `\n`, `\t`, `\"`, and `\\`.
/// Any other escaped character stands for itself.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = opt(any)
            .parse_next(input)?
            .ok_or_else(|| make_cut_error("closing '\"' of string literal"))?;
        match c {
            '"' => break,
            '\\' => {
                let esc = opt(any)
                    .parse_next(input)?
                    .ok_or_else(|| make_cut_error("escaped character"))?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    other => s.push(other),
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// A word or quoted string used as an identifier or key.
fn name(input: &mut &str) -> ModalResult<String> {
    if input.starts_with('"') {
        quoted_string.parse_next(input)
    } else {
        bare_word.map(String::from).parse_next(input)
    }
}

fn attr_value(input: &mut &str) -> ModalResult<AttrValue> {
    if input.starts_with('"') {
        quoted_string.map(AttrValue::String).parse_next(input)
    } else {
        bare_word.map(AttrValue::from_bare).parse_next(input)
    }
}

fn is_node_id(id: &str) -> bool {
    let mut chars = id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A node identifier matching `[A-Za-z_][A-Za-z0-9_]*`. On failure the input
/// is rewound to the offending token so the error points at it.
fn node_id(input: &mut &str) -> ModalResult<String> {
    let start = *input;
    let id = name
        .context(StrContext::Expected(StrContextValue::Description(
            "node identifier",
        )))
        .parse_next(input)?;
    if !is_node_id(&id) {
        *input = start;
        return Err(make_cut_error(
            "node identifier matching [A-Za-z_][A-Za-z0-9_]*",
        ));
    }
    Ok(id)
}

type AttrList = Vec<(String, AttrValue)>;

/// Parse a single attribute: key '=' value.
fn attr(input: &mut &str) -> ModalResult<(String, AttrValue)> {
    let key = name.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = '='
        .context(StrContext::Expected(StrContextValue::CharLiteral('=')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let _ = ws.parse_next(input)?;
    let value = attr_value
        .context(StrContext::Expected(StrContextValue::Description(
            "attribute value",
        )))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    Ok((key, value))
}

/// Parse an attribute block: '[' ( attr ( [,;]? attr )* )? ']'
fn attr_block(input: &mut &str) -> ModalResult<AttrList> {
    let _ = '['.parse_next(input)?;
    let _ = ws.parse_next(input)?;

    let mut attrs = Vec::new();
    while !input.starts_with(']') {
        attrs.push(attr.parse_next(input)?);
        let _ = ws.parse_next(input)?;
        if input.starts_with(',') || input.starts_with(';') {
            *input = &input[1..];
            let _ = ws.parse_next(input)?;
        }
        if input.is_empty() {
            break;
        }
    }

    let _ = ']'
        .context(StrContext::Expected(StrContextValue::CharLiteral(']')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    Ok(attrs)
}

/// Zero or more consecutive attribute blocks, merged left to right.
fn attr_blocks(input: &mut &str) -> ModalResult<AttrList> {
    let mut merged = Vec::new();
    loop {
        let _ = ws.parse_next(input)?;
        if !input.starts_with('[') {
            return Ok(merged);
        }
        merged.extend(attr_block.parse_next(input)?);
    }
}

/// Intermediate representation of a parsed statement, before it is applied
/// to the graph.
#[derive(Debug)]
enum Statement {
    GraphAttrs(AttrList),
    NodeDefaults(AttrList),
    EdgeDefaults(AttrList),
    AttrDecl(String, AttrValue),
    Subgraph(Vec<Statement>),
    Node(String, AttrList),
    Edge(Vec<String>, AttrList),
}

/// Parse 'subgraph' name? '{' statement* '}' (keyword already consumed).
fn subgraph_body(input: &mut &str) -> ModalResult<Statement> {
    let _ = ws.parse_next(input)?;
    if !input.starts_with('{') {
        let _ = name
            .context(StrContext::Expected(StrContextValue::Description(
                "subgraph identifier or '{'",
            )))
            .parse_next(input)
            .map_err(ErrMode::cut)?;
        let _ = ws.parse_next(input)?;
    }
    let _ = '{'
        .context(StrContext::Expected(StrContextValue::CharLiteral('{')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let stmts = statements.parse_next(input)?;
    let _ = '}'
        .context(StrContext::Expected(StrContextValue::CharLiteral('}')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    Ok(Statement::Subgraph(stmts))
}

/// Parse `key = value`, `ID [attrs]`, or `ID -> ID (-> ID)* [attrs]`.
fn node_or_edge_stmt(input: &mut &str) -> ModalResult<Statement> {
    let start = *input;
    let first = name
        .context(StrContext::Expected(StrContextValue::Description(
            "statement",
        )))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let _ = ws.parse_next(input)?;

    if input.starts_with('=') {
        *input = &input[1..];
        let _ = ws.parse_next(input)?;
        let value = attr_value
            .context(StrContext::Expected(StrContextValue::Description(
                "attribute value",
            )))
            .parse_next(input)
            .map_err(ErrMode::cut)?;
        return Ok(Statement::AttrDecl(first, value));
    }

    if !is_node_id(&first) {
        *input = start;
        return Err(make_cut_error(
            "node identifier matching [A-Za-z_][A-Za-z0-9_]*",
        ));
    }

    if input.starts_with("--") {
        return Err(make_cut_error(
            "'->' (undirected edges are not supported)",
        ));
    }

    let mut chain = vec![first];
    while input.starts_with("->") {
        *input = &input[2..];
        let _ = ws.parse_next(input)?;
        chain.push(node_id.parse_next(input).map_err(ErrMode::cut)?);
        let _ = ws.parse_next(input)?;
    }

    let attrs = attr_blocks.parse_next(input)?;
    if chain.len() == 1 {
        let id = chain.pop().unwrap_or_default();
        Ok(Statement::Node(id, attrs))
    } else {
        Ok(Statement::Edge(chain, attrs))
    }
}

/// Parse a single statement.
fn statement(input: &mut &str) -> ModalResult<Statement> {
    let checkpoint = *input;
    if let Ok(word) = bare_word.parse_next(input) {
        match word {
            "graph" => return attr_blocks.map(Statement::GraphAttrs).parse_next(input),
            "node" => return attr_blocks.map(Statement::NodeDefaults).parse_next(input),
            "edge" => return attr_blocks.map(Statement::EdgeDefaults).parse_next(input),
            "subgraph" => return subgraph_body.parse_next(input),
            _ => {}
        }
    }
    *input = checkpoint;
    node_or_edge_stmt.parse_next(input)
}

/// Parse statements up to (not including) a closing '}' or end of input.
fn statements(input: &mut &str) -> ModalResult<Vec<Statement>> {
    let mut stmts = Vec::new();
    loop {
        let _ = ws.parse_next(input)?;
        if input.is_empty() || input.starts_with('}') {
            break;
        }
        if input.starts_with(';') {
            *input = &input[1..];
            continue;
        }
        stmts.push(statement.parse_next(input)?);
    }
    Ok(stmts)
}

/// Top-level parser: 'digraph' ID '{' statements '}'.
fn parse_digraph(input: &mut &str) -> ModalResult<(String, Vec<Statement>)> {
    let _ = ws.parse_next(input)?;

    let start = *input;
    let keyword = opt(bare_word).parse_next(input)?;
    match keyword {
        Some("digraph") => {}
        Some("strict") => {
            *input = start;
            return Err(make_cut_error(
                "'digraph' keyword (strict graphs are not supported)",
            ));
        }
        Some("graph") => {
            *input = start;
            return Err(make_cut_error(
                "'digraph' keyword (undirected graphs are not supported)",
            ));
        }
        _ => {
            *input = start;
            return Err(make_cut_error("'digraph' at start"));
        }
    }

    let _ = ws.parse_next(input)?;
    let id = name
        .context(StrContext::Expected(StrContextValue::Description(
            "graph identifier after 'digraph'",
        )))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let _ = ws.parse_next(input)?;
    let _ = '{'
        .context(StrContext::Expected(StrContextValue::CharLiteral('{')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let stmts = statements.parse_next(input)?;
    let _ = '}'
        .context(StrContext::Expected(StrContextValue::CharLiteral('}')))
        .parse_next(input)
        .map_err(ErrMode::cut)?;
    let _ = ws.parse_next(input)?;
    if !input.is_empty() {
        return Err(make_cut_error("end of input after the closing '}'"));
    }
    Ok((id, stmts))
}

// ---------------------------------------------------------------------------
// Statement application
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Scope {
    node_defaults: Attrs,
    edge_defaults: Attrs,
}

/// Attributes and node ids gathered while inside a subgraph.
#[derive(Default)]
struct Capture {
    attrs: Attrs,
    node_ids: BTreeSet<String>,
}

struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    fn apply(&mut self, stmts: Vec<Statement>, scope: &mut Scope, mut capture: Option<&mut Capture>) {
        for stmt in stmts {
            match stmt {
                Statement::GraphAttrs(attrs) => {
                    let target = match capture.as_deref_mut() {
                        Some(c) => &mut c.attrs,
                        None => &mut self.graph.attrs,
                    };
                    target.extend(attrs);
                }
                Statement::AttrDecl(key, value) => {
                    let target = match capture.as_deref_mut() {
                        Some(c) => &mut c.attrs,
                        None => &mut self.graph.attrs,
                    };
                    target.insert(key, value);
                }
                Statement::NodeDefaults(attrs) => scope.node_defaults.extend(attrs),
                Statement::EdgeDefaults(attrs) => scope.edge_defaults.extend(attrs),
                Statement::Node(id, attrs) => {
                    self.upsert_node(&id, &scope.node_defaults, attrs);
                    if let Some(c) = capture.as_deref_mut() {
                        c.node_ids.insert(id);
                    }
                }
                Statement::Edge(chain, attrs) => {
                    let mut edge_attrs = scope.edge_defaults.clone();
                    edge_attrs.extend(attrs);
                    for pair in chain.windows(2) {
                        let (from, to) = (&pair[0], &pair[1]);
                        let id = format!("{}->{}#{}", from, to, self.graph.edges.len() + 1);
                        self.graph.edges.push(Edge {
                            id,
                            from: from.clone(),
                            to: to.clone(),
                            attrs: edge_attrs.clone(),
                        });
                        self.upsert_node(from, &scope.node_defaults, Vec::new());
                        self.upsert_node(to, &scope.node_defaults, Vec::new());
                        if let Some(c) = capture.as_deref_mut() {
                            c.node_ids.insert(from.clone());
                            c.node_ids.insert(to.clone());
                        }
                    }
                }
                Statement::Subgraph(inner) => {
                    let mut child_scope = scope.clone();
                    let mut child = Capture::default();
                    self.apply(inner, &mut child_scope, Some(&mut child));

                    if let Some(label) = child.attrs.get("label").and_then(AttrValue::as_str) {
                        let class = derive_class_name(label);
                        if !class.is_empty() {
                            let classes = [class];
                            for id in &child.node_ids {
                                if let Some(node) = self.graph.nodes.get_mut(id) {
                                    node.add_classes(&classes);
                                }
                            }
                        }
                    }

                    if let Some(parent) = capture.as_deref_mut() {
                        parent.node_ids.extend(child.node_ids);
                    }
                }
            }
        }
    }

    /// Create or update a node. Defaults only fill keys that are still unset;
    /// authored attributes overwrite and are recorded as explicit.
    fn upsert_node(&mut self, id: &str, defaults: &Attrs, attrs: AttrList) {
        let node = self
            .graph
            .nodes
            .entry(id.to_string())
            .or_insert_with(|| Node::new(id));
        for (key, value) in defaults {
            node.attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (key, value) in attrs {
            node.set_explicit(key, value);
        }
    }

    /// Nodes without a `shape` become boxes; nodes without a `label` use their id.
    fn finish(mut self) -> Graph {
        for node in self.graph.nodes.values_mut() {
            let missing = |v: Option<&AttrValue>| !matches!(v, Some(AttrValue::String(s)) if !s.is_empty());
            if missing(node.attrs.get("shape")) {
                node.attrs.insert("shape".into(), AttrValue::from("box"));
            }
            if missing(node.attrs.get("label")) {
                let label = AttrValue::String(node.id.clone());
                node.attrs.insert("label".into(), label);
            }
        }
        self.graph
    }
}

/// Lowercase, turn every run of non-alphanumerics into a single `-`, and trim
/// dashes from both ends: `"Build & Test"` becomes `build-test`.
pub fn derive_class_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Compute 1-based (line, col) of a byte offset.
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let prefix = source.get(..offset).unwrap_or(source);
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => prefix[pos + 1..].chars().count() + 1,
        None => prefix.chars().count() + 1,
    };
    (line, col)
}

fn describe(err: &ContextError<StrContext>) -> String {
    let expected: Vec<String> = err
        .context()
        .filter_map(|c| match c {
            StrContext::Expected(value) => Some(value.to_string()),
            _ => None,
        })
        .collect();
    if expected.is_empty() {
        "unexpected input".to_string()
    } else {
        format!("expected {}", expected.join(", "))
    }
}

/// Public entry point.
pub fn parse(input: &str) -> std::result::Result<Graph, DotflowError> {
    let stripped = strip_comments(input);
    let mut remaining = stripped.as_str();

    let (id, stmts) = parse_digraph.parse_next(&mut remaining).map_err(|e| {
        let offset = stripped.len() - remaining.len();
        let (line, col) = offset_to_line_col(input, offset);
        let message = match &e {
            ErrMode::Backtrack(inner) | ErrMode::Cut(inner) => describe(inner),
            ErrMode::Incomplete(_) => "unexpected end of input".to_string(),
        };

        let snippet = remaining.trim_start().chars().take(40).collect::<String>();
        let source_snippet = if snippet.is_empty() {
            None
        } else {
            Some(snippet)
        };

        DotflowError::ParseError {
            line,
            col,
            message,
            source_snippet,
        }
    })?;

    let mut builder = GraphBuilder {
        graph: Graph::new(id),
    };
    builder.apply(stmts, &mut Scope::default(), None);
    let graph = builder.finish();
    tracing::debug!(
        graph = %graph.id,
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "Parsed graph"
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_comments_preserves_offsets() {
        let src = "a // note\nb /* x\ny */ c \"// kept\"";
        let out = strip_comments(src);
        assert_eq!(out.len(), src.len());
        assert_eq!(out.lines().count(), src.lines().count());
        assert!(out.contains("\"// kept\""));
        assert!(!out.contains("note"));
        assert!(out.ends_with("c \"// kept\""));
    }

    #[test]
    fn strip_comments_handles_escaped_quotes() {
        let src = r#"x="a \" // not a comment" // gone"#;
        let out = strip_comments(src);
        assert!(out.contains("not a comment"));
        assert!(!out.contains("gone"));
    }

    #[test]
    fn bare_word_stops_at_arrow_and_symbols() {
        let mut input = "abc->def";
        assert_eq!(bare_word(&mut input).unwrap(), "abc");
        assert_eq!(input, "->def");

        let mut input = "box]";
        assert_eq!(bare_word(&mut input).unwrap(), "box");
        assert_eq!(input, "]");

        let mut input = "-1,";
        assert_eq!(bare_word(&mut input).unwrap(), "-1");
    }

    #[test]
    fn derive_class_name_normalises_labels() {
        assert_eq!(derive_class_name("Build & Test"), "build-test");
        assert_eq!(derive_class_name("  Review Phase  "), "review-phase");
        assert_eq!(derive_class_name("--Loop--"), "loop");
        assert_eq!(derive_class_name("!!!"), "");
    }

    #[test]
    fn line_col_is_one_based() {
        assert_eq!(offset_to_line_col("ab\ncd", 0), (1, 1));
        assert_eq!(offset_to_line_col("ab\ncd", 4), (2, 2));
    }
}
