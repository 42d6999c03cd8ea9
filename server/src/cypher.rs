//! Restricted Cypher subset: parser → planner → executor.
//!
//! Grammar:
//!   MATCH <pattern>(, <pattern>)* [WHERE <cond> ((AND|OR) <cond>)*]
//!   [RETURN [DISTINCT] <item>(, <item>)* [ORDER BY <col> [ASC|DESC]] [LIMIT n]]
//!
//! Patterns: `(v:Label {k: "v"})-[r:T1|T2 *min..max]->(w)`. Relationship
//! variable, label, and `*min..max` are optional; the default is exactly one
//! hop. Variable-length steps delegate to BFS and do not bind edges.
//!
//! WHERE joins conditions with AND by default; a single OR anywhere switches
//! the whole filter to OR. That mixed-operator behavior is intentional and
//! preserved as-is. Results are hard-capped at 200 rows after aggregation;
//! callers needing large totals use the structured search instead.

use std::collections::HashMap;

use crate::store::Store;
use crate::traverse;
use crate::types::*;

/// Executor guard against exploding cartesian products.
const BINDING_CAP: usize = 100_000;
/// Default bounds for a bare `*` variable-length step.
const VAR_LENGTH_DEFAULT_MAX: u32 = 5;

// ---------------------------------------------------------------------------
// Result shape
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Row count before the LIMIT/row-cap truncation.
    pub total: usize,
}

/// Parse and run a query against one project.
pub fn execute_query(
    store: &Store,
    project: &str,
    query: &str,
    cancel: &CancelToken,
) -> Result<QueryResult> {
    let tokens = tokenize(query)?;
    let ast = Parser::new(tokens).parse()?;
    let plan = plan(&ast)?;
    let bindings = execute(store, project, &plan, cancel)?;
    project_rows(&ast, bindings)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    DotDot,
    Pipe,
    Star,
    Dash,
    Lt,
    Gt,
    Eq,
    Neq,
    Le,
    Ge,
    RegexMatch,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Dash);
                i += 1;
            }
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '<' => {
                match chars.get(i + 1) {
                    Some('>') => {
                        tokens.push(Token::Neq);
                        i += 2;
                    }
                    Some('=') => {
                        tokens.push(Token::Le);
                        i += 2;
                    }
                    _ => {
                        tokens.push(Token::Lt);
                        i += 1;
                    }
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'~') {
                    tokens.push(Token::RegexMatch);
                    i += 2;
                } else {
                    tokens.push(Token::Eq);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    value.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(GraphError::invalid("unterminated string literal"));
                }
                i += 1; // closing quote
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // Decimal point, but not the `..` of a range
                if i < chars.len() && chars[i] == '.' && chars.get(i + 1) != Some(&'.') {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| GraphError::invalid(format!("bad number: {text}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(GraphError::invalid(format!("unexpected character: {other}")));
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NodePattern {
    var: String,
    label: Option<String>,
    props: Vec<(String, serde_json::Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelDirection {
    Out,
    In,
    Any,
}

#[derive(Debug, Clone)]
struct RelPattern {
    var: Option<String>,
    types: Vec<String>,
    direction: RelDirection,
    min_hops: u32,
    max_hops: u32,
    var_length: bool,
}

#[derive(Debug, Clone)]
struct PatternPart {
    start: NodePattern,
    chain: Vec<(RelPattern, NodePattern)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Neq,
    Gt,
    Lt,
    Ge,
    Le,
    Regex,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone)]
struct Condition {
    var: String,
    prop: String,
    op: CmpOp,
    value: serde_json::Value,
    negated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhereOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
enum ReturnItem {
    Var { var: String, alias: Option<String> },
    Prop { var: String, prop: String, alias: Option<String> },
    Count { var: String, alias: Option<String> },
}

impl ReturnItem {
    fn column_name(&self) -> String {
        match self {
            ReturnItem::Var { var, alias } => alias.clone().unwrap_or_else(|| var.clone()),
            ReturnItem::Prop { var, prop, alias } => {
                alias.clone().unwrap_or_else(|| format!("{var}.{prop}"))
            }
            ReturnItem::Count { var, alias } => {
                alias.clone().unwrap_or_else(|| format!("COUNT({var})"))
            }
        }
    }
}

#[derive(Debug)]
struct Query {
    patterns: Vec<PatternPart>,
    conditions: Vec<Condition>,
    where_op: WhereOp,
    return_items: Vec<ReturnItem>,
    distinct: bool,
    order_by: Option<(String, bool)>, // (column, ascending)
    limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    anon_counter: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, anon_counter: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(GraphError::invalid(format!("expected {token:?}, got {other:?}"))),
        }
    }

    /// Case-insensitive keyword check without consuming.
    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn fresh_var(&mut self) -> String {
        self.anon_counter += 1;
        format!("_anon{}", self.anon_counter)
    }

    fn parse(mut self) -> Result<Query> {
        if !self.eat_keyword("MATCH") {
            return Err(GraphError::invalid("query must start with MATCH"));
        }

        let mut patterns = vec![self.parse_pattern()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            if self.eat_keyword("MATCH") {
                // tolerate `MATCH a, MATCH b` style
            }
            patterns.push(self.parse_pattern()?);
        }
        while self.eat_keyword("MATCH") {
            patterns.push(self.parse_pattern()?);
        }

        let (conditions, where_op) = if self.eat_keyword("WHERE") {
            self.parse_where()?
        } else {
            (Vec::new(), WhereOp::And)
        };

        let mut return_items = Vec::new();
        let mut distinct = false;
        let mut order_by = None;
        let mut limit = None;

        if self.eat_keyword("RETURN") {
            distinct = self.eat_keyword("DISTINCT");
            return_items.push(self.parse_return_item()?);
            while matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
                return_items.push(self.parse_return_item()?);
            }
        }
        if self.eat_keyword("ORDER") {
            if !self.eat_keyword("BY") {
                return Err(GraphError::invalid("expected BY after ORDER"));
            }
            let column = self.parse_order_column()?;
            let ascending = if self.eat_keyword("DESC") {
                false
            } else {
                self.eat_keyword("ASC");
                true
            };
            order_by = Some((column, ascending));
        }
        if self.eat_keyword("LIMIT") {
            match self.next() {
                Some(Token::Num(n)) if n >= 0.0 => limit = Some(n as usize),
                other => {
                    return Err(GraphError::invalid(format!("expected LIMIT count, got {other:?}")))
                }
            }
        }

        if let Some(extra) = self.peek() {
            return Err(GraphError::invalid(format!("unexpected trailing token: {extra:?}")));
        }

        Ok(Query {
            patterns,
            conditions,
            where_op,
            return_items,
            distinct,
            order_by,
            limit,
        })
    }

    fn parse_pattern(&mut self) -> Result<PatternPart> {
        let start = self.parse_node_pattern()?;
        let mut chain = Vec::new();
        loop {
            let direction_in = match self.peek() {
                Some(Token::Dash) => false,
                Some(Token::Lt) => true,
                _ => break,
            };
            self.pos += 1;
            if direction_in {
                self.expect(Token::Dash)?;
            }
            let mut rel = self.parse_rel_pattern()?;
            self.expect(Token::Dash)?;
            let outgoing = matches!(self.peek(), Some(Token::Gt));
            if outgoing {
                self.pos += 1;
            }
            rel.direction = match (direction_in, outgoing) {
                (true, false) => RelDirection::In,
                (false, true) => RelDirection::Out,
                (false, false) => RelDirection::Any,
                (true, true) => {
                    return Err(GraphError::invalid("relationship cannot point both ways"))
                }
            };
            let node = self.parse_node_pattern()?;
            chain.push((rel, node));
        }
        Ok(PatternPart { start, chain })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(Token::LParen)?;
        let var = match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                name
            }
            _ => self.fresh_var(),
        };
        let label = if matches!(self.peek(), Some(Token::Colon)) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(label)) => Some(label),
                other => {
                    return Err(GraphError::invalid(format!("expected label, got {other:?}")))
                }
            }
        } else {
            None
        };
        let props = if matches!(self.peek(), Some(Token::LBrace)) {
            self.parse_props()?
        } else {
            Vec::new()
        };
        self.expect(Token::RParen)?;
        Ok(NodePattern { var, label, props })
    }

    fn parse_props(&mut self) -> Result<Vec<(String, serde_json::Value)>> {
        self.expect(Token::LBrace)?;
        let mut props = Vec::new();
        loop {
            let key = match self.next() {
                Some(Token::Ident(key)) => key,
                Some(Token::RBrace) if props.is_empty() => return Ok(props),
                other => {
                    return Err(GraphError::invalid(format!("expected property key, got {other:?}")))
                }
            };
            self.expect(Token::Colon)?;
            let value = self.parse_value()?;
            props.push((key, value));
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => break,
                other => {
                    return Err(GraphError::invalid(format!("expected , or }}, got {other:?}")))
                }
            }
        }
        Ok(props)
    }

    fn parse_value(&mut self) -> Result<serde_json::Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(serde_json::json!(s)),
            Some(Token::Num(n)) => Ok(serde_json::json!(n)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => {
                Ok(serde_json::json!(true))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(serde_json::json!(false))
            }
            other => Err(GraphError::invalid(format!("expected literal value, got {other:?}"))),
        }
    }

    fn parse_rel_pattern(&mut self) -> Result<RelPattern> {
        self.expect(Token::LBracket)?;
        let mut rel = RelPattern {
            var: None,
            types: Vec::new(),
            direction: RelDirection::Any,
            min_hops: 1,
            max_hops: 1,
            var_length: false,
        };
        if let Some(Token::Ident(name)) = self.peek() {
            rel.var = Some(name.clone());
            self.pos += 1;
        }
        if matches!(self.peek(), Some(Token::Colon)) {
            self.pos += 1;
            loop {
                match self.next() {
                    Some(Token::Ident(t)) => rel.types.push(t),
                    other => {
                        return Err(GraphError::invalid(format!(
                            "expected relationship type, got {other:?}"
                        )))
                    }
                }
                if matches!(self.peek(), Some(Token::Pipe)) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some(Token::Star)) {
            self.pos += 1;
            rel.var_length = true;
            rel.min_hops = 1;
            rel.max_hops = VAR_LENGTH_DEFAULT_MAX;
            if let Some(Token::Num(n)) = self.peek() {
                rel.min_hops = *n as u32;
                rel.max_hops = rel.min_hops;
                self.pos += 1;
            }
            if matches!(self.peek(), Some(Token::DotDot)) {
                self.pos += 1;
                rel.max_hops = VAR_LENGTH_DEFAULT_MAX;
                if let Some(Token::Num(n)) = self.peek() {
                    rel.max_hops = *n as u32;
                    self.pos += 1;
                }
            }
            if rel.min_hops > rel.max_hops {
                return Err(GraphError::invalid("variable-length range is inverted"));
            }
        }
        self.expect(Token::RBracket)?;
        Ok(rel)
    }

    fn parse_where(&mut self) -> Result<(Vec<Condition>, WhereOp)> {
        let mut conditions = vec![self.parse_condition()?];
        let mut op = WhereOp::And;
        loop {
            if self.eat_keyword("AND") {
                conditions.push(self.parse_condition()?);
            } else if self.eat_keyword("OR") {
                // AND is the default join; one OR flips the whole filter.
                op = WhereOp::Or;
                conditions.push(self.parse_condition()?);
            } else {
                break;
            }
        }
        Ok((conditions, op))
    }

    fn parse_condition(&mut self) -> Result<Condition> {
        let negated = self.eat_keyword("NOT");
        let var = match self.next() {
            Some(Token::Ident(v)) => v,
            other => return Err(GraphError::invalid(format!("expected variable, got {other:?}"))),
        };
        self.expect(Token::Dot)?;
        let prop = match self.next() {
            Some(Token::Ident(p)) => p,
            other => return Err(GraphError::invalid(format!("expected property, got {other:?}"))),
        };
        let op = match self.next() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Neq) => CmpOp::Neq,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::RegexMatch) => CmpOp::Regex,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("CONTAINS") => CmpOp::Contains,
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("STARTS") => {
                if !self.eat_keyword("WITH") {
                    return Err(GraphError::invalid("expected WITH after STARTS"));
                }
                CmpOp::StartsWith
            }
            other => return Err(GraphError::invalid(format!("expected operator, got {other:?}"))),
        };
        let value = self.parse_value()?;
        Ok(Condition { var, prop, op, value, negated })
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem> {
        let first = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(GraphError::invalid(format!("expected return item, got {other:?}")))
            }
        };
        let mut item = if first.eq_ignore_ascii_case("COUNT") {
            self.expect(Token::LParen)?;
            let var = match self.next() {
                Some(Token::Ident(v)) => v,
                Some(Token::Star) => "*".to_string(),
                other => {
                    return Err(GraphError::invalid(format!("expected COUNT arg, got {other:?}")))
                }
            };
            // tolerate COUNT(v.prop)
            if matches!(self.peek(), Some(Token::Dot)) {
                self.pos += 1;
                self.next();
            }
            self.expect(Token::RParen)?;
            ReturnItem::Count { var, alias: None }
        } else if matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            let prop = match self.next() {
                Some(Token::Ident(p)) => p,
                other => {
                    return Err(GraphError::invalid(format!("expected property, got {other:?}")))
                }
            };
            ReturnItem::Prop { var: first, prop, alias: None }
        } else {
            ReturnItem::Var { var: first, alias: None }
        };

        if self.eat_keyword("AS") {
            let alias = match self.next() {
                Some(Token::Ident(a)) => a,
                other => return Err(GraphError::invalid(format!("expected alias, got {other:?}"))),
            };
            match &mut item {
                ReturnItem::Var { alias: slot, .. }
                | ReturnItem::Prop { alias: slot, .. }
                | ReturnItem::Count { alias: slot, .. } => *slot = Some(alias),
            }
        }
        Ok(item)
    }

    fn parse_order_column(&mut self) -> Result<String> {
        let first = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(GraphError::invalid(format!("expected ORDER BY column, got {other:?}")))
            }
        };
        if matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(prop)) => Ok(format!("{first}.{prop}")),
                other => Err(GraphError::invalid(format!("expected property, got {other:?}"))),
            }
        } else {
            Ok(first)
        }
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum PlanOp {
    ScanNodes {
        variable: String,
        label: Option<String>,
        props: Vec<(String, serde_json::Value)>,
    },
    ExpandRelationship {
        from_var: String,
        rel_var: Option<String>,
        edge_types: Vec<EdgeType>,
        direction: RelDirection,
        min_hops: u32,
        max_hops: u32,
        var_length: bool,
        to_var: String,
        to_label: Option<String>,
        to_props: Vec<(String, serde_json::Value)>,
    },
    FilterWhere {
        conditions: Vec<Condition>,
        operator: WhereOp,
    },
}

fn plan(query: &Query) -> Result<Vec<PlanOp>> {
    let mut ops = Vec::new();
    let mut bound: Vec<String> = Vec::new();

    for part in &query.patterns {
        if !bound.contains(&part.start.var) {
            ops.push(PlanOp::ScanNodes {
                variable: part.start.var.clone(),
                label: part.start.label.clone(),
                props: part.start.props.clone(),
            });
            bound.push(part.start.var.clone());
        }
        let mut from_var = part.start.var.clone();
        for (rel, node) in &part.chain {
            let mut edge_types = Vec::with_capacity(rel.types.len());
            for name in &rel.types {
                let parsed = EdgeType::parse(name).ok_or_else(|| {
                    GraphError::invalid(format!("unknown relationship type: {name}"))
                })?;
                edge_types.push(parsed);
            }
            ops.push(PlanOp::ExpandRelationship {
                from_var: from_var.clone(),
                rel_var: rel.var.clone(),
                edge_types,
                direction: rel.direction,
                min_hops: rel.min_hops,
                max_hops: rel.max_hops,
                var_length: rel.var_length,
                to_var: node.var.clone(),
                to_label: node.label.clone(),
                to_props: node.props.clone(),
            });
            if !bound.contains(&node.var) {
                bound.push(node.var.clone());
            }
            from_var = node.var.clone();
        }
    }

    if !query.conditions.is_empty() {
        ops.push(PlanOp::FilterWhere {
            conditions: query.conditions.clone(),
            operator: query.where_op,
        });
    }
    Ok(ops)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Binding {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
}

fn node_matches(node: &Node, label: Option<&str>, props: &[(String, serde_json::Value)]) -> bool {
    if let Some(label) = label {
        if node.label.as_str() != label {
            return false;
        }
    }
    props.iter().all(|(key, value)| node_prop(node, key).as_ref() == Some(value))
}

/// Property access on a node: built-in columns first, then the open map.
fn node_prop(node: &Node, key: &str) -> Option<serde_json::Value> {
    match key {
        "name" => Some(serde_json::json!(node.name)),
        "qualified_name" => Some(serde_json::json!(node.qualified_name)),
        "label" => Some(serde_json::json!(node.label.as_str())),
        "file_path" => Some(serde_json::json!(node.file_path)),
        "start_line" => Some(serde_json::json!(node.start_line)),
        "end_line" => Some(serde_json::json!(node.end_line)),
        "id" => Some(serde_json::json!(node.id)),
        other => node.properties.get(other).cloned(),
    }
}

fn edge_prop(edge: &Edge, key: &str) -> Option<serde_json::Value> {
    match key {
        "type" => Some(serde_json::json!(edge.edge_type.as_str())),
        "id" => Some(serde_json::json!(edge.id)),
        other => edge.properties.get(other).cloned(),
    }
}

fn execute(
    store: &Store,
    project: &str,
    plan: &[PlanOp],
    cancel: &CancelToken,
) -> Result<Vec<Binding>> {
    let mut bindings: Vec<Binding> = vec![Binding::default()];

    for op in plan {
        cancel.check()?;
        match op {
            PlanOp::ScanNodes { variable, label, props } => {
                let scanned: Vec<Node> = match label.as_deref().map(NodeLabel::parse) {
                    Some(Some(parsed)) => store.nodes_by_label(project, parsed, BINDING_CAP)?,
                    Some(None) => {
                        return Err(GraphError::invalid(format!(
                            "unknown label: {}",
                            label.as_deref().unwrap_or_default()
                        )))
                    }
                    None => store.all_nodes_capped(project, BINDING_CAP)?,
                };
                let matching: Vec<Node> = scanned
                    .into_iter()
                    .filter(|n| node_matches(n, label.as_deref(), props))
                    .collect();

                let mut next = Vec::new();
                for binding in &bindings {
                    for node in &matching {
                        let mut expanded = binding.clone();
                        expanded.nodes.insert(variable.clone(), node.clone());
                        next.push(expanded);
                        if next.len() > BINDING_CAP {
                            return Err(GraphError::ResourceLimit(
                                "query produced too many candidate rows; add labels or WHERE filters"
                                    .into(),
                            ));
                        }
                    }
                }
                bindings = next;
            }

            PlanOp::ExpandRelationship {
                from_var,
                rel_var,
                edge_types,
                direction,
                min_hops,
                max_hops,
                var_length,
                to_var,
                to_label,
                to_props,
            } => {
                let store_direction = match direction {
                    RelDirection::Out => Direction::Outbound,
                    RelDirection::In => Direction::Inbound,
                    RelDirection::Any => Direction::Any,
                };
                let mut next = Vec::new();
                for binding in &bindings {
                    let Some(from_node) = binding.nodes.get(from_var) else {
                        return Err(GraphError::invalid(format!(
                            "variable not bound in pattern: {from_var}"
                        )));
                    };

                    if *var_length {
                        // Variable-length expansion delegates to BFS and does
                        // not bind individual edges.
                        let walk = traverse::bfs(
                            store,
                            from_node.id,
                            store_direction,
                            edge_types,
                            *max_hops,
                            BINDING_CAP,
                            cancel,
                        )?;
                        for reached in walk.visited {
                            if reached.hop < *min_hops {
                                continue;
                            }
                            if !node_matches(&reached.node, to_label.as_deref(), to_props) {
                                continue;
                            }
                            if let Some(existing) = binding.nodes.get(to_var) {
                                if existing.id != reached.node.id {
                                    continue;
                                }
                            }
                            let mut expanded = binding.clone();
                            expanded.nodes.insert(to_var.clone(), reached.node);
                            next.push(expanded);
                        }
                    } else {
                        for edge in
                            store.adjacent_edges(from_node.id, store_direction, edge_types)?
                        {
                            let neighbor_id = match direction {
                                RelDirection::Out => edge.target_id,
                                RelDirection::In => edge.source_id,
                                RelDirection::Any => {
                                    if edge.source_id == from_node.id {
                                        edge.target_id
                                    } else {
                                        edge.source_id
                                    }
                                }
                            };
                            let Some(neighbor) = store.get_node(neighbor_id)? else {
                                continue;
                            };
                            if !node_matches(&neighbor, to_label.as_deref(), to_props) {
                                continue;
                            }
                            if let Some(existing) = binding.nodes.get(to_var) {
                                if existing.id != neighbor.id {
                                    continue;
                                }
                            }
                            let mut expanded = binding.clone();
                            expanded.nodes.insert(to_var.clone(), neighbor);
                            if let Some(rel_var) = rel_var {
                                expanded.edges.insert(rel_var.clone(), edge);
                            }
                            next.push(expanded);
                        }
                    }
                    if next.len() > BINDING_CAP {
                        return Err(GraphError::ResourceLimit(
                            "relationship expansion produced too many rows".into(),
                        ));
                    }
                }
                bindings = next;
            }

            PlanOp::FilterWhere { conditions, operator } => {
                bindings.retain(|binding| {
                    let mut results = conditions.iter().map(|c| eval_condition(binding, c));
                    match operator {
                        WhereOp::And => results.all(|r| r),
                        WhereOp::Or => results.any(|r| r),
                    }
                });
            }
        }
        if bindings.is_empty() {
            break;
        }
    }
    Ok(bindings)
}

fn eval_condition(binding: &Binding, cond: &Condition) -> bool {
    let actual = binding
        .nodes
        .get(&cond.var)
        .and_then(|n| node_prop(n, &cond.prop))
        .or_else(|| binding.edges.get(&cond.var).and_then(|e| edge_prop(e, &cond.prop)));
    let Some(actual) = actual else {
        return cond.negated; // missing property fails the positive test
    };
    let result = compare(&actual, cond.op, &cond.value);
    result != cond.negated
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(actual: &serde_json::Value, op: CmpOp, expected: &serde_json::Value) -> bool {
    match op {
        CmpOp::Regex => {
            let Ok(re) = regex::Regex::new(&as_string(expected)) else {
                return false;
            };
            re.is_match(&as_string(actual))
        }
        CmpOp::Contains => as_string(actual).contains(&as_string(expected)),
        CmpOp::StartsWith => as_string(actual).starts_with(&as_string(expected)),
        CmpOp::Eq | CmpOp::Neq => {
            let equal = match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => as_string(actual) == as_string(expected),
            };
            (op == CmpOp::Eq) == equal
        }
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => {
            let ordering = match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(as_string(actual).cmp(&as_string(expected))),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Le => ordering.is_le(),
                _ => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

fn node_shape(node: &Node) -> serde_json::Value {
    serde_json::json!({
        "name": node.name,
        "qualified_name": node.qualified_name,
        "label": node.label.as_str(),
        "file_path": node.file_path,
        "start_line": node.start_line,
        "end_line": node.end_line,
        "properties": node.properties,
    })
}

fn edge_shape(edge: &Edge) -> serde_json::Value {
    serde_json::json!({
        "type": edge.edge_type.as_str(),
        "source_id": edge.source_id,
        "target_id": edge.target_id,
        "properties": edge.properties,
    })
}

fn project_rows(query: &Query, bindings: Vec<Binding>) -> Result<QueryResult> {
    let (columns, mut rows) = if query.return_items.is_empty() {
        project_default(&bindings)
    } else if query
        .return_items
        .iter()
        .any(|item| matches!(item, ReturnItem::Count { .. }))
    {
        project_aggregate(&query.return_items, &bindings)?
    } else {
        project_simple(&query.return_items, &bindings)?
    };

    if query.distinct {
        let mut seen = std::collections::HashSet::new();
        rows.retain(|row| seen.insert(serde_json::to_string(row).unwrap_or_default()));
    }

    if let Some((column, ascending)) = &query.order_by {
        let index = columns.iter().position(|c| c == column).ok_or_else(|| {
            GraphError::invalid(format!("ORDER BY references unknown column: {column}"))
        })?;
        rows.sort_by(|a, b| {
            let left = &a[index];
            let right = &b[index];
            let ordering = match (as_number(left), as_number(right)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => as_string(left).cmp(&as_string(right)),
            };
            if *ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }

    let total = rows.len();
    let cap = query.limit.unwrap_or(CYPHER_ROW_CAP).min(CYPHER_ROW_CAP);
    rows.truncate(cap);
    Ok(QueryResult { columns, rows, total })
}

/// No RETURN: name/qualified_name/label per node variable, type per edge
/// variable, variables in sorted order.
fn project_default(bindings: &[Binding]) -> (Vec<String>, Vec<Vec<serde_json::Value>>) {
    let mut node_vars: Vec<String> = bindings
        .first()
        .map(|b| b.nodes.keys().cloned().collect())
        .unwrap_or_default();
    node_vars.sort();
    let mut edge_vars: Vec<String> = bindings
        .first()
        .map(|b| b.edges.keys().cloned().collect())
        .unwrap_or_default();
    edge_vars.sort();

    let mut columns = Vec::new();
    for var in &node_vars {
        columns.push(format!("{var}.name"));
        columns.push(format!("{var}.qualified_name"));
        columns.push(format!("{var}.label"));
    }
    for var in &edge_vars {
        columns.push(format!("{var}.type"));
    }

    let mut rows: Vec<Vec<serde_json::Value>> = bindings
        .iter()
        .map(|binding| {
            let mut row = Vec::with_capacity(columns.len());
            for var in &node_vars {
                let node = &binding.nodes[var];
                row.push(serde_json::json!(node.name));
                row.push(serde_json::json!(node.qualified_name));
                row.push(serde_json::json!(node.label.as_str()));
            }
            for var in &edge_vars {
                row.push(serde_json::json!(binding.edges[var].edge_type.as_str()));
            }
            row
        })
        .collect();
    rows.sort_by_key(|row| serde_json::to_string(row).unwrap_or_default());
    (columns, rows)
}

fn item_value(item: &ReturnItem, binding: &Binding) -> Result<serde_json::Value> {
    match item {
        ReturnItem::Var { var, .. } => {
            if let Some(node) = binding.nodes.get(var) {
                Ok(node_shape(node))
            } else if let Some(edge) = binding.edges.get(var) {
                Ok(edge_shape(edge))
            } else {
                Err(GraphError::invalid(format!("unbound variable in RETURN: {var}")))
            }
        }
        ReturnItem::Prop { var, prop, .. } => {
            let value = binding
                .nodes
                .get(var)
                .and_then(|n| node_prop(n, prop))
                .or_else(|| binding.edges.get(var).and_then(|e| edge_prop(e, prop)));
            match (value, binding.nodes.contains_key(var) || binding.edges.contains_key(var)) {
                (Some(v), _) => Ok(v),
                (None, true) => Ok(serde_json::Value::Null),
                (None, false) => {
                    Err(GraphError::invalid(format!("unbound variable in RETURN: {var}")))
                }
            }
        }
        ReturnItem::Count { .. } => unreachable!("aggregates handled separately"),
    }
}

fn project_simple(
    items: &[ReturnItem],
    bindings: &[Binding],
) -> Result<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
    let columns: Vec<String> = items.iter().map(|i| i.column_name()).collect();
    let mut rows = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let mut row = Vec::with_capacity(items.len());
        for item in items {
            row.push(item_value(item, binding)?);
        }
        rows.push(row);
    }
    Ok((columns, rows))
}

/// COUNT aggregation grouped by the non-aggregate columns.
fn project_aggregate(
    items: &[ReturnItem],
    bindings: &[Binding],
) -> Result<(Vec<String>, Vec<Vec<serde_json::Value>>)> {
    let columns: Vec<String> = items.iter().map(|i| i.column_name()).collect();

    let mut groups: HashMap<String, (Vec<serde_json::Value>, usize)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for binding in bindings {
        let mut key_values = Vec::new();
        for item in items {
            if matches!(item, ReturnItem::Count { .. }) {
                continue;
            }
            key_values.push(item_value(item, binding)?);
        }
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        match groups.get_mut(&key) {
            Some((_, count)) => *count += 1,
            None => {
                groups.insert(key.clone(), (key_values, 1));
                order.push(key);
            }
        }
    }

    let mut rows = Vec::with_capacity(order.len());
    for key in order {
        let (key_values, count) = &groups[&key];
        let mut key_iter = key_values.iter();
        let row: Vec<serde_json::Value> = items
            .iter()
            .map(|item| match item {
                ReturnItem::Count { .. } => serde_json::json!(count),
                _ => key_iter.next().cloned().unwrap_or(serde_json::Value::Null),
            })
            .collect();
        rows.push(row);
    }
    Ok((columns, rows))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.upsert_project("p", "/tmp/p", 0).unwrap();
        store
    }

    fn add_fn(store: &Store, name: &str, qname: &str) -> i64 {
        store
            .upsert_node(&Node::new("p", NodeLabel::Function, name, qname, "m.go"))
            .unwrap()
    }

    fn run(store: &Store, query: &str) -> QueryResult {
        execute_query(store, "p", query, &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_simple_match_return_prop() {
        let store = seeded();
        add_fn(&store, "alpha", "p.m.alpha");
        add_fn(&store, "beta", "p.m.beta");
        let result = run(&store, "MATCH (f:Function) RETURN f.name ORDER BY f.name");
        assert_eq!(result.columns, vec!["f.name"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], serde_json::json!("alpha"));
        assert_eq!(result.rows[1][0], serde_json::json!("beta"));
    }

    #[test]
    fn test_relationship_match() {
        let store = seeded();
        let a = add_fn(&store, "a", "p.m.a");
        let b = add_fn(&store, "b", "p.m.b");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();

        let result = run(&store, "MATCH (x:Function)-[:CALLS]->(y:Function) RETURN x.name, y.name");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0], vec![serde_json::json!("a"), serde_json::json!("b")]);
    }

    #[test]
    fn test_incoming_direction() {
        let store = seeded();
        let a = add_fn(&store, "a", "p.m.a");
        let b = add_fn(&store, "b", "p.m.b");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();

        let result = run(&store, "MATCH (y)<-[:CALLS]-(x) RETURN y.name, x.name");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0], vec![serde_json::json!("b"), serde_json::json!("a")]);
    }

    #[test]
    fn test_where_filters() {
        let store = seeded();
        add_fn(&store, "handle_get", "p.m.handle_get");
        add_fn(&store, "misc", "p.m.misc");

        let result = run(
            &store,
            "MATCH (f:Function) WHERE f.name STARTS WITH 'handle' RETURN f.name",
        );
        assert_eq!(result.rows.len(), 1);

        let result = run(
            &store,
            "MATCH (f:Function) WHERE f.name =~ 'misc|other' RETURN f.name",
        );
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], serde_json::json!("misc"));

        let contains = run(&store, "MATCH (f) WHERE f.name CONTAINS 'get' RETURN f.name");
        assert_eq!(contains.rows.len(), 1);
    }

    #[test]
    fn test_where_or_semantics() {
        let store = seeded();
        add_fn(&store, "a", "p.m.a");
        add_fn(&store, "b", "p.m.b");
        add_fn(&store, "c", "p.m.c");
        let result = run(
            &store,
            "MATCH (f:Function) WHERE f.name = 'a' OR f.name = 'b' RETURN f.name ORDER BY f.name",
        );
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_edge_property_filter() {
        let store = seeded();
        let a = add_fn(&store, "client", "p.m.client");
        let b = add_fn(&store, "server", "p.m.server");
        let mut edge = Edge::new("p", a, b, EdgeType::HttpCalls);
        edge.properties.insert("url_path".into(), serde_json::json!("/api/orders/{id}"));
        set_confidence(&mut edge.properties, 0.8);
        store.upsert_edge(&edge).unwrap();

        let result = run(
            &store,
            "MATCH (a)-[r:HTTP_CALLS]->(b) WHERE r.url_path CONTAINS 'orders' \
             RETURN a.name, b.name, r.confidence, r.confidence_band",
        );
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][2], serde_json::json!(0.8));
        assert_eq!(result.rows[0][3], serde_json::json!("high"));

        let filtered = run(
            &store,
            "MATCH (a)-[r:HTTP_CALLS]->(b) WHERE r.confidence >= 0.9 RETURN a.name",
        );
        assert!(filtered.rows.is_empty());
    }

    #[test]
    fn test_count_aggregate_with_order_and_limit() {
        // 10 callees, each called by two distinct callers
        let store = seeded();
        for i in 0..10 {
            let target = add_fn(&store, &format!("g{i}"), &format!("p.m.g{i}"));
            for j in 0..2 {
                let caller = add_fn(&store, &format!("f{i}_{j}"), &format!("p.m.f{i}_{j}"));
                store.upsert_edge(&Edge::new("p", caller, target, EdgeType::Calls)).unwrap();
            }
        }
        let result = run(
            &store,
            "MATCH (f:Function)-[:CALLS]->(g:Function) \
             RETURN g.name, COUNT(f) AS calls ORDER BY calls DESC LIMIT 3",
        );
        assert_eq!(result.columns, vec!["g.name", "calls"]);
        assert_eq!(result.rows.len(), 3);
        for row in &result.rows {
            assert_eq!(row[1], serde_json::json!(2));
        }
        assert_eq!(result.total, 10);
    }

    #[test]
    fn test_variable_length_path() {
        let store = seeded();
        let a = add_fn(&store, "a", "p.m.a");
        let b = add_fn(&store, "b", "p.m.b");
        let c = add_fn(&store, "c", "p.m.c");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", b, c, EdgeType::Calls)).unwrap();

        let result = run(
            &store,
            "MATCH (x {name: 'a'})-[:CALLS *1..3]->(y) RETURN y.name ORDER BY y.name",
        );
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], serde_json::json!("b"));
        assert_eq!(result.rows[1][0], serde_json::json!("c"));

        let min2 = run(&store, "MATCH (x {name: 'a'})-[:CALLS *2..3]->(y) RETURN y.name");
        assert_eq!(min2.rows.len(), 1);
        assert_eq!(min2.rows[0][0], serde_json::json!("c"));
    }

    #[test]
    fn test_distinct() {
        let store = seeded();
        let a = add_fn(&store, "a", "p.m.a");
        let b = add_fn(&store, "b", "p.m.b");
        let c = add_fn(&store, "c", "p.m.c");
        store.upsert_edge(&Edge::new("p", a, c, EdgeType::Calls)).unwrap();
        store.upsert_edge(&Edge::new("p", b, c, EdgeType::Calls)).unwrap();

        let plain = run(&store, "MATCH (x)-[:CALLS]->(y) RETURN y.name");
        assert_eq!(plain.rows.len(), 2);
        let distinct = run(&store, "MATCH (x)-[:CALLS]->(y) RETURN DISTINCT y.name");
        assert_eq!(distinct.rows.len(), 1);
    }

    #[test]
    fn test_default_projection_without_return() {
        let store = seeded();
        let a = add_fn(&store, "a", "p.m.a");
        let b = add_fn(&store, "b", "p.m.b");
        store.upsert_edge(&Edge::new("p", a, b, EdgeType::Calls)).unwrap();

        let result = run(&store, "MATCH (x)-[r:CALLS]->(y)");
        assert!(result.columns.contains(&"x.name".to_string()));
        assert!(result.columns.contains(&"y.qualified_name".to_string()));
        assert!(result.columns.contains(&"r.type".to_string()));
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_row_cap_is_hard() {
        let store = seeded();
        for i in 0..250 {
            add_fn(&store, &format!("f{i}"), &format!("p.m.f{i}"));
        }
        let result = run(&store, "MATCH (f:Function) RETURN f.name");
        assert_eq!(result.rows.len(), CYPHER_ROW_CAP);
        assert_eq!(result.total, 250);
        // An explicit larger LIMIT is still capped
        let result = run(&store, "MATCH (f:Function) RETURN f.name LIMIT 500");
        assert_eq!(result.rows.len(), CYPHER_ROW_CAP);
    }

    #[test]
    fn test_malformed_queries_are_errors() {
        let store = seeded();
        for query in [
            "SELECT * FROM nodes",
            "MATCH (f:Function",
            "MATCH (f) WHERE f.name LIKE 'x' RETURN f",
            "MATCH (f)-[:NOT_A_TYPE]->(g) RETURN f",
            "MATCH (f) RETURN f.name LIMIT 'ten'",
        ] {
            let result = execute_query(&store, "p", query, &CancelToken::new());
            assert!(result.is_err(), "expected error for: {query}");
        }
    }

    #[test]
    fn test_node_props_in_pattern() {
        let store = seeded();
        add_fn(&store, "alpha", "p.m.alpha");
        add_fn(&store, "beta", "p.m.beta");
        let result = run(&store, "MATCH (f:Function {name: \"alpha\"}) RETURN f.qualified_name");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], serde_json::json!("p.m.alpha"));
    }

    #[test]
    fn test_full_node_shape_for_bare_variable() {
        let store = seeded();
        add_fn(&store, "alpha", "p.m.alpha");
        let result = run(&store, "MATCH (f:Function) RETURN f");
        assert_eq!(result.rows.len(), 1);
        let shape = &result.rows[0][0];
        assert_eq!(shape["name"], serde_json::json!("alpha"));
        assert_eq!(shape["label"], serde_json::json!("Function"));
    }
}
