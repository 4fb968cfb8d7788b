//! The `mako` dialect.
//!
//! Supported syntax:
//!
//! - `${expression}` substitution; `$${` writes a literal `${`
//! - `%` control lines: `for`/`endfor` and `if`/`elif`/`else`/`endif`;
//!   `%%` at the start of a line writes a literal `%`
//! - `<% %>` blocks holding `name = expression` assignments
//! - `##` comment lines and `<%doc>` blocks, dropped from the output
//! - a backslash at the end of a line joins it with the next one
//!
//! Expressions cover names with dotted and indexed access, literals
//! (strings, numbers, `True`, `False`, `None`, lists and dicts), the
//! `items()`, `keys()` and `values()` views of mappings, comparisons,
//! `in`, `is`, `not`, `and`, `or` and calls to the helper functions with
//! positional and keyword arguments.

use serde_json::{Map, Number, Value};

use crate::error::{TemplateError, TemplateResult};
use crate::helpers::{HelperFunction, TemplateHelpers};

/// Render `text` with `params` and the helper functions in scope.
pub fn render(
    source_name: &str,
    text: &str,
    params: &Map<String, Value>,
    helpers: &dyn TemplateHelpers,
) -> TemplateResult<String> {
    let nodes = TemplateParser {
        source_name,
        text,
        root: Vec::new(),
        blocks: Vec::new(),
    }
    .parse()?;

    let mut renderer = Renderer {
        source_name,
        text,
        params,
        helpers,
        locals: Map::new(),
    };
    let mut out = String::with_capacity(text.len());
    renderer.render_nodes(&nodes, &mut out)?;
    Ok(out)
}

/// Python-flavoured text for a substituted value.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn located(source_name: &str, text: &str, offset: usize, message: impl Into<String>) -> TemplateError {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|nl| before[nl + 1..].chars().count())
        .unwrap_or_else(|| before.chars().count())
        + 1;

    TemplateError::Render {
        source_name: source_name.to_string(),
        line: Some(line),
        column: Some(column),
        message: message.into(),
    }
}

/// Byte offset of the `}` closing an expression that starts at `start`.
fn find_closing_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(start + i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "is"];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !KEYWORDS.contains(&name)
}

/// Byte range of the template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// `text[start..end]` without its surrounding whitespace.
    fn trimmed(text: &str, start: usize, end: usize) -> Span {
        let slice = &text[start..end];
        let lead = slice.len() - slice.trim_start().len();
        let trail = slice.len() - slice.trim_end().len();
        Span {
            start: start + lead,
            end: (end - trail).max(start + lead),
        }
    }

    fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug)]
enum Node {
    /// Text with `${}` substitutions
    Text(Span),
    /// `%%` at the start of a line
    Percent,
    Assign {
        name: String,
        value: Span,
    },
    For {
        targets: Vec<String>,
        iterable: Span,
        body: Vec<Node>,
    },
    /// Branches in order; `None` is the `else` branch.
    If {
        branches: Vec<(Option<Span>, Vec<Node>)>,
    },
}

/// A control block whose end line has not been seen yet.
struct Block {
    keyword_offset: usize,
    kind: BlockKind,
    nodes: Vec<Node>,
}

enum BlockKind {
    For {
        targets: Vec<String>,
        iterable: Span,
    },
    If {
        closed: Vec<(Option<Span>, Vec<Node>)>,
        condition: Option<Span>,
        has_else: bool,
    },
}

impl BlockKind {
    fn keyword(&self) -> &'static str {
        match self {
            BlockKind::For { .. } => "for",
            BlockKind::If { .. } => "if",
        }
    }
}

struct TemplateParser<'t> {
    source_name: &'t str,
    text: &'t str,
    root: Vec<Node>,
    blocks: Vec<Block>,
}

impl<'t> TemplateParser<'t> {
    fn error(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        located(self.source_name, self.text, offset, message)
    }

    fn nodes(&mut self) -> &mut Vec<Node> {
        match self.blocks.last_mut() {
            Some(block) => &mut block.nodes,
            None => &mut self.root,
        }
    }

    fn push_text(&mut self, start: usize, end: usize) {
        if start < end {
            self.nodes().push(Node::Text(Span { start, end }));
        }
    }

    fn parse(mut self) -> TemplateResult<Vec<Node>> {
        let text = self.text;
        let mut pos = 0;
        let mut text_start = 0;

        while pos < text.len() {
            let rest = &text[pos..];

            if pos == 0 || text.as_bytes()[pos - 1] == b'\n' {
                let line_end = rest.find('\n').map(|i| pos + i + 1).unwrap_or(text.len());
                let body = rest.trim_start_matches([' ', '\t']);
                let indent = rest.len() - body.len();

                if body.starts_with("##") {
                    self.push_text(text_start, pos);
                    pos = line_end;
                    text_start = pos;
                    continue;
                }
                if body.starts_with("%%") {
                    self.push_text(text_start, pos + indent);
                    self.nodes().push(Node::Percent);
                    pos += indent + 2;
                    text_start = pos;
                    continue;
                }
                if body.starts_with('%') {
                    self.push_text(text_start, pos);
                    let content_end = text[..line_end].trim_end_matches(['\n', '\r']).len();
                    self.control(pos + indent + 1, content_end)?;
                    pos = line_end;
                    text_start = pos;
                    continue;
                }
            }

            if rest.starts_with("$${") {
                pos += 3;
                continue;
            }
            if rest.starts_with("${") {
                // Unterminated expressions are reported while rendering.
                pos = find_closing_brace(text, pos + 2)
                    .map(|end| end + 1)
                    .unwrap_or(pos + 2);
                continue;
            }
            if rest.starts_with("<%doc>") {
                self.push_text(text_start, pos);
                let end = rest
                    .find("</%doc>")
                    .ok_or_else(|| self.error(pos, "unterminated `<%doc>`"))?;
                pos += end + "</%doc>".len();
                text_start = pos;
                continue;
            }
            if let Some(after) = rest.strip_prefix("<%") {
                match after.chars().next() {
                    Some(c) if c.is_whitespace() => {
                        self.push_text(text_start, pos);
                        let end = rest
                            .find("%>")
                            .ok_or_else(|| self.error(pos, "unterminated `<%` block"))?;
                        self.code(pos + 2, pos + end)?;
                        pos += end + 2;
                        text_start = pos;
                        continue;
                    }
                    Some(c) if c.is_ascii_alphabetic() || c == '!' => {
                        let tag_len = after
                            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '!' || c == '_'))
                            .unwrap_or(after.len());
                        return Err(self.error(
                            pos,
                            format!("unsupported Mako tag `<%{}`", &after[..tag_len]),
                        ));
                    }
                    _ => {}
                }
            }

            let ch = rest.chars().next().unwrap_or_default();
            pos += ch.len_utf8();
        }

        self.push_text(text_start, text.len());
        if let Some(block) = self.blocks.last() {
            return Err(self.error(
                block.keyword_offset,
                format!("`% {}` is not closed", block.kind.keyword()),
            ));
        }
        Ok(self.root)
    }

    /// A `%` line; `start..end` is the text after the `%`.
    fn control(&mut self, start: usize, end: usize) -> TemplateResult<()> {
        let text = self.text;
        let line = Span::trimmed(text, start, end);
        let content = &text[line.start..line.end];
        let keyword_len = content
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(content.len());
        let keyword = &content[..keyword_len];
        let offset = line.start;

        match keyword {
            "for" => {
                let header = self.header(line, keyword_len)?;
                let head = &text[header.start..header.end];
                let split = head
                    .find(" in ")
                    .ok_or_else(|| self.error(offset, "expected `% for <names> in <expression>:`"))?;
                let targets = head[..split]
                    .trim()
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split(',')
                    .map(|target| target.trim().to_string())
                    .collect::<Vec<_>>();
                if let Some(bad) = targets.iter().find(|target| !is_identifier(target)) {
                    return Err(self.error(offset, format!("cannot assign to `{}`", bad)));
                }
                let iterable = Span::trimmed(text, header.start + split + 4, header.end);
                if iterable.is_empty() {
                    return Err(self.error(offset, "expected `% for <names> in <expression>:`"));
                }
                self.blocks.push(Block {
                    keyword_offset: offset,
                    kind: BlockKind::For { targets, iterable },
                    nodes: Vec::new(),
                });
            }
            "if" => {
                let condition = self.header(line, keyword_len)?;
                if condition.is_empty() {
                    return Err(self.error(offset, "`% if` needs a condition"));
                }
                self.blocks.push(Block {
                    keyword_offset: offset,
                    kind: BlockKind::If {
                        closed: Vec::new(),
                        condition: Some(condition),
                        has_else: false,
                    },
                    nodes: Vec::new(),
                });
            }
            "elif" | "else" => {
                let header = self.header(line, keyword_len)?;
                let condition = match (keyword, header.is_empty()) {
                    ("elif", false) => Some(header),
                    ("else", true) => None,
                    _ => return Err(self.error(offset, format!("malformed `% {}` line", keyword))),
                };
                match self.blocks.last_mut() {
                    Some(Block {
                        kind:
                            BlockKind::If {
                                closed,
                                condition: current,
                                has_else,
                            },
                        nodes,
                        ..
                    }) if !*has_else => {
                        closed.push((current.take(), std::mem::take(nodes)));
                        *has_else = condition.is_none();
                        *current = condition;
                    }
                    _ => {
                        return Err(self.error(offset, format!("`% {}` without `% if`", keyword)))
                    }
                }
            }
            "endfor" | "endif" => {
                if !text[line.start + keyword_len..line.end].trim().is_empty() {
                    return Err(self.error(offset, format!("malformed `% {}` line", keyword)));
                }
                let expected = &keyword[3..];
                let block = match self.blocks.pop() {
                    Some(block) if block.kind.keyword() == expected => block,
                    _ => {
                        return Err(self.error(
                            offset,
                            format!("`% {}` without `% {}`", keyword, expected),
                        ))
                    }
                };
                let node = match block.kind {
                    BlockKind::For { targets, iterable } => Node::For {
                        targets,
                        iterable,
                        body: block.nodes,
                    },
                    BlockKind::If {
                        mut closed,
                        condition,
                        ..
                    } => {
                        closed.push((condition, block.nodes));
                        Node::If { branches: closed }
                    }
                };
                self.nodes().push(node);
            }
            other => {
                return Err(self.error(offset, format!("unsupported control line `% {}`", other)))
            }
        }
        Ok(())
    }

    /// The part of a control line between the keyword and the closing `:`.
    fn header(&self, line: Span, keyword_len: usize) -> TemplateResult<Span> {
        if !self.text[line.start..line.end].ends_with(':') {
            return Err(self.error(line.end, "expected `:` at the end of the control line"));
        }
        Ok(Span::trimmed(self.text, line.start + keyword_len, line.end - 1))
    }

    /// The statements of a `<% %>` block between `start` and `end`.
    fn code(&mut self, start: usize, end: usize) -> TemplateResult<()> {
        let text = self.text;
        let mut line_start = start;

        for line in text[start..end].split_inclusive('\n') {
            let line_end = line_start + line.len();
            let statement = Span::trimmed(text, line_start, line_end);
            let source = &text[statement.start..statement.end];
            line_start = line_end;

            if source.is_empty() || source.starts_with('#') {
                continue;
            }
            let eq = assignment_operator(source).ok_or_else(|| {
                self.error(statement.start, "only assignments are supported in `<% %>` blocks")
            })?;
            let name = source[..eq].trim();
            if !is_identifier(name) {
                return Err(self.error(statement.start, format!("cannot assign to `{}`", name)));
            }
            let value = Span::trimmed(text, statement.start + eq + 1, statement.end);
            if value.is_empty() {
                return Err(self.error(statement.start, format!("missing value for `{}`", name)));
            }
            self.nodes().push(Node::Assign {
                name: name.to_string(),
                value,
            });
        }
        Ok(())
    }
}

/// Offset of the `=` in `name = value`, skipping comparison operators.
fn assignment_operator(statement: &str) -> Option<usize> {
    let bytes = statement.as_bytes();
    (0..bytes.len()).find(|&i| {
        bytes[i] == b'='
            && bytes.get(i + 1) != Some(&b'=')
            && !(i > 0 && b"=!<>".contains(&bytes[i - 1]))
    })
}

struct Renderer<'t> {
    source_name: &'t str,
    text: &'t str,
    params: &'t Map<String, Value>,
    helpers: &'t dyn TemplateHelpers,
    /// Names bound by loops and `<% %>` blocks; they shadow `params`.
    locals: Map<String, Value>,
}

impl Renderer<'_> {
    fn error(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        located(self.source_name, self.text, offset, message)
    }

    fn eval(&self, span: Span) -> TemplateResult<Value> {
        let scope = Scope {
            params: self.params,
            locals: &self.locals,
            helpers: self.helpers,
        };
        evaluate(&self.text[span.start..span.end], &scope)
            .map_err(|e| self.error(span.start + e.offset, e.message))
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> TemplateResult<()> {
        for node in nodes {
            match node {
                Node::Text(span) => self.substitute(*span, out)?,
                Node::Percent => out.push('%'),
                Node::Assign { name, value } => {
                    let value = self.eval(*value)?;
                    self.locals.insert(name.clone(), value);
                }
                Node::For {
                    targets,
                    iterable,
                    body,
                } => {
                    let items = iterate(self.eval(*iterable)?)
                        .map_err(|message| self.error(iterable.start, message))?;
                    for item in items {
                        self.bind(targets, item)
                            .map_err(|message| self.error(iterable.start, message))?;
                        self.render_nodes(body, out)?;
                    }
                }
                Node::If { branches } => {
                    for (condition, body) in branches {
                        let taken = match condition {
                            Some(condition) => truthy(&self.eval(*condition)?),
                            None => true,
                        };
                        if taken {
                            self.render_nodes(body, out)?;
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn bind(&mut self, targets: &[String], item: Value) -> Result<(), String> {
        if let [target] = targets {
            self.locals.insert(target.clone(), item);
            return Ok(());
        }
        match item {
            Value::Array(values) if values.len() == targets.len() => {
                for (target, value) in targets.iter().zip(values) {
                    self.locals.insert(target.clone(), value);
                }
                Ok(())
            }
            other => Err(format!(
                "cannot unpack {} into {} names",
                display(&other),
                targets.len()
            )),
        }
    }

    fn substitute(&self, span: Span, out: &mut String) -> TemplateResult<()> {
        let text = self.text;
        let mut pos = span.start;

        while pos < span.end {
            let rest = &text[pos..span.end];
            if rest.starts_with("$${") {
                out.push_str("${");
                pos += 3;
                continue;
            }
            if rest.starts_with("\\\n") {
                pos += 2;
                continue;
            }
            if rest.starts_with("\\\r\n") {
                pos += 3;
                continue;
            }
            if rest.starts_with("${") {
                let start = pos + 2;
                let end = find_closing_brace(&text[..span.end], start)
                    .ok_or_else(|| self.error(pos, "unterminated `${` expression"))?;
                let value = self.eval(Span { start, end })?;
                out.push_str(&display(&value));
                pos = end + 1;
                continue;
            }

            let ch = rest.chars().next().unwrap_or_default();
            out.push(ch);
            pos += ch.len_utf8();
        }
        Ok(())
    }
}

/// The items a `% for` line walks over.
fn iterate(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(key, _)| Value::String(key)).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(format!("{} is not iterable", display(&other))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match (container, item) {
        (Value::String(s), Value::String(sub)) => Ok(s.contains(sub.as_str())),
        (Value::Array(items), _) => Ok(items.iter().any(|v| equal(v, item))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(format!("`in` is not supported for {}", display(container))),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        "==" | "is" => Ok(equal(left, right)),
        "!=" | "is not" => Ok(!equal(left, right)),
        "in" => contains(right, left),
        "not in" => contains(right, left).map(|found| !found),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                format!(
                    "`{}` is not supported between {} and {}",
                    op,
                    display(left),
                    display(right)
                )
            })?;
            Ok(match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

struct Scope<'a> {
    params: &'a Map<String, Value>,
    locals: &'a Map<String, Value>,
    helpers: &'a dyn TemplateHelpers,
}

#[derive(Debug)]
struct ExprError {
    offset: usize,
    message: String,
}

type ExprResult<T> = Result<T, ExprError>;

fn expr_error(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError {
        offset,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(char),
    /// Comparison operator
    Op(&'static str),
    End,
}

fn tokenize(expr: &str) -> ExprResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((offset, Token::Ident(ident)));
        } else if ch.is_ascii_digit() || (ch == '-' && starts_number(expr, offset)) {
            let mut literal = String::new();
            literal.push(ch);
            chars.next();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' || c == '_' {
                    if c != '_' {
                        literal.push(c);
                    }
                    chars.next();
                } else {
                    break;
                }
            }
            let token = if literal.contains('.') {
                literal
                    .parse()
                    .map(Token::Float)
                    .map_err(|_| expr_error(offset, format!("invalid number `{}`", literal)))?
            } else {
                literal
                    .parse()
                    .map(Token::Int)
                    .map_err(|_| expr_error(offset, format!("invalid number `{}`", literal)))?
            };
            tokens.push((offset, token));
        } else if ch == '\'' || ch == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, other)) => value.push(other),
                        None => break,
                    },
                    c if c == ch => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return Err(expr_error(offset, "unterminated string literal"));
            }
            tokens.push((offset, Token::Str(value)));
        } else if let Some(op) = ["==", "!=", "<=", ">="]
            .into_iter()
            .find(|op| expr[offset..].starts_with(op))
        {
            tokens.push((offset, Token::Op(op)));
            chars.next();
            chars.next();
        } else if ch == '<' || ch == '>' {
            tokens.push((offset, Token::Op(if ch == '<' { "<" } else { ">" })));
            chars.next();
        } else if "()[]{},:.=".contains(ch) {
            tokens.push((offset, Token::Punct(ch)));
            chars.next();
        } else {
            return Err(expr_error(offset, format!("unsupported character `{}`", ch)));
        }
    }

    tokens.push((expr.len(), Token::End));
    Ok(tokens)
}

fn starts_number(expr: &str, offset: usize) -> bool {
    expr[offset + 1..]
        .chars()
        .next()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false)
}

/// A name may stand for data or for one of the helper functions.
enum Operand {
    Data(Value),
    Helper(String, HelperFunction),
}

fn evaluate(expr: &str, scope: &Scope<'_>) -> ExprResult<Value> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        scope,
        evaluating: true,
    };

    if parser.peek() == &Token::End {
        return Err(expr_error(0, "empty expression"));
    }
    let value = parser.expression()?;
    match parser.peek() {
        Token::End => Ok(value),
        _ => Err(expr_error(
            parser.offset(),
            "unsupported expression; expected a name, literal or helper call",
        )),
    }
}

struct Parser<'s, 'a> {
    tokens: Vec<(usize, Token)>,
    index: usize,
    scope: &'s Scope<'a>,
    /// Cleared while parsing the operand `and`/`or` skips.
    evaluating: bool,
}

impl Parser<'_, '_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)].1
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        &self.tokens[(self.index + ahead).min(self.tokens.len() - 1)].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.index.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, punct: char) -> ExprResult<()> {
        if self.peek() == &Token::Punct(punct) {
            self.advance();
            Ok(())
        } else {
            Err(expr_error(self.offset(), format!("expected `{}`", punct)))
        }
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == &Token::Punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Token::Ident(w) if w == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Parse with evaluation turned off and drop the result.
    fn skip<T>(&mut self, parse: impl FnOnce(&mut Self) -> ExprResult<T>) -> ExprResult<()> {
        let evaluating = std::mem::replace(&mut self.evaluating, false);
        let result = parse(self);
        self.evaluating = evaluating;
        result.map(|_| ())
    }

    fn expression(&mut self) -> ExprResult<Value> {
        let mut value = self.conjunction()?;
        while self.eat_word("or") {
            if truthy(&value) {
                self.skip(|p| p.conjunction())?;
            } else {
                value = self.conjunction()?;
            }
        }
        Ok(value)
    }

    fn conjunction(&mut self) -> ExprResult<Value> {
        let mut value = self.negation()?;
        while self.eat_word("and") {
            if truthy(&value) {
                value = self.negation()?;
            } else {
                self.skip(|p| p.negation())?;
            }
        }
        Ok(value)
    }

    fn negation(&mut self) -> ExprResult<Value> {
        if self.eat_word("not") {
            let value = self.negation()?;
            Ok(Value::Bool(!truthy(&value)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> ExprResult<Value> {
        let mut left = self.value()?;
        let mut result: Option<bool> = None;

        loop {
            let offset = self.offset();
            let op = match (self.peek(), self.peek_at(1)) {
                (Token::Op(op), _) => *op,
                (Token::Ident(w), Token::Ident(n)) if w == "not" && n == "in" => "not in",
                (Token::Ident(w), Token::Ident(n)) if w == "is" && n == "not" => "is not",
                (Token::Ident(w), _) if w == "in" => "in",
                (Token::Ident(w), _) if w == "is" => "is",
                _ => break,
            };
            for _ in op.split(' ') {
                self.advance();
            }

            let right = self.value()?;
            if self.evaluating {
                let holds = compare(op, &left, &right).map_err(|m| expr_error(offset, m))?;
                result = Some(result.unwrap_or(true) && holds);
            }
            left = right;
        }

        Ok(result.map(Value::Bool).unwrap_or(left))
    }

    fn value(&mut self) -> ExprResult<Value> {
        let start = self.offset();
        match self.postfix()? {
            Operand::Data(value) => Ok(value),
            Operand::Helper(name, _) => Err(expr_error(
                start,
                format!("`{}` is a function; call it with arguments", name),
            )),
        }
    }

    fn postfix(&mut self) -> ExprResult<Operand> {
        let mut operand = self.primary()?;

        loop {
            let offset = self.offset();
            if self.eat('.') {
                let attr = match self.advance() {
                    Token::Ident(attr) => attr,
                    _ => return Err(expr_error(offset, "expected an attribute name after `.`")),
                };
                let view = matches!(attr.as_str(), "items" | "keys" | "values")
                    && self.peek() == &Token::Punct('(')
                    && self.peek_at(1) == &Token::Punct(')');
                if view {
                    self.advance();
                    self.advance();
                }
                operand = Operand::Data(if !self.evaluating {
                    Value::Null
                } else if view {
                    mapping_view(operand, &attr, offset)?
                } else {
                    attribute(operand, &attr, offset)?
                });
            } else if self.eat('[') {
                let key = self.expression()?;
                self.expect(']')?;
                operand = Operand::Data(if self.evaluating {
                    index(operand, &key, offset)?
                } else {
                    Value::Null
                });
            } else if self.eat('(') {
                let (positional, keywords) = self.arguments()?;
                operand = match operand {
                    _ if !self.evaluating => Operand::Data(Value::Null),
                    Operand::Helper(name, function) => Operand::Data(
                        function
                            .invoke(&name, self.scope.helpers, positional, keywords)
                            .map_err(|e| expr_error(offset, e.to_string()))?,
                    ),
                    Operand::Data(_) => {
                        return Err(expr_error(offset, "only helper functions can be called"))
                    }
                };
            } else {
                return Ok(operand);
            }
        }
    }

    fn arguments(&mut self) -> ExprResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::new();
        let mut keywords: Vec<(String, Value)> = Vec::new();

        while !self.eat(')') {
            let offset = self.offset();
            let keyword = match (self.peek(), self.peek_at(1)) {
                (Token::Ident(name), Token::Punct('=')) => Some(name.clone()),
                _ => None,
            };

            if let Some(name) = keyword {
                self.advance();
                self.advance();
                keywords.push((name, self.expression()?));
            } else if keywords.is_empty() {
                positional.push(self.expression()?);
            } else {
                return Err(expr_error(
                    offset,
                    "positional argument follows keyword argument",
                ));
            }

            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }

        Ok((positional, keywords))
    }

    fn primary(&mut self) -> ExprResult<Operand> {
        let offset = self.offset();
        match self.advance() {
            Token::Str(s) => Ok(Operand::Data(Value::String(s))),
            Token::Int(i) => Ok(Operand::Data(Value::from(i))),
            Token::Float(f) => Number::from_f64(f)
                .map(|n| Operand::Data(Value::Number(n)))
                .ok_or_else(|| expr_error(offset, "number out of range")),
            Token::Ident(name) => self.name(name, offset),
            Token::Punct('(') => {
                let value = self.expression()?;
                self.expect(')')?;
                Ok(Operand::Data(value))
            }
            Token::Punct('[') => {
                let mut items = Vec::new();
                while !self.eat(']') {
                    items.push(self.expression()?);
                    if !self.eat(',') {
                        self.expect(']')?;
                        break;
                    }
                }
                Ok(Operand::Data(Value::Array(items)))
            }
            Token::Punct('{') => {
                let mut map = Map::new();
                while !self.eat('}') {
                    let key_offset = self.offset();
                    let key = match self.expression()? {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        _ if !self.evaluating => String::new(),
                        _ => return Err(expr_error(key_offset, "dict keys must be strings")),
                    };
                    self.expect(':')?;
                    map.insert(key, self.expression()?);
                    if !self.eat(',') {
                        self.expect('}')?;
                        break;
                    }
                }
                Ok(Operand::Data(Value::Object(map)))
            }
            Token::End => Err(expr_error(offset, "unexpected end of expression")),
            Token::Punct(p) => Err(expr_error(offset, format!("unexpected `{}`", p))),
            Token::Op(op) => Err(expr_error(offset, format!("unexpected `{}`", op))),
        }
    }

    fn name(&self, name: String, offset: usize) -> ExprResult<Operand> {
        match name.as_str() {
            "True" => return Ok(Operand::Data(Value::Bool(true))),
            "False" => return Ok(Operand::Data(Value::Bool(false))),
            "None" => return Ok(Operand::Data(Value::Null)),
            word if KEYWORDS.contains(&word) => {
                return Err(expr_error(offset, format!("unexpected `{}`", word)))
            }
            _ => {}
        }
        if let Some(value) = self
            .scope
            .locals
            .get(&name)
            .or_else(|| self.scope.params.get(&name))
        {
            return Ok(Operand::Data(value.clone()));
        }
        match HelperFunction::lookup(&name) {
            Some(function) => Ok(Operand::Helper(name, function)),
            None if !self.evaluating => Ok(Operand::Data(Value::Null)),
            None => Err(expr_error(offset, format!("undefined name `{}`", name))),
        }
    }
}

fn attribute(operand: Operand, attr: &str, offset: usize) -> ExprResult<Value> {
    match operand {
        Operand::Data(Value::Object(mut map)) => map
            .remove(attr)
            .ok_or_else(|| expr_error(offset, format!("no attribute `{}`", attr))),
        _ => Err(expr_error(
            offset,
            format!("attribute `{}` on a value that is not a mapping", attr),
        )),
    }
}

/// `items()`, `keys()` or `values()` of a mapping, as a list.
fn mapping_view(operand: Operand, method: &str, offset: usize) -> ExprResult<Value> {
    let map = match operand {
        Operand::Data(Value::Object(map)) => map,
        _ => return Err(expr_error(offset, format!("`{}()` needs a mapping", method))),
    };
    Ok(Value::Array(match method {
        "keys" => map.into_iter().map(|(key, _)| Value::String(key)).collect(),
        "values" => map.into_iter().map(|(_, value)| value).collect(),
        _ => map
            .into_iter()
            .map(|(key, value)| Value::Array(vec![Value::String(key), value]))
            .collect(),
    }))
}

fn index(operand: Operand, key: &Value, offset: usize) -> ExprResult<Value> {
    match (operand, key) {
        (Operand::Data(Value::Object(mut map)), Value::String(k)) => map
            .remove(k)
            .ok_or_else(|| expr_error(offset, format!("key `{}` not found", k))),
        (Operand::Data(Value::Array(mut items)), Value::Number(n)) => {
            let len = items.len() as i64;
            let i = n
                .as_i64()
                .ok_or_else(|| expr_error(offset, "list indices must be integers"))?;
            let i = if i < 0 { len + i } else { i };
            if (0..len).contains(&i) {
                Ok(items.swap_remove(i as usize))
            } else {
                Err(expr_error(offset, format!("list index {} out of range", n)))
            }
        }
        _ => Err(expr_error(offset, format!("cannot index with {}", key))),
    }
}
