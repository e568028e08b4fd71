//! Strict rule template engine
//!
//! Rule text is copied verbatim except for `{{ ... }}` actions:
//!
//! - `{{.Network.IP}}` prints a field path. Missing fields, missing map keys
//!   and lookups through nil all fail. A firewall rule with a silently empty
//!   address would match far more than intended.
//! - `{{index .Network.Vars "in-interface"}}` looks up a key and yields nil
//!   when the key is missing. Use it for optional variables in conditionals.
//! - `{{if X}} .. {{else if Y}} .. {{else}} .. {{end}}` and `{{not X}}`.
//! - `{{/* comment */}}`.
//! - `{{-` and `-}}` trim whitespace on the respective side.
//!
//! # Example
//!
//! ```
//! use fleetwall::core::template::Template;
//! use fleetwall::core::scope::ServerScope;
//! use fleetwall::core::topology::{Firewall, Server};
//!
//! let mut firewall = Firewall::default();
//! firewall.vars.insert("admin".into(), "203.0.113.7".into());
//! let server = Server::default();
//! let scope = ServerScope { server_name: "web", server: &server, firewall: &firewall };
//!
//! let tpl = Template::parse("-A INPUT --src {{.Firewall.Vars.admin}} -j ACCEPT").unwrap();
//! assert_eq!(tpl.render(&scope).unwrap(), "-A INPUT --src 203.0.113.7 -j ACCEPT");
//!
//! let missing = Template::parse("{{.Firewall.Vars.nope}}").unwrap();
//! assert!(missing.render(&scope).is_err());
//! ```

use crate::core::scope::{Fields, Value};
use std::fmt;
use std::fmt::Write;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Malformed template text
    #[error("template syntax error at byte {offset}: {message}")]
    Compile { offset: usize, message: String },

    /// Undefined variable, missing key, or unprintable value
    #[error("cannot evaluate {path}: {message}")]
    Binding { path: String, message: String },
}

fn compile_error(offset: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Compile {
        offset,
        message: message.into(),
    }
}

fn binding_error(path: impl fmt::Display, message: impl Into<String>) -> TemplateError {
    TemplateError::Binding {
        path: path.to_string(),
        message: message.into(),
    }
}

/// A compiled rule template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Print(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path(Path),
    Str(String),
    Int(i64),
    Bool(bool),
    Index(Box<Expr>, Vec<Key>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Key {
    Str(String),
    Int(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s:?}"),
            Key::Int(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Path(Vec<String>);

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Path(path) => fmt::Display::fmt(path, f),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Index(target, keys) => {
                write!(f, "index {target}")?;
                for key in keys {
                    write!(f, " {key}")?;
                }
                Ok(())
            }
            Expr::Not(inner) => write!(f, "not {inner}"),
        }
    }
}

impl Template {
    /// Compiles template text.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Compile`] for unterminated actions, unknown
    /// functions, unbalanced `if`/`else`/`end`, or bad literals.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let pieces = lex(source)?;
        let mut parser = Parser {
            pieces: pieces.into_iter(),
        };
        let (nodes, stop) = parser.parse_list()?;
        match stop {
            Stop::Eof => Ok(Self { nodes }),
            Stop::End(offset) => Err(compile_error(offset, "unexpected {{end}}")),
            Stop::Else(_, offset) => Err(compile_error(offset, "unexpected {{else}}")),
        }
    }

    /// Renders against `scope`, returning the output only if every lookup resolved.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Binding`] on the first unresolved lookup.
    pub fn render(&self, scope: &dyn Fields) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_nodes(&self.nodes, scope, &mut out)?;
        Ok(out)
    }
}

/// Compiles and renders `source` in one go.
///
/// # Errors
///
/// Any compile or binding error.
pub fn render(source: &str, scope: &dyn Fields) -> Result<String, TemplateError> {
    Template::parse(source)?.render(scope)
}

// ═══════════════════════════════════════════════════════════════════════════
// Lexing
// ═══════════════════════════════════════════════════════════════════════════

enum Piece {
    Text(String),
    Action { body: String, offset: usize },
}

fn lex(source: &str) -> Result<Vec<Piece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = source;
    let mut consumed = 0;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let offset = consumed + open;
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }

        let mut inner = &rest[open + 2..];
        let trim_left = inner.starts_with("- ")
            || inner.starts_with("-\t")
            || inner.starts_with("-\n");
        if trim_left {
            text = text.trim_end();
            inner = &inner[1..];
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }

        let close = find_close(inner).ok_or_else(|| compile_error(offset, "unclosed action"))?;
        let mut body = &inner[..close];
        trim_next = body.ends_with(" -") || body.ends_with("\t-") || body.ends_with("\n-");
        if trim_next {
            body = &body[..body.len() - 1];
        }
        pieces.push(Piece::Action {
            body: body.trim().to_string(),
            offset,
        });

        let advance = (rest.len() - inner.len()) + close + 2;
        consumed += advance;
        rest = &rest[advance..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        pieces.push(Piece::Text(tail.to_string()));
    }
    Ok(pieces)
}

/// Finds the closing `}}` of an action, skipping over string literals
fn find_close(inner: &str) -> Option<usize> {
    let bytes = inner.as_bytes();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Int(i64),
    Open,
    Close,
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other @ ('"' | '\\')) => s.push(other),
                            Some(other) => {
                                return Err(compile_error(
                                    offset,
                                    format!("unknown escape sequence \\{other}"),
                                ));
                            }
                            None => return Err(compile_error(offset, "unterminated string")),
                        },
                        Some(other) => s.push(other),
                        None => return Err(compile_error(offset, "unterminated string")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let first = word.chars().next().unwrap_or_default();
                if first.is_ascii_digit() || (first == '-' && word.len() > 1) {
                    let n = word
                        .parse::<i64>()
                        .map_err(|_| compile_error(offset, format!("bad number {word:?}")))?;
                    tokens.push(Token::Int(n));
                } else {
                    tokens.push(Token::Word(word));
                }
            }
        }
    }
    Ok(tokens)
}

// ═══════════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════════

enum Stop {
    Eof,
    End(usize),
    Else(Option<Expr>, usize),
}

struct Parser {
    pieces: std::vec::IntoIter<Piece>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            let (body, offset) = match piece {
                Piece::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Piece::Action { body, offset } => (body, offset),
            };

            if body.starts_with("/*") {
                if !body.ends_with("*/") {
                    return Err(compile_error(offset, "unclosed comment"));
                }
                continue;
            }

            let mut tokens = tokenize(&body, offset)?;
            match tokens.first() {
                None => return Err(compile_error(offset, "missing value for command")),
                Some(Token::Word(w)) if w == "if" => {
                    tokens.remove(0);
                    let cond = parse_expr(tokens, offset)?;
                    nodes.push(self.parse_if(cond, offset)?);
                }
                Some(Token::Word(w)) if w == "else" => {
                    tokens.remove(0);
                    let next = match tokens.first() {
                        None => None,
                        Some(Token::Word(w)) if w == "if" => {
                            tokens.remove(0);
                            Some(parse_expr(tokens, offset)?)
                        }
                        Some(_) => {
                            return Err(compile_error(offset, "unexpected tokens after else"));
                        }
                    };
                    return Ok((nodes, Stop::Else(next, offset)));
                }
                Some(Token::Word(w)) if w == "end" => {
                    if tokens.len() > 1 {
                        return Err(compile_error(offset, "unexpected tokens after end"));
                    }
                    return Ok((nodes, Stop::End(offset)));
                }
                Some(_) => nodes.push(Node::Print(parse_expr(tokens, offset)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn parse_if(&mut self, first: Expr, offset: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = first;
        loop {
            let (body, stop) = self.parse_list()?;
            match stop {
                Stop::Else(Some(next), _) => {
                    branches.push((cond, body));
                    cond = next;
                }
                Stop::Else(None, _) => {
                    branches.push((cond, body));
                    let (otherwise, stop) = self.parse_list()?;
                    return match stop {
                        Stop::End(_) => Ok(Node::If {
                            branches,
                            otherwise,
                        }),
                        Stop::Else(_, at) => Err(compile_error(at, "{{else}} after {{else}}")),
                        Stop::Eof => Err(compile_error(offset, "unclosed {{if}}")),
                    };
                }
                Stop::End(_) => {
                    branches.push((cond, body));
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Stop::Eof => return Err(compile_error(offset, "unclosed {{if}}")),
            }
        }
    }
}

fn parse_expr(tokens: Vec<Token>, offset: usize) -> Result<Expr, TemplateError> {
    let mut tokens = tokens.into_iter().peekable();
    let expr = parse_command(&mut tokens, offset)?;
    if let Some(extra) = tokens.next() {
        return Err(compile_error(offset, format!("unexpected {extra:?}")));
    }
    Ok(expr)
}

type Tokens = std::iter::Peekable<std::vec::IntoIter<Token>>;

fn parse_command(tokens: &mut Tokens, offset: usize) -> Result<Expr, TemplateError> {
    match tokens.peek() {
        Some(Token::Word(w)) if w == "index" => {
            tokens.next();
            let target = parse_operand(tokens, offset)?;
            let mut keys = Vec::new();
            while let Some(token) = tokens.next_if(|t| !matches!(t, Token::Close)) {
                match token {
                    Token::Str(s) => keys.push(Key::Str(s)),
                    Token::Int(n) => keys.push(Key::Int(n)),
                    other => {
                        return Err(compile_error(
                            offset,
                            format!("index keys must be literals, got {other:?}"),
                        ));
                    }
                }
            }
            if keys.is_empty() {
                return Err(compile_error(offset, "index needs at least one key"));
            }
            Ok(Expr::Index(Box::new(target), keys))
        }
        Some(Token::Word(w)) if w == "not" => {
            tokens.next();
            Ok(Expr::Not(Box::new(parse_operand(tokens, offset)?)))
        }
        _ => parse_operand(tokens, offset),
    }
}

fn parse_operand(tokens: &mut Tokens, offset: usize) -> Result<Expr, TemplateError> {
    match tokens.next() {
        Some(Token::Open) => {
            let inner = parse_command(tokens, offset)?;
            match tokens.next() {
                Some(Token::Close) => Ok(inner),
                _ => Err(compile_error(offset, "unclosed (")),
            }
        }
        Some(Token::Str(s)) => Ok(Expr::Str(s)),
        Some(Token::Int(n)) => Ok(Expr::Int(n)),
        Some(Token::Word(w)) if w == "true" => Ok(Expr::Bool(true)),
        Some(Token::Word(w)) if w == "false" => Ok(Expr::Bool(false)),
        Some(Token::Word(w)) if w.starts_with('.') => parse_path(&w, offset).map(Expr::Path),
        Some(Token::Word(w)) => Err(compile_error(
            offset,
            format!("function {w:?} not defined"),
        )),
        Some(Token::Close) => Err(compile_error(offset, "unexpected )")),
        None => Err(compile_error(offset, "missing operand")),
    }
}

fn parse_path(word: &str, offset: usize) -> Result<Path, TemplateError> {
    if word == "." {
        return Ok(Path(Vec::new()));
    }
    let segments: Vec<String> = word[1..].split('.').map(str::to_string).collect();
    for segment in &segments {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(compile_error(offset, format!("bad field path {word:?}")));
        }
    }
    Ok(Path(segments))
}

// ═══════════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════════

fn render_nodes(nodes: &[Node], scope: &dyn Fields, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Print(expr) => print_value(expr, eval(expr, scope)?, out)?,
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if eval(cond, scope)?.is_truthy() {
                        render_nodes(body, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, scope, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval<'s>(expr: &'s Expr, scope: &'s dyn Fields) -> Result<Value<'s>, TemplateError> {
    match expr {
        Expr::Path(path) => {
            let mut value = Value::Record(scope);
            for (depth, segment) in path.0.iter().enumerate() {
                let at = Path(path.0[..=depth].to_vec());
                value = lookup(value, segment)
                    .map_err(|message| binding_error(&at, message))?
                    .ok_or_else(|| binding_error(&at, missing_message(value, segment)))?;
            }
            Ok(value)
        }
        Expr::Str(s) => Ok(Value::Str(s)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, scope)?.is_truthy())),
        Expr::Index(target, keys) => {
            let mut value = eval(target, scope)?;
            for key in keys {
                value = index(value, key).map_err(|message| binding_error(expr, message))?;
            }
            Ok(value)
        }
    }
}

/// Strict field lookup. `Ok(None)` means the field or key doesn't exist.
fn lookup<'s>(value: Value<'s>, name: &str) -> Result<Option<Value<'s>>, String> {
    match value {
        Value::Record(record) => Ok(record.field(name)),
        Value::Vars(vars) => Ok(vars.get(name).map(Value::Json)),
        Value::Json(serde_json::Value::Object(map)) => Ok(map.get(name).map(Value::Json)),
        Value::Null | Value::Json(serde_json::Value::Null) => {
            Err(format!("nil value has no field {name:?}"))
        }
        other => Err(format!("can't evaluate field {name:?} in type {}", other.type_name())),
    }
}

fn missing_message(value: Value<'_>, name: &str) -> String {
    match value {
        Value::Record(_) => format!("no field or key {name:?}"),
        _ => format!("map has no key {name:?}"),
    }
}

/// Lenient lookup for `index`: a missing key yields nil
fn index<'s>(value: Value<'s>, key: &Key) -> Result<Value<'s>, String> {
    match (value, key) {
        (Value::Json(serde_json::Value::Array(items)), Key::Int(n)) => usize::try_from(*n)
            .ok()
            .and_then(|i| items.get(i))
            .map(Value::Json)
            .ok_or_else(|| format!("index {n} out of range")),
        (Value::Hosts(hosts), Key::Int(n)) => usize::try_from(*n)
            .ok()
            .and_then(|i| hosts.get(i))
            .map(|h| Value::Str(h))
            .ok_or_else(|| format!("index {n} out of range")),
        (Value::Null | Value::Json(serde_json::Value::Null), _) => {
            Err(format!("index of nil value with key {key}"))
        }
        (value, Key::Str(name)) => Ok(lookup(value, name)?.unwrap_or(Value::Null)),
        (value, Key::Int(_)) => Err(format!(
            "can't index {} with an integer",
            value.type_name()
        )),
    }
}

fn print_value(expr: &Expr, value: Value<'_>, out: &mut String) -> Result<(), TemplateError> {
    match value {
        Value::Null => return Err(binding_error(expr, "value is nil")),
        Value::Record(_) => return Err(binding_error(expr, "can't print a record")),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Str(s) => out.push_str(s),
        Value::Hosts(hosts) => out.push_str(&hosts.join(" ")),
        Value::Vars(vars) => {
            let json = serde_json::to_string(vars).map_err(|e| binding_error(expr, e.to_string()))?;
            out.push_str(&json);
        }
        Value::Json(json) => match json {
            serde_json::Value::Null => return Err(binding_error(expr, "value is nil")),
            serde_json::Value::String(s) => out.push_str(s),
            serde_json::Value::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            serde_json::Value::Number(n) => {
                let _ = write!(out, "{n}");
            }
            other => {
                let _ = write!(out, "{other}");
            }
        },
    }
    Ok(())
}
