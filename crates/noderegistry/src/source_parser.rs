//! Static reader for plugin source files.
//!
//! Plugin sources are class-based definitions in the engine's scripting
//! language. This module never executes them: it tokenizes the file, groups
//! tokens into logical lines, and evaluates only what the registry needs:
//! imports, class headers, decorators, docstrings and class-level
//! assignments whose right-hand side is a literal expression. Method bodies
//! are skipped.

use nodecore::plugin::{DECLARED_ID_ATTR, REGISTRATION_MARKER};
use nodecore::{AttrValue, PluginType};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Str(String),
    Num(String),
    Op(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

#[derive(Debug)]
struct LogicalLine {
    indent: usize,
    line: usize,
    tokens: Vec<Token>,
}

/// Parse `source` and return every type the module defines or imports.
///
/// Defined classes carry `module_name` as their namespace; imported names
/// carry the namespace they were imported from.
pub fn parse_module(source: &str, module_name: &str) -> Result<Vec<PluginType>, ParseError> {
    let lines = tokenize(source)?;
    let mut types: Vec<PluginType> = Vec::new();
    let mut constants: HashMap<String, AttrValue> = HashMap::new();
    let mut decorators: Vec<AttrValue> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        let first = &line.tokens[0].tok;

        // bodies of top-level functions and control flow
        if line.indent > 0 {
            i += 1;
            continue;
        }

        if is_op(first, "@") {
            if let Ok(value) = parse_full_expr(&line.tokens[1..]) {
                decorators.push(value);
            }
            i += 1;
            continue;
        }

        if is_keyword(first, "class") {
            let end = block_end(&lines, i);
            let ty = parse_class(&lines[i..end], module_name, &decorators, &constants)?;
            types.retain(|t| t.name != ty.name);
            types.push(ty);
            decorators.clear();
            i = end;
            continue;
        }
        decorators.clear();

        if is_keyword(first, "from") || is_keyword(first, "import") {
            for (name, module) in parse_import(&line.tokens) {
                types.retain(|t| t.name != name);
                types.push(PluginType::new(name, module));
            }
        } else if let Some((name, value)) = parse_assignment(&line.tokens) {
            constants.insert(name, value);
        }
        i += 1;
    }

    Ok(types)
}

// Index of the first line after the block opened by `lines[start]`
fn block_end(lines: &[LogicalLine], start: usize) -> usize {
    let indent = lines[start].indent;
    let mut end = start + 1;
    while end < lines.len() && lines[end].indent > indent {
        end += 1;
    }
    end
}

fn parse_class(
    lines: &[LogicalLine],
    module_name: &str,
    decorators: &[AttrValue],
    constants: &HashMap<String, AttrValue>,
) -> Result<PluginType, ParseError> {
    let header = &lines[0];
    let name = match header.tokens.get(1).map(|t| &t.tok) {
        Some(Tok::Name(name)) => name.clone(),
        _ => return Err(ParseError::new(header.line, "expected class name")),
    };
    let mut ty = PluginType::new(name, module_name);
    ty.bases = parse_bases(&header.tokens[2..]);

    for decorator in decorators {
        if let Some(id) = registration_id(decorator) {
            ty.set_attr(DECLARED_ID_ATTR, AttrValue::Str(id));
        }
    }

    let body = &lines[1..];
    let Some(body_indent) = body.first().map(|l| l.indent) else {
        return Ok(ty);
    };

    for (index, line) in body.iter().enumerate() {
        if line.indent != body_indent {
            continue;
        }
        let tokens = &line.tokens;

        if index == 0 && tokens.iter().all(|t| matches!(t.tok, Tok::Str(_))) {
            let doc: String = tokens
                .iter()
                .filter_map(|t| match &t.tok {
                    Tok::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            ty.doc = Some(doc);
            continue;
        }

        if let Some((attr, value)) = parse_assignment(tokens) {
            ty.set_attr(attr, resolve_names(value, constants));
        }
    }

    Ok(ty)
}

fn parse_bases(tokens: &[Token]) -> Vec<String> {
    let mut bases = Vec::new();
    if !tokens.first().map_or(false, |t| is_op(&t.tok, "(")) {
        return bases;
    }
    let Some(close) = matching_close(tokens, 0) else {
        return bases;
    };
    for arg in split_top_level(&tokens[1..close]) {
        // keyword arguments such as `metaclass=...` are not bases
        if arg.len() >= 2 && is_op(&arg[1].tok, "=") {
            continue;
        }
        if let Ok(AttrValue::Name(dotted)) = parse_full_expr(arg) {
            let base = dotted.rsplit('.').next().unwrap_or(&dotted).to_string();
            bases.push(base);
        }
    }
    bases
}

fn registration_id(decorator: &AttrValue) -> Option<String> {
    let AttrValue::Call { args, kwargs, .. } = decorator else {
        return None;
    };
    if decorator.callee() != Some(REGISTRATION_MARKER) {
        return None;
    }
    args.first()
        .or_else(|| {
            kwargs
                .iter()
                .find(|(k, _)| k == "node_id" || k == "id")
                .map(|(_, v)| v)
        })
        .and_then(AttrValue::as_str)
        .map(str::to_string)
}

/// `(name, module)` pairs introduced by an import statement
fn parse_import(tokens: &[Token]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if is_keyword(&tokens[0].tok, "from") {
        let Some(import_at) = tokens.iter().position(|t| is_keyword(&t.tok, "import")) else {
            return out;
        };
        let module = dotted_text(&tokens[1..import_at]);
        let names: Vec<&Token> = tokens[import_at + 1..]
            .iter()
            .filter(|t| !is_op(&t.tok, "(") && !is_op(&t.tok, ")"))
            .collect();
        let mut j = 0;
        while j < names.len() {
            if let Tok::Name(name) = &names[j].tok {
                let mut bound = name.clone();
                if j + 2 < names.len() && is_keyword(&names[j + 1].tok, "as") {
                    if let Tok::Name(alias) = &names[j + 2].tok {
                        bound = alias.clone();
                    }
                    j += 2;
                }
                if name != "*" {
                    out.push((bound, module.clone()));
                }
            }
            j += 1;
        }
    }
    out
}

fn dotted_text(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match &t.tok {
            Tok::Name(s) | Tok::Op(s) | Tok::Num(s) | Tok::Str(s) => s.as_str(),
        })
        .collect()
}

/// `NAME = <literal>` or `NAME: <annotation> = <literal>`
fn parse_assignment(tokens: &[Token]) -> Option<(String, AttrValue)> {
    let Tok::Name(target) = &tokens.first()?.tok else {
        return None;
    };
    if is_reserved(target) {
        return None;
    }
    let second = &tokens.get(1)?.tok;
    if !is_op(second, "=") && !is_op(second, ":") {
        return None;
    }
    let eq = top_level_position(tokens, "=")?;
    let value = parse_full_expr(&tokens[eq + 1..]).ok()?;
    Some((target.clone(), value))
}

fn resolve_names(value: AttrValue, constants: &HashMap<String, AttrValue>) -> AttrValue {
    match value {
        AttrValue::Name(name) => constants.get(&name).cloned().unwrap_or(AttrValue::Name(name)),
        AttrValue::List(items) => {
            AttrValue::List(items.into_iter().map(|v| resolve_names(v, constants)).collect())
        }
        AttrValue::Dict(items) => AttrValue::Dict(
            items
                .into_iter()
                .map(|(k, v)| (k, resolve_names(v, constants)))
                .collect(),
        ),
        AttrValue::Call {
            callee,
            args,
            kwargs,
        } => AttrValue::Call {
            callee,
            args: args.into_iter().map(|v| resolve_names(v, constants)).collect(),
            kwargs: kwargs
                .into_iter()
                .map(|(k, v)| (k, resolve_names(v, constants)))
                .collect(),
        },
        other => other,
    }
}

fn is_op(tok: &Tok, op: &str) -> bool {
    matches!(tok, Tok::Op(o) if o == op)
}

fn is_keyword(tok: &Tok, keyword: &str) -> bool {
    matches!(tok, Tok::Name(n) if n == keyword)
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "def" | "async" | "class" | "if" | "elif" | "else" | "for" | "while" | "try" | "except"
            | "finally" | "with" | "return" | "pass" | "import" | "from" | "raise" | "del"
            | "global" | "nonlocal" | "assert" | "lambda" | "yield" | "await"
    )
}

fn bracket_delta(tok: &Tok) -> i32 {
    match tok {
        Tok::Op(o) if o == "(" || o == "[" || o == "{" => 1,
        Tok::Op(o) if o == ")" || o == "]" || o == "}" => -1,
        _ => 0,
    }
}

fn top_level_position(tokens: &[Token], op: &str) -> Option<usize> {
    let mut depth = 0;
    for (i, t) in tokens.iter().enumerate() {
        if depth == 0 && is_op(&t.tok, op) {
            return Some(i);
        }
        depth += bracket_delta(&t.tok);
    }
    None
}

fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        depth += bracket_delta(&t.tok);
        if depth == 0 {
            return Some(i);
        }
    }
    None
}

fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        if depth == 0 && is_op(&t.tok, ",") {
            if i > start {
                parts.push(&tokens[start..i]);
            }
            start = i + 1;
        }
        depth += bracket_delta(&t.tok);
    }
    if start < tokens.len() {
        parts.push(&tokens[start..]);
    }
    parts
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

fn parse_full_expr(tokens: &[Token]) -> Result<AttrValue, ParseError> {
    let line = tokens.first().map_or(0, |t| t.line);
    let mut parser = ExprParser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(ParseError::new(line, "unsupported expression"));
    }
    Ok(value)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line(), message)
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek().map_or(false, |t| is_op(t, op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ParseError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expr(&mut self) -> Result<AttrValue, ParseError> {
        let mut value = self.unary()?;
        loop {
            if self.eat(".") {
                let Some(Tok::Name(attr)) = self.peek() else {
                    return Err(self.error("expected attribute name"));
                };
                self.pos += 1;
                value = match value {
                    AttrValue::Name(base) => AttrValue::Name(format!("{}.{}", base, attr)),
                    _ => return Err(self.error("unsupported attribute access")),
                };
            } else if self.peek().map_or(false, |t| is_op(t, "(")) {
                let AttrValue::Name(callee) = value else {
                    return Err(self.error("unsupported call target"));
                };
                self.pos += 1;
                let (args, kwargs) = self.call_args()?;
                value = AttrValue::Call {
                    callee,
                    args,
                    kwargs,
                };
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<AttrValue, ParseError> {
        if self.eat("-") {
            return match self.unary()? {
                AttrValue::Int(i) => Ok(AttrValue::Int(-i)),
                AttrValue::Float(f) => Ok(AttrValue::Float(-f)),
                _ => Err(self.error("unsupported unary operand")),
            };
        }
        if self.eat("+") {
            return self.unary();
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<AttrValue, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(self.error("unexpected end of expression"));
        };
        match tok {
            Tok::Str(_) => {
                let mut text = String::new();
                while let Some(Tok::Str(s)) = self.peek() {
                    text.push_str(s);
                    self.pos += 1;
                }
                Ok(AttrValue::Str(text))
            }
            Tok::Num(n) => {
                self.pos += 1;
                parse_number(n).ok_or_else(|| self.error(format!("invalid number '{}'", n)))
            }
            Tok::Name(n) => {
                self.pos += 1;
                Ok(match n.as_str() {
                    "True" => AttrValue::Bool(true),
                    "False" => AttrValue::Bool(false),
                    "None" => AttrValue::None,
                    _ => AttrValue::Name(n.clone()),
                })
            }
            Tok::Op(o) if o == "(" => {
                self.pos += 1;
                let items = self.sequence(")")?;
                if items.len() == 1 && !self.last_was_trailing_comma() {
                    Ok(items.into_iter().next().unwrap_or(AttrValue::None))
                } else {
                    Ok(AttrValue::List(items))
                }
            }
            Tok::Op(o) if o == "[" => {
                self.pos += 1;
                Ok(AttrValue::List(self.sequence("]")?))
            }
            Tok::Op(o) if o == "{" => {
                self.pos += 1;
                self.dict_or_set()
            }
            Tok::Op(o) => Err(self.error(format!("unexpected '{}'", o))),
        }
    }

    fn last_was_trailing_comma(&self) -> bool {
        self.pos >= 2 && is_op(&self.tokens[self.pos - 2].tok, ",")
    }

    fn sequence(&mut self, close: &str) -> Result<Vec<AttrValue>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.expr()?);
            if !self.eat(",") {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn dict_or_set(&mut self) -> Result<AttrValue, ParseError> {
        if self.eat("}") {
            return Ok(AttrValue::Dict(Vec::new()));
        }
        let first = self.expr()?;
        if !self.eat(":") {
            let mut items = vec![first];
            while self.eat(",") {
                if self.eat("}") {
                    return Ok(AttrValue::List(items));
                }
                items.push(self.expr()?);
            }
            self.expect("}")?;
            return Ok(AttrValue::List(items));
        }

        let mut entries = Vec::new();
        let mut key = first;
        loop {
            let value = self.expr()?;
            entries.push((self.dict_key(key)?, value));
            if !self.eat(",") || self.peek().map_or(false, |t| is_op(t, "}")) {
                self.expect("}")?;
                return Ok(AttrValue::Dict(entries));
            }
            key = self.expr()?;
            self.expect(":")?;
        }
    }

    fn dict_key(&self, key: AttrValue) -> Result<String, ParseError> {
        match key {
            AttrValue::Str(s) | AttrValue::Name(s) => Ok(s),
            AttrValue::Int(i) => Ok(i.to_string()),
            AttrValue::Float(f) => Ok(f.to_string()),
            AttrValue::Bool(b) => Ok(if b { "True" } else { "False" }.to_string()),
            _ => Err(self.error("unsupported dict key")),
        }
    }

    fn call_args(&mut self) -> Result<(Vec<AttrValue>, Vec<(String, AttrValue)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        loop {
            if self.eat(")") {
                return Ok((args, kwargs));
            }
            let is_kwarg = matches!(self.peek(), Some(Tok::Name(_)))
                && self
                    .tokens
                    .get(self.pos + 1)
                    .map_or(false, |t| is_op(&t.tok, "="));
            if is_kwarg {
                let Some(Tok::Name(name)) = self.peek() else {
                    return Err(self.error("expected keyword"));
                };
                self.pos += 2;
                kwargs.push((name.clone(), self.expr()?));
            } else {
                args.push(self.expr()?);
            }
            if !self.eat(",") {
                self.expect(")")?;
                return Ok((args, kwargs));
            }
        }
    }
}

fn parse_number(text: &str) -> Option<AttrValue> {
    let clean: String = text.chars().filter(|c| *c != '_').collect();
    let lower = clean.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(AttrValue::Int);
    }
    if let Some(oct) = lower.strip_prefix("0o") {
        return i64::from_str_radix(oct, 8).ok().map(AttrValue::Int);
    }
    if let Some(bin) = lower.strip_prefix("0b") {
        return i64::from_str_radix(bin, 2).ok().map(AttrValue::Int);
    }
    if let Ok(i) = lower.parse::<i64>() {
        return Some(AttrValue::Int(i));
    }
    lower.parse::<f64>().ok().map(AttrValue::Float)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

const MULTI_CHAR_OPS: [&str; 12] = [
    "**", "//", "==", "!=", "<=", ">=", "->", ":=", "+=", "-=", "*=", "/=",
];

fn tokenize(source: &str) -> Result<Vec<LogicalLine>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut lines = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut indent = 0;
    let mut line = 1;
    let mut start_line = 1;
    let mut depth: i32 = 0;
    let mut at_line_start = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if at_line_start {
            let mut col = 0;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t' || chars[i] == '\x0c') {
                col = if chars[i] == '\t' { (col / 8 + 1) * 8 } else { col + 1 };
                i += 1;
            }
            indent = col;
            start_line = line;
            at_line_start = false;
            continue;
        }

        match c {
            '\n' => {
                line += 1;
                i += 1;
                if depth == 0 {
                    if !current.is_empty() {
                        lines.push(LogicalLine {
                            indent,
                            line: start_line,
                            tokens: std::mem::take(&mut current),
                        });
                    }
                    at_line_start = true;
                }
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                line += 1;
                i += 2;
            }
            '\\' if chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n') => {
                line += 1;
                i += 3;
            }
            c if c.is_whitespace() => i += 1,
            '"' | '\'' => {
                let (text, next, newlines) = read_string(&chars, i, false, line)?;
                if current.is_empty() {
                    start_line = line;
                }
                current.push(Token {
                    tok: Tok::Str(text),
                    line,
                });
                line += newlines;
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars.get(i).copied();
                if matches!(next, Some('"') | Some('\'')) && is_string_prefix(&word) {
                    let raw = word.to_ascii_lowercase().contains('r');
                    let (text, end, newlines) = read_string(&chars, i, raw, line)?;
                    current.push(Token {
                        tok: Tok::Str(text),
                        line,
                    });
                    line += newlines;
                    i = end;
                } else {
                    current.push(Token {
                        tok: Tok::Name(word),
                        line,
                    });
                }
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() {
                    let d = chars[i];
                    let exponent_sign = (d == '+' || d == '-')
                        && matches!(chars.get(i - 1), Some('e') | Some('E'))
                        && !chars[start..i].iter().any(|x| *x == 'x' || *x == 'X');
                    if d.is_ascii_alphanumeric() || d == '_' || d == '.' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                current.push(Token {
                    tok: Tok::Num(chars[start..i].iter().collect()),
                    line,
                });
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = if MULTI_CHAR_OPS.contains(&two.as_str()) {
                    two
                } else {
                    c.to_string()
                };
                match op.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => {
                        depth -= 1;
                        if depth < 0 {
                            return Err(ParseError::new(line, format!("unmatched '{}'", op)));
                        }
                    }
                    _ => {}
                }
                i += op.chars().count();
                current.push(Token {
                    tok: Tok::Op(op),
                    line,
                });
            }
        }
    }

    if depth != 0 {
        return Err(ParseError::new(line, "unclosed bracket at end of file"));
    }
    if !current.is_empty() {
        lines.push(LogicalLine {
            indent,
            line: start_line,
            tokens: current,
        });
    }
    Ok(lines)
}

fn is_string_prefix(word: &str) -> bool {
    word.len() <= 2
        && word
            .chars()
            .all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'b' | 'u' | 'f'))
}

/// Read a string literal starting at the opening quote `chars[start]`.
/// Returns the decoded text, the index after the closing quote and the
/// number of newlines consumed.
fn read_string(
    chars: &[char],
    start: usize,
    raw: bool,
    line: usize,
) -> Result<(String, usize, usize), ParseError> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = start + if triple { 3 } else { 1 };
    let mut text = String::new();
    let mut newlines = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let Some(&next) = chars.get(i + 1) else {
                break;
            };
            if next == '\n' {
                newlines += 1;
            }
            if raw {
                text.push('\\');
                text.push(next);
            } else {
                match next {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    '\\' | '\'' | '"' => text.push(next),
                    '\n' => {}
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
            }
            i += 2;
            continue;
        }
        if c == quote {
            if !triple {
                return Ok((text, i + 1, newlines));
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((text, i + 3, newlines));
            }
        }
        if c == '\n' {
            if !triple {
                return Err(ParseError::new(line + newlines, "unterminated string literal"));
            }
            newlines += 1;
        }
        text.push(c);
        i += 1;
    }

    Err(ParseError::new(line, "unterminated string literal"))
}
