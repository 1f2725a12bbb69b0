//! Text-level replacement of the parameter blocks in plugin source.
//!
//! Only the brace-delimited literal after `INPUT_PARAMS =` and
//! `OUTPUT_PARAMS =` is rewritten. Braces inside string literals and comments
//! are not counted, and every byte outside the two literals is kept.

use nodecore::plugin::attrs;
use nodecore::ParameterSpec;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

const INDENT_STEP: &str = "    ";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("no `{0} = {{...}}` block found")]
    Missing(String),

    #[error("`{0}` block has no matching closing brace")]
    Unbalanced(String),
}

/// Location of an `ATTR = { ... }` literal
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBlock {
    /// Byte range from the opening brace through the closing brace
    pub braces: Range<usize>,
    /// Leading whitespace of the line holding the assignment
    pub indent: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Code,
    Comment,
    Str { quote: u8, triple: bool },
}

/// Lexical scanner over source bytes. Only ASCII bytes are significant, so
/// multi-byte characters pass through untouched.
struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    state: State,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, start: usize) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: start,
            state: State::Code,
        }
    }

    fn starts_triple(&self, quote: u8) -> bool {
        self.bytes.get(self.pos + 1) == Some(&quote) && self.bytes.get(self.pos + 2) == Some(&quote)
    }

    /// Advance past the byte at `pos`. Returns `false` on a newline inside a
    /// single-quoted string, which cannot be balanced.
    fn step(&mut self) -> bool {
        let b = self.bytes[self.pos];
        match self.state {
            State::Code => match b {
                b'#' => self.state = State::Comment,
                b'"' | b'\'' => {
                    let triple = self.starts_triple(b);
                    self.state = State::Str { quote: b, triple };
                    if triple {
                        self.pos += 2;
                    }
                }
                _ => {}
            },
            State::Comment => {
                if b == b'\n' {
                    self.state = State::Code;
                }
            }
            State::Str { quote, triple } => match b {
                b'\\' => self.pos += 1,
                b'\n' if !triple => return false,
                _ if b == quote => {
                    if !triple {
                        self.state = State::Code;
                    } else if self.starts_triple(quote) {
                        self.pos += 2;
                        self.state = State::Code;
                    }
                }
                _ => {}
            },
        }
        self.pos += 1;
        true
    }
}

/// Whether byte offset `target` of `source` is outside strings and comments
fn is_code_position(source: &str, target: usize) -> bool {
    let mut lexer = Lexer::new(source, 0);
    while lexer.pos < target {
        if !lexer.step() {
            // an unterminated single-quoted string ends at the newline
            lexer.state = State::Code;
            lexer.pos += 1;
        }
    }
    lexer.pos == target && lexer.state == State::Code
}

/// Offset of the brace closing the one at `open`
pub fn matching_brace(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut lexer = Lexer::new(source, open + 1);
    let mut depth = 1usize;
    while lexer.pos < bytes.len() {
        if lexer.state == State::Code {
            match bytes[lexer.pos] {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(lexer.pos);
                    }
                }
                _ => {}
            }
        }
        if !lexer.step() {
            return None;
        }
    }
    None
}

/// Find the `name = { ... }` assignment in `source`
pub fn find_block(source: &str, name: &str) -> Result<ParamBlock, BlockError> {
    let pattern = format!(
        r"(?m)^([ \t]*){}[ \t]*(?::[^=\n]*)?=[ \t]*\{{",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).map_err(|_| BlockError::Missing(name.to_string()))?;

    for caps in re.captures_iter(source) {
        let (Some(whole), Some(indent)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !is_code_position(source, whole.start()) {
            continue;
        }
        let open = whole.end() - 1;
        let close =
            matching_brace(source, open).ok_or_else(|| BlockError::Unbalanced(name.to_string()))?;
        return Ok(ParamBlock {
            braces: open..close + 1,
            indent: indent.as_str().to_string(),
        });
    }
    Err(BlockError::Missing(name.to_string()))
}

/// Replace both parameter blocks. Either both are replaced or the error is
/// returned and nothing is.
pub fn rewrite_parameters(
    source: &str,
    inputs: &BTreeMap<String, ParameterSpec>,
    outputs: &BTreeMap<String, ParameterSpec>,
) -> Result<String, BlockError> {
    let input_block = find_block(source, attrs::INPUT_PARAMS)?;
    let output_block = find_block(source, attrs::OUTPUT_PARAMS)?;

    // splice the later block first so the earlier range stays valid
    let (first, second) = if input_block.braces.start > output_block.braces.start {
        ((input_block, inputs), (output_block, outputs))
    } else {
        ((output_block, outputs), (input_block, inputs))
    };
    let source = splice(source, &first.0, first.1);
    Ok(splice(&source, &second.0, second.1))
}

fn splice(source: &str, block: &ParamBlock, params: &BTreeMap<String, ParameterSpec>) -> String {
    let rendered = render_params(params, &block.indent);
    let mut out = String::with_capacity(source.len() + rendered.len());
    out.push_str(&source[..block.braces.start]);
    out.push_str(&rendered);
    out.push_str(&source[block.braces.end..]);
    out
}

/// Render a parameter dict literal whose closing brace sits at `indent`
pub fn render_params(params: &BTreeMap<String, ParameterSpec>, indent: &str) -> String {
    if params.is_empty() {
        return "{}".to_string();
    }
    let entry_indent = format!("{}{}", indent, INDENT_STEP);
    let field_indent = format!("{}{}", entry_indent, INDENT_STEP);

    let entries: Vec<String> = params
        .iter()
        .map(|(name, spec)| {
            let mut fields = vec![
                format!("{}is_streaming={}", field_indent, py_bool(spec.is_streaming)),
                format!("{}schema={}", field_indent, to_source_literal(&spec.schema)),
            ];
            if !spec.description.is_empty() {
                fields.push(format!(
                    "{}description={}",
                    field_indent,
                    to_source_literal(&Value::String(spec.description.clone()))
                ));
            }
            format!(
                "{}{}: ParameterSchema(\n{}\n{})",
                entry_indent,
                to_source_literal(&Value::String(name.clone())),
                fields.join(",\n"),
                entry_indent
            )
        })
        .collect();

    format!("{{\n{}\n{}}}", entries.join(",\n"), indent)
}

/// Render a JSON value as a literal of the plugin source language
pub fn to_source_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => py_bool(*b).to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s)),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(to_source_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!(
                    "{}: {}",
                    to_source_literal(&Value::String(k.clone())),
                    to_source_literal(v)
                ))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}
