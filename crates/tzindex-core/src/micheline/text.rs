//! Michelson source notation: a line-width aware formatter and the matching
//! expression parser.

use num_bigint::BigInt;

use crate::errors::{EngineError, EngineResult};
use crate::micheline::node::Node;
use crate::micheline::primitives::is_known;
use crate::query::guards::{DEFAULT_LINE_SIZE, DEFAULT_MAX_DEPTH};

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render a node on a single line.
pub fn format_inline(node: &Node) -> String {
    let mut out = String::new();
    write_inline(node, true, &mut out);
    out
}

/// Render a node, breaking applications and sequences that do not fit into
/// `line_size` columns.
pub fn format_michelson(node: &Node, line_size: usize) -> String {
    let mut out = String::new();
    write_block(node, true, 0, line_size, &mut out);
    out
}

/// [`format_michelson`] with the default line width.
pub fn format_default(node: &Node) -> String {
    format_michelson(node, DEFAULT_LINE_SIZE)
}

fn needs_parens(node: &Node, top: bool) -> bool {
    match node {
        Node::Prim { args, annots, .. } => !top && (!args.is_empty() || !annots.is_empty()),
        _ => false,
    }
}

fn write_inline(node: &Node, top: bool, out: &mut String) {
    match node {
        Node::Int(value) => out.push_str(&value.to_string()),
        Node::String(value) => write_quoted(value, out),
        Node::Bytes(value) => {
            out.push_str("0x");
            out.push_str(&hex::encode(value));
        }
        Node::Seq(items) => {
            if items.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(" ; ");
                }
                write_inline(item, true, out);
            }
            out.push_str(" }");
        }
        Node::Prim { prim, args, annots } => {
            let parens = needs_parens(node, top);
            if parens {
                out.push('(');
            }
            out.push_str(prim);
            for annot in annots {
                out.push(' ');
                out.push_str(annot);
            }
            for arg in args {
                out.push(' ');
                write_inline(arg, false, out);
            }
            if parens {
                out.push(')');
            }
        }
    }
}

fn write_block(node: &Node, top: bool, indent: usize, line_size: usize, out: &mut String) {
    let inline = {
        let mut s = String::new();
        write_inline(node, top, &mut s);
        s
    };
    if indent + inline.len() <= line_size {
        out.push_str(&inline);
        return;
    }
    match node {
        Node::Seq(items) if !items.is_empty() => {
            out.push_str("{ ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(" ;\n");
                    push_indent(indent + 2, out);
                }
                write_block(item, true, indent + 2, line_size, out);
            }
            out.push_str(" }");
        }
        Node::Prim { prim, args, annots } if !args.is_empty() => {
            let parens = needs_parens(node, top);
            let inner = if parens { indent + 1 } else { indent };
            if parens {
                out.push('(');
            }
            out.push_str(prim);
            for annot in annots {
                out.push(' ');
                out.push_str(annot);
            }
            for arg in args {
                out.push('\n');
                push_indent(inner + 2, out);
                write_block(arg, false, inner + 2, line_size, out);
            }
            if parens {
                out.push(')');
            }
        }
        _ => out.push_str(&inline),
    }
}

fn push_indent(width: usize, out: &mut String) {
    out.extend(std::iter::repeat(' ').take(width));
}

fn write_quoted(value: &str, out: &mut String) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            other => out.push(other),
        }
    }
    out.push('"');
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Semi,
    Int(BigInt),
    Str(String),
    Bytes(Vec<u8>),
    Ident(String),
    Annot(String),
}

/// Parse one Michelson expression (type, value or code) into a node.
pub fn parse_expr(source: &str) -> EngineResult<Node> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        max_depth: DEFAULT_MAX_DEPTH,
    };
    let node = parser.application(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::malformed(format!(
            "unexpected token {:?} after expression",
            parser.tokens[parser.pos]
        )));
    }
    Ok(node)
}

fn tokenize(source: &str) -> EngineResult<Vec<(Token, usize)>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push((Token::LParen, offset));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, offset));
                i += 1;
            }
            '{' => {
                tokens.push((Token::LBrace, offset));
                i += 1;
            }
            '}' => {
                tokens.push((Token::RBrace, offset));
                i += 1;
            }
            ';' => {
                tokens.push((Token::Semi, offset));
                i += 1;
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&(_, c)) = chars.get(i) else {
                        return Err(EngineError::malformed(format!(
                            "unterminated string starting at {offset}"
                        )));
                    };
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let Some(&(_, escaped)) = chars.get(i) else {
                                return Err(EngineError::malformed("dangling escape"));
                            };
                            i += 1;
                            value.push(match escaped {
                                'n' => '\n',
                                'r' => '\r',
                                't' => '\t',
                                'b' => '\u{8}',
                                '"' => '"',
                                '\\' => '\\',
                                other => {
                                    return Err(EngineError::malformed(format!(
                                        "invalid escape \\{other} in string at {offset}"
                                    )))
                                }
                            });
                        }
                        other => value.push(other),
                    }
                }
                tokens.push((Token::Str(value), offset));
            }
            '0' if chars.get(i + 1).map(|c| c.1) == Some('x') => {
                i += 2;
                let start = i;
                while i < chars.len() && chars[i].1.is_ascii_hexdigit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().map(|c| c.1).collect();
                let bytes = hex::decode(&digits)
                    .map_err(|e| EngineError::malformed(format!("invalid bytes at {offset}: {e}")))?;
                tokens.push((Token::Bytes(bytes), offset));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().map(|c| c.1).collect();
                let value: BigInt = digits
                    .parse()
                    .map_err(|_| EngineError::malformed(format!("invalid int {digits:?} at {offset}")))?;
                tokens.push((Token::Int(value), offset));
            }
            '%' | '@' | ':' => {
                let start = i;
                i += 1;
                while i < chars.len() && is_annot_char(chars[i].1) {
                    i += 1;
                }
                let annot: String = chars[start..i].iter().map(|c| c.1).collect();
                tokens.push((Token::Annot(annot), offset));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().map(|c| c.1).collect();
                tokens.push((Token::Ident(ident), offset));
            }
            other => {
                return Err(EngineError::malformed(format!(
                    "unexpected character {other:?} at {offset}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn is_annot_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '%' | '@')
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> EngineResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| EngineError::malformed("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(usize::MAX)
    }

    fn check_prim(&self, name: &str) -> EngineResult<()> {
        if is_known(name) {
            Ok(())
        } else {
            Err(EngineError::malformed(format!("unknown primitive {name}")))
        }
    }

    /// A primitive applied to its annotations and arguments, or any atom.
    fn application(&mut self, depth: usize) -> EngineResult<Node> {
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let Some(Token::Ident(name)) = self.peek().cloned() else {
            return self.atom(depth);
        };
        self.check_prim(&name)?;
        self.pos += 1;
        let mut annots = Vec::new();
        while let Some(Token::Annot(annot)) = self.peek().cloned() {
            annots.push(annot);
            self.pos += 1;
        }
        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::RParen | Token::RBrace | Token::Semi) {
                break;
            }
            args.push(self.atom(depth + 1)?);
        }
        Ok(Node::Prim {
            prim: name,
            args,
            annots,
        })
    }

    /// An argument position: bare primitives take no arguments here.
    fn atom(&mut self, depth: usize) -> EngineResult<Node> {
        if depth >= self.max_depth {
            return Err(EngineError::DepthExceeded(self.max_depth));
        }
        let offset = self.offset();
        match self.next()? {
            Token::Int(value) => Ok(Node::Int(value)),
            Token::Str(value) => Ok(Node::String(value)),
            Token::Bytes(value) => Ok(Node::Bytes(value)),
            Token::Ident(name) => {
                self.check_prim(&name)?;
                Ok(Node::prim(&name))
            }
            Token::LParen => {
                let inner = self.application(depth + 1)?;
                match self.next()? {
                    Token::RParen => Ok(inner),
                    other => Err(EngineError::malformed(format!(
                        "expected ')' but found {other:?}"
                    ))),
                }
            }
            Token::LBrace => {
                let mut items = Vec::new();
                loop {
                    if self.peek() == Some(&Token::RBrace) {
                        self.pos += 1;
                        break;
                    }
                    items.push(self.application(depth + 1)?);
                    match self.next()? {
                        Token::Semi => continue,
                        Token::RBrace => break,
                        other => {
                            return Err(EngineError::malformed(format!(
                                "expected ';' or '}}' but found {other:?}"
                            )))
                        }
                    }
                }
                Ok(Node::Seq(items))
            }
            other => Err(EngineError::malformed(format!(
                "unexpected token {other:?} at {offset}"
            ))),
        }
    }
}
