//! Lexer for the inside of a `{{ ... }}` code block using logos

use logos::Logos;

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

const ESCAPE_CHAR: char = '\\';

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    #[token(".")]
    Dot,
    #[token("=")]
    Equals,

    /// `$name`; an empty name is rejected by the grammar
    #[regex(r"\$[0-9A-Za-z_]*", |lex| lex.slice()[1..].to_string())]
    Variable(String),

    #[regex(r"[0-9A-Za-z_]+", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#"'([^'\\]|\\(.|\n))*'"#, |lex| unquote(lex.slice()))]
    SingleQuoted(String),

    #[regex(r#""([^"\\]|\\(.|\n))*""#, |lex| unquote(lex.slice()))]
    DoubleQuoted(String),
}

/// Strip the surrounding quotes and collapse `\'`, `\"` and `\\`.
///
/// Any other backslash is kept as written.
fn unquote(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ESCAPE_CHAR {
            if let Some(&next) = chars.peek() {
                if matches!(next, '\'' | '"' | ESCAPE_CHAR) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Lex the content of one code block into tokens with spans.
///
/// Unlike a free-form lexer this is strict: unknown characters and
/// unterminated literals fail immediately, and two arguments must be
/// separated by whitespace (only `.` and `=` may touch their neighbours).
pub fn lex(input: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let mut tokens: Vec<(Token, Span)> = Vec::new();

    for (tok, span) in Token::lexer(input).spanned() {
        let tok = match tok {
            Ok(tok) => tok,
            Err(()) => {
                let fragment = &input[span.clone()];
                let message = if fragment.starts_with('\'') || fragment.starts_with('"') {
                    "unterminated string literal".to_string()
                } else {
                    format!("unexpected character sequence `{}`", fragment)
                };
                return Err(ParseError::syntax(span, message));
            }
        };

        if let Some((prev, prev_span)) = tokens.last() {
            let touching = prev_span.end == span.start;
            let glued = matches!(prev, Token::Dot | Token::Equals)
                || matches!(tok, Token::Dot | Token::Equals);
            if touching && !glued {
                return Err(ParseError::syntax(
                    prev_span.start..span.end,
                    "arguments must be separated by whitespace",
                ));
            }
        }

        tokens.push((tok, span));
    }

    Ok(tokens)
}
