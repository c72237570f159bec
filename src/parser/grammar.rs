//! Code block parser implementation using chumsky
//!
//! Parses the trimmed interior of one `{{ ... }}` pair:
//!
//! ```text
//! content    ::= value | variable | invocation
//! invocation ::= [identifier "."] identifier (argument)*
//! argument   ::= value | variable | identifier "=" (value | variable)
//! ```

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use indexmap::IndexMap;

use crate::error::ParseError;
use crate::parser::ast::*;
use crate::parser::lexer::{lex, Token};

/// An argument as it appears in the source, before ordering rules are checked
#[derive(Debug, Clone)]
enum CallArgument {
    Positional(Spanned<Argument>),
    Named(Spanned<NamedArgBlock>),
}

/// Grammar output; names and argument order are validated afterwards
#[derive(Debug, Clone)]
enum ParsedCode {
    Value(ValueBlock),
    Variable(Spanned<VariableBlock>),
    Invocation(Spanned<FunctionRef>, Vec<CallArgument>),
}

/// Parse the content of a code block.
///
/// `offset` is the byte position of `code` inside the full template so
/// that every span in the result (and in errors) points into the template.
pub fn parse_code(code: &str, offset: usize) -> Result<Block, ParseError> {
    let tokens = lex(code).map_err(|e| e.offset(offset).in_block(code))?;
    let end = offset + code.len();

    let token_iter = tokens
        .into_iter()
        .map(move |(tok, span)| (tok, (span.start + offset..span.end + offset).into()));

    // Turn the token iterator into a stream that chumsky can use
    let token_stream = Stream::from_iter(token_iter)
        // Split (Token, SimpleSpan) into token and span parts
        .map((end..end).into(), |(t, s): (_, _)| (t, s));

    let parsed = code_parser()
        .parse(token_stream)
        .into_result()
        .map_err(|errs| {
            // No recovery inside a block: report the first problem only
            let err = errs
                .into_iter()
                .next()
                .map(ParseError::from)
                .unwrap_or_else(|| ParseError::syntax(offset..end, "invalid block"));
            err.in_block(code)
        })?;

    into_block(parsed).map_err(|e| e.in_block(code))
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

fn code_parser<'a, I>() -> impl Parser<'a, I, ParsedCode, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    let identifier = select! {
        Token::Ident(s) => Identifier::new(s),
    }
    .map_with(|id, e| Spanned::new(id, span_range(&e.span())));

    let value = select! {
        Token::SingleQuoted(s) => ValueBlock { value: s, quote: '\'' },
        Token::DoubleQuoted(s) => ValueBlock { value: s, quote: '"' },
    };

    let variable = select! {
        Token::Variable(name) => VariableBlock { name: Identifier::new(name) },
    };

    let argument = choice((
        value.clone().map(Argument::Value),
        variable.clone().map(Argument::Variable),
    ))
    .map_with(|arg, e| Spanned::new(arg, span_range(&e.span())));

    let named_arg = identifier
        .clone()
        .then_ignore(just(Token::Equals))
        .then(argument.clone())
        .map_with(|(name, value), e| {
            Spanned::new(NamedArgBlock { name, value }, span_range(&e.span()))
        });

    // `name` or `collection.name`; a second dot fails at `end()`
    let function_ref = identifier
        .clone()
        .then(just(Token::Dot).ignore_then(identifier).or_not())
        .map_with(|(first, second), e| {
            let function = match second {
                Some(name) => FunctionRef {
                    collection: Some(first.node),
                    name: name.node,
                },
                None => FunctionRef {
                    collection: None,
                    name: first.node,
                },
            };
            Spanned::new(function, span_range(&e.span()))
        });

    let call_argument = choice((
        named_arg.map(CallArgument::Named),
        argument.map(CallArgument::Positional),
    ));

    let invocation = function_ref
        .then(call_argument.repeated().collect::<Vec<_>>())
        .map(|(function, arguments)| ParsedCode::Invocation(function, arguments));

    // A bare value or variable must be the whole block
    choice((
        value.map(ParsedCode::Value),
        variable
            .map_with(|var, e| ParsedCode::Variable(Spanned::new(var, span_range(&e.span())))),
        invocation,
    ))
    .then_ignore(end())
}

fn into_block(parsed: ParsedCode) -> Result<Block, ParseError> {
    match parsed {
        ParsedCode::Value(value) => Ok(Block::Value(value)),
        ParsedCode::Variable(var) => {
            check_variable(&var.node, &var.span)?;
            Ok(Block::Variable(var.node))
        }
        ParsedCode::Invocation(function, arguments) => {
            build_invocation(function, arguments).map(Block::Invocation)
        }
    }
}

fn check_variable(var: &VariableBlock, span: &Span) -> Result<(), ParseError> {
    if var.name.as_str().is_empty() {
        return Err(ParseError::syntax(
            span.clone(),
            "variable name is missing after '$'",
        ));
    }
    Ok(())
}

fn check_argument(arg: &Spanned<Argument>) -> Result<(), ParseError> {
    match &arg.node {
        Argument::Variable(var) => check_variable(var, &arg.span),
        Argument::Value(_) => Ok(()),
    }
}

/// Apply the ordering rules: positional arguments first, named ones unique
fn build_invocation(
    function: Spanned<FunctionRef>,
    arguments: Vec<CallArgument>,
) -> Result<InvocationBlock, ParseError> {
    let mut positional = Vec::new();
    let mut named: IndexMap<String, Spanned<NamedArgBlock>> = IndexMap::new();

    for arg in arguments {
        match arg {
            CallArgument::Positional(arg) => {
                check_argument(&arg)?;
                if !named.is_empty() {
                    return Err(ParseError::syntax(
                        arg.span,
                        "positional arguments must come before named arguments",
                    ));
                }
                positional.push(arg);
            }
            CallArgument::Named(arg) => {
                check_argument(&arg.node.value)?;
                let name = arg.node.name.node.0.clone();
                if named.contains_key(&name) {
                    return Err(ParseError::syntax(
                        arg.span,
                        format!("duplicate named argument '{}'", name),
                    ));
                }
                named.insert(name, arg);
            }
        }
    }

    Ok(InvocationBlock {
        function,
        positional,
        named,
    })
}
