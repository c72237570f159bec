//! Error types for template parsing and function execution

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// A template could not be tokenized or one of its blocks could not be parsed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Syntax error at {span:?}: {message}")]
    Syntax {
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    /// Create a syntax error without expectations
    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    /// Byte range of the offending fragment
    pub fn span(&self) -> &Span {
        match self {
            ParseError::Syntax { span, .. } => span,
        }
    }

    /// Shift the span by `offset` bytes
    pub(crate) fn offset(self, offset: usize) -> Self {
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => ParseError::Syntax {
                span: span.start + offset..span.end + offset,
                message,
                expected,
            },
        }
    }

    /// Prefix the message with the block it occurred in
    pub(crate) fn in_block(self, block: &str) -> Self {
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => ParseError::Syntax {
                span,
                message: format!("invalid block `{}`: {}", block, message),
                expected,
            },
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };

                let written = Report::build(ReportKind::Error, filename, span.start)
                    .with_message(message)
                    .with_label(
                        Label::new((filename, span.clone()))
                            .with_message(format!("{}{}", message, expected_str))
                            .with_color(Color::Red),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut buf);
                if written.is_err() {
                    return self.to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> From<chumsky::error::Rich<'a, crate::parser::lexer::Token>> for ParseError {
    fn from(err: chumsky::error::Rich<'a, crate::parser::lexer::Token>) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of block".to_string(),
                };
                format!("Unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of block".to_string()),
                chumsky::error::RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                chumsky::error::RichPattern::Any => Some("any token".to_string()),
                chumsky::error::RichPattern::SomethingElse => None,
            })
            .collect();

        ParseError::Syntax {
            span: err.span().into_range(),
            message,
            expected,
        }
    }
}

/// Format a token for human-readable error messages
fn format_token(tok: &crate::parser::lexer::Token) -> String {
    use crate::parser::lexer::Token;
    match tok {
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::Variable(s) => format!("variable '${}'", s),
        Token::SingleQuoted(s) => format!("value '{}'", s),
        Token::DoubleQuoted(s) => format!("value \"{}\"", s),
        Token::Dot => "'.'".to_string(),
        Token::Equals => "'='".to_string(),
    }
}

/// Errors raised while looking up, invoking or rendering kernel functions
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("collection '{collection}' not found")]
    CollectionNotFound { collection: String },

    #[error("function '{function}' not found in collection '{collection}'")]
    FunctionNotFound { collection: String, function: String },

    #[error("function '{function}' not found in any collection")]
    UnknownFunction { function: String },

    #[error("function '{function}' is already registered in collection '{collection}'")]
    DuplicateFunction { collection: String, function: String },

    #[error("invalid name '{name}': only ASCII letters, digits and '_' are allowed")]
    InvalidName { name: String },

    #[error("missing required argument '{parameter}' for function '{function}'")]
    MissingArgument { function: String, parameter: String },

    #[error("function '{function}' accepts at most {accepted} positional argument(s)")]
    TooManyPositionalArguments { function: String, accepted: usize },

    #[error("invalid arguments for tool call '{function}': {reason}")]
    InvalidToolArguments { function: String, reason: String },

    #[error("error occurred while invoking function '{function}': {source}")]
    Execution {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("error rendering block `{block}`: {source}")]
    Render {
        block: String,
        #[source]
        source: Box<KernelError>,
    },

    #[error("no chat completion service registered{}", describe_service(service_id))]
    ServiceNotFound { service_id: Option<String> },

    #[error("chat completion service failed: {0}")]
    Service(#[source] anyhow::Error),
}

fn describe_service(service_id: &Option<String>) -> String {
    match service_id {
        Some(id) => format!(" under '{}'", id),
        None => String::new(),
    }
}

impl KernelError {
    /// Qualified name of the function this error is attributed to, if any
    pub fn function_name(&self) -> Option<&str> {
        match self {
            KernelError::Execution { function, .. }
            | KernelError::MissingArgument { function, .. }
            | KernelError::TooManyPositionalArguments { function, .. }
            | KernelError::InvalidToolArguments { function, .. }
            | KernelError::UnknownFunction { function } => Some(function),
            KernelError::Render { source, .. } => source.function_name(),
            _ => None,
        }
    }
}
