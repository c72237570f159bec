//! Block model for parsed prompt templates

use indexmap::IndexMap;

use crate::error::ParseError;

use super::tokenizer::tokenize;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// AST node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Valid identifier (ASCII letters, digits and underscore)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether `s` matches the identifier grammar
    pub fn is_valid(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminant of a [`Block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Value,
    Variable,
    NamedArgument,
    Invocation,
}

/// One node of a parsed template
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Literal text outside of `{{ }}`, or an empty `{{ }}` block
    Text(String),
    /// Quoted literal: `{{ 'hello' }}`
    Value(ValueBlock),
    /// Variable reference: `{{ $name }}`
    Variable(VariableBlock),
    /// `name=value` inside an invocation
    NamedArgument(NamedArgBlock),
    /// Function call: `{{ collection.function $arg name='value' }}`
    Invocation(InvocationBlock),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Text(_) => BlockKind::Text,
            Block::Value(_) => BlockKind::Value,
            Block::Variable(_) => BlockKind::Variable,
            Block::NamedArgument(_) => BlockKind::NamedArgument,
            Block::Invocation(_) => BlockKind::Invocation,
        }
    }
}

/// Quoted literal with escapes already resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBlock {
    pub value: String,
    /// The quote character that delimited the literal
    pub quote: char,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableBlock {
    pub name: Identifier,
}

/// A positional argument or the right-hand side of a named argument
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(ValueBlock),
    Variable(VariableBlock),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedArgBlock {
    pub name: Spanned<Identifier>,
    pub value: Spanned<Argument>,
}

/// `function` or `collection.function`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    pub collection: Option<Identifier>,
    pub name: Identifier,
}

impl FunctionRef {
    pub fn new(collection: Option<&str>, name: &str) -> Self {
        Self {
            collection: collection.map(Identifier::new),
            name: Identifier::new(name),
        }
    }
}

impl std::fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.collection {
            Some(collection) => write!(f, "{}.{}", collection, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationBlock {
    pub function: Spanned<FunctionRef>,
    /// Positional arguments in source order; they always precede named ones
    pub positional: Vec<Spanned<Argument>>,
    pub named: IndexMap<String, Spanned<NamedArgBlock>>,
}

/// A tokenized template together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    blocks: Vec<Spanned<Block>>,
}

impl Template {
    /// Tokenize `source` into blocks
    pub fn parse(source: impl Into<String>) -> Result<Self, ParseError> {
        let source = source.into();
        let blocks = tokenize(&source)?;
        Ok(Self { source, blocks })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn blocks(&self) -> &[Spanned<Block>] {
        &self.blocks
    }

    /// The exact source text a top-level block was parsed from
    pub fn raw(&self, block: &Spanned<Block>) -> &str {
        &self.source[block.span.clone()]
    }

    /// Names of all referenced variables, first occurrence wins,
    /// compared case-insensitively
    pub fn variables(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        let mut add = |name: &Identifier| {
            if !seen.iter().any(|s| s.eq_ignore_ascii_case(name.as_str())) {
                seen.push(name.0.clone());
            }
        };

        for block in &self.blocks {
            match &block.node {
                Block::Variable(var) => add(&var.name),
                Block::Invocation(inv) => {
                    for arg in &inv.positional {
                        if let Argument::Variable(var) = &arg.node {
                            add(&var.name);
                        }
                    }
                    for named in inv.named.values() {
                        if let Argument::Variable(var) = &named.node.value.node {
                            add(&var.name);
                        }
                    }
                }
                Block::NamedArgument(named) => {
                    if let Argument::Variable(var) = &named.value.node {
                        add(&var.name);
                    }
                }
                Block::Text(_) | Block::Value(_) => {}
            }
        }
        seen
    }
}
