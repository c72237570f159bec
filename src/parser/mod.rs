//! Parser for the prompt template language
//!
//! Two layers: [`tokenize`] finds `{{ }}` blocks in raw text, and the code
//! grammar parses the inside of each block.

pub mod ast;
mod grammar;
pub mod lexer;
mod tokenizer;

pub use ast::*;
pub use grammar::parse_code;
pub use tokenizer::tokenize;
