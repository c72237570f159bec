//! Template tokenizer: splits raw text into Text blocks and `{{ }}` code blocks
//!
//! The scan is byte-wise. Every delimiter it looks for is ASCII, so slice
//! boundaries always fall on UTF-8 character boundaries.

use tracing::debug;

use crate::error::ParseError;
use crate::parser::ast::{Block, Spanned};
use crate::parser::grammar::parse_code;

const BLOCK_STARTER: u8 = b'{';
const BLOCK_ENDER: u8 = b'}';
const ESCAPE_CHAR: u8 = b'\\';
const SINGLE_QUOTE: u8 = b'\'';
const DOUBLE_QUOTE: u8 = b'"';

/// Length of `{{}}`
const EMPTY_CODE_BLOCK_LENGTH: usize = 4;
/// Anything shorter cannot hold a code block with content
const MIN_CODE_BLOCK_LENGTH: usize = EMPTY_CODE_BLOCK_LENGTH + 1;

/// Split a template into blocks covering the whole input without gaps.
///
/// Empty or whitespace-only code blocks stay literal text. A literal that
/// is never closed swallows the rest of the input, which then ends up in
/// the trailing Text block.
pub fn tokenize(text: &str) -> Result<Vec<Spanned<Block>>, ParseError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.len() < MIN_CODE_BLOCK_LENGTH {
        return Ok(vec![text_block(text, 0..text.len())]);
    }

    let bytes = text.as_bytes();
    let mut blocks = Vec::new();

    let mut end_of_last_block = 0;
    let mut block_start = 0;
    let mut block_start_found = false;
    let mut quote: Option<u8> = None;
    let mut skip_next = false;

    for pos in 0..bytes.len() - 1 {
        if skip_next {
            skip_next = false;
            continue;
        }

        let current = bytes[pos];
        let next = bytes[pos + 1];

        // A new `{{` outside a literal restarts the pending block
        if quote.is_none() && current == BLOCK_STARTER && next == BLOCK_STARTER {
            block_start = pos;
            block_start_found = true;
        }

        if !block_start_found {
            continue;
        }

        match quote {
            Some(delimiter) => {
                if current == ESCAPE_CHAR && (next == delimiter || next == ESCAPE_CHAR) {
                    skip_next = true;
                } else if current == delimiter {
                    quote = None;
                }
            }
            None => {
                if current == SINGLE_QUOTE || current == DOUBLE_QUOTE {
                    quote = Some(current);
                } else if current == BLOCK_ENDER && next == BLOCK_ENDER {
                    if block_start > end_of_last_block {
                        blocks.push(text_block(text, end_of_last_block..block_start));
                    }

                    let block_end = pos + 2;
                    blocks.push(code_block(text, block_start..block_end)?);

                    end_of_last_block = block_end;
                    block_start_found = false;
                    skip_next = true;
                }
            }
        }
    }

    if end_of_last_block < text.len() {
        blocks.push(text_block(text, end_of_last_block..text.len()));
    }

    debug!(blocks = blocks.len(), "tokenized template");
    Ok(blocks)
}

fn text_block(text: &str, span: std::ops::Range<usize>) -> Spanned<Block> {
    Spanned::new(Block::Text(text[span.clone()].to_string()), span)
}

/// Parse `{{ ... }}` at `span`; the block keeps the span of its delimiters
fn code_block(text: &str, span: std::ops::Range<usize>) -> Result<Spanned<Block>, ParseError> {
    let interior_start = span.start + 2;
    let interior = &text[interior_start..span.end - 2];

    let leading = interior.len() - interior.trim_start_matches(is_blank).len();
    let code = interior.trim_matches(is_blank);

    if code.is_empty() {
        debug!(raw = &text[span.clone()], "empty code block kept as text");
        return Ok(text_block(text, span));
    }

    let block = parse_code(code, interior_start + leading)?;
    debug!(kind = ?block.kind(), code, "extracted code block");
    Ok(Spanned::new(block, span))
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}
