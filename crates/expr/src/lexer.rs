//! Tokenizer for tag expressions.

use crate::TagId;
use crate::error::{ErrorKind, Result};
use std::fmt;

/// Upper bound on the number of tokens in a single expression. Keeps the
/// recursive parser and evaluator well away from the stack limit.
pub(crate) const MAX_TOKENS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Tag(TagId),
    And,
    Or,
    Not,
    Open,
    Close,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub position: usize,
}

impl Token<'_> {
    pub(crate) fn unexpected(&self) -> ErrorKind {
        ErrorKind::BadSyntax { token: self.to_string(), position: self.position }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::End => f.write_str("end of input"),
            _ => write!(f, "`{}`", self.text),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '.')
}

fn bad(text: &str, position: usize) -> ErrorKind {
    ErrorKind::BadSyntax { token: format!("`{text}`"), position }
}

/// Splits `input` into tokens, always terminated by a single
/// [`TokenKind::End`] positioned at the end of the input.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((position, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if tokens.len() >= MAX_TOKENS {
            exn::bail!(ErrorKind::TooComplex { position });
        }
        let mut end = position + c.len_utf8();
        let kind = match c {
            '&' => TokenKind::And,
            '|' => TokenKind::Or,
            '!' => TokenKind::Not,
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            c if is_word_char(c) => {
                while let Some(&(next, n)) = chars.peek()
                    && is_word_char(n)
                {
                    end = next + n.len_utf8();
                    chars.next();
                }
                let word = &input[position..end];
                // Plain decimal digits only: no signs, no names, no overflow.
                if !word.bytes().all(|b| b.is_ascii_digit()) {
                    exn::bail!(bad(word, position));
                }
                match word.parse::<TagId>() {
                    Ok(id) => TokenKind::Tag(id),
                    Err(_) => exn::bail!(bad(word, position)),
                }
            },
            _ => exn::bail!(bad(&input[position..end], position)),
        };
        tokens.push(Token { kind, text: &input[position..end], position });
    }
    tokens.push(Token { kind: TokenKind::End, text: "", position: input.len() });
    Ok(tokens)
}
