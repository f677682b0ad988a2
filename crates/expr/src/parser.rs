//! Recursive descent parser producing an [`Expression`].

use crate::ast::{Expression, Node};
use crate::error::{ErrorKind, Result};
use crate::lexer::{Token, TokenKind, tokenize};
use tracing::instrument;

/// Deepest nesting of parentheses and negations the parser accepts.
pub(crate) const MAX_DEPTH: usize = 128;

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    cursor: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token<'a> {
        // `tokenize` always terminates the stream with `End`, and the cursor
        // never advances past it.
        self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.peek();
        if token.kind != TokenKind::End {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            return true;
        }
        false
    }

    fn descend(&mut self, token: Token<'a>) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            exn::bail!(ErrorKind::TooComplex { position: token.position });
        }
        Ok(())
    }

    fn or_expr(&mut self) -> Result<Node> {
        let mut left = self.and_expr()?;
        while self.eat(TokenKind::Or) {
            let right = self.and_expr()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Node> {
        let mut left = self.unary()?;
        while self.eat(TokenKind::And) {
            let right = self.unary()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Node> {
        let token = self.peek();
        if token.kind != TokenKind::Not {
            return self.atom();
        }
        self.advance();
        self.descend(token)?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Node::Not(Box::new(operand)))
    }

    fn atom(&mut self) -> Result<Node> {
        let token = self.advance();
        match token.kind {
            TokenKind::Tag(id) => Ok(Node::Literal(id)),
            TokenKind::Open => {
                self.descend(token)?;
                let inner = self.or_expr()?;
                let close = self.peek();
                if close.kind != TokenKind::Close {
                    exn::bail!(close.unexpected());
                }
                self.advance();
                self.depth -= 1;
                Ok(inner)
            },
            _ => exn::bail!(token.unexpected()),
        }
    }
}

/// Compiles a textual tag expression.
///
/// An empty or all-whitespace input compiles to the match-all expression.
/// Malformed input fails with [`ErrorKind::BadSyntax`] naming the first
/// offending token; oversized input fails with [`ErrorKind::TooComplex`].
#[instrument(level = "trace")]
pub fn compile(input: &str) -> Result<Expression> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, cursor: 0, depth: 0 };
    if parser.peek().kind == TokenKind::End {
        return Ok(Expression::all());
    }
    let root = parser.or_expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::End {
        exn::bail!(trailing.unexpected());
    }
    Ok(Expression::new(root))
}
