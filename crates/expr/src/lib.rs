//! Boolean tag expressions.
//!
//! A tag expression is a small formula over numeric tag identifiers:
//!
//! ```text
//! expr    := orExpr
//! orExpr  := andExpr ('|' andExpr)*
//! andExpr := unary ('&' unary)*
//! unary   := '!' unary | atom
//! atom    := TAG_ID | '(' expr ')'
//! ```
//!
//! `!` binds tighter than `&`, which binds tighter than `|`. Whitespace is
//! insignificant and an empty expression matches everything.
//!
//! ```
//! use std::collections::BTreeSet;
//! use tagd_expr::compile;
//!
//! let expr = compile("1 & !(2 | 3)").unwrap();
//! assert!(expr.evaluate(&BTreeSet::from([1, 4])));
//! assert!(!expr.evaluate(&BTreeSet::from([1, 3])));
//! assert!(compile("").unwrap().evaluate(&BTreeSet::new()));
//! ```

mod ast;
pub mod error;
mod lexer;
mod parser;

pub use crate::ast::Expression;
pub use crate::parser::compile;
use std::collections::BTreeSet;

/// Identifier of a tag in the tag registry.
pub type TagId = u32;
/// The (deduplicated, unordered) set of tags attached to a file.
pub type TagSet = BTreeSet<TagId>;
