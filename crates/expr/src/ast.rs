use crate::{TagId, TagSet};
use std::fmt;

/// A node of a compiled tag expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Matches every tag set, including the empty one.
    All,
    /// True when the tag is present.
    Literal(TagId),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

impl Node {
    fn evaluate_with(&self, has: &impl Fn(TagId) -> bool) -> bool {
        match self {
            Self::All => true,
            Self::Literal(id) => has(*id),
            Self::And(left, right) => left.evaluate_with(has) && right.evaluate_with(has),
            Self::Or(left, right) => left.evaluate_with(has) || right.evaluate_with(has),
            Self::Not(operand) => !operand.evaluate_with(has),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Literal(id) => write!(f, "{id}"),
            Self::And(left, right) => write!(f, "({left} & {right})"),
            Self::Or(left, right) => write!(f, "({left} | {right})"),
            Self::Not(operand) => write!(f, "!{operand}"),
        }
    }
}

/// A compiled, immutable tag expression.
///
/// Compile once with [`compile`](crate::compile) and evaluate against as
/// many tag sets as needed, from as many threads as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    pub(crate) fn new(root: Node) -> Self {
        Self { root }
    }

    /// The expression that matches everything.
    pub fn all() -> Self {
        Self::new(Node::All)
    }

    pub fn is_all(&self) -> bool {
        self.root == Node::All
    }

    /// Evaluates the expression against one file's tags.
    pub fn evaluate(&self, tags: &TagSet) -> bool {
        self.root.evaluate_with(&|id| tags.contains(&id))
    }

    /// Evaluates the expression with a custom membership test. Useful when
    /// some identifiers in a tag set should be treated as absent, e.g. tags
    /// that no longer exist.
    pub fn evaluate_by(&self, has: impl Fn(TagId) -> bool) -> bool {
        self.root.evaluate_with(&has)
    }
}

impl Default for Expression {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}
