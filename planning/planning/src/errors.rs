use std::fmt::{Debug, Display, Formatter};
use stratum_utils::input::ErrLoc;
use thiserror::Error;

/// Error raised while loading a domain or problem from text, or while
/// resolving a fact/condition string against an ontology.
///
/// The offending fragment is kept so that embedders can surface the exact
/// piece of input that was rejected.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    pub message: String,
    /// 1-based line of the offending fragment, 0 when unknown.
    pub line: u32,
    /// 1-based column of the offending fragment, 0 when unknown.
    pub column: u32,
    pub fragment: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
            line: 0,
            column: 0,
            fragment: fragment.into(),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if self.line != 0 {
            write!(f, " at {}:{}", self.line, self.column)?;
        }
        if !self.fragment.is_empty() {
            write!(f, " in `{}`", self.fragment)?;
        }
        Ok(())
    }
}

impl From<ErrLoc> for ParseError {
    fn from(err: ErrLoc) -> Self {
        let (line, column) = err.position().map(|p| (p.line + 1, p.column + 1)).unwrap_or((0, 0));
        let fragment = err.fragment().unwrap_or_default();
        ParseError {
            message: err.message,
            line,
            column,
            fragment,
        }
    }
}

/// Error raised while assembling or mutating a domain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("duplicate action id `{0}`")]
    DuplicateActionId(String),
    #[error("duplicate event set id `{0}`")]
    DuplicateEventSetId(String),
    #[error("type `{child}` refers to unknown parent type `{parent}`")]
    UnknownParentType { child: String, parent: String },
    #[error("cyclic parent declaration for type `{0}`")]
    CyclicTypeDeclaration(String),
    #[error("duplicate entity `{0}`")]
    DuplicateEntity(String),
    #[error("duplicate predicate `{0}`")]
    DuplicatePredicate(String),
}

/// Error raised while applying a world state modification. The world state is
/// left unchanged when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("cannot assign `{got}` to `{fact}`: expected a value of type `{expected}`")]
    WrongFluentType {
        fact: String,
        expected: String,
        got: String,
    },
    #[error("parameter `{name}` is unbound in `{context}`")]
    UnboundParameter { name: String, context: String },
    #[error("cannot remove timeless fact `{0}`")]
    TimelessFactRemoval(String),
}
