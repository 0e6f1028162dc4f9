use crate::Fmt;
use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A piece of source text together with its origin (file name), from which
/// symbols and error locations borrow their context.
pub struct Input {
    pub text: String,
    pub source: Option<String>,
}

impl Input {
    pub fn from_string(input: impl Into<String>) -> Input {
        Input {
            text: input.into(),
            source: None,
        }
    }

    pub fn from_file(file: &std::path::Path) -> std::result::Result<Input, std::io::Error> {
        let s = std::fs::read_to_string(file)?;
        Ok(Input {
            text: s,
            source: Some(file.display().to_string()),
        })
    }

    pub fn underlined_position(&self, pos: Pos) -> impl Display + '_ {
        self.underlined(Span { start: pos, end: pos })
    }

    /// Displays the source line covered by `span` with the spanned characters
    /// underlined on the next line.
    pub fn underlined(&self, span: Span) -> impl Display + '_ {
        let formatter = move |f: &mut Formatter| {
            let Some(l) = self.text.lines().dropping(span.start.line as usize).next() else {
                return Ok(());
            };
            if (span.start.column as usize) >= l.len() {
                return write!(f, "{l}");
            }
            writeln!(f, "{l}")?;

            let num_spaces = span.start.column;
            let length = if span.start.line != span.end.line {
                l.len() - (span.start.column as usize)
            } else {
                (span.end.column - span.start.column + 1) as usize
            };

            write!(f, "{}{}", " ".repeat(num_spaces as usize), "^".repeat(length))?;
            Ok(())
        };
        Fmt(formatter)
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input {
            text: s.to_string(),
            source: None,
        }
    }
}

impl From<String> for Input {
    fn from(text: String) -> Self {
        Input { text, source: None }
    }
}

impl TryFrom<&std::path::Path> for Input {
    type Error = std::io::Error;

    fn try_from(path: &std::path::Path) -> Result<Self, Self::Error> {
        Input::from_file(path)
    }
}

/// Position of a single character in an input.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

/// Part of an input, denoted by the start and end position, both inclusive.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Span {
        Span { start, end }
    }
    pub fn point(position: Pos) -> Span {
        Span {
            start: position,
            end: position,
        }
    }
}

/// A span tied to the input it was read from.
#[derive(Clone)]
pub struct Loc {
    source: Arc<Input>,
    span: Span,
}

impl Loc {
    pub fn new(source: &Arc<Input>, span: Span) -> Loc {
        Loc {
            source: source.clone(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// A point location right after this one, used to report "unexpected end" errors.
    pub fn end(&self) -> Loc {
        Loc {
            source: self.source.clone(),
            span: Span::point(self.span.end),
        }
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        ErrLoc {
            loc: Some(self.clone()),
            message: error.into(),
        }
    }

    pub fn underlined(&self) -> impl Display + '_ {
        self.source.underlined(self.span)
    }
}

impl Debug for Loc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.span)
    }
}

/// A symbol, remembering where in the input it was read when parsed.
#[derive(Clone)]
pub struct Sym {
    symbol: String,
    loc: Option<Loc>,
}

impl Sym {
    pub fn new(symbol: impl Into<String>) -> Sym {
        Sym {
            symbol: symbol.into(),
            loc: None,
        }
    }

    pub fn with_source(symbol: impl Into<String>, loc: Loc) -> Sym {
        Sym {
            symbol: symbol.into(),
            loc: Some(loc),
        }
    }

    pub fn as_str(&self) -> &str {
        self.symbol.as_str()
    }

    pub fn canonical_string(&self) -> String {
        self.symbol.clone()
    }

    pub fn loc(&self) -> Option<&Loc> {
        self.loc.as_ref()
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        ErrLoc {
            loc: self.loc.clone(),
            message: error.into(),
        }
    }

    /// Position of the first character of the symbol, if it was read from a source.
    pub fn pos(&self) -> Option<Pos> {
        self.loc.as_ref().map(|l| l.span.start)
    }
}

impl AsRef<str> for Sym {
    fn as_ref(&self) -> &str {
        &self.symbol
    }
}

impl std::borrow::Borrow<str> for Sym {
    fn borrow(&self) -> &str {
        &self.symbol
    }
}

impl std::borrow::Borrow<String> for Sym {
    fn borrow(&self) -> &String {
        &self.symbol
    }
}

impl From<&str> for Sym {
    fn from(value: &str) -> Self {
        Sym::new(value)
    }
}

impl From<String> for Sym {
    fn from(value: String) -> Self {
        Sym::new(value)
    }
}

impl From<&Sym> for Sym {
    fn from(value: &Sym) -> Self {
        value.clone()
    }
}

impl From<&Sym> for String {
    fn from(value: &Sym) -> Self {
        value.symbol.clone()
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}
impl Eq for Sym {}

impl PartialEq<str> for Sym {
    fn eq(&self, other: &str) -> bool {
        self.symbol == other
    }
}

impl PartialOrd for Sym {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Sym {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.symbol.cmp(&other.symbol)
    }
}

impl std::hash::Hash for Sym {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.symbol.hash(state)
    }
}

impl Debug for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}
impl Display for Sym {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// An error tied to the place in the input that caused it.
#[derive(Clone)]
pub struct ErrLoc {
    pub loc: Option<Loc>,
    pub message: String,
}

impl ErrLoc {
    pub fn new(message: impl Into<String>) -> ErrLoc {
        ErrLoc {
            loc: None,
            message: message.into(),
        }
    }

    /// Line/column of the error start, if located.
    pub fn position(&self) -> Option<Pos> {
        self.loc.as_ref().map(|l| l.span.start)
    }

    /// The source fragment the error points at, if located.
    pub fn fragment(&self) -> Option<String> {
        let loc = self.loc.as_ref()?;
        let span = loc.span;
        let line = loc.source.text.lines().nth(span.start.line as usize)?;
        if span.start.line == span.end.line && (span.end.column as usize) < line.len() {
            Some(line[span.start.column as usize..=span.end.column as usize].to_string())
        } else {
            Some(line[line.len().min(span.start.column as usize)..].to_string())
        }
    }
}

impl Display for ErrLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.loc {
            if let Some(file) = &loc.source.source {
                write!(f, "{}:{}:{}: ", file, loc.span.start.line + 1, loc.span.start.column + 1)?;
            } else {
                write!(f, "{}:{}: ", loc.span.start.line + 1, loc.span.start.column + 1)?;
            }
            writeln!(f, "{}", self.message)?;
            write!(f, "{}", loc.underlined())
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl Debug for ErrLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::error::Error for ErrLoc {}

/// Extension to attach outer context to a located error, or to turn a missing
/// value into one.
pub trait Ctx<T> {
    fn ctx(self, context: impl Display) -> Result<T, ErrLoc>;
}

impl<T> Ctx<T> for Result<T, ErrLoc> {
    fn ctx(self, context: impl Display) -> Result<T, ErrLoc> {
        self.map_err(|e| ErrLoc {
            loc: e.loc,
            message: format!("{context}: {}", e.message),
        })
    }
}

impl<T> Ctx<T> for Option<T> {
    fn ctx(self, context: impl Display) -> Result<T, ErrLoc> {
        self.ok_or_else(|| ErrLoc::new(context.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underline_covers_span() {
        let input = Input::from_string("(and a b)");
        let span = Span::new(Pos { line: 0, column: 5 }, Pos { line: 0, column: 5 });
        let disp = format!("{}", input.underlined(span));
        assert_eq!(disp, "(and a b)\n     ^");
    }

    #[test]
    fn located_error_displays_position() {
        let input = Arc::new(Input::from_string("(bad)"));
        let loc = Loc::new(&input, Span::new(Pos { line: 0, column: 1 }, Pos { line: 0, column: 3 }));
        let err = loc.invalid("unknown symbol");
        let s = format!("{err}");
        assert!(s.contains("1:2"), "{s}");
        assert!(s.contains("unknown symbol"));
        assert_eq!(err.fragment().as_deref(), Some("bad"));
    }

    #[test]
    fn ctx_wraps_message() {
        let res: Result<(), ErrLoc> = Err(ErrLoc::new("inner"));
        let err = res.ctx("outer").unwrap_err();
        assert_eq!(err.message, "outer: inner");
    }
}
