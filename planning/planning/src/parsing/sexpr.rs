use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use stratum_utils::disp_iter;
use stratum_utils::input::{ErrLoc, Input, Loc, Pos, Span, Sym};

pub type SAtom = Sym;

#[derive(Clone)]
pub struct SList {
    list: Vec<SExpr>,
    source: Arc<Input>,
    span: Span,
}

impl SList {
    pub fn iter(&self) -> ListIter {
        ListIter {
            elems: self.list.as_slice(),
            source: self.source.clone(),
            span: self.span,
        }
    }

    pub fn loc(&self) -> Loc {
        Loc::new(&self.source, self.span)
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::ops::Index<usize> for SList {
    type Output = SExpr;

    fn index(&self, index: usize) -> &Self::Output {
        &self.list[index]
    }
}

#[derive(Clone)]
pub enum SExpr {
    Atom(SAtom),
    List(SList),
}

impl SExpr {
    pub fn loc(&self) -> Option<Loc> {
        match self {
            SExpr::Atom(atom) => atom.loc().cloned(),
            SExpr::List(list) => Some(list.loc()),
        }
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        match self {
            SExpr::Atom(atom) => atom.invalid(error),
            SExpr::List(list) => list.invalid(error),
        }
    }

    pub fn is_atom(&self, expected_atom: &str) -> bool {
        self.as_atom().map(|a| a.as_str() == expected_atom).unwrap_or(false)
    }

    /// If this s-expression is the application of the function
    /// `function_name`, returns the arguments of the application.
    pub fn as_application(&self, function_name: &str) -> Option<&[SExpr]> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List(l) => match l.list.as_slice() {
                [SExpr::Atom(head), rest @ ..] if head.as_str() == function_name => Some(rest),
                _ => None,
            },
        }
    }

    pub fn as_list(&self) -> Option<&SList> {
        match &self {
            SExpr::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_iter(&self) -> Option<ListIter> {
        self.as_list().map(|l| l.iter())
    }

    pub fn as_atom(&self) -> Option<&SAtom> {
        match self {
            SExpr::Atom(a) => Some(a),
            _ => None,
        }
    }
}

pub struct ListIter<'a> {
    elems: &'a [SExpr],
    source: Arc<Input>,
    span: Span,
}

impl<'a> ListIter<'a> {
    pub fn peek(&self) -> Option<&'a SExpr> {
        self.elems.first()
    }

    pub fn pop(&mut self) -> Result<&'a SExpr, ErrLoc> {
        self.next()
            .ok_or_else(|| self.loc().end().invalid("Unexpected end of list"))
    }

    pub fn loc(&self) -> Loc {
        Loc::new(&self.source, self.span)
    }

    pub fn invalid(&self, error: impl Into<String>) -> ErrLoc {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn pop_known_atom(&mut self, expected: &str) -> Result<(), ErrLoc> {
        match self.next() {
            None => Err(self
                .loc()
                .end()
                .invalid(format!("Expected atom `{expected}` but got end of list"))),
            Some(sexpr) => {
                let atom = sexpr
                    .as_atom()
                    .ok_or_else(|| sexpr.invalid(format!("Expected atom `{expected}`")))?;
                if atom.as_str() == expected {
                    Ok(())
                } else {
                    Err(atom.invalid(format!("Expected the atom `{expected}`")))
                }
            }
        }
    }

    pub fn pop_atom(&mut self) -> Result<&'a SAtom, ErrLoc> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected an atom but got end of list")),
            Some(sexpr) => sexpr.as_atom().ok_or_else(|| sexpr.invalid("Expected an atom")),
        }
    }

    pub fn pop_list(&mut self) -> Result<&'a SList, ErrLoc> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected a list but got end of list")),
            Some(sexpr) => sexpr.as_list().ok_or_else(|| sexpr.invalid("Expected a list")),
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a SExpr;

    fn next(&mut self) -> Option<Self::Item> {
        match self.elems.split_first() {
            None => None,
            Some((head, tail)) => {
                self.elems = tail;
                Some(head)
            }
        }
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            SExpr::Atom(a) => write!(f, "{a}"),
            SExpr::List(l) => {
                write!(f, "(")?;
                disp_iter(f, &l.list, " ")?;
                write!(f, ")")
            }
        }
    }
}

impl Debug for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Sym {
        start: usize,
        end: usize,
        start_pos: Pos,
    },
    /// A `;; __MARKER` comment, surfaced so that readers can see annotations
    /// like the goal-ordering sentinel the plain comments would lose.
    Marker {
        start: usize,
        end: usize,
        start_pos: Pos,
    },
    LParen(Pos),
    RParen(Pos),
}

pub fn parse<S: TryInto<Input>>(s: S) -> Result<SExpr, ErrLoc>
where
    <S as TryInto<Input>>::Error: std::fmt::Display,
{
    let s = match s.try_into() {
        Ok(s) => s,
        Err(e) => return Err(ErrLoc::new(e.to_string())),
    };
    let s = Arc::new(s);
    let tokenized = tokenize(s.clone());
    let mut tokens = tokenized.iter().peekable();
    read(&mut tokens, &s)
}

/// Parse the input into a sequence of tokens.
fn tokenize(source: Arc<Input>) -> Vec<Token> {
    let s = source.text.as_str();
    let mut tokens = Vec::new();

    // current byte index into `s`
    let mut index = 0;
    // start index of the current atom
    let mut cur_start: Option<usize> = None;

    // current line number (starts at 0)
    let mut line: usize = 0;
    // index of the start of the line
    let mut line_start = 0;

    // true if we are currently inside a comment (between a ';' and a '\n')
    let mut is_in_comment = false;
    // start of a `__` marker inside the current comment, if any
    let mut marker_start: Option<usize> = None;

    let make_pos = |start: usize, line: usize, line_start: usize| Pos {
        line: line as u32,
        column: (start - line_start) as u32,
    };

    for n in s.chars() {
        if is_in_comment {
            if n == '\n' {
                if let Some(start) = marker_start.take() {
                    tokens.push(Token::Marker {
                        start,
                        end: index - 1,
                        start_pos: make_pos(start, line, line_start),
                    });
                }
                line += 1;
                line_start = index + 1;
                is_in_comment = false;
            } else if marker_start.is_none() && n == '_' && s[index..].starts_with("__") {
                marker_start = Some(index);
            } else if marker_start.is_some() && (n.is_whitespace() || n == ';') {
                let start = marker_start.take().unwrap();
                tokens.push(Token::Marker {
                    start,
                    end: index - 1,
                    start_pos: make_pos(start, line, line_start),
                });
            }
        } else if n.is_whitespace() || n == '(' || n == ')' || n == ';' {
            // if we were parsing a symbol, we have reached its end
            if let Some(start) = cur_start.take() {
                tokens.push(Token::Sym {
                    start,
                    end: index - 1,
                    start_pos: make_pos(start, line, line_start),
                });
            }
            if n == '\n' {
                line += 1;
                line_start = index + 1;
            } else if n == ';' {
                is_in_comment = true;
            } else if n == '(' {
                tokens.push(Token::LParen(make_pos(index, line, line_start)));
            } else if n == ')' {
                tokens.push(Token::RParen(make_pos(index, line, line_start)));
            }
        } else if cur_start.is_none() {
            cur_start = Some(index);
        }
        index += n.len_utf8();
    }
    if let Some(start) = cur_start {
        tokens.push(Token::Sym {
            start,
            end: index - 1,
            start_pos: make_pos(start, line, line_start),
        });
    }
    if let Some(start) = marker_start {
        tokens.push(Token::Marker {
            start,
            end: index - 1,
            start_pos: make_pos(start, line, line_start),
        });
    }
    tokens
}

fn atom_from(src: &Arc<Input>, start: usize, end: usize, start_pos: Pos) -> SAtom {
    let s = &src.text.as_str()[start..=end];
    let s = s.to_ascii_lowercase();
    let span = Span {
        start: start_pos,
        end: Pos {
            line: start_pos.line,
            column: start_pos.column + (s.len() as u32) - 1,
        },
    };
    let loc = Loc::new(src, span);
    Sym::with_source(s, loc)
}

fn read(tokens: &mut std::iter::Peekable<core::slice::Iter<Token>>, src: &Arc<Input>) -> Result<SExpr, ErrLoc> {
    match tokens.next() {
        Some(&Token::Sym { start, end, start_pos }) | Some(&Token::Marker { start, end, start_pos }) => {
            Ok(SExpr::Atom(atom_from(src, start, end, start_pos)))
        }
        Some(Token::LParen(start)) => {
            let mut es = Vec::new();
            loop {
                match tokens.peek() {
                    Some(Token::RParen(end)) => {
                        let _ = tokens.next(); // consume
                        let list = SList {
                            list: es,
                            source: src.clone(),
                            span: Span::new(*start, *end),
                        };
                        break Ok(SExpr::List(list));
                    }
                    None => {
                        break Err(ErrLoc::new("Unclosed parenthesis"));
                    }
                    _ => {
                        let e = read(tokens, src)?;
                        es.push(e);
                    }
                }
            }
        }
        Some(Token::RParen(_)) => Err(ErrLoc::new("Unexpected closing parenthesis")),
        None => Err(ErrLoc::new("Unexpected end of input")),
    }
}

/// Is this atom a surfaced `;; __MARKER` annotation?
pub fn is_marker(atom: &SAtom, marker: &str) -> bool {
    atom.as_str() == marker
}

/// Any surfaced marker atom starts with `__`.
pub fn is_any_marker(expr: &SExpr) -> bool {
    expr.as_atom().map(|a| a.as_str().starts_with("__")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats_as(input: &str, output: &str) {
        let res = parse(input).unwrap();
        let formatted = format!("{res}");
        assert_eq!(&formatted, output);
    }

    #[test]
    fn parsing() {
        formats_as("aa", "aa");
        formats_as(" aa ", "aa");
        formats_as("(a b)", "(a b)");
        formats_as("(a (b c) d)", "(a (b c) d)");
        formats_as(" ( a  ( b  c )   d  )   ", "(a (b c) d)");
        formats_as(
            " ( a  ( b ; (y x)
         c )   d
           )
          ",
            "(a (b c) d)",
        );
    }

    #[test]
    fn comments_vanish_but_markers_stay() {
        formats_as("(and a b) ; plain comment", "(and a b)");
        formats_as("(and ;; __ORDERED\n a b)", "(and __ordered a b)");
        formats_as("(and a ;; __PERSIST\n b)", "(and a __persist b)");
    }

    #[test]
    fn error_is_located() {
        let err = parse("(a (b c)").unwrap_err();
        assert!(err.message.contains("Unclosed"));
    }

    #[test]
    fn atoms_are_lowercased() {
        formats_as("(AND A B)", "(and a b)");
    }
}
