pub mod input;

use std::fmt::{Display, Formatter};

/// Wraps a closure into a `Display` object, so that formatting logic can be
/// built where the data lives and rendered later.
pub struct Fmt<F>(pub F)
where
    F: Fn(&mut Formatter) -> std::fmt::Result;

impl<F> Display for Fmt<F>
where
    F: Fn(&mut Formatter) -> std::fmt::Result,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        (self.0)(f)
    }
}

/// Displays all items of an iterable, separated by `sep`.
pub fn disp_iter<T: Display>(f: &mut Formatter<'_>, iterable: &[T], sep: &str) -> std::fmt::Result {
    let mut it = iterable.iter().peekable();
    while let Some(item) = it.next() {
        write!(f, "{item}")?;
        if it.peek().is_some() {
            write!(f, "{sep}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disp_iter_separates() {
        let items = vec![1, 2, 3];
        let s = format!("{}", Fmt(|f| disp_iter(f, &items, ", ")));
        assert_eq!(s, "1, 2, 3");
    }
}
