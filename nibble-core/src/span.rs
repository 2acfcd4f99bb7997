//! Source locations.

/// A byte range into the source text plus the line it starts on.
///
/// Spans never own text; callers slice the original source with
/// [`Span::text`] while it is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub len: usize,
    /// 1-based line number of `start`.
    pub line: u32,
}

impl Span {
    pub fn new(start: usize, len: usize, line: u32) -> Self {
        Span { start, len, line }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Span {
            start,
            len: end - start,
            line: if self.start <= other.start { self.line } else { other.line },
        }
    }

    /// Returns the covered slice of `source`, or an empty string when the
    /// span does not fall on valid boundaries of that source.
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        source.get(self.start..self.end()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_spans_in_either_order() {
        let a = Span::new(2, 3, 1);
        let b = Span::new(8, 1, 2);
        assert_eq!(a.to(b), Span::new(2, 7, 1));
        assert_eq!(b.to(a), Span::new(2, 7, 1));
    }

    #[test]
    fn slices_source_text() {
        let span = Span::new(4, 3, 1);
        assert_eq!(span.text("1 + 234"), "234");
        assert_eq!(Span::new(10, 2, 1).text("short"), "");
    }
}
