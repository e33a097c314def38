//! Offset to line/column conversion.

use crate::ByteOffset;

/// A 0-indexed line and column. Columns count UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct LineCol {
    pub line: u32,
    pub col: u32,
}

impl LineCol {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// Line start offsets of one text.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    /// Indexes `text`. Only `\n` ends a line; a preceding `\r` stays part of it.
    pub fn new(text: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            line_starts,
            len: text.len(),
        }
    }

    /// Returns the 0-indexed line containing `offset`, or `None` past the end.
    pub fn line(&self, offset: ByteOffset) -> Option<u32> {
        let offset = usize::from(offset);
        if offset > self.len {
            return None;
        }
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        Some(line as u32)
    }
}

/// Converts a run of mostly increasing offsets to lines and UTF-16 columns.
///
/// Each lookup counts only the text between the previous offset and the new
/// one, so walking a line from start to end stays linear. Moving backwards or
/// to another line restarts from that line's start.
#[derive(Debug, Clone)]
pub struct LineCursor<'a> {
    text: &'a str,
    index: LineIndex,
    offset: usize,
    pos: LineCol,
}

impl<'a> LineCursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            index: LineIndex::new(text),
            offset: 0,
            pos: LineCol::default(),
        }
    }

    /// Moves to `offset`. Returns `None` for offsets past the end or inside a
    /// multi-byte character, leaving the cursor where it was.
    pub fn seek(&mut self, offset: ByteOffset) -> Option<LineCol> {
        let line = self.index.line(offset)?;
        let target = usize::from(offset);
        if !self.text.is_char_boundary(target) {
            return None;
        }

        if target < self.offset || line != self.pos.line {
            self.offset = self.index.line_starts[line as usize];
            self.pos = LineCol::new(line, 0);
        }

        self.pos.col += self.text[self.offset..target].encode_utf16().count() as u32;
        self.offset = target;
        Some(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use text_size::TextSize;

    fn at(text: &str, offset: u32) -> Option<LineCol> {
        LineCursor::new(text).seek(TextSize::from(offset))
    }

    #[test]
    fn test_lines() {
        let text = "<script>\n  a\n</script>\n";
        assert_eq!(at(text, 0), Some(LineCol::new(0, 0)));
        assert_eq!(at(text, 8), Some(LineCol::new(0, 8)));
        assert_eq!(at(text, 11), Some(LineCol::new(1, 2)));
        assert_eq!(at(text, 22), Some(LineCol::new(2, 9)));
        assert_eq!(at(text, 23), Some(LineCol::new(3, 0)));
        assert_eq!(at(text, 24), None);
    }

    #[test]
    fn test_crlf_stays_on_line() {
        let text = "a\r\nb";
        let index = LineIndex::new(text);
        assert_eq!(index.line(TextSize::from(1)), Some(0));
        assert_eq!(index.line(TextSize::from(3)), Some(1));
    }

    #[test]
    fn test_utf16_columns() {
        // "é" is two bytes and one UTF-16 unit; "𝔭" is four bytes and two units.
        let text = "é𝔭x\nab";
        assert_eq!(at(text, 6), Some(LineCol::new(0, 3)));
        assert_eq!(at(text, 8), Some(LineCol::new(1, 0)));
        assert_eq!(at(text, 1), None);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(at("", 0), Some(LineCol::new(0, 0)));
        assert_eq!(at("", 1), None);
    }

    #[test]
    fn test_cursor_moves_both_ways() {
        let text = "ab𝔭cd\nxyz";
        let mut cursor = LineCursor::new(text);
        assert_eq!(cursor.seek(TextSize::from(6)), Some(LineCol::new(0, 4)));
        assert_eq!(cursor.seek(TextSize::from(7)), Some(LineCol::new(0, 5)));
        assert_eq!(cursor.seek(TextSize::from(1)), Some(LineCol::new(0, 1)));
        assert_eq!(cursor.seek(TextSize::from(10)), Some(LineCol::new(1, 1)));
        // A rejected offset leaves the cursor in place.
        assert_eq!(cursor.seek(TextSize::from(3)), None);
        assert_eq!(cursor.seek(TextSize::from(11)), Some(LineCol::new(1, 2)));
        assert_eq!(cursor.seek(TextSize::from(2)), Some(LineCol::new(0, 2)));
    }
}
