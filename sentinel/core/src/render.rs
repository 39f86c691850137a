//! Render targets
//!
//! The core never draws pixels. Modules render into a [`RenderTarget`]; the
//! built-in [`TextFrame`] is a character grid the daemon prints to the
//! terminal, and tests inspect directly.

use std::fmt;

use crate::context::Rgb;

/// Surface a shown module draws into once per frame
pub trait RenderTarget {
    /// `(columns, rows)`
    fn size(&self) -> (usize, usize);

    /// Blank the whole surface
    fn clear(&mut self);

    /// Write `text` starting at `(column, row)`, clipped to the surface
    fn put_str(&mut self, column: usize, row: usize, text: &str);

    /// Colour used by subsequent writes
    fn set_color(&mut self, color: Rgb);
}

/// Fixed-size character grid
#[derive(Clone, PartialEq, Eq)]
pub struct TextFrame {
    columns: usize,
    rows: usize,
    cells: Vec<char>,
    color: Rgb,
}

impl TextFrame {
    /// Blank frame of the given size
    #[must_use]
    pub fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            cells: vec![' '; columns * rows],
            color: Rgb(255, 255, 255),
        }
    }

    /// Current draw colour
    #[must_use]
    pub fn color(&self) -> Rgb {
        self.color
    }

    /// One row with trailing blanks trimmed
    #[must_use]
    pub fn line(&self, row: usize) -> String {
        if row >= self.rows {
            return String::new();
        }
        let start = row * self.columns;
        let line: String = self.cells[start..start + self.columns].iter().collect();
        line.trim_end().to_string()
    }

    /// All rows, trimmed
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        (0..self.rows).map(|row| self.line(row)).collect()
    }

    /// Whether any row mentions `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    /// Whether nothing has been drawn
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| *c == ' ')
    }
}

impl RenderTarget for TextFrame {
    fn size(&self) -> (usize, usize) {
        (self.columns, self.rows)
    }

    fn clear(&mut self) {
        self.cells.fill(' ');
    }

    fn put_str(&mut self, column: usize, row: usize, text: &str) {
        if row >= self.rows {
            return;
        }
        let start = row * self.columns;
        for (offset, ch) in text.chars().enumerate() {
            let col = column + offset;
            if col >= self.columns {
                break;
            }
            self.cells[start + col] = if ch.is_control() { ' ' } else { ch };
        }
    }

    fn set_color(&mut self, color: Rgb) {
        self.color = color;
    }
}

impl fmt::Display for TextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextFrame")
            .field("columns", &self.columns)
            .field("rows", &self.rows)
            .field("lines", &self.lines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_str_clips() {
        let mut frame = TextFrame::new(5, 2);
        frame.put_str(3, 0, "hello");
        frame.put_str(0, 5, "ignored");
        assert_eq!(frame.lines(), vec!["   he", ""]);
    }

    #[test]
    fn test_clear() {
        let mut frame = TextFrame::new(8, 1);
        frame.put_str(0, 0, "radar");
        assert!(frame.contains("radar"));
        frame.clear();
        assert!(frame.is_blank());
    }

    #[test]
    fn test_control_characters_are_blanked() {
        let mut frame = TextFrame::new(6, 1);
        frame.put_str(0, 0, "a\tb\nc");
        assert_eq!(frame.line(0), "a b c");
    }
}
