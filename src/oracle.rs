//! Measurement oracle interface and reference implementations.
//!
//! The engine never measures text itself. It asks an oracle whether a
//! candidate fragment, rendered under a [`LayoutContext`], fits inside the
//! content box. Real hosts back this with a rendering surface; [`GridOracle`]
//! is a deterministic monospace model used by the CLI, benches and tests.

use crate::error::OracleError;
use crate::layout::LayoutContext;

/// Fit-test capability supplied by the host.
///
/// Oracles take `&mut self` because real implementations mutate a scratch
/// rendering surface on every probe. One oracle therefore serves one run at a
/// time. Answers must be monotone in fragment length: if a prefix fits, every
/// shorter prefix of the same start also fits.
pub trait MeasurementOracle {
    /// Report whether `fragment` fits the content box of `layout`.
    fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError>;
}

impl<O: MeasurementOracle + ?Sized> MeasurementOracle for &mut O {
    fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        (**self).fits(fragment, layout)
    }
}

impl<O: MeasurementOracle + ?Sized> MeasurementOracle for Box<O> {
    fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        (**self).fits(fragment, layout)
    }
}

/// Closure-backed oracle.
pub struct FnOracle<F>(pub F);

impl<F> MeasurementOracle for FnOracle<F>
where
    F: FnMut(&str, &LayoutContext) -> Result<bool, OracleError>,
{
    fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        (self.0)(fragment, layout)
    }
}

impl<F> core::fmt::Debug for FnOracle<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FnOracle")
    }
}

/// Closing tags that end a block and force a line break in [`GridOracle`].
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "section",
    "tr", "dt", "dd", "figure", "figcaption",
];

/// Monospace cell-grid oracle.
///
/// Columns are `floor(box_width / (font_size * advance_ratio))` and rows are
/// `floor(box_height / (font_size * line_height))`. Words wrap greedily; a word
/// wider than a line is split across lines. Markup tags take no space, an
/// entity reference takes one cell, and block end tags and `<br>` force a
/// line break.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridOracle {
    advance_ratio: f32,
}

impl Default for GridOracle {
    fn default() -> Self {
        Self { advance_ratio: 0.5 }
    }
}

impl GridOracle {
    /// Create a grid oracle with the default half-em advance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the glyph advance as a fraction of the font size.
    ///
    /// Non-finite or non-positive values fall back to the default.
    pub fn with_advance_ratio(mut self, advance_ratio: f32) -> Self {
        if advance_ratio.is_finite() && advance_ratio > 0.0 {
            self.advance_ratio = advance_ratio;
        }
        self
    }

    /// Grid dimensions `(columns, rows)` for `layout`.
    pub fn grid(&self, layout: &LayoutContext) -> (usize, usize) {
        let advance = layout.font_size * self.advance_ratio;
        let line = layout.font_size * layout.line_height;
        let cols = cells(layout.box_width, advance);
        let rows = cells(layout.box_height, line);
        (cols, rows)
    }

    /// Number of lines `fragment` needs on a grid `cols` wide.
    ///
    /// Stops counting once `limit` is exceeded.
    pub fn count_lines(fragment: &str, cols: usize, limit: usize) -> usize {
        let mut wrap = LineWrap::new(cols);
        let mut chars = fragment.chars().peekable();
        while let Some(ch) = chars.next() {
            if wrap.lines > limit && wrap.touched {
                break;
            }
            match ch {
                '<' => {
                    let mut tag = String::new();
                    for next in chars.by_ref() {
                        if next == '>' {
                            break;
                        }
                        tag.push(next);
                    }
                    if forces_break(&tag) {
                        wrap.hard_break();
                    }
                }
                '&' => {
                    let mut consumed = 0usize;
                    while let Some(&next) = chars.peek() {
                        if next == ';' && consumed > 0 {
                            chars.next();
                            break;
                        }
                        if !(next.is_ascii_alphanumeric() || next == '#') {
                            break;
                        }
                        consumed += 1;
                        chars.next();
                    }
                    wrap.push_char();
                }
                '\n' => wrap.hard_break(),
                ch if ch.is_whitespace() => wrap.push_space(),
                _ => wrap.push_char(),
            }
        }
        wrap.finish()
    }
}

impl MeasurementOracle for GridOracle {
    fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        let (cols, rows) = self.grid(layout);
        if cols == 0 || rows == 0 {
            return Ok(fragment.is_empty());
        }
        Ok(Self::count_lines(fragment, cols, rows) <= rows)
    }
}

fn cells(extent: f32, cell: f32) -> usize {
    if !(extent.is_finite() && cell.is_finite()) || cell <= 0.0 || extent <= 0.0 {
        return 0;
    }
    (extent / cell).floor() as usize
}

fn forces_break(tag: &str) -> bool {
    let tag = tag.trim();
    if let Some(name) = tag.strip_prefix('/') {
        let name = name.trim().to_ascii_lowercase();
        return BLOCK_TAGS.contains(&name.as_str());
    }
    let name: String = tag
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric())
        .collect();
    name.eq_ignore_ascii_case("br")
}

/// Greedy word-wrap state over a fixed column count.
struct LineWrap {
    cols: usize,
    lines: usize,
    /// Cells committed on the current line.
    col: usize,
    /// Length of the word being accumulated.
    word: usize,
    /// A space separates the pending word from committed cells.
    space: bool,
    /// Whether anything has been placed at all.
    touched: bool,
}

impl LineWrap {
    fn new(cols: usize) -> Self {
        Self {
            cols,
            lines: 1,
            col: 0,
            word: 0,
            space: false,
            touched: false,
        }
    }

    fn push_char(&mut self) {
        self.word += 1;
        self.touched = true;
    }

    fn push_space(&mut self) {
        self.commit_word();
        if self.col > 0 {
            self.space = true;
        }
    }

    fn hard_break(&mut self) {
        self.commit_word();
        if self.touched {
            self.lines += 1;
        }
        self.col = 0;
        self.space = false;
        self.touched = false;
    }

    fn commit_word(&mut self) {
        if self.word == 0 {
            return;
        }
        let word = self.word;
        self.word = 0;
        let gap = usize::from(self.space && self.col > 0);
        self.space = false;
        if self.col + gap + word <= self.cols {
            self.col += gap + word;
            return;
        }
        if self.col > 0 {
            self.lines += 1;
        }
        let full = word / self.cols;
        let rem = word % self.cols;
        if rem == 0 {
            self.lines += full - 1;
            self.col = self.cols;
        } else {
            self.lines += full;
            self.col = rem;
        }
    }

    fn finish(mut self) -> usize {
        self.commit_word();
        // A trailing block break does not need a fresh empty line.
        if !self.touched && self.lines > 1 {
            return self.lines - 1;
        }
        self.lines
    }
}
