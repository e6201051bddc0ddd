//! Chapter content as seen by the pagination engine.
//!
//! Offsets everywhere in this crate are char (Unicode scalar) indices, not
//! bytes, so persisted boundaries and reading positions do not depend on the
//! host's string encoding. A [`Document`] borrows the caller's text and adds a
//! sparse char -> byte checkpoint table so a window can be located without
//! walking the whole chapter.

use std::borrow::Cow;

use crate::error::PaginateError;
use crate::markup::MarkupIndex;

/// Chars between byte-offset checkpoints.
const CHECKPOINT_STRIDE: usize = 64;

/// How chapter content is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ContentKind {
    /// Flowed plain text; every char offset is a cut point.
    #[default]
    Plain,
    /// XHTML markup; pages never split tags or entity references.
    Markup,
}

/// Read-only view over one chapter's content.
#[derive(Clone, Debug)]
pub struct Document<'a> {
    text: &'a str,
    char_len: usize,
    checkpoints: Vec<usize>,
    markup: Option<MarkupIndex>,
}

impl<'a> Document<'a> {
    /// Wrap flowed plain text.
    pub fn plain(text: &'a str) -> Self {
        let (char_len, checkpoints) = build_checkpoints(text);
        Self {
            text,
            char_len,
            checkpoints,
            markup: None,
        }
    }

    /// Wrap XHTML markup, scanning it for cut points.
    pub fn markup(text: &'a str) -> Result<Self, PaginateError> {
        let markup = MarkupIndex::scan(text)?;
        let (char_len, checkpoints) = build_checkpoints(text);
        Ok(Self {
            text,
            char_len,
            checkpoints,
            markup: Some(markup),
        })
    }

    /// Wrap content of the given kind.
    pub fn new(text: &'a str, kind: ContentKind) -> Result<Self, PaginateError> {
        match kind {
            ContentKind::Plain => Ok(Self::plain(text)),
            ContentKind::Markup => Self::markup(text),
        }
    }

    /// Content kind of this document.
    pub fn kind(&self) -> ContentKind {
        if self.markup.is_some() {
            ContentKind::Markup
        } else {
            ContentKind::Plain
        }
    }

    /// Full source text.
    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in chars.
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    /// Check if the document has no content.
    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// Byte offset of char index `idx`, clamped to the end of the text.
    pub fn byte_offset(&self, idx: usize) -> usize {
        if idx >= self.char_len {
            return self.text.len();
        }
        let base = self.checkpoints[idx / CHECKPOINT_STRIDE];
        let skip = idx % CHECKPOINT_STRIDE;
        self.text[base..]
            .char_indices()
            .nth(skip)
            .map_or(self.text.len(), |(offset, _)| base + offset)
    }

    /// Raw source between two char offsets (clamped).
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let end = end.min(self.char_len);
        let start = start.min(end);
        let from = self.byte_offset(start);
        let to = self.byte_offset(end);
        &self.text[from..to]
    }

    /// Whether a page may start or end at `idx`.
    pub fn is_cut_point(&self, idx: usize) -> bool {
        idx <= self.char_len && self.floor_cut(idx) == idx
    }

    /// Largest cut point `<= idx`.
    pub fn floor_cut(&self, idx: usize) -> usize {
        let idx = idx.min(self.char_len);
        match &self.markup {
            Some(markup) => markup.floor_cut(idx),
            None => idx,
        }
    }

    /// Smallest cut point `>= idx`.
    pub fn ceil_cut(&self, idx: usize) -> usize {
        let idx = idx.min(self.char_len);
        match &self.markup {
            Some(markup) => markup.ceil_cut(idx),
            None => idx,
        }
    }

    /// Content between two cut points in the form handed to an oracle.
    ///
    /// Plain text is borrowed as-is. Markup is rebuilt as a balanced fragment:
    /// elements open at `start` are re-opened and elements still open at `end`
    /// are closed.
    pub fn fragment(&self, start: usize, end: usize) -> Cow<'a, str> {
        let raw = self.slice(start, end);
        let Some(markup) = &self.markup else {
            return Cow::Borrowed(raw);
        };
        if raw.is_empty() {
            return Cow::Borrowed(raw);
        }
        let mut out = String::with_capacity(raw.len() + 64);
        markup.write_reopen(self.text, start, &mut out);
        out.push_str(raw);
        markup.write_close(end, &mut out);
        Cow::Owned(out)
    }

    /// Cut point just after the last text whitespace in `[start, end)`.
    pub(crate) fn last_break_after_whitespace(&self, start: usize, end: usize) -> Option<usize> {
        let raw = self.slice(start, end);
        let end = end.min(self.char_len);
        for (back, ch) in raw.chars().rev().enumerate() {
            let idx = end - back - 1;
            if ch.is_whitespace() && self.is_text(idx) {
                return Some(idx + 1);
            }
        }
        None
    }

    fn is_text(&self, idx: usize) -> bool {
        self.markup
            .as_ref()
            .is_none_or(|markup| markup.is_text(idx))
    }

    pub(crate) fn check_start(&self, start: usize) -> Result<(), PaginateError> {
        if start > self.char_len {
            return Err(PaginateError::StartOutOfRange {
                start,
                len: self.char_len,
            });
        }
        Ok(())
    }
}

fn build_checkpoints(text: &str) -> (usize, Vec<usize>) {
    let mut checkpoints = Vec::with_capacity(text.len() / CHECKPOINT_STRIDE + 1);
    let mut char_len = 0usize;
    for (offset, _) in text.char_indices() {
        if char_len % CHECKPOINT_STRIDE == 0 {
            checkpoints.push(offset);
        }
        char_len += 1;
    }
    if checkpoints.is_empty() {
        checkpoints.push(0);
    }
    (char_len, checkpoints)
}
