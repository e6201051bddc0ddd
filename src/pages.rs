//! Page boundary sets and the page slicer.

use std::borrow::Cow;
use std::ops::Range;

use crate::document::Document;
use crate::error::PaginateError;
use crate::layout::ConfigFingerprint;

/// Page start offsets for one chapter under one layout.
///
/// `start_indices` is non-empty and strictly increasing. Page `i` spans
/// `[start_indices[i], start_indices[i + 1])`; the last page runs to the end
/// of the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBoundarySet {
    start_indices: Vec<usize>,
    fingerprint: ConfigFingerprint,
}

impl PageBoundarySet {
    /// Build a boundary set, checking ordering.
    pub fn new(
        start_indices: Vec<usize>,
        fingerprint: ConfigFingerprint,
    ) -> Result<Self, PaginateError> {
        if start_indices.is_empty() {
            return Err(PaginateError::InvalidBoundaries(
                "boundary list is empty".to_string(),
            ));
        }
        if let Some(pair) = start_indices.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(PaginateError::InvalidBoundaries(format!(
                "boundaries not strictly increasing: {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self {
            start_indices,
            fingerprint,
        })
    }

    pub(crate) fn from_sorted(start_indices: Vec<usize>, fingerprint: ConfigFingerprint) -> Self {
        Self {
            start_indices,
            fingerprint,
        }
    }

    /// Page start offsets.
    pub fn start_indices(&self) -> &[usize] {
        &self.start_indices
    }

    /// Layout fingerprint the boundaries were computed under.
    pub fn fingerprint(&self) -> &ConfigFingerprint {
        &self.fingerprint
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.start_indices.len()
    }

    /// Check that the boundaries can describe a document of `len` chars.
    ///
    /// Every start but the first must lie strictly inside the document; the
    /// first may equal `len` only when it is the only one.
    pub fn validate(&self, len: usize) -> Result<(), PaginateError> {
        let last = self.start_indices.last().copied().unwrap_or(0);
        let in_range = if self.start_indices.len() == 1 {
            last <= len
        } else {
            last < len
        };
        if !in_range {
            return Err(PaginateError::InvalidBoundaries(format!(
                "boundary {} past document length {}",
                last, len
            )));
        }
        Ok(())
    }

    /// Check the boundaries against a document, including cut points.
    pub fn validate_for(&self, document: &Document<'_>) -> Result<(), PaginateError> {
        self.validate(document.char_len())?;
        if let Some(&bad) = self
            .start_indices
            .iter()
            .find(|&&idx| !document.is_cut_point(idx))
        {
            return Err(PaginateError::InvalidBoundaries(format!(
                "boundary {} is not a cut point",
                bad
            )));
        }
        Ok(())
    }

    /// Char range of page `index` in a document of `len` chars.
    pub fn page_range(&self, index: usize, len: usize) -> Option<Range<usize>> {
        let start = *self.start_indices.get(index)?;
        let end = self
            .start_indices
            .get(index + 1)
            .copied()
            .unwrap_or(len)
            .max(start);
        Some(start..end)
    }

    /// Index of the page containing `offset`.
    ///
    /// Offsets before the first boundary have no page.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        self.start_indices
            .partition_point(|&start| start <= offset)
            .checked_sub(1)
    }

    /// Consume into start offsets and fingerprint.
    pub fn into_parts(self) -> (Vec<usize>, ConfigFingerprint) {
        (self.start_indices, self.fingerprint)
    }
}

/// One page of a paginated document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<'a> {
    /// Zero-based page index.
    pub index: usize,
    /// First char offset; also the reading position to persist.
    pub start: usize,
    /// One past the last char offset.
    pub end: usize,
    /// Page content, balanced for markup documents.
    pub content: Cow<'a, str>,
}

impl Page<'_> {
    /// Length in chars.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Raw source text of page `page_index`.
pub fn page_slice<'a>(
    document: &Document<'a>,
    boundaries: &PageBoundarySet,
    page_index: usize,
) -> Option<&'a str> {
    let range = boundaries.page_range(page_index, document.char_len())?;
    Some(document.slice(range.start, range.end))
}

/// Page content in the form it is rendered: raw for plain text, balanced
/// markup for XHTML.
pub fn page_fragment<'a>(
    document: &Document<'a>,
    boundaries: &PageBoundarySet,
    page_index: usize,
) -> Option<Cow<'a, str>> {
    let range = boundaries.page_range(page_index, document.char_len())?;
    Some(document.fragment(range.start, range.end))
}

/// Page `page_index` with its offsets.
pub fn page<'a>(
    document: &Document<'a>,
    boundaries: &PageBoundarySet,
    page_index: usize,
) -> Option<Page<'a>> {
    let range = boundaries.page_range(page_index, document.char_len())?;
    Some(Page {
        index: page_index,
        start: range.start,
        end: range.end,
        content: document.fragment(range.start, range.end),
    })
}
