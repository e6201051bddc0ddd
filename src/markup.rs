//! Cut-point index for XHTML chapter markup.
//!
//! A page may only start or end outside tags, comments and entity references.
//! The index also records element nesting so a page fragment can be rebuilt
//! as balanced markup: elements open at the fragment start are re-opened and
//! elements still open at its end are closed.

use core::ops::Range;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use smallvec::SmallVec;

use crate::error::PaginateError;

/// Longest entity/character reference body accepted as a single atom.
const MAX_REFERENCE_CHARS: usize = 32;

/// HTML void elements that never get an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Uncuttable char span `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Atom {
    start: usize,
    end: usize,
}

/// One element with its opening tag location and where it closes.
#[derive(Clone, Debug, PartialEq, Eq)]
struct ElementSpan {
    name: String,
    /// Byte range of the opening tag in the source.
    open_tag: Range<usize>,
    /// Char offset just after the opening tag.
    open_end: usize,
    /// Char offset of the closing tag, or the document length when unclosed.
    close_start: usize,
    /// Enclosing element, if any.
    parent: Option<usize>,
}

/// Markup structure needed for cut-point and fragment queries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MarkupIndex {
    atoms: Vec<Atom>,
    elements: Vec<ElementSpan>,
}

/// Tracks byte -> char conversion while events stream forward.
struct CharCursor {
    byte: usize,
    ch: usize,
}

impl CharCursor {
    fn advance_to(&mut self, text: &str, byte: usize) -> Result<usize, PaginateError> {
        if byte < self.byte {
            return Ok(self.ch);
        }
        let segment = text.get(self.byte..byte).ok_or_else(|| {
            PaginateError::Markup(format!("event boundary {} is not a char boundary", byte))
        })?;
        self.ch += segment.chars().count();
        self.byte = byte;
        Ok(self.ch)
    }
}

impl MarkupIndex {
    /// Scan `text` and build the index.
    pub(crate) fn scan(text: &str) -> Result<Self, PaginateError> {
        let mut reader = Reader::from_str(text);
        {
            let config = reader.config_mut();
            config.trim_text(false);
            config.check_end_names = false;
            config.allow_unmatched_ends = true;
            config.allow_dangling_amp = true;
        }

        let mut index = MarkupIndex::default();
        let mut cursor = CharCursor { byte: 0, ch: 0 };
        let mut open: SmallVec<[usize; 16]> = SmallVec::new();

        loop {
            let before = reader_offset(&reader);
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(err) => {
                    return Err(PaginateError::Markup(format!(
                        "{} (byte {})",
                        err,
                        reader.error_position()
                    )))
                }
            };
            let after = reader_offset(&reader);
            let start_ch = cursor.advance_to(text, before)?;

            match event {
                Event::Eof => break,
                Event::Start(tag) => {
                    let name = element_name(tag.name().as_ref());
                    let end_ch = cursor.advance_to(text, after)?;
                    index.push_atom(start_ch, end_ch);
                    if VOID_ELEMENTS.contains(&name.as_str()) {
                        continue;
                    }
                    let parent = open.last().copied();
                    open.push(index.elements.len());
                    index.elements.push(ElementSpan {
                        name,
                        open_tag: before..after,
                        open_end: end_ch,
                        close_start: usize::MAX,
                        parent,
                    });
                }
                Event::End(tag) => {
                    let name = element_name(tag.name().as_ref());
                    let end_ch = cursor.advance_to(text, after)?;
                    index.push_atom(start_ch, end_ch);
                    // Closing an outer element implicitly closes anything left open inside it.
                    if let Some(pos) = open
                        .iter()
                        .rposition(|&idx| index.elements[idx].name == name)
                    {
                        for &idx in &open[pos..] {
                            index.elements[idx].close_start = start_ch;
                        }
                        open.truncate(pos);
                    }
                }
                Event::Text(_) | Event::GeneralRef(_) => {
                    let segment = text.get(before..after).unwrap_or_default();
                    index.push_references(segment, start_ch);
                    cursor.advance_to(text, after)?;
                }
                _ => {
                    let end_ch = cursor.advance_to(text, after)?;
                    index.push_atom(start_ch, end_ch);
                }
            }
        }

        let char_len = cursor.ch + text.get(cursor.byte..).map_or(0, |s| s.chars().count());
        for idx in open {
            index.elements[idx].close_start = char_len;
        }
        Ok(index)
    }

    fn push_atom(&mut self, start: usize, end: usize) {
        if end > start {
            self.atoms.push(Atom { start, end });
        }
    }

    /// Record `&name;` / `&#123;` references inside a text run as atoms.
    fn push_references(&mut self, segment: &str, base_ch: usize) {
        let mut chars = segment.chars().enumerate().peekable();
        while let Some((offset, ch)) = chars.next() {
            if ch != '&' {
                continue;
            }
            let mut body = 0usize;
            let mut end = None;
            while let Some(&(next_offset, next)) = chars.peek() {
                if next == ';' && body > 0 {
                    end = Some(next_offset + 1);
                    chars.next();
                    break;
                }
                if !(next.is_ascii_alphanumeric() || next == '#') || body >= MAX_REFERENCE_CHARS {
                    break;
                }
                body += 1;
                chars.next();
            }
            if let Some(end) = end {
                self.push_atom(base_ch + offset, base_ch + end);
            }
        }
    }

    /// Last atom starting before `pos` (or at `pos` when `inclusive`).
    fn atom_before(&self, pos: usize, inclusive: bool) -> Option<&Atom> {
        let idx = if inclusive {
            self.atoms.partition_point(|atom| atom.start <= pos)
        } else {
            self.atoms.partition_point(|atom| atom.start < pos)
        };
        idx.checked_sub(1).map(|idx| &self.atoms[idx])
    }

    /// Largest cut point `<= pos`.
    pub(crate) fn floor_cut(&self, pos: usize) -> usize {
        match self.atom_before(pos, false) {
            Some(atom) if atom.end > pos => atom.start,
            _ => pos,
        }
    }

    /// Smallest cut point `>= pos`.
    pub(crate) fn ceil_cut(&self, pos: usize) -> usize {
        match self.atom_before(pos, false) {
            Some(atom) if atom.end > pos => atom.end,
            _ => pos,
        }
    }

    /// Whether the char at `pos` is text content (not part of a tag or reference).
    pub(crate) fn is_text(&self, pos: usize) -> bool {
        !matches!(self.atom_before(pos, true), Some(atom) if atom.end > pos)
    }

    /// Elements open at cut point `pos`, outermost first.
    ///
    /// Everything open at `pos` encloses the last element opened before it,
    /// so only that element's ancestor chain is visited.
    fn open_at(&self, pos: usize) -> SmallVec<[&ElementSpan; 16]> {
        let opened = self.elements.partition_point(|el| el.open_end <= pos);
        let mut chain: SmallVec<[&ElementSpan; 16]> = SmallVec::new();
        let mut next = opened.checked_sub(1);
        while let Some(idx) = next {
            let el = &self.elements[idx];
            if el.close_start >= pos {
                chain.push(el);
            }
            next = el.parent;
        }
        chain.reverse();
        chain
    }

    /// Append opening tags for elements open at `start`.
    pub(crate) fn write_reopen(&self, source: &str, start: usize, out: &mut String) {
        for el in self.open_at(start) {
            out.push_str(source.get(el.open_tag.clone()).unwrap_or_default());
        }
    }

    /// Append closing tags for elements open at `end`, innermost first.
    pub(crate) fn write_close(&self, end: usize, out: &mut String) {
        for el in self.open_at(end).into_iter().rev() {
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

fn reader_offset(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}
