//! Page boundary search.
//!
//! For one start offset, finds the largest end offset whose content still
//! fits the box, then pulls the cut back to the last word break. The search
//! itself is I/O free: [`BoundarySearch`] hands out [`Probe`]s and takes the
//! oracle's answers, so the blocking and async drivers share one
//! implementation.

use crate::document::Document;
use crate::driver::PaginateOptions;
use crate::error::{OracleError, PaginateError};
use crate::layout::LayoutContext;
use crate::oracle::MeasurementOracle;

/// One oracle question: does `[start, end)` fit?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    /// First char of the candidate page.
    pub start: usize,
    /// One past the last char of the candidate page (always a cut point).
    pub end: usize,
}

/// Oracle bookkeeping for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ProbeStats {
    pub(crate) calls: usize,
    pub(crate) failures: usize,
}

impl ProbeStats {
    /// Fold one oracle answer into a fit decision. Failures fail closed.
    pub(crate) fn answer(&mut self, probe: Probe, result: Result<bool, OracleError>) -> bool {
        self.calls += 1;
        match result {
            Ok(fits) => fits,
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "oracle probe [{}, {}) failed, treating as overflow: {}",
                    probe.start,
                    probe.end,
                    err
                );
                false
            }
        }
    }
}

/// Windowed binary search for the end of one page.
///
/// Lengths are measured in chars from `start` and bounded by the window.
/// `lo` is always a length known to fit (the empty page trivially does) and
/// `hi` the largest length that might.
#[derive(Clone, Debug)]
pub struct BoundarySearch {
    start: usize,
    lo: usize,
    hi: usize,
    /// Length behind the outstanding probe, with the probe itself.
    pending: Option<(usize, Probe)>,
    min_snap_fraction: f32,
}

impl BoundarySearch {
    /// Start a search at `start` using the window and snapping rules in `options`.
    ///
    /// A start offset inside a markup tag is moved forward to the next cut point.
    pub fn new(
        document: &Document<'_>,
        start: usize,
        options: &PaginateOptions,
    ) -> Result<Self, PaginateError> {
        document.check_start(start)?;
        let start = document.ceil_cut(start);
        let remaining = document.char_len() - start;
        Ok(Self {
            start,
            lo: 0,
            hi: remaining.min(options.window_chars.max(1)),
            pending: None,
            min_snap_fraction: options.min_snap_fraction,
        })
    }

    /// Offset the page starts at.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Next question for the oracle, or `None` once the search has converged.
    pub fn next_probe(&mut self, document: &Document<'_>) -> Option<Probe> {
        if let Some((_, probe)) = self.pending {
            return Some(probe);
        }
        while self.lo < self.hi {
            let mid = self.lo + (self.hi - self.lo).div_ceil(2);
            let probe = self.probe_for(document, mid);
            // Snapped back onto a prefix already known to fit.
            if probe.end <= self.start + self.lo {
                self.lo = mid;
                continue;
            }
            self.pending = Some((mid, probe));
            return Some(probe);
        }
        None
    }

    /// Record the oracle's answer to the last probe.
    pub fn record(&mut self, fits: bool) {
        let Some((mid, probe)) = self.pending.take() else {
            return;
        };
        if fits {
            self.lo = mid;
        } else {
            // Every length between the snapped end and `mid` asks the same question.
            self.hi = probe.end - self.start - 1;
        }
    }

    /// Largest fitting page length found so far, snapped to a cut point.
    pub fn best_fit(&self, document: &Document<'_>) -> usize {
        document.floor_cut(self.start + self.lo) - self.start
    }

    /// Final end offset, pulled back to the last word break when one exists.
    ///
    /// Returns `start` unchanged when nothing fits. The cut stays
    /// character-exact at the end of the document, when the fitted prefix has
    /// no whitespace, or when the word break would leave a page shorter than
    /// `min_snap_fraction` of the fitted length.
    pub fn finish(self, document: &Document<'_>) -> usize {
        let best = self.best_fit(document);
        let end = self.start + best;
        if best == 0 || end >= document.char_len() {
            return end;
        }
        match document.last_break_after_whitespace(self.start, end) {
            Some(cut) if (cut - self.start) as f32 >= best as f32 * self.min_snap_fraction => cut,
            _ => end,
        }
    }

    fn probe_for(&self, document: &Document<'_>, len: usize) -> Probe {
        Probe {
            start: self.start,
            end: document.floor_cut(self.start + len).max(self.start),
        }
    }
}

/// Find where the page starting at `start` ends.
///
/// Oracle failures count as "does not fit". Returns `start` when not even one
/// char fits; the driver is responsible for forcing progress in that case.
pub fn find_page_end<O: MeasurementOracle + ?Sized>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
) -> Result<usize, PaginateError> {
    let mut stats = ProbeStats::default();
    search_page_end(document, start, layout, oracle, options, &mut stats)
}

pub(crate) fn search_page_end<O: MeasurementOracle + ?Sized>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
    stats: &mut ProbeStats,
) -> Result<usize, PaginateError> {
    let mut search = BoundarySearch::new(document, start, options)?;
    while let Some(probe) = search.next_probe(document) {
        let fragment = document.fragment(probe.start, probe.end);
        let fits = stats.answer(probe, oracle.fits(&fragment, layout));
        search.record(fits);
    }
    Ok(search.finish(document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FnOracle;

    fn max_chars(limit: usize) -> impl MeasurementOracle {
        FnOracle(move |fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            Ok(fragment.chars().count() <= limit)
        })
    }

    #[test]
    fn test_snaps_to_word_break() {
        let doc = Document::plain("word word word word");
        let mut oracle = max_chars(8);
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(end, 5);
    }

    #[test]
    fn test_exact_cut_without_whitespace() {
        let doc = Document::plain("abcdefghijklmnop");
        let mut oracle = max_chars(6);
        let end = find_page_end(
            &doc,
            2,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(end, 8);
    }

    #[test]
    fn test_tail_fits_without_snapping() {
        let doc = Document::plain("one two three");
        let mut oracle = max_chars(100);
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(end, doc.char_len());
    }

    #[test]
    fn test_nothing_fits_returns_start() {
        let doc = Document::plain("abc");
        let mut oracle = max_chars(0);
        let end = find_page_end(
            &doc,
            1,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(end, 1);
    }

    #[test]
    fn test_snap_floor_keeps_exact_cut() {
        // Only break is after "a " (2 chars) while 10 chars fit.
        let doc = Document::plain("a bcdefghijklmnop");
        let mut oracle = max_chars(10);
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(end, 10);

        let always_snap = PaginateOptions::default().with_min_snap_fraction(0.0);
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &always_snap,
        )
        .unwrap();
        assert_eq!(end, 2);
    }

    #[test]
    fn test_window_bounds_search() {
        let text = "x".repeat(500);
        let doc = Document::plain(&text);
        let mut oracle = max_chars(usize::MAX);
        let options = PaginateOptions::default().with_window_chars(64);
        let end = find_page_end(&doc, 0, &LayoutContext::default(), &mut oracle, &options)
            .unwrap();
        assert_eq!(end, 64);
    }

    #[test]
    fn test_probe_count_is_logarithmic() {
        let text = "y".repeat(100_000);
        let doc = Document::plain(&text);
        let mut calls = 0usize;
        let mut oracle = FnOracle(|fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            calls += 1;
            Ok(fragment.len() <= 1234)
        });
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        drop(oracle);
        assert_eq!(end, 1234);
        assert!(calls <= 18, "calls={}", calls);
    }

    #[test]
    fn test_oracle_error_fails_closed() {
        let doc = Document::plain("aaaa bbbb cccc dddd");
        let mut oracle = FnOracle(|fragment: &str, _: &LayoutContext| {
            if fragment.chars().count() > 7 {
                Err(OracleError::new("detached"))
            } else {
                Ok(true)
            }
        });
        let mut stats = ProbeStats::default();
        let end = search_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
            &mut stats,
        )
        .unwrap();
        assert_eq!(end, 5);
        assert!(stats.failures > 0);
        assert!(stats.calls >= stats.failures);
    }

    #[test]
    fn test_markup_probes_are_balanced_and_cut_outside_tags() {
        let src = "<p>one two three</p><p>four</p>";
        let doc = Document::markup(src).unwrap();
        let mut seen = Vec::new();
        let mut oracle = FnOracle(|fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            seen.push(fragment.to_string());
            let visible = fragment.chars().filter(|c| c.is_alphabetic()).count()
                - fragment.matches("<p>").count()
                - fragment.matches("</p>").count();
            Ok(visible <= 9)
        });
        let end = find_page_end(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        drop(oracle);
        assert!(doc.is_cut_point(end));
        assert_eq!(doc.slice(0, end), "<p>one two ");
        for fragment in &seen {
            assert_eq!(
                fragment.matches("<p>").count(),
                fragment.matches("</p>").count(),
                "{}",
                fragment
            );
        }
    }

    #[test]
    fn test_markup_search_asks_each_end_once() {
        let mut src = String::from("<p>");
        for i in 0..200 {
            src.push_str(&format!(
                "<span class=\"annotation-{i:04} footnote-reference\" data-ref=\"n{i}\">w{i}</span> "
            ));
        }
        src.push_str("</p>");
        let doc = Document::markup(&src).unwrap();
        let mut search = BoundarySearch::new(&doc, 0, &PaginateOptions::default()).unwrap();
        let mut ends = Vec::new();
        while let Some(probe) = search.next_probe(&doc) {
            ends.push(probe.end);
            search.record(probe.end <= 3_000);
        }
        let mut unique = ends.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), ends.len(), "repeated probe ends: {:?}", ends);

        let end = search.finish(&doc);
        assert!(end <= 3_000);
        assert!(doc.is_cut_point(end));
    }

    #[test]
    fn test_start_out_of_range() {
        let doc = Document::plain("abc");
        let mut oracle = max_chars(3);
        let err = find_page_end(
            &doc,
            9,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, PaginateError::StartOutOfRange { start: 9, len: 3 });
    }
}
