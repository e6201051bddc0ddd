//! Pagination driver.
//!
//! Repeatedly asks the boundary finder for the end of the current page,
//! forces progress when nothing fits, and stops at the end of the document
//! or at the iteration cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::document::Document;
use crate::error::PaginateError;
use crate::finder::{search_page_end, ProbeStats};
use crate::layout::{ConfigFingerprint, LayoutContext};
use crate::oracle::MeasurementOracle;
use crate::pages::PageBoundarySet;

/// Fast tier search window in chars.
pub const FAST_WINDOW_CHARS: usize = 100_000;
/// Fast tier page cap.
pub const FAST_MAX_ITERATIONS: usize = 1_000;
/// Exact tier search window in chars.
pub const EXACT_WINDOW_CHARS: usize = 20_000;
/// Exact tier page cap.
pub const EXACT_MAX_ITERATIONS: usize = 100;
/// Default lower bound on a word-snapped page relative to the exact fit.
pub const DEFAULT_MIN_SNAP_FRACTION: f32 = 0.5;

/// Preset cost/accuracy tradeoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tier {
    /// Synchronous oracle, large window, high page cap.
    #[default]
    Fast,
    /// Async oracle that settles before every probe, smaller window and cap.
    Exact,
}

impl Tier {
    /// Options preset for this tier.
    pub const fn options(self) -> PaginateOptions {
        match self {
            Tier::Fast => PaginateOptions {
                window_chars: FAST_WINDOW_CHARS,
                max_iterations: FAST_MAX_ITERATIONS,
                min_snap_fraction: DEFAULT_MIN_SNAP_FRACTION,
            },
            Tier::Exact => PaginateOptions {
                window_chars: EXACT_WINDOW_CHARS,
                max_iterations: EXACT_MAX_ITERATIONS,
                min_snap_fraction: DEFAULT_MIN_SNAP_FRACTION,
            },
        }
    }
}

/// Search and termination limits for one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaginateOptions {
    /// Upper bound on one page's length in chars.
    pub window_chars: usize,
    /// Maximum number of pages searched before the run stops.
    pub max_iterations: usize,
    /// A word-snapped page must keep at least this fraction of the exact fit.
    pub min_snap_fraction: f32,
}

impl Default for PaginateOptions {
    fn default() -> Self {
        Tier::Fast.options()
    }
}

impl PaginateOptions {
    /// Set the search window. Clamped to at least one char.
    pub fn with_window_chars(mut self, window_chars: usize) -> Self {
        self.window_chars = window_chars.max(1);
        self
    }

    /// Set the page cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the word-snap floor. Clamped to `[0, 1]`; NaN keeps the default.
    pub fn with_min_snap_fraction(mut self, fraction: f32) -> Self {
        self.min_snap_fraction = if fraction.is_nan() {
            DEFAULT_MIN_SNAP_FRACTION
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self
    }
}

/// Cooperative cancellation hook checked between probes.
pub trait CancelToken {
    /// Whether the run should stop.
    fn is_cancelled(&self) -> bool;
}

/// Cancellation token that never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancelToken for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: CancelToken + ?Sized> CancelToken for &T {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

impl<T: CancelToken + ?Sized> CancelToken for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// Shareable cancellation flag.
///
/// Clones observe the same flag, so one clone can be handed to a run while
/// another stays with the caller (for example the UI that navigated away).
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl CancelToken for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaginationStatus {
    /// The whole remainder of the document was paginated.
    Complete,
    /// The iteration cap was hit; the last boundary starts unpaginated text.
    Incomplete {
        /// Offset a follow-up run should start from.
        resume_at: usize,
        /// Finder calls made before stopping.
        iterations: usize,
    },
}

/// Result of a pagination run.
#[derive(Clone, Debug, PartialEq)]
pub struct Pagination {
    /// Page start offsets and the layout they were computed for.
    pub boundaries: PageBoundarySet,
    /// Whether the run reached the end of the document.
    pub status: PaginationStatus,
    /// Finder calls made.
    pub iterations: usize,
    /// Oracle probes issued.
    pub oracle_calls: usize,
    /// Probes whose oracle call failed and were treated as overflow.
    pub oracle_failures: usize,
}

impl Pagination {
    /// Check if the run covered the whole document.
    pub fn is_complete(&self) -> bool {
        matches!(self.status, PaginationStatus::Complete)
    }

    /// Number of page starts produced.
    pub fn page_count(&self) -> usize {
        self.boundaries.page_count()
    }
}

/// Loop state shared by the blocking and async drivers.
#[derive(Debug)]
pub(crate) struct PageWalk {
    current: usize,
    len: usize,
    starts: Vec<usize>,
    iterations: usize,
    max_iterations: usize,
    pub(crate) stats: ProbeStats,
}

impl PageWalk {
    pub(crate) fn new(
        document: &Document<'_>,
        start: usize,
        layout: &LayoutContext,
        options: &PaginateOptions,
    ) -> Result<Self, PaginateError> {
        layout.validate()?;
        document.check_start(start)?;
        let current = document.ceil_cut(start);
        let mut starts = Vec::with_capacity(estimate_pages(document.char_len() - current));
        starts.push(current);
        Ok(Self {
            current,
            len: document.char_len(),
            starts,
            iterations: 0,
            max_iterations: options.max_iterations,
            stats: ProbeStats::default(),
        })
    }

    /// Start of the next page to search, or `None` when the run is over.
    pub(crate) fn next_start(&self) -> Option<usize> {
        if self.current >= self.len || self.iterations >= self.max_iterations {
            return None;
        }
        Some(self.current)
    }

    /// Accept the finder's end offset for the page at the current position.
    pub(crate) fn advance(&mut self, document: &Document<'_>, end: usize) {
        self.iterations += 1;
        let next = if end <= self.current {
            // Nothing fits; keep moving so the run terminates.
            document.ceil_cut(self.current + 1).min(self.len)
        } else {
            end.min(self.len)
        };
        log::trace!(
            "page {}: [{}, {}){}",
            self.starts.len() - 1,
            self.current,
            next,
            if end <= self.current { " (forced)" } else { "" }
        );
        self.current = next;
        if self.current < self.len {
            self.starts.push(self.current);
        }
    }

    pub(crate) fn finish(self, fingerprint: ConfigFingerprint) -> Pagination {
        let status = if self.current >= self.len {
            PaginationStatus::Complete
        } else {
            log::warn!(
                "pagination stopped after {} iterations at offset {} of {}",
                self.iterations,
                self.current,
                self.len
            );
            PaginationStatus::Incomplete {
                resume_at: self.current,
                iterations: self.iterations,
            }
        };
        log::debug!(
            "paginated {} pages in {} iterations ({} oracle calls, {} failed)",
            self.starts.len(),
            self.iterations,
            self.stats.calls,
            self.stats.failures
        );
        Pagination {
            boundaries: PageBoundarySet::from_sorted(self.starts, fingerprint),
            status,
            iterations: self.iterations,
            oracle_calls: self.stats.calls,
            oracle_failures: self.stats.failures,
        }
    }
}

fn estimate_pages(remaining: usize) -> usize {
    (remaining / 1024).clamp(1, 256)
}

/// Paginate `document` from `start` with a blocking oracle.
pub fn paginate<O: MeasurementOracle + ?Sized>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
) -> Result<Pagination, PaginateError> {
    paginate_with_cancel(document, start, layout, oracle, options, &NeverCancel)
}

/// Paginate with a cancellation token checked before every page.
///
/// A cancelled run returns [`PaginateError::Cancelled`] and no boundaries.
pub fn paginate_with_cancel<O, C>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
    cancel: &C,
) -> Result<Pagination, PaginateError>
where
    O: MeasurementOracle + ?Sized,
    C: CancelToken + ?Sized,
{
    let mut walk = PageWalk::new(document, start, layout, options)?;
    while let Some(current) = walk.next_start() {
        if cancel.is_cancelled() {
            log::debug!("pagination cancelled at offset {}", current);
            return Err(PaginateError::Cancelled);
        }
        let end = search_page_end(document, current, layout, oracle, options, &mut walk.stats)?;
        walk.advance(document, end);
    }
    Ok(walk.finish(layout.fingerprint()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::oracle::FnOracle;

    fn max_chars(limit: usize) -> impl MeasurementOracle {
        FnOracle(move |fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            Ok(fragment.chars().count() <= limit)
        })
    }

    #[test]
    fn test_tier_presets() {
        let fast = Tier::Fast.options();
        assert_eq!(fast.window_chars, 100_000);
        assert_eq!(fast.max_iterations, 1_000);
        let exact = Tier::Exact.options();
        assert_eq!(exact.window_chars, 20_000);
        assert_eq!(exact.max_iterations, 100);
        assert_eq!(PaginateOptions::default(), fast);
    }

    #[test]
    fn test_builders_clamp() {
        let options = PaginateOptions::default()
            .with_window_chars(0)
            .with_min_snap_fraction(4.0);
        assert_eq!(options.window_chars, 1);
        assert_eq!(options.min_snap_fraction, 1.0);
        let options = options.with_min_snap_fraction(f32::NAN);
        assert_eq!(options.min_snap_fraction, DEFAULT_MIN_SNAP_FRACTION);
    }

    #[test]
    fn test_paginates_words() {
        let doc = Document::plain("aaa bbb ccc ddd");
        let mut oracle = max_chars(8);
        let result = paginate(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert!(result.is_complete());
        assert_eq!(result.boundaries.start_indices(), &[0, 8]);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn test_forced_advance_when_nothing_fits() {
        let doc = Document::plain("abc");
        let mut oracle = max_chars(0);
        let result = paginate(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(result.boundaries.start_indices(), &[0, 1, 2]);
        assert!(result.is_complete());
    }

    #[test]
    fn test_iteration_cap_reports_incomplete() {
        let text = "x".repeat(100);
        let doc = Document::plain(&text);
        let mut oracle = max_chars(10);
        let options = PaginateOptions::default().with_max_iterations(3);
        let result = paginate(&doc, 0, &LayoutContext::default(), &mut oracle, &options).unwrap();
        assert_eq!(result.boundaries.start_indices(), &[0, 10, 20, 30]);
        assert_eq!(
            result.status,
            PaginationStatus::Incomplete {
                resume_at: 30,
                iterations: 3
            }
        );
    }

    #[test]
    fn test_start_at_end_is_single_boundary() {
        let doc = Document::plain("abc");
        let mut oracle = max_chars(10);
        let result = paginate(
            &doc,
            3,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap();
        assert_eq!(result.boundaries.start_indices(), &[3]);
        assert!(result.is_complete());
        assert_eq!(result.oracle_calls, 0);
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let doc = Document::plain("abc");
        let mut oracle = max_chars(10);
        let err = paginate(
            &doc,
            0,
            &LayoutContext::for_box(0.0, 100.0),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PaginateError::InvalidLayout(_)));
    }

    #[test]
    fn test_cancelled_before_first_page() {
        let doc = Document::plain("abc def");
        let mut oracle = max_chars(4);
        let flag = CancelFlag::new();
        flag.cancel();
        let err = paginate_with_cancel(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
            &flag,
        )
        .unwrap_err();
        assert_eq!(err, PaginateError::Cancelled);
    }

    #[test]
    fn test_cancel_mid_run() {
        let text = "word ".repeat(50);
        let doc = Document::plain(&text);
        let flag = CancelFlag::new();
        let observer = flag.clone();
        let mut probes = 0usize;
        let mut oracle = FnOracle(|fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            probes += 1;
            if probes == 20 {
                observer.cancel();
            }
            Ok(fragment.chars().count() <= 12)
        });
        let err = paginate_with_cancel(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
            &flag,
        )
        .unwrap_err();
        assert_eq!(err, PaginateError::Cancelled);
    }

    #[test]
    fn test_atomic_bool_token() {
        let token = AtomicBool::new(true);
        assert!(CancelToken::is_cancelled(&token));
        assert!(!NeverCancel.is_cancelled());
    }
}
