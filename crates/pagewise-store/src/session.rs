//! Chapter open path: cache lookup, pagination, cache write.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[cfg(feature = "async")]
use pagewise::{paginate_async, AsyncMeasurementOracle};
use pagewise::{
    paginate_with_cancel, CancelToken, Document, LayoutContext, MeasurementOracle, NeverCancel,
    PageBoundarySet, PaginateError, PaginateOptions, Pagination, PaginationStatus, Tier,
};

use crate::cache::BoundaryCache;
use crate::error::{CacheError, SessionError};

/// Runtime diagnostics from chapter opens.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionDiagnostic {
    /// Boundaries were served from the cache.
    CacheHit {
        book_id: String,
        chapter_id: String,
        page_count: usize,
    },
    /// No usable cache entry; the chapter was paginated.
    CacheMiss { book_id: String, chapter_id: String },
    /// A cache operation failed and was ignored.
    CacheError {
        book_id: String,
        chapter_id: String,
        error: CacheError,
    },
    /// The run hit its iteration cap.
    Incomplete { resume_at: usize, iterations: usize },
    /// The run was cancelled.
    Cancelled,
    /// Wall time of a pagination run.
    PaginationTimeMs(u32),
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(SessionDiagnostic) + Send + 'static>>>;
type DiagnosticSink = Option<DiagnosticCallback>;

/// Where an opened chapter's boundaries came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundarySource {
    /// Reused from the cache without calling the oracle.
    Cache,
    /// Computed by a pagination run.
    Paginated,
}

/// Boundaries for an opened chapter.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenedChapter {
    /// Page start offsets under the current layout.
    pub boundaries: PageBoundarySet,
    /// Whether later pages are still unknown.
    pub status: PaginationStatus,
    /// Cache or fresh run.
    pub source: BoundarySource,
}

impl OpenedChapter {
    /// Check if every page of the chapter is known.
    pub fn is_complete(&self) -> bool {
        matches!(self.status, PaginationStatus::Complete)
    }

    /// First offset not yet measured, when the chapter is incomplete.
    ///
    /// The last boundary starts there, so the final page of an incomplete
    /// set is unmeasured text rather than a real page.
    pub fn resume_at(&self) -> Option<usize> {
        match self.status {
            PaginationStatus::Complete => None,
            PaginationStatus::Incomplete { resume_at, .. } => Some(resume_at),
        }
    }

    /// Page index containing a saved reading offset.
    ///
    /// Returns `None` for offsets past the measured part of an incomplete
    /// chapter; reopen with [`ChapterSession::open_through`] to reach them.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        if self.resume_at().is_some_and(|resume_at| offset >= resume_at) {
            return None;
        }
        self.boundaries.page_for_offset(offset)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ChapterKey {
    book_id: String,
    chapter_id: String,
}

/// Boundaries gathered so far for one chapter under one layout.
#[derive(Clone, Debug, PartialEq)]
struct Progress {
    boundaries: PageBoundarySet,
    status: PaginationStatus,
}

impl Progress {
    fn resume_at(&self) -> Option<usize> {
        match self.status {
            PaginationStatus::Complete => None,
            PaginationStatus::Incomplete { resume_at, .. } => Some(resume_at),
        }
    }

    /// Whether `target` lies inside a measured page.
    fn covers(&self, target: usize) -> bool {
        self.resume_at().is_none_or(|resume_at| target < resume_at)
    }

    /// Append a run that started at this prefix's resume offset.
    fn extend(prefix: Option<Progress>, run: Pagination) -> Result<Progress, PaginateError> {
        let Some(prefix) = prefix else {
            return Ok(Progress {
                boundaries: run.boundaries,
                status: run.status,
            });
        };
        let (mut starts, fingerprint) = prefix.boundaries.into_parts();
        // The run re-emits the resume offset as its first start.
        starts.pop();
        starts.extend_from_slice(run.boundaries.start_indices());
        Ok(Progress {
            boundaries: PageBoundarySet::new(starts, fingerprint)?,
            status: run.status,
        })
    }

    fn into_opened(self) -> OpenedChapter {
        OpenedChapter {
            boundaries: self.boundaries,
            status: self.status,
            source: BoundarySource::Paginated,
        }
    }
}

/// Per-chapter coordination state.
#[derive(Debug, Default)]
struct ChapterSlot {
    /// Held while a run reads or writes this chapter's cache entry.
    run: Mutex<()>,
    /// Bumped by every run; only the latest run may write.
    generation: AtomicU64,
    /// Prefix left by a run that hit its page cap.
    partial: Mutex<Option<Progress>>,
}

impl ChapterSlot {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn partial(&self) -> MutexGuard<'_, Option<Progress>> {
        self.partial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::Acquire) == ticket
    }

    /// Forget everything known about the chapter. Caller holds the run lock.
    fn reset(&self) {
        self.begin();
        *self.partial() = None;
    }
}

/// Opens chapters against a boundary cache.
///
/// Opens of the same `(book_id, chapter_id)` are serialized so two runs
/// never race to write one cache entry; different chapters proceed in
/// parallel. Cache failures are logged, reported to the diagnostics sink and
/// otherwise treated as misses.
///
/// Only complete boundary sets reach the cache. When a run stops at its page
/// cap, the session keeps the measured prefix and the next open of that
/// chapter under the same layout continues from the resume offset instead of
/// starting over.
pub struct ChapterSession<C> {
    cache: C,
    options: PaginateOptions,
    slots: Mutex<HashMap<ChapterKey, Arc<ChapterSlot>>>,
    diagnostic_sink: DiagnosticSink,
}

impl<C: fmt::Debug> fmt::Debug for ChapterSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapterSession")
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: BoundaryCache> ChapterSession<C> {
    /// Create a session with fast-tier options.
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            options: PaginateOptions::default(),
            slots: Mutex::new(HashMap::new()),
            diagnostic_sink: None,
        }
    }

    /// Replace the pagination options.
    pub fn with_options(mut self, options: PaginateOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a tier preset.
    pub fn with_tier(self, tier: Tier) -> Self {
        self.with_options(tier.options())
    }

    /// Register or replace the diagnostics sink.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(SessionDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    /// Options used for runs.
    pub fn options(&self) -> &PaginateOptions {
        &self.options
    }

    /// Underlying cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Open a chapter with a blocking oracle.
    ///
    /// Performs at most one capped run. If an earlier open stopped at the
    /// cap, this one picks up where it left off.
    pub fn open<O: MeasurementOracle + ?Sized>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
    ) -> Result<OpenedChapter, SessionError> {
        self.open_through_with_cancel(
            book_id,
            chapter_id,
            document,
            layout,
            oracle,
            0,
            &NeverCancel,
        )
    }

    /// Open a chapter and keep paginating until `target` is on a measured page.
    ///
    /// `target` is usually a saved reading offset. Each run still honours the
    /// page cap; runs repeat until the offset is reached or the chapter is
    /// complete. Pass `document.char_len()` to paginate the whole chapter.
    pub fn open_through<O: MeasurementOracle + ?Sized>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
        target: usize,
    ) -> Result<OpenedChapter, SessionError> {
        self.open_through_with_cancel(
            book_id,
            chapter_id,
            document,
            layout,
            oracle,
            target,
            &NeverCancel,
        )
    }

    /// Open a chapter, abandoning the run when `cancel` fires.
    ///
    /// A cancelled run leaves the cache entry untouched.
    pub fn open_with_cancel<O, T>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
        cancel: &T,
    ) -> Result<OpenedChapter, SessionError>
    where
        O: MeasurementOracle + ?Sized,
        T: CancelToken + ?Sized,
    {
        self.open_through_with_cancel(book_id, chapter_id, document, layout, oracle, 0, cancel)
    }

    /// Cancellable [`open_through`](Self::open_through).
    #[allow(clippy::too_many_arguments)]
    pub fn open_through_with_cancel<O, T>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
        target: usize,
        cancel: &T,
    ) -> Result<OpenedChapter, SessionError>
    where
        O: MeasurementOracle + ?Sized,
        T: CancelToken + ?Sized,
    {
        layout.validate()?;
        let slot = self.slot(book_id, chapter_id);
        let _guard = slot.lock();
        let ticket = slot.begin();

        if let Some(hit) = self.lookup(book_id, chapter_id, document, layout) {
            return Ok(hit);
        }

        let mut prefix = self.resume_point(&slot, book_id, chapter_id, document, layout);
        let progress = loop {
            let start = prefix.as_ref().and_then(Progress::resume_at).unwrap_or(0);
            let started = Instant::now();
            let result =
                paginate_with_cancel(document, start, layout, oracle, &self.options, cancel);
            let run = self.finish_run(result, started)?;
            let stalled = run.iterations == 0;
            let progress = Progress::extend(prefix, run)?;
            if stalled || progress.covers(target) {
                break progress;
            }
            prefix = Some(progress);
        };
        if slot.is_current(ticket) {
            self.settle(&slot, book_id, chapter_id, &progress);
        }
        Ok(progress.into_opened())
    }

    /// Open a chapter with an async oracle.
    ///
    /// The chapter lock is only held while the cache is read and written, never
    /// across an await. If a newer open of the same chapter starts while this
    /// one is still measuring, this run returns its boundaries but leaves the
    /// cache to the newer run.
    #[cfg(feature = "async")]
    pub async fn open_async<O, T>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
        cancel: &T,
    ) -> Result<OpenedChapter, SessionError>
    where
        O: AsyncMeasurementOracle,
        T: CancelToken + ?Sized,
    {
        self.open_through_async(book_id, chapter_id, document, layout, oracle, 0, cancel)
            .await
    }

    /// Async [`open_through`](Self::open_through).
    #[cfg(feature = "async")]
    #[allow(clippy::too_many_arguments)]
    pub async fn open_through_async<O, T>(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
        oracle: &mut O,
        target: usize,
        cancel: &T,
    ) -> Result<OpenedChapter, SessionError>
    where
        O: AsyncMeasurementOracle,
        T: CancelToken + ?Sized,
    {
        layout.validate()?;
        let slot = self.slot(book_id, chapter_id);
        let (ticket, mut prefix) = {
            let _guard = slot.lock();
            if let Some(hit) = self.lookup(book_id, chapter_id, document, layout) {
                return Ok(hit);
            }
            let prefix = self.resume_point(&slot, book_id, chapter_id, document, layout);
            (slot.begin(), prefix)
        };

        let progress = loop {
            let start = prefix.as_ref().and_then(Progress::resume_at).unwrap_or(0);
            let started = Instant::now();
            let result =
                paginate_async(document, start, layout, oracle, &self.options, cancel).await;
            let run = self.finish_run(result, started)?;
            let stalled = run.iterations == 0;
            let progress = Progress::extend(prefix, run)?;
            if stalled || progress.covers(target) {
                break progress;
            }
            prefix = Some(progress);
        };
        {
            let _guard = slot.lock();
            if slot.is_current(ticket) {
                self.settle(&slot, book_id, chapter_id, &progress);
            } else {
                log::debug!(
                    "skipping cache write for {}/{}: superseded by a newer run",
                    book_id,
                    chapter_id
                );
            }
        }
        Ok(progress.into_opened())
    }

    /// Drop the cached boundaries of one chapter.
    pub fn invalidate(&self, book_id: &str, chapter_id: &str) -> Result<(), CacheError> {
        let slot = self.slot(book_id, chapter_id);
        let _guard = slot.lock();
        slot.reset();
        self.cache.clear(book_id, chapter_id)
    }

    /// Drop every cached chapter of a book.
    ///
    /// Waits for blocking opens of the book's chapters to finish so none of
    /// them can write an entry after the book is cleared.
    pub fn clear_book(&self, book_id: &str) -> Result<(), CacheError> {
        let mut slots: Vec<(String, Arc<ChapterSlot>)> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(key, _)| key.book_id == book_id)
            .map(|(key, slot)| (key.chapter_id.clone(), Arc::clone(slot)))
            .collect();
        // Fixed lock order so concurrent clears cannot deadlock.
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        let _guards: Vec<MutexGuard<'_, ()>> = slots
            .iter()
            .map(|(_, slot)| {
                let guard = slot.lock();
                slot.reset();
                guard
            })
            .collect();
        self.cache.clear_book(book_id)
    }

    fn slot(&self, book_id: &str, chapter_id: &str) -> Arc<ChapterSlot> {
        let key = ChapterKey {
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
        };
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key).or_default())
    }

    fn lookup(
        &self,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
    ) -> Option<OpenedChapter> {
        let cached = match self.cache.get(book_id, chapter_id) {
            Ok(cached) => cached,
            Err(error) => {
                self.cache_error(book_id, chapter_id, error);
                None
            }
        };
        let fingerprint = layout.fingerprint();
        let hit = cached.filter(|boundaries| {
            if boundaries.fingerprint() != &fingerprint {
                log::debug!(
                    "cache entry for {}/{} has fingerprint {}, need {}",
                    book_id,
                    chapter_id,
                    boundaries.fingerprint(),
                    fingerprint
                );
                return false;
            }
            match boundaries.validate_for(document) {
                Ok(()) => true,
                Err(err) => {
                    self.cache_error(book_id, chapter_id, CacheError::Corrupt(err.to_string()));
                    false
                }
            }
        });
        match hit {
            Some(boundaries) => {
                self.emit_diagnostic(SessionDiagnostic::CacheHit {
                    book_id: book_id.to_string(),
                    chapter_id: chapter_id.to_string(),
                    page_count: boundaries.page_count(),
                });
                Some(OpenedChapter {
                    boundaries,
                    status: PaginationStatus::Complete,
                    source: BoundarySource::Cache,
                })
            }
            None => {
                self.emit_diagnostic(SessionDiagnostic::CacheMiss {
                    book_id: book_id.to_string(),
                    chapter_id: chapter_id.to_string(),
                });
                None
            }
        }
    }

    /// Measured prefix left by an earlier capped run, if it still applies.
    fn resume_point(
        &self,
        slot: &ChapterSlot,
        book_id: &str,
        chapter_id: &str,
        document: &Document<'_>,
        layout: &LayoutContext,
    ) -> Option<Progress> {
        let partial = slot.partial().clone()?;
        if partial.boundaries.fingerprint() != &layout.fingerprint()
            || partial.boundaries.validate_for(document).is_err()
        {
            log::debug!(
                "dropping partial boundaries for {}/{}: layout or document changed",
                book_id,
                chapter_id
            );
            return None;
        }
        log::debug!(
            "resuming {}/{} at offset {:?} after {} pages",
            book_id,
            chapter_id,
            partial.resume_at(),
            partial.boundaries.page_count() - 1
        );
        Some(partial)
    }

    fn finish_run(
        &self,
        result: Result<Pagination, PaginateError>,
        started: Instant,
    ) -> Result<Pagination, SessionError> {
        let elapsed = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        self.emit_diagnostic(SessionDiagnostic::PaginationTimeMs(elapsed));
        match result {
            Ok(pagination) => {
                if let PaginationStatus::Incomplete {
                    resume_at,
                    iterations,
                } = pagination.status
                {
                    self.emit_diagnostic(SessionDiagnostic::Incomplete {
                        resume_at,
                        iterations,
                    });
                }
                Ok(pagination)
            }
            Err(err) => {
                if err == PaginateError::Cancelled {
                    self.emit_diagnostic(SessionDiagnostic::Cancelled);
                }
                Err(err.into())
            }
        }
    }

    /// Record a finished open: complete sets go to the cache, partial ones
    /// stay with the slot for the next open.
    fn settle(&self, slot: &ChapterSlot, book_id: &str, chapter_id: &str, progress: &Progress) {
        if progress.resume_at().is_some() {
            *slot.partial() = Some(progress.clone());
            return;
        }
        *slot.partial() = None;
        if let Err(error) = self.cache.set(book_id, chapter_id, &progress.boundaries) {
            self.cache_error(book_id, chapter_id, error);
        }
    }

    fn cache_error(&self, book_id: &str, chapter_id: &str, error: CacheError) {
        log::warn!(
            "boundary cache error for {}/{}, treating as miss: {}",
            book_id,
            chapter_id,
            error
        );
        self.emit_diagnostic(SessionDiagnostic::CacheError {
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            error,
        });
    }

    fn emit_diagnostic(&self, diagnostic: SessionDiagnostic) {
        let Some(sink) = &self.diagnostic_sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            sink(diagnostic);
        }
    }
}
