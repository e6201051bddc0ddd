//! Exact-tier pagination over an async oracle.
//!
//! Renderers that need a layout pass before a measurement is trustworthy
//! implement [`AsyncMeasurementOracle`]. The driver yields to the runtime
//! before every probe so the surface can settle and other tasks (and
//! cancellation) get a chance to run.

use std::future::Future;

use crate::document::Document;
use crate::driver::{CancelToken, NeverCancel, PageWalk, PaginateOptions, Pagination};
use crate::error::{OracleError, PaginateError};
use crate::finder::{BoundarySearch, ProbeStats};
use crate::layout::LayoutContext;
use crate::oracle::MeasurementOracle;

/// Async fit-test capability.
pub trait AsyncMeasurementOracle {
    /// Report whether `fragment` fits the content box of `layout`.
    fn fits(
        &mut self,
        fragment: &str,
        layout: &LayoutContext,
    ) -> impl Future<Output = Result<bool, OracleError>>;
}

impl<O: AsyncMeasurementOracle + ?Sized> AsyncMeasurementOracle for &mut O {
    fn fits(
        &mut self,
        fragment: &str,
        layout: &LayoutContext,
    ) -> impl Future<Output = Result<bool, OracleError>> {
        (**self).fits(fragment, layout)
    }
}

/// Runs a blocking oracle on the async path.
#[derive(Clone, Debug, Default)]
pub struct BlockingOracle<O>(pub O);

impl<O: MeasurementOracle> AsyncMeasurementOracle for BlockingOracle<O> {
    async fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        self.0.fits(fragment, layout)
    }
}

/// Async counterpart of [`find_page_end`](crate::find_page_end).
pub async fn find_page_end_async<O: AsyncMeasurementOracle>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
) -> Result<usize, PaginateError> {
    let mut stats = ProbeStats::default();
    search_async(document, start, layout, oracle, options, &NeverCancel, &mut stats).await
}

async fn search_async<O, C>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
    cancel: &C,
    stats: &mut ProbeStats,
) -> Result<usize, PaginateError>
where
    O: AsyncMeasurementOracle,
    C: CancelToken + ?Sized,
{
    let mut search = BoundarySearch::new(document, start, options)?;
    while let Some(probe) = search.next_probe(document) {
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(PaginateError::Cancelled);
        }
        let fragment = document.fragment(probe.start, probe.end);
        let result = oracle.fits(&fragment, layout).await;
        search.record(stats.answer(probe, result));
    }
    Ok(search.finish(document))
}

/// Paginate with an async oracle.
///
/// Same boundaries as [`paginate`](crate::paginate) for the same answers;
/// cancellation is checked before every probe.
pub async fn paginate_async<O, C>(
    document: &Document<'_>,
    start: usize,
    layout: &LayoutContext,
    oracle: &mut O,
    options: &PaginateOptions,
    cancel: &C,
) -> Result<Pagination, PaginateError>
where
    O: AsyncMeasurementOracle,
    C: CancelToken + ?Sized,
{
    let mut walk = PageWalk::new(document, start, layout, options)?;
    while let Some(current) = walk.next_start() {
        if cancel.is_cancelled() {
            log::debug!("pagination cancelled at offset {}", current);
            return Err(PaginateError::Cancelled);
        }
        let end = search_async(
            document,
            current,
            layout,
            oracle,
            options,
            cancel,
            &mut walk.stats,
        )
        .await?;
        walk.advance(document, end);
    }
    Ok(walk.finish(layout.fingerprint()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{paginate, CancelFlag, Tier};
    use crate::oracle::GridOracle;

    struct Settling {
        limit: usize,
        calls: usize,
    }

    impl AsyncMeasurementOracle for Settling {
        async fn fits(
            &mut self,
            fragment: &str,
            _layout: &LayoutContext,
        ) -> Result<bool, OracleError> {
            self.calls += 1;
            tokio::task::yield_now().await;
            Ok(fragment.chars().count() <= self.limit)
        }
    }

    #[tokio::test]
    async fn test_async_matches_blocking() {
        let text = "lorem ipsum dolor sit amet ".repeat(40);
        let doc = Document::plain(&text);
        let layout = LayoutContext::for_box(120.0, 96.0);
        let options = Tier::Exact.options();

        let sync = paginate(&doc, 0, &layout, &mut GridOracle::new(), &options).unwrap();
        let mut oracle = BlockingOracle(GridOracle::new());
        let exact = paginate_async(&doc, 0, &layout, &mut oracle, &options, &NeverCancel)
            .await
            .unwrap();
        assert_eq!(sync.boundaries, exact.boundaries);
        assert_eq!(sync.oracle_calls, exact.oracle_calls);
    }

    #[tokio::test]
    async fn test_find_page_end_async() {
        let doc = Document::plain("word word word word");
        let mut oracle = Settling { limit: 8, calls: 0 };
        let end = find_page_end_async(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &PaginateOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(end, 5);
        assert!(oracle.calls > 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_error() {
        let text = "word ".repeat(200);
        let doc = Document::plain(&text);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut oracle = Settling { limit: 10, calls: 0 };
        let err = paginate_async(
            &doc,
            0,
            &LayoutContext::default(),
            &mut oracle,
            &Tier::Exact.options(),
            &flag,
        )
        .await
        .unwrap_err();
        assert_eq!(err, PaginateError::Cancelled);
        assert_eq!(oracle.calls, 0);
    }
}
