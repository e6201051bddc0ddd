#![cfg(feature = "async")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pagewise::{
    AsyncMeasurementOracle, BlockingOracle, CancelFlag, Document, FnOracle, GridOracle,
    LayoutContext, NeverCancel, OracleError, Tier,
};
use pagewise_store::{BoundaryCache, BoundarySource, ChapterSession, MemoryBoundaryCache};

/// Oracle that yields before answering, like a renderer waiting for layout.
struct SettlingOracle {
    inner: GridOracle,
    calls: usize,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl SettlingOracle {
    fn new() -> Self {
        Self {
            inner: GridOracle::new(),
            calls: 0,
            cancel_after: None,
        }
    }
}

impl AsyncMeasurementOracle for SettlingOracle {
    async fn fits(&mut self, fragment: &str, layout: &LayoutContext) -> Result<bool, OracleError> {
        self.calls += 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if self.calls >= *limit {
                flag.cancel();
            }
        }
        tokio::task::yield_now().await;
        pagewise::MeasurementOracle::fits(&mut self.inner, fragment, layout)
    }
}

fn text() -> String {
    "It was the best of times, it was the worst of times. ".repeat(60)
}

fn layout() -> LayoutContext {
    LayoutContext::for_box(200.0, 160.0).with_font_size(10.0)
}

#[tokio::test]
async fn exact_tier_open_then_cache_hit() {
    let text = text();
    let doc = Document::plain(&text);
    let session = ChapterSession::new(MemoryBoundaryCache::new()).with_tier(Tier::Exact);

    let mut oracle = SettlingOracle::new();
    let opened = session
        .open_async("book", "ch", &doc, &layout(), &mut oracle, &NeverCancel)
        .await
        .expect("open");
    assert_eq!(opened.source, BoundarySource::Paginated);
    assert!(opened.is_complete());
    assert!(oracle.calls > 0);

    let mut again = SettlingOracle::new();
    let cached = session
        .open_async("book", "ch", &doc, &layout(), &mut again, &NeverCancel)
        .await
        .expect("reopen");
    assert_eq!(cached.source, BoundarySource::Cache);
    assert_eq!(cached.boundaries, opened.boundaries);
    assert_eq!(again.calls, 0);
}

#[tokio::test]
async fn exact_and_fast_tiers_agree() {
    let text = text();
    let doc = Document::plain(&text);
    let fast = ChapterSession::new(MemoryBoundaryCache::new())
        .open("b", "c", &doc, &layout(), &mut GridOracle::new())
        .expect("fast");
    let exact = ChapterSession::new(MemoryBoundaryCache::new())
        .with_tier(Tier::Exact)
        .open_async(
            "b",
            "c",
            &doc,
            &layout(),
            &mut BlockingOracle(GridOracle::new()),
            &NeverCancel,
        )
        .await
        .expect("exact");
    assert_eq!(fast.boundaries, exact.boundaries);
}

#[tokio::test]
async fn cancel_mid_run_writes_nothing() {
    let text = text();
    let doc = Document::plain(&text);
    let session = ChapterSession::new(MemoryBoundaryCache::new()).with_tier(Tier::Exact);
    let flag = CancelFlag::new();
    let mut oracle = SettlingOracle::new();
    oracle.cancel_after = Some((25, flag.clone()));

    let err = session
        .open_async("book", "ch", &doc, &layout(), &mut oracle, &flag)
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
    assert_eq!(oracle.calls, 25);
    assert!(session.cache().get("book", "ch").expect("get").is_none());
}

#[tokio::test]
async fn superseded_run_does_not_overwrite_newer_entry() {
    let text = text();
    let doc = Document::plain(&text);
    let session = ChapterSession::new(MemoryBoundaryCache::new()).with_tier(Tier::Exact);
    let small = layout();
    let large = layout().with_font_size(14.0);

    // The first run is overtaken by a second open of the same chapter.
    let started = Arc::new(AtomicBool::new(false));
    let mut slow = SettlingOracle::new();
    let first = async {
        started.store(true, Ordering::SeqCst);
        session
            .open_async("book", "ch", &doc, &small, &mut slow, &NeverCancel)
            .await
    };
    let second = async {
        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        session
            .open_async(
                "book",
                "ch",
                &doc,
                &large,
                &mut BlockingOracle(GridOracle::new()),
                &NeverCancel,
            )
            .await
    };
    let (first, second) = tokio::join!(first, second);
    let first = first.expect("first run");
    let second = second.expect("second run");
    assert_ne!(first.boundaries, second.boundaries);

    let stored = session
        .cache()
        .get("book", "ch")
        .expect("get")
        .expect("entry");
    assert_eq!(stored.fingerprint(), &large.fingerprint());
}

fn words_per_page(limit: usize) -> BlockingOracle<impl pagewise::MeasurementOracle> {
    BlockingOracle(FnOracle(
        move |fragment: &str, _: &LayoutContext| -> Result<bool, OracleError> {
            Ok(fragment.chars().count() <= limit)
        },
    ))
}

#[tokio::test]
async fn long_chapter_resumes_then_caches() {
    let text = "word ".repeat(1000);
    let doc = Document::plain(&text);
    let layout = LayoutContext::default();
    let session = ChapterSession::new(MemoryBoundaryCache::new()).with_tier(Tier::Exact);

    let first = session
        .open_async("book", "ch", &doc, &layout, &mut words_per_page(24), &NeverCancel)
        .await
        .expect("first open");
    assert_eq!(first.resume_at(), Some(2000));
    assert!(session.cache().get("book", "ch").expect("get").is_none());

    let rest = session
        .open_through_async(
            "book",
            "ch",
            &doc,
            &layout,
            &mut words_per_page(24),
            doc.char_len(),
            &NeverCancel,
        )
        .await
        .expect("finish");
    assert!(rest.is_complete());
    assert_eq!(rest.boundaries.page_count(), 250);
    assert_eq!(
        &rest.boundaries.start_indices()[..101],
        first.boundaries.start_indices()
    );

    let cached = session
        .open_async("book", "ch", &doc, &layout, &mut words_per_page(24), &NeverCancel)
        .await
        .expect("reopen");
    assert_eq!(cached.source, BoundarySource::Cache);
    assert_eq!(cached.boundaries, rest.boundaries);
}
