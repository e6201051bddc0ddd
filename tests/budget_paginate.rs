mod common;

use common::budget_alloc::BudgetAlloc;
use pagewise::{paginate, Document, GridOracle, LayoutContext, PaginateOptions};

// A 256k-char plain chapter needs ~32KiB of checkpoints plus the start list.
const PLAIN_BUDGET_BYTES: usize = 128 * 1024;
// Plain probes borrow the source, so allocations must not scale with probes.
const PLAIN_MAX_ALLOCATIONS: usize = 64;
// Markup keeps an atom per tag plus one owned fragment per probe.
const MARKUP_BUDGET_BYTES: usize = 2 * 1024 * 1024;

#[global_allocator]
static ALLOC: BudgetAlloc = BudgetAlloc::new();

fn plain_chapter() -> String {
    "Call me Ishmael. Some years ago, never mind how long precisely, I went to sea. ".repeat(3_300)
}

fn markup_chapter() -> String {
    let mut xhtml = String::from("<html><body>");
    for _ in 0..800 {
        xhtml.push_str("<p>It is a way I have of driving off the <em>spleen</em> and regulating the circulation &amp; so on.</p>");
    }
    xhtml.push_str("</body></html>");
    xhtml
}

fn layout() -> LayoutContext {
    LayoutContext::for_box(480.0, 800.0)
}

// Both documents run in one test so the counters never see another test's allocations.
#[test]
fn pagination_stays_under_budget() {
    let text = plain_chapter();
    let (pages, stats) = ALLOC.measure(|| {
        let doc = Document::plain(&text);
        paginate(
            &doc,
            0,
            &layout(),
            &mut GridOracle::new(),
            &PaginateOptions::default(),
        )
        .unwrap_or_else(|e| panic!("paginate plain: {}", e))
        .page_count()
    });
    assert!(pages > 10, "plain chapter produced only {} pages", pages);
    assert!(
        stats.peak_bytes <= PLAIN_BUDGET_BYTES,
        "plain pagination peak {} bytes exceeds budget {} bytes",
        stats.peak_bytes,
        PLAIN_BUDGET_BYTES
    );
    assert!(
        stats.allocations <= PLAIN_MAX_ALLOCATIONS,
        "plain pagination made {} allocations (limit {})",
        stats.allocations,
        PLAIN_MAX_ALLOCATIONS
    );

    let xhtml = markup_chapter();
    let (pages, stats) = ALLOC.measure(|| {
        let doc = Document::markup(&xhtml).unwrap_or_else(|e| panic!("scan markup: {}", e));
        paginate(
            &doc,
            0,
            &layout(),
            &mut GridOracle::new(),
            &PaginateOptions::default(),
        )
        .unwrap_or_else(|e| panic!("paginate markup: {}", e))
        .page_count()
    });
    assert!(pages > 5, "markup chapter produced only {} pages", pages);
    assert!(
        stats.peak_bytes <= MARKUP_BUDGET_BYTES,
        "markup pagination peak {} bytes exceeds budget {} bytes",
        stats.peak_bytes,
        MARKUP_BUDGET_BYTES
    );
}
