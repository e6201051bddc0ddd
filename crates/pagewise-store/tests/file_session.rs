use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use pagewise::{Document, FnOracle, GridOracle, LayoutContext, MeasurementOracle, PaginationStatus};
use pagewise_store::{
    BoundaryCache, BoundarySource, ChapterSession, FileBoundaryCache, MemoryBoundaryCache,
};

static ROOT_NONCE: AtomicUsize = AtomicUsize::new(0);

fn temp_root(label: &str) -> PathBuf {
    let nonce = ROOT_NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "pagewise-session-{label}-{}-{nonce}",
        std::process::id()
    ))
}

fn chapter_text() -> String {
    let mut text = String::new();
    for para in 0..30 {
        text.push_str(&format!(
            "Paragraph {para} tells of the sea and of the ship that crossed it. "
        ));
        if para % 3 == 2 {
            text.push('\n');
        }
    }
    text
}

fn layout() -> LayoutContext {
    LayoutContext::for_box(240.0, 120.0)
        .with_font_size(12.0)
        .with_line_height(1.25)
}

#[test]
fn file_cache_survives_new_session() {
    let root = temp_root("reopen");
    let text = chapter_text();
    let doc = Document::plain(&text);

    let first = ChapterSession::new(FileBoundaryCache::new(&root))
        .open("moby", "ch-1", &doc, &layout(), &mut GridOracle::new())
        .expect("first open");
    assert_eq!(first.source, BoundarySource::Paginated);
    assert_eq!(first.status, PaginationStatus::Complete);
    assert!(first.boundaries.page_count() > 1);

    let mut probes = 0usize;
    let mut counting = FnOracle(|fragment: &str, layout: &LayoutContext| {
        probes += 1;
        GridOracle::new().fits(fragment, layout)
    });
    let second = ChapterSession::new(FileBoundaryCache::new(&root))
        .open("moby", "ch-1", &doc, &layout(), &mut counting)
        .expect("second open");
    assert_eq!(second.source, BoundarySource::Cache);
    assert_eq!(second.boundaries, first.boundaries);
    drop(counting);
    assert_eq!(probes, 0);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn corrupt_file_entry_repaginates_and_heals() {
    let root = temp_root("heal");
    let text = chapter_text();
    let doc = Document::plain(&text);
    let cache = FileBoundaryCache::new(&root);
    let session = ChapterSession::new(cache.clone());

    let first = session
        .open("book", "ch", &doc, &layout(), &mut GridOracle::new())
        .expect("first open");
    fs::write(cache.chapter_cache_path("book", "ch"), b"\x00garbage").expect("overwrite entry");

    let second = session
        .open("book", "ch", &doc, &layout(), &mut GridOracle::new())
        .expect("open with corrupt entry");
    assert_eq!(second.source, BoundarySource::Paginated);
    assert_eq!(second.boundaries, first.boundaries);
    assert_eq!(
        cache.get("book", "ch").expect("healed entry"),
        Some(first.boundaries)
    );

    let _ = fs::remove_dir_all(root);
}

#[test]
fn chapters_paginate_concurrently() {
    let text = chapter_text();
    let session = Arc::new(ChapterSession::new(MemoryBoundaryCache::new()));

    let handles: Vec<_> = (0..4)
        .map(|chapter| {
            let session = Arc::clone(&session);
            let text = text.clone();
            thread::spawn(move || {
                let doc = Document::plain(&text);
                let chapter_id = format!("ch-{}", chapter % 2);
                session
                    .open("book", &chapter_id, &doc, &layout(), &mut GridOracle::new())
                    .expect("open")
                    .boundaries
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect();
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(session.cache().len(), 2);
}
