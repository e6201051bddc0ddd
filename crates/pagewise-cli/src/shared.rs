use std::fmt::Display;
use std::fs;
use std::path::Path;

use pagewise::{paginate, ContentKind, Document, GridOracle, PageBoundarySet, PaginationStatus};
use pagewise_store::{BoundarySource, ChapterSession, FileBoundaryCache};

use crate::cli::{CacheArgs, InputArgs, LayoutArgs, RunArgs};

/// Boundaries plus whatever the run reported about itself.
pub struct Outcome {
    pub boundaries: PageBoundarySet,
    pub status: PaginationStatus,
    pub cached: bool,
    /// `(iterations, oracle_calls, oracle_failures)` when the driver ran directly.
    pub stats: Option<(usize, usize, usize)>,
}

pub fn report(err: impl Display) -> i32 {
    eprintln!("Error: {err}");
    1
}

pub fn read_source(input: &InputArgs) -> Result<String, i32> {
    fs::read_to_string(&input.file).map_err(|e| {
        eprintln!("Error reading {}: {e}", input.file.display());
        1
    })
}

pub fn open_document<'a>(source: &'a str, input: &InputArgs) -> Result<Document<'a>, i32> {
    let kind = if input.markup {
        ContentKind::Markup
    } else {
        ContentKind::Plain
    };
    Document::new(source, kind).map_err(report)
}

pub fn compute(
    document: &Document<'_>,
    input: &InputArgs,
    layout: &LayoutArgs,
    run: &RunArgs,
    cache: &CacheArgs,
) -> Result<Outcome, i32> {
    let layout = layout.layout();
    let options = run.options();
    let mut oracle = GridOracle::new();

    let Some(dir) = &cache.cache_dir else {
        let result = paginate(document, run.start, &layout, &mut oracle, &options).map_err(report)?;
        return Ok(Outcome {
            boundaries: result.boundaries,
            status: result.status,
            cached: false,
            stats: Some((result.iterations, result.oracle_calls, result.oracle_failures)),
        });
    };

    if run.start != 0 {
        eprintln!("Error: --start cannot be combined with --cache-dir");
        return Err(2);
    }
    let book = cache
        .book
        .clone()
        .unwrap_or_else(|| file_name(&input.file));
    let chapter = cache.chapter.as_deref().unwrap_or("0");
    let session = ChapterSession::new(FileBoundaryCache::new(dir)).with_options(options);
    // One process is one open, so keep running capped runs until the chapter is done.
    let opened = session
        .open_through(
            &book,
            chapter,
            document,
            &layout,
            &mut oracle,
            document.char_len(),
        )
        .map_err(report)?;
    log::info!(
        "{}/{}: {} pages from {:?}",
        book,
        chapter,
        opened.boundaries.page_count(),
        opened.source
    );
    Ok(Outcome {
        cached: opened.source == BoundarySource::Cache,
        boundaries: opened.boundaries,
        status: opened.status,
        stats: None,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}
