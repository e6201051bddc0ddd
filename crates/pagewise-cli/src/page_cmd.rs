use pagewise::PaginationStatus;

use crate::cli::{CacheArgs, InputArgs, LayoutArgs, RunArgs};
use crate::shared::{compute, open_document, read_source, report};

pub fn run(
    input: &InputArgs,
    index: usize,
    layout: &LayoutArgs,
    run: &RunArgs,
    cache: &CacheArgs,
    json: bool,
) -> Result<(), i32> {
    let source = read_source(input)?;
    let document = open_document(&source, input)?;
    let outcome = compute(&document, input, layout, run, cache)?;

    let Some(page) = pagewise::page(&document, &outcome.boundaries, index) else {
        eprintln!(
            "Error: page {} out of range ({} pages)",
            index,
            outcome.boundaries.page_count()
        );
        return Err(1);
    };

    if let PaginationStatus::Incomplete { resume_at, .. } = outcome.status {
        if page.start >= resume_at {
            eprintln!(
                "Error: page {} starts at offset {} where pagination stopped; rerun with --start {} or a higher --max-iterations",
                index, resume_at, resume_at
            );
            return Err(1);
        }
    }

    if json {
        let out = serde_json::json!({
            "index": page.index,
            "start": page.start,
            "end": page.end,
            "content": page.content,
        });
        println!("{}", serde_json::to_string(&out).map_err(report)?);
    } else {
        println!("{}", page.content);
    }
    Ok(())
}
