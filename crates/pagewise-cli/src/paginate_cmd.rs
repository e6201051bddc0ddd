use pagewise::PaginationStatus;

use crate::cli::{CacheArgs, InputArgs, LayoutArgs, RunArgs};
use crate::shared::{compute, open_document, read_source, report};

pub fn run(
    input: &InputArgs,
    layout: &LayoutArgs,
    run: &RunArgs,
    cache: &CacheArgs,
    pretty: bool,
) -> Result<(), i32> {
    let source = read_source(input)?;
    let document = open_document(&source, input)?;
    let outcome = compute(&document, input, layout, run, cache)?;

    let mut out = serde_json::json!({
        "char_len": document.char_len(),
        "fingerprint": outcome.boundaries.fingerprint().as_str(),
        "start_indices": outcome.boundaries.start_indices(),
        "page_count": outcome.boundaries.page_count(),
        "cached": outcome.cached,
    });
    match outcome.status {
        PaginationStatus::Complete => {
            out["status"] = "complete".into();
        }
        PaginationStatus::Incomplete {
            resume_at,
            iterations,
        } => {
            out["status"] = "incomplete".into();
            out["resume_at"] = resume_at.into();
            out["iterations"] = iterations.into();
        }
    }
    if let Some((iterations, oracle_calls, oracle_failures)) = outcome.stats {
        out["iterations"] = iterations.into();
        out["oracle_calls"] = oracle_calls.into();
        out["oracle_failures"] = oracle_failures.into();
    }

    let rendered = if pretty {
        serde_json::to_string_pretty(&out)
    } else {
        serde_json::to_string(&out)
    }
    .map_err(report)?;
    println!("{rendered}");
    Ok(())
}
