//! Boundary persistence and chapter sessions for `pagewise`.

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

mod cache;
mod error;
mod session;

pub use cache::{BoundaryCache, FileBoundaryCache, MemoryBoundaryCache};
pub use error::{CacheError, SessionError};
pub use session::{BoundarySource, ChapterSession, OpenedChapter, SessionDiagnostic};
