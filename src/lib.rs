//! Oracle-driven pagination for reflowable text.
//!
//! `pagewise` splits a chapter into pages without ever measuring text
//! itself. The host supplies a [`MeasurementOracle`] that answers "does this
//! fragment fit the box?" and the engine binary-searches each page end,
//! snaps it to a word break, and returns the page start offsets tagged with
//! a [`ConfigFingerprint`] of the layout they were computed for.
//!
//! ```
//! use pagewise::{paginate, page_slice, Document, GridOracle, LayoutContext, PaginateOptions};
//!
//! let doc = Document::plain("The quick brown fox jumps over the lazy dog.");
//! let layout = LayoutContext::for_box(80.0, 48.0);
//! let result = paginate(&doc, 0, &layout, &mut GridOracle::new(), &PaginateOptions::default())?;
//! assert!(result.is_complete());
//! let first = page_slice(&doc, &result.boundaries, 0).unwrap_or_default();
//! assert!(doc.as_str().starts_with(first));
//! # Ok::<(), pagewise::PaginateError>(())
//! ```
//!
//! Persisting boundaries across sessions lives in the `pagewise-store` crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
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

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod async_api;
pub mod document;
pub mod driver;
pub mod error;
pub mod finder;
pub mod layout;
mod markup;
pub mod oracle;
pub mod pages;

#[cfg(feature = "async")]
pub use async_api::{find_page_end_async, paginate_async, AsyncMeasurementOracle, BlockingOracle};
pub use document::{ContentKind, Document};
pub use driver::{
    paginate, paginate_with_cancel, CancelFlag, CancelToken, NeverCancel, PaginateOptions,
    Pagination, PaginationStatus, Tier,
};
pub use error::{OracleError, PaginateError};
pub use finder::{find_page_end, BoundarySearch, Probe};
pub use layout::{fingerprint, ConfigFingerprint, LayoutContext};
pub use oracle::{FnOracle, GridOracle, MeasurementOracle};
pub use pages::{page, page_fragment, page_slice, Page, PageBoundarySet};
