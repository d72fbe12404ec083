//! File catalog model: descriptors discovered on a chain portal and the
//! latest-file selection that reduces them to one download per store.

mod selector;
mod types;

pub use selector::{Selection, select};
pub use types::{DownloadRef, FileCategory, FileDescriptor};
pub(crate) use types::parse_listing_date;
