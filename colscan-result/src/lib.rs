//! Error types and result definitions for the colscan workspace.
//!
//! Every colscan crate returns [`Result<T>`], whose error variant is the single
//! [`Error`] enum defined here. Keeping one enum lets errors cross crate
//! boundaries with `?` and lets the scan driver match on the few variants that
//! change control flow.
//!
//! # Error Categories
//!
//! - **Terminal conditions** ([`Error::EndOfFile`], [`Error::Cancelled`]): clean
//!   termination. The scan driver never surfaces these from `next_batch`.
//! - **Lookup failures** ([`Error::NotFound`]): the source file does not exist.
//! - **Schema errors** ([`Error::SchemaMismatch`]): the requested type cannot be
//!   produced from the on-file type.
//! - **Data errors** ([`Error::CorruptData`]): malformed pages, indexes, or
//!   dictionaries.
//! - **I/O errors** ([`Error::FileRead`], [`Error::Io`]): failures from the
//!   byte-range reader.
//! - **Arrow errors** ([`Error::Arrow`]): array construction or compute kernel
//!   failures.
//! - **Caller errors** ([`Error::InvalidArgumentError`]) and bugs
//!   ([`Error::Internal`]).

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
