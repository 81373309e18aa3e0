//! Shared types passed between the HTTP front-end and the script dispatcher.
//!
//! Nothing in this crate touches the script runtime directly — it exists so
//! `playground-server` and `playground-dispatcher` can agree on job inputs,
//! outcomes, and error kinds without either depending on the other's
//! internals.

mod error;
mod http;
mod record;

pub use error::JobError;
pub use http::{status, HttpRequestData, HttpResponseOutcome, OneOrMany};
pub use record::{RequestRecord, RequestRecordRing};
