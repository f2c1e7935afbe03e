//! URL handling module for Crawl-Relay
//!
//! Every URL entering the frontier goes through [`normalize_url`] first, so that
//! equivalent spellings of the same page map to one dedup key.

mod normalize;

pub use normalize::{normalize_url, NormalizedUrl};
