//! Network access behind a trait seam so strategies can be exercised
//! without a live origin.

mod client;

pub use client::{FetchedResponse, Fetcher, HttpFetcher};
