//! HTTP access for remote metadata tiers.

mod client;

pub use client::{HttpClient, HttpFetch};
