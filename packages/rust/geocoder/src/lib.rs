//! Reverse geocoding: one coordinate pair in, one postal code (or a tagged
//! non-answer) out.
//!
//! This crate provides:
//! - [`ReverseGeocoder`]: the seam the scheduler drives (and tests simulate)
//! - [`GeoClient`]: the HTTP implementation against the reverse address search API
//! - [`RetryPolicy`]: attempt count and exponential backoff schedule

mod client;
mod retry;

pub use client::{GeoClient, ReverseGeocoder};
pub use retry::RetryPolicy;
