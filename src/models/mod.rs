//! Data models for the folder browsing layer.
//!
//! Everything except [`bucket::BucketRecord`] is transient: built per
//! request from live store state and dropped when the call returns.

pub mod bucket;
pub mod entry;
pub mod object;
pub mod outcome;
