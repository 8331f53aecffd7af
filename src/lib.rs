//! Folder semantics over flat, S3-compatible object stores.
//!
//! The store client ([`store`]) only knows keys. Everything folder-shaped
//! (listing one level, recursive delete/rename/copy, zip download, bucket
//! size) is built on top of it in [`services`] and exposed over HTTP by
//! [`routes`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
