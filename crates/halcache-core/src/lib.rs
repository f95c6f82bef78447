//! Core types and trait definitions for the halcache remote-data layer.
//!
//! This crate is deliberately free of HTTP and storage dependencies. It holds
//! the request bookkeeping model, the `RemoteData` snapshot type, HAL links,
//! the resource registry, the stream operators every pipeline is built from,
//! and the collaborator traits implemented by `halcache-store` and
//! `halcache-http`.

pub mod error;
pub mod follow;
pub mod hal;
pub mod list;
pub mod model;
pub mod remote_data;
pub mod request;
pub mod resource;
pub mod rx;
pub mod service;

pub use error::{Error, Result};
