#![allow(dead_code)]

mod ast;
mod keys;
mod value;

pub mod cache;
pub mod canonical;
pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod ops;
pub mod plan;
pub mod snapshot;
pub mod transport;

pub use crate::cache::Cache;
pub use crate::config::{CacheConfig, DefaultCachePolicy, ScalarConfig};
pub use crate::keys::{KeyFn, KeyRegistry};
pub use crate::ops::{CachePolicy, WatcherId};
pub use crate::plan::args::Variables;
pub use crate::plan::SignatureMode;
pub use crate::transport::{OperationType, RequestContext, Transport, TransportError, TransportResponse};
