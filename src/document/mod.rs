//! The normalize/materialize engine (§4.4, §4.5) and its result cache
//! (§4.6).

pub mod materialize;
pub mod normalize;
pub mod result_cache;

pub use materialize::{materialize, MaterializeOutcome, MaterializeSource};
pub use normalize::normalize;
pub use result_cache::ResultCache;
