pub mod analyzer;
pub mod classify;
pub mod index;
pub mod normalize;
pub mod pipeline;
pub mod runtime;
pub mod types;
