//!
//! Hash-indexed sparse grids: point storage, hierarchisation, and adaptive
//! refinement and coarsening driven by pluggable error indicators.
//!
pub mod algorithms;
pub mod errors;
pub mod generators;
pub mod grids;
pub mod iterators;
pub mod refinement;
pub mod serialization;
pub mod storage;
