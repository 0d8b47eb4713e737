pub mod coarsening;
pub mod error_container;
pub mod hierarchisation;
pub mod refinement;
pub mod sweep;
