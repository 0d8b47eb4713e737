pub mod bounding_box;
pub mod grid_point;
pub mod hash_storage;

pub use bounding_box::BoundingBox;
pub use grid_point::{GridPoint, GridPointFlags, Node1D, MAX_LEVEL};
pub use hash_storage::{GridStorage, LevelIndexArrays, SequenceRemap};
