//! Dropout layers.
pub mod drop_path;
