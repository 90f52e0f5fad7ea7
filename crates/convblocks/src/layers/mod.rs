//! Common low-level modules for building convolution blocks in Burn.
pub mod activation;
pub mod attention;
pub mod blocks;
pub mod conv;
pub mod drop;
pub mod util;
