//! Provider implementations

pub mod replay;

pub use replay::ReplayProvider;
