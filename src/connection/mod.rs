//! Async replay connections

pub mod replay;

pub use replay::ReplayConnection;
