//! Owned data types for the async replay layer.
//!
//! A [`Packet`](crate::log::Packet) borrows its reader and holds its lock,
//! so it cannot cross an `await` or a channel. [`PacketRecord`] is the
//! owned copy that flows through [`Driver`](crate::driver::Driver) and
//! [`ReplayConnection`](crate::connection::ReplayConnection) streams.

mod record;
mod update_rate;

pub use record::PacketRecord;
pub use update_rate::UpdateRate;
