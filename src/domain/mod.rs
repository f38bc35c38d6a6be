//! Domain types and the ports through which the core talks to its external collaborators.

pub mod amount;
pub mod ports;
pub mod purchase;
pub mod session;
