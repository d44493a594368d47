pub mod actors;
pub mod config;
pub mod error;
pub mod hec;
pub mod record;
pub mod snmp;
pub mod util;

pub use record::{Record, Scalar, VarBinding, WireValue};
