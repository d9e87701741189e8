//! Bench Instruments
//!
//! Transport, capability facade and drivers for the two bench roles.

pub mod capabilities;
pub mod daq6510;
pub mod instruments;
pub mod mock;
pub mod ngl201;
pub mod scpi;

pub use capabilities::{Instrument, Load, Meter, Tone};
pub use instruments::{InstrumentSet, Slot};
