//! Instrument drivers.
//!
//! One driver per instrument class, each built on an
//! [`InstrumentLink`](crate::transport::InstrumentLink) and the matching
//! codec module:
//!
//! | Driver | Capability | Transport |
//! |--------|------------|-----------|
//! | [`cpx400dp::Cpx400dp`] | [`PowerSupply`](crate::capabilities::PowerSupply) | TCP 9221 |
//! | [`dmm6500::Dmm6500`] | [`Multimeter`](crate::capabilities::Multimeter) | TCP 5025 |
//! | [`chroma_load::ChromaLoad`] | [`ElectronicLoad`](crate::capabilities::ElectronicLoad) | TCP 5000 |
//! | [`register_device::FramedRegisterDevice`] | [`RegisterDevice`](crate::capabilities::RegisterDevice) | serial, framed |
//! | [`serial_link::SerialLink`] | line telemetry + reset | serial, blocking |

pub mod chroma_load;
pub mod cpx400dp;
pub mod dmm6500;
pub mod register_device;
pub mod register_map;
pub mod serial_link;
