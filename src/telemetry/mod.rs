//! Serial telemetry.
//!
//! A microcontroller on the bench streams newline-terminated ASCII lines.
//! [`TelemetryPump`] reads them on a dedicated thread into a FIFO queue the
//! async side drains without blocking. [`crate::drivers::serial_link`] owns
//! the port and the pump for one link.

pub mod pump;

pub use pump::{PumpState, TelemetryPump};
