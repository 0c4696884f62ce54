//! # Bench Console Core Library
//!
//! Instrument control for a hardware test bench: a dual-channel power
//! supply, a bench multimeter and an electronic load reached over TCP, plus
//! microcontroller boards reached over serial lines. The library is shared
//! by the `bench-console` binary and by test rigs that embed it.
//!
//! ## Crate Structure
//!
//! - **`transport`**: line-oriented TCP and serial sessions with read
//!   timeouts and stale-reply flushing. See `transport::InstrumentLink`.
//! - **`codec`**: pure command builders and reply parsers for each
//!   instrument's text protocol, plus the binary register frame codec.
//! - **`capabilities`**: the `PowerSupply`, `Multimeter`, `ElectronicLoad`
//!   and `RegisterDevice` traits every driver implements.
//! - **`drivers`**: concrete drivers for the bench hardware and the serial
//!   microcontroller link.
//! - **`telemetry`**: background reader that turns a serial byte stream
//!   into a queue of text lines.
//! - **`readings`**: measurement modes and operator-facing formatting.
//! - **`polling`**: periodic readback of every connected instrument with
//!   per-instrument failure isolation.
//! - **`console`**: power supply panel state (status line, output toggles).
//! - **`registry`**: instruments by logical id, built from configuration.
//! - **`config`**: Figment-based configuration (`config/bench.toml` plus
//!   `BENCH_` environment overrides).
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the crate-wide `BenchError`.

pub mod capabilities;
pub mod codec;
pub mod config;
pub mod console;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod polling;
pub mod readings;
pub mod registry;
pub mod telemetry;
pub mod transport;

pub use capabilities::{ElectronicLoad, Instrument, Multimeter, PowerSupply, RegisterDevice};
pub use config::BenchConfig;
pub use error::{BenchError, BenchResult};
pub use registry::InstrumentRegistry;
