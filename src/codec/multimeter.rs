//! Precision multimeter grammar (DMM6500-style).
//!
//! Every measurement is a single query answered with one ASCII float.

use std::fmt;

/// Measurement queries understood by the multimeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmmQuery {
    /// `MEAS:VOLT:DC?`
    DcVoltage,
    /// `MEAS:CURR:DC?`
    DcCurrent,
    /// `MEAS:RES?`
    Resistance,
}

impl DmmQuery {
    /// Wire form of the query.
    pub fn as_str(&self) -> &'static str {
        match self {
            DmmQuery::DcVoltage => "MEAS:VOLT:DC?",
            DmmQuery::DcCurrent => "MEAS:CURR:DC?",
            DmmQuery::Resistance => "MEAS:RES?",
        }
    }
}

impl fmt::Display for DmmQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
