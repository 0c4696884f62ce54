//! SCPI-style command codec.
//!
//! Translates typed operations into the exact ASCII each instrument expects
//! and parses single-line replies into numbers and booleans. The codec is
//! pure: it never touches a transport, so every grammar rule is testable on
//! its own.
//!
//! - [`power_supply`]: `V<ch> <v>`, `I<ch> <a>`, `OP<ch> 1|0`, readback queries.
//! - [`multimeter`]: `MEAS:VOLT:DC?`, `MEAS:CURR:DC?`, `MEAS:RES?`.
//! - [`electronic_load`]: verb-style load commands and the load-state query.
//! - [`frame`]: the length/checksum framed sub-protocol of register-mapped
//!   devices.

pub mod electronic_load;
pub mod frame;
pub mod multimeter;
pub mod power_supply;

use crate::error::{BenchError, BenchResult};

/// Parse a reply that must be exactly one floating-point number.
pub fn parse_f64(command: &str, reply: &str) -> BenchResult<f64> {
    reply.trim().parse::<f64>().map_err(|_| BenchError::Parse {
        command: command.to_string(),
        reply: reply.to_string(),
        expected: "f64",
    })
}

/// Reject NaN and infinities before they are formatted into a command.
pub fn check_finite(quantity: &'static str, value: f64) -> BenchResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(BenchError::NotFinite { quantity, value })
    }
}

/// Interpret a `0`/`1` status reply. Only a trimmed `"1"` reads as true.
pub fn parse_flag(reply: &str) -> bool {
    reply.trim() == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scpi_numbers() {
        let cases = [
            ("5.000", 5.0),
            ("+1.234500E+00", 1.2345),
            (" -0.25\r", -0.25),
            ("9.9E37", 9.9e37),
        ];
        for (reply, expected) in cases {
            assert_eq!(parse_f64("MEAS:VOLT:DC?", reply).unwrap(), expected, "{reply}");
        }
    }

    #[test]
    fn rejects_non_numeric() {
        let err = parse_f64("MEAS:RES?", "OVERLOAD").unwrap_err();
        assert!(matches!(err, BenchError::Parse { expected: "f64", .. }));
        assert!(parse_f64("MEAS:RES?", "").is_err());
    }

    #[test]
    fn non_finite_set_points_are_rejected() {
        assert_eq!(check_finite("voltage", 12.5).unwrap(), 12.5);
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                check_finite("voltage", value),
                Err(BenchError::NotFinite { quantity: "voltage", .. })
            ));
        }
    }

    #[test]
    fn flag_is_true_only_for_one() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" 1\n"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("ON"));
        assert!(!parse_flag("11"));
        assert!(!parse_flag(""));
    }
}
