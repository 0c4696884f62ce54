//! Register descriptor files.
//!
//! A descriptor maps the symbolic names used by the operator to register
//! addresses on a register-mapped controller:
//!
//! ```toml
//! device = "boiler controller"
//!
//! [[register]]
//! name = "o_control_state"
//! address = 0x0100
//! kind = "bool"
//!
//! [[register]]
//! name = "t_flow"
//! address = 0x0210
//! kind = "i16"
//! access = "ro"
//! ```

use crate::capabilities::RegisterValue;
use crate::error::{BenchError, BenchResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Wire representation of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 0 / 1
    Bool,
    /// 0..=255
    U8,
    /// 0..=65535
    U16,
    /// -32768..=32767, two's complement on the wire
    I16,
}

/// Whether a register accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Access {
    /// Read and write.
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    /// Read only.
    #[serde(rename = "ro")]
    ReadOnly,
}

/// One named register.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterSpec {
    /// Symbolic name.
    pub name: String,
    /// Device address.
    pub address: u16,
    /// Value representation.
    pub kind: ValueKind,
    /// Write permission.
    #[serde(default)]
    pub access: Access,
}

impl RegisterSpec {
    /// Convert a value to its raw 16-bit form, checking the kind's range.
    pub fn encode(&self, value: RegisterValue) -> BenchResult<u16> {
        let number = match value {
            RegisterValue::Bool(flag) => i32::from(flag),
            RegisterValue::Integer(number) => number,
        };
        let (min, max) = match self.kind {
            ValueKind::Bool => (0, 1),
            ValueKind::U8 => (0, i32::from(u8::MAX)),
            ValueKind::U16 => (0, i32::from(u16::MAX)),
            ValueKind::I16 => (i32::from(i16::MIN), i32::from(i16::MAX)),
        };
        if number < min || number > max {
            return Err(BenchError::RegisterValue {
                name: self.name.clone(),
                reason: format!("{} is outside {}..={}", number, min, max),
            });
        }
        // Range checked above, so the casts are lossless.
        Ok(match self.kind {
            ValueKind::I16 => number as i16 as u16,
            _ => number as u16,
        })
    }

    /// Interpret a raw 16-bit word.
    pub fn decode(&self, raw: u16) -> RegisterValue {
        match self.kind {
            ValueKind::Bool => RegisterValue::Bool(raw != 0),
            ValueKind::U8 => RegisterValue::Integer(i32::from(raw & 0x00FF)),
            ValueKind::U16 => RegisterValue::Integer(i32::from(raw)),
            ValueKind::I16 => RegisterValue::Integer(i32::from(raw as i16)),
        }
    }

    /// Whether writes are allowed.
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

#[derive(Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    device: Option<String>,
    #[serde(default, rename = "register")]
    registers: Vec<RegisterSpec>,
}

/// Name-indexed register table.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    device: Option<String>,
    registers: Vec<RegisterSpec>,
    index: HashMap<String, usize>,
}

impl RegisterMap {
    /// Parse a descriptor document.
    pub fn from_toml_str(text: &str) -> BenchResult<Self> {
        let file: DescriptorFile =
            toml::from_str(text).map_err(|err| BenchError::Descriptor(err.to_string()))?;
        Self::from_specs(file.device, file.registers)
    }

    /// Read and parse a descriptor file.
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| BenchError::Descriptor(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&text)
    }

    /// Build from already parsed entries. Names must be unique.
    pub fn from_specs(device: Option<String>, registers: Vec<RegisterSpec>) -> BenchResult<Self> {
        let mut index = HashMap::with_capacity(registers.len());
        for (position, spec) in registers.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(BenchError::Descriptor(format!(
                    "register '{}' is declared twice",
                    spec.name
                )));
            }
        }
        Ok(Self {
            device,
            registers,
            index,
        })
    }

    /// Device label declared by the descriptor.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Resolve a symbolic name.
    pub fn lookup(&self, name: &str) -> BenchResult<&RegisterSpec> {
        self.index
            .get(name)
            .map(|&position| &self.registers[position])
            .ok_or_else(|| BenchError::UnknownRegister {
                name: name.to_string(),
            })
    }

    /// Names in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.registers.iter().map(|spec| spec.name.clone()).collect()
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the map has no registers.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BOILER: &str = r#"
device = "boiler"

[[register]]
name = "o_control_state"
address = 0x0100
kind = "bool"

[[register]]
name = "t_flow"
address = 0x0210
kind = "i16"
access = "ro"

[[register]]
name = "fan_speed"
address = 0x0300
kind = "u8"
"#;

    #[test]
    fn parses_names_and_access() {
        let map = RegisterMap::from_toml_str(BOILER).unwrap();
        assert_eq!(map.device(), Some("boiler"));
        assert_eq!(map.names(), ["o_control_state", "t_flow", "fan_speed"]);

        let flow = map.lookup("t_flow").unwrap();
        assert_eq!(flow.address, 0x0210);
        assert!(!flow.is_writable());
        assert!(map.lookup("o_control_state").unwrap().is_writable());
    }

    #[test]
    fn unknown_name_is_reported() {
        let map = RegisterMap::from_toml_str(BOILER).unwrap();
        let err = map.lookup("does_not_exist").unwrap_err();
        assert!(matches!(err, BenchError::UnknownRegister { name } if name == "does_not_exist"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = r#"
[[register]]
name = "a"
address = 1
kind = "bool"

[[register]]
name = "a"
address = 2
kind = "u8"
"#;
        assert!(matches!(
            RegisterMap::from_toml_str(text),
            Err(BenchError::Descriptor(_))
        ));
    }

    #[test]
    fn encode_checks_kind_range() {
        let map = RegisterMap::from_toml_str(BOILER).unwrap();
        let fan = map.lookup("fan_speed").unwrap();
        assert_eq!(fan.encode(RegisterValue::Integer(200)).unwrap(), 200);
        assert!(matches!(
            fan.encode(RegisterValue::Integer(256)),
            Err(BenchError::RegisterValue { .. })
        ));

        let control = map.lookup("o_control_state").unwrap();
        assert_eq!(control.encode(RegisterValue::Bool(true)).unwrap(), 1);
        assert!(control.encode(RegisterValue::Integer(2)).is_err());
    }

    #[test]
    fn signed_values_use_twos_complement() {
        let map = RegisterMap::from_toml_str(BOILER).unwrap();
        let flow = map.lookup("t_flow").unwrap();
        assert_eq!(flow.encode(RegisterValue::Integer(-2)).unwrap(), 0xFFFE);
        assert_eq!(flow.decode(0xFFFE), RegisterValue::Integer(-2));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BOILER.as_bytes()).unwrap();

        let map = RegisterMap::load(file.path()).unwrap();
        assert_eq!(map.len(), 3);
        assert!(matches!(
            RegisterMap::load("/nonexistent/boiler.toml"),
            Err(BenchError::Descriptor(_))
        ));
    }
}
