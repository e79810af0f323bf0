//! Consistency levels.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Replica acknowledgement level requested for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    #[default]
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    /// Wire code.
    pub fn to_u16(self) -> u16 {
        match self {
            Consistency::Any => 0x00,
            Consistency::One => 0x01,
            Consistency::Two => 0x02,
            Consistency::Three => 0x03,
            Consistency::Quorum => 0x04,
            Consistency::All => 0x05,
            Consistency::LocalQuorum => 0x06,
            Consistency::EachQuorum => 0x07,
            Consistency::Serial => 0x08,
            Consistency::LocalSerial => 0x09,
            Consistency::LocalOne => 0x0A,
        }
    }

    /// Level for a wire code. Unknown codes are an invalid body.
    pub fn from_u16(value: u16) -> Result<Self> {
        Ok(match value {
            0x00 => Consistency::Any,
            0x01 => Consistency::One,
            0x02 => Consistency::Two,
            0x03 => Consistency::Three,
            0x04 => Consistency::Quorum,
            0x05 => Consistency::All,
            0x06 => Consistency::LocalQuorum,
            0x07 => Consistency::EachQuorum,
            0x08 => Consistency::Serial,
            0x09 => Consistency::LocalSerial,
            0x0A => Consistency::LocalOne,
            other => {
                return Err(Error::InvalidBody(format!(
                    "unknown consistency level {other:#06x}"
                )))
            }
        })
    }

    /// SERIAL and LOCAL_SERIAL are the only levels valid for lightweight
    /// transaction conditions.
    pub fn is_serial(self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}
