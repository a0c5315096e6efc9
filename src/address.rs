// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! Symbolic DB addresses like `DB1.DBX10.2` or `DB20.DBW2`.

use std::fmt;
use std::str::FromStr;

use crate::client::{S7Client, S7_AREA_DB};
use crate::codec::{get_int_at, set_int_at};
use crate::error::S7Error;

/// Size of the addressed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7AddressKind {
    /// DBX, a single bit
    Bit(u8),
    /// DBB
    Byte,
    /// DBW
    Word,
    /// DBD
    DWord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Address {
    pub db_number: u16,
    pub byte: u32,
    pub kind: S7AddressKind,
}

impl S7Address {
    /// Number of bytes covered by the address (1 for a bit)
    pub fn size(&self) -> usize {
        match self.kind {
            S7AddressKind::Bit(_) | S7AddressKind::Byte => 1,
            S7AddressKind::Word => 2,
            S7AddressKind::DWord => 4,
        }
    }
}

impl FromStr for S7Address {
    type Err = S7Error;

    /// Parses `DB<n>.DB<X|B|W|D><byte>[.<bit>]`, case insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (db, item) = upper.split_once('.').ok_or(S7Error::CliInvalidParams)?;
        let db_number = db
            .strip_prefix("DB")
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or(S7Error::CliInvalidParams)?;
        let item = item.strip_prefix("DB").ok_or(S7Error::CliInvalidParams)?;
        let mut chars = item.chars();
        let kind_char = chars.next().ok_or(S7Error::CliInvalidParams)?;
        let rest = chars.as_str();

        let parse_byte = |v: &str| v.parse::<u32>().map_err(|_| S7Error::CliInvalidParams);
        let (byte, kind) = match kind_char {
            'X' => {
                let (byte, bit) = rest.split_once('.').ok_or(S7Error::CliInvalidParams)?;
                let bit = bit.parse::<u8>().map_err(|_| S7Error::CliInvalidParams)?;
                if bit > 7 {
                    return Err(S7Error::CliInvalidParams);
                }
                (parse_byte(byte)?, S7AddressKind::Bit(bit))
            }
            'B' => (parse_byte(rest)?, S7AddressKind::Byte),
            'W' => (parse_byte(rest)?, S7AddressKind::Word),
            'D' => (parse_byte(rest)?, S7AddressKind::DWord),
            _ => return Err(S7Error::CliInvalidParams),
        };
        Ok(S7Address { db_number, byte, kind })
    }
}

impl fmt::Display for S7Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            S7AddressKind::Bit(bit) => write!(f, "DB{}.DBX{}.{}", self.db_number, self.byte, bit),
            S7AddressKind::Byte => write!(f, "DB{}.DBB{}", self.db_number, self.byte),
            S7AddressKind::Word => write!(f, "DB{}.DBW{}", self.db_number, self.byte),
            S7AddressKind::DWord => write!(f, "DB{}.DBD{}", self.db_number, self.byte),
        }
    }
}

impl S7Client {
    fn parse_address(&mut self, address: &str) -> Result<S7Address, S7Error> {
        address.parse::<S7Address>().inspect_err(|err| self.set_last_error(*err))
    }

    /// ### Reads a bit given its symbolic address
    ///
    /// ```no_run
    /// # let mut client = s7client::S7Client::new();
    /// let value = client.read_bit_at("DB1.DBX10.2").unwrap();
    /// ```
    pub fn read_bit_at(&mut self, address: &str) -> Result<bool, S7Error> {
        let addr = self.parse_address(address)?;
        match addr.kind {
            S7AddressKind::Bit(bit) => self.read_bit(S7_AREA_DB, addr.db_number, addr.byte, bit),
            _ => {
                self.set_last_error(S7Error::CliInvalidParams);
                Err(S7Error::CliInvalidParams)
            }
        }
    }

    /// ### Writes a bit given its symbolic address
    ///
    /// Only the addressed bit is changed.
    pub fn write_bit_at(&mut self, address: &str, value: bool) -> Result<(), S7Error> {
        let addr = self.parse_address(address)?;
        match addr.kind {
            S7AddressKind::Bit(bit) => self.write_bit(S7_AREA_DB, addr.db_number, addr.byte, bit, value),
            _ => {
                self.set_last_error(S7Error::CliInvalidParams);
                Err(S7Error::CliInvalidParams)
            }
        }
    }

    /// ### Reads an INT given its symbolic word address (`DBW`)
    pub fn read_value_at(&mut self, address: &str) -> Result<i16, S7Error> {
        let addr = self.parse_address(address)?;
        if addr.kind != S7AddressKind::Word {
            self.set_last_error(S7Error::CliInvalidParams);
            return Err(S7Error::CliInvalidParams);
        }
        let mut buffer = [0u8; 2];
        self.db_read(addr.db_number, addr.byte, &mut buffer)?;
        Ok(get_int_at(&buffer, 0))
    }

    /// ### Writes an INT given its symbolic word address (`DBW`)
    pub fn write_value_at(&mut self, address: &str, value: i16) -> Result<(), S7Error> {
        let addr = self.parse_address(address)?;
        if addr.kind != S7AddressKind::Word {
            self.set_last_error(S7Error::CliInvalidParams);
            return Err(S7Error::CliInvalidParams);
        }
        let mut buffer = [0u8; 2];
        set_int_at(&mut buffer, 0, value);
        self.db_write(addr.db_number, addr.byte, &buffer)?;
        Ok(())
    }
}
