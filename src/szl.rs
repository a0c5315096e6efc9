// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! System status list (SZL) records and the system info built on top of them.

use tracing::trace;

use crate::client::S7Client;
use crate::codec::{get_chars_at, get_dint_at, get_word_at};
use crate::error::S7Error;
use crate::iso::{hi_part, lo_part, make_u16};

const SZL_FIRST_LEN: usize = 33;
const SZL_NEXT_LEN: usize = 33;
const SZL_RES_MIN: usize = 33; // Length > 32
const SZL_FIRST_DATA: usize = 41;
// Continuation slices carry raw data right after their data header, no ID/index repeated
const SZL_NEXT_DATA: usize = 33;

/// ### SZL partial list header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SzlHeader {
    /// Length of a data record
    pub length_dr: u16,
    /// Number of data records
    pub n_dr: u16,
}

/// ### SZL record
///
/// `data` holds all the slices of the answer, assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S7Szl {
    pub header: SzlHeader,
    pub data: Vec<u8>,
}

impl S7Szl {
    /// Size of the assembled data
    ///
    /// This is what the CPU actually sent, `length_dr * n_dr` is only what it declared.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S7OrderCode {
    pub code: String,
    pub v1: u8,
    pub v2: u8,
    pub v3: u8,
}

impl S7OrderCode {
    /// Firmware version as "V1.V2.V3"
    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.v1, self.v2, self.v3)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S7CpuInfo {
    pub module_type_name: String,
    pub serial_number: String,
    pub as_name: String,
    pub copyright: String,
    pub module_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct S7CpInfo {
    pub max_pdu_length: u16,
    pub max_connections: u16,
    pub max_mpi_rate: i32,
    pub max_bus_rate: i32,
}

/// ### Protection level record (SZL 0x0232 index 4)
///
/// See the S7 SFC51 documentation for the meaning of the values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct S7Protection {
    /// Protection level set with the mode selector
    pub sch_schal: u16,
    /// Password level
    pub sch_par: u16,
    /// Valid protection level of the CPU
    pub sch_rel: u16,
    /// Mode selector setting
    pub bart_sch: u16,
    /// Startup switch setting
    pub anl_sch: u16,
}

fn trimmed(value: String) -> String {
    value.trim_end_matches('\0').to_string()
}

fn szl_first_request(seq_out: u16, id: u16, index: u16) -> [u8; SZL_FIRST_LEN] {
    [
        0x03, 0x00, 0x00, 0x21,
        0x02, 0xf0, 0x80, 0x32,
        0x07, 0x00, 0x00,
        hi_part!(seq_out), lo_part!(seq_out), // Sequence out
        0x00, 0x08, 0x00,
        0x08, 0x00, 0x01, 0x12,
        0x04, 0x11, 0x44, 0x01,
        0x00, 0xff, 0x09, 0x00,
        0x04,
        hi_part!(id), lo_part!(id),       // ID
        hi_part!(index), lo_part!(index), // Index
    ]
}

fn szl_next_request(seq_out: u16, seq_in: u8) -> [u8; SZL_NEXT_LEN] {
    [
        0x03, 0x00, 0x00, 0x21,
        0x02, 0xf0, 0x80, 0x32,
        0x07, 0x00, 0x00,
        hi_part!(seq_out), lo_part!(seq_out), // Sequence out
        0x00, 0x0c, 0x00,
        0x04, 0x00, 0x01, 0x12,
        0x08, 0x12, 0x44, 0x01,
        seq_in,                               // Sequence in
        0x00, 0x00, 0x00, 0x00,
        0x0a, 0x00, 0x00, 0x00,
    ]
}

impl S7Client {
    /// ### Reads a partial list of the System Status List
    ///
    /// Large lists arrive in more slices, they are requested and assembled transparently.
    ///
    /// ### Parameters
    /// - `id`: SZL ID (e.g. 0x0011 module identification).
    /// - `index`: SZL index.
    ///
    /// ### Errors
    /// - `S7Error::IsoInvalidPdu`: answer too short.
    /// - `S7Error::CliInvalidPlcAnswer`: the CPU refused the request (unknown ID/index).
    pub fn read_szl(&mut self, id: u16, index: u16) -> Result<S7Szl, S7Error> {
        self.run("read_szl", |cli| cli.read_szl_slices(id, index))
    }

    fn read_szl_slices(&mut self, id: u16, index: u16) -> Result<S7Szl, S7Error> {
        let mut szl = S7Szl::default();
        let mut seq_out: u16 = 0;
        let mut seq_in: u8 = 0;
        let mut first = true;

        loop {
            seq_out = seq_out.wrapping_add(1);
            let length = if first {
                self.exchange_telegram(&szl_first_request(seq_out, id, index))?
            } else {
                self.exchange_telegram(&szl_next_request(seq_out, seq_in))?
            };
            if length < SZL_RES_MIN {
                return Err(S7Error::IsoInvalidPdu);
            }
            if make_u16!(self.pdu[27], self.pdu[28]) != 0 || self.pdu[29] != 0xFF {
                return Err(S7Error::CliInvalidPlcAnswer);
            }

            let slice_len = make_u16!(self.pdu[31], self.pdu[32]) as usize;
            let (data_start, data_len) = if first {
                if length < SZL_FIRST_DATA {
                    return Err(S7Error::IsoInvalidPdu);
                }
                szl.header.length_dr = make_u16!(self.pdu[37], self.pdu[38]);
                szl.header.n_dr = make_u16!(self.pdu[39], self.pdu[40]);
                // Skips ID, Index and the header
                (SZL_FIRST_DATA, slice_len.saturating_sub(8))
            } else {
                (SZL_NEXT_DATA, slice_len)
            };
            if data_start + data_len > length {
                return Err(S7Error::CliInvalidDataSizeRecvd);
            }
            szl.data.extend_from_slice(&self.pdu[data_start..data_start + data_len]);

            let done = self.pdu[26] == 0x00;
            seq_in = self.pdu[24];
            trace!(id, index, slice = seq_out, size = data_len, done, "s7 szl slice");
            first = false;
            if done {
                break;
            }
        }
        Ok(szl)
    }

    /// ### Gets the CPU order code and firmware version (SZL 0x0011)
    pub fn get_order_code(&mut self) -> Result<S7OrderCode, S7Error> {
        let szl = self.read_szl(0x0011, 0x0000)?;
        let data = &szl.data;
        let size = data.len();
        if size < 22 {
            self.set_last_error(S7Error::CliInvalidDataSizeRecvd);
            return Err(S7Error::CliInvalidDataSizeRecvd);
        }
        Ok(S7OrderCode {
            code: get_chars_at(data, 2, 20),
            v1: data[size - 3],
            v2: data[size - 2],
            v3: data[size - 1],
        })
    }

    /// ### Gets CPU module identification strings (SZL 0x001C)
    pub fn get_cpu_info(&mut self) -> Result<S7CpuInfo, S7Error> {
        let szl = self.read_szl(0x001C, 0x0000)?;
        let data = &szl.data;
        if data.len() < 204 {
            self.set_last_error(S7Error::CliInvalidDataSizeRecvd);
            return Err(S7Error::CliInvalidDataSizeRecvd);
        }
        Ok(S7CpuInfo {
            module_type_name: trimmed(get_chars_at(data, 172, 32)),
            serial_number: trimmed(get_chars_at(data, 138, 24)),
            as_name: trimmed(get_chars_at(data, 2, 24)),
            copyright: trimmed(get_chars_at(data, 104, 26)),
            module_name: trimmed(get_chars_at(data, 36, 24)),
        })
    }

    /// ### Gets communication processor limits (SZL 0x0131 index 1)
    pub fn get_cp_info(&mut self) -> Result<S7CpInfo, S7Error> {
        let szl = self.read_szl(0x0131, 0x0001)?;
        let data = &szl.data;
        if data.len() < 14 {
            self.set_last_error(S7Error::CliInvalidDataSizeRecvd);
            return Err(S7Error::CliInvalidDataSizeRecvd);
        }
        Ok(S7CpInfo {
            max_pdu_length: get_word_at(data, 2),
            max_connections: get_word_at(data, 4),
            max_mpi_rate: get_dint_at(data, 6),
            max_bus_rate: get_dint_at(data, 10),
        })
    }

    /// ### Gets the CPU protection level (SZL 0x0232 index 4)
    pub fn get_protection(&mut self) -> Result<S7Protection, S7Error> {
        let szl = self.read_szl(0x0232, 0x0004)?;
        let data = &szl.data;
        if data.len() < 12 {
            self.set_last_error(S7Error::CliInvalidDataSizeRecvd);
            return Err(S7Error::CliInvalidDataSizeRecvd);
        }
        Ok(S7Protection {
            sch_schal: get_word_at(data, 2),
            sch_par: get_word_at(data, 4),
            sch_rel: get_word_at(data, 6),
            bart_sch: get_word_at(data, 8),
            anl_sch: get_word_at(data, 10),
        })
    }
}
