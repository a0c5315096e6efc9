// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeDelta};
use tracing::debug;

use crate::client::S7Client;
use crate::codec::{byte_to_bcd, get_date_time_at, get_dint_at, get_word_at, set_chars_at, set_date_time_at};
use crate::error::{cpu_error, S7Error};
use crate::iso::make_u16;

// Block types
pub const BLOCK_OB: u8 = 0x38;
pub const BLOCK_DB: u8 = 0x41;
pub const BLOCK_SDB: u8 = 0x42;
pub const BLOCK_FC: u8 = 0x43;
pub const BLOCK_SFC: u8 = 0x44;
pub const BLOCK_FB: u8 = 0x45;
pub const BLOCK_SFB: u8 = 0x46;

// Control answers
const PDU_START: u8 = 0x28; // CPU start
const PDU_STOP: u8 = 0x29; // CPU stop
const PDU_ALREADY_STARTED: u8 = 0x02; // CPU already in run mode
const PDU_ALREADY_STOPPED: u8 = 0x07; // CPU already in stop mode

const BLOCK_INFO_MIN: usize = 103;

const HOT_START: [u8; 37] = [
    0x03, 0x00, 0x00, 0x25, 0x02, 0xf0, 0x80, 0x32,
    0x01, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x14, 0x00,
    0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xfd, 0x00, 0x00, 0x09,
    b'P', b'_', b'P', b'R', b'O', b'G', b'R', b'A', b'M',
];

const COLD_START: [u8; 39] = [
    0x03, 0x00, 0x00, 0x27, 0x02, 0xf0, 0x80, 0x32,
    0x01, 0x00, 0x00, 0x0f, 0x00, 0x00, 0x16, 0x00,
    0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xfd, 0x00, 0x02, b'C', b' ', 0x09,
    b'P', b'_', b'P', b'R', b'O', b'G', b'R', b'A', b'M',
];

const STOP: [u8; 33] = [
    0x03, 0x00, 0x00, 0x21, 0x02, 0xf0, 0x80, 0x32,
    0x01, 0x00, 0x00, 0x0e, 0x00, 0x00, 0x10, 0x00,
    0x00, 0x29, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09,
    b'P', b'_', b'P', b'R', b'O', b'G', b'R', b'A', b'M',
];

const GET_STATUS: [u8; 33] = [
    0x03, 0x00, 0x00, 0x21, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x08, 0x00,
    0x08, 0x00, 0x01, 0x12, 0x04, 0x11, 0x44, 0x01,
    0x00, 0xff, 0x09, 0x00, 0x04, 0x04, 0x24, 0x00,
    0x00,
];

const GET_DATE_TIME: [u8; 29] = [
    0x03, 0x00, 0x00, 0x1d, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x38, 0x00, 0x00, 0x08, 0x00,
    0x04, 0x00, 0x01, 0x12, 0x04, 0x11, 0x47, 0x01,
    0x00, 0x0a, 0x00, 0x00, 0x00,
];

const SET_DATE_TIME: [u8; 39] = [
    0x03, 0x00, 0x00, 0x27, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x89, 0x03, 0x00, 0x08, 0x00,
    0x0e, 0x00, 0x01, 0x12, 0x04, 0x11, 0x47, 0x02,
    0x00, 0xff, 0x09, 0x00, 0x0a, 0x00,
    0x19, // Hi part of Year (idx=30)
    0x13, // Lo part of Year
    0x12, // Month
    0x06, // Day
    0x17, // Hour
    0x37, // Min
    0x13, // Sec
    0x00, 0x01, // ms + Day of week
];

const SET_PASSWORD: [u8; 37] = [
    0x03, 0x00, 0x00, 0x25, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x27, 0x00, 0x00, 0x08, 0x00,
    0x0c, 0x00, 0x01, 0x12, 0x04, 0x11, 0x45, 0x01,
    0x00, 0xff, 0x09, 0x00, 0x08,
    // 8 Char Encoded Password
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const CLEAR_PASSWORD: [u8; 29] = [
    0x03, 0x00, 0x00, 0x1d, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x29, 0x00, 0x00, 0x08, 0x00,
    0x04, 0x00, 0x01, 0x12, 0x04, 0x11, 0x45, 0x02,
    0x00, 0x0a, 0x00, 0x00, 0x00,
];

const BLOCK_INFO: [u8; 37] = [
    0x03, 0x00, 0x00, 0x25, 0x02, 0xf0, 0x80, 0x32,
    0x07, 0x00, 0x00, 0x05, 0x00, 0x00, 0x08, 0x00,
    0x0c, 0x00, 0x01, 0x12, 0x04, 0x11, 0x43, 0x03,
    0x00, 0xff, 0x09, 0x00, 0x08, 0x30,
    0x41, // Block Type (idx=30)
    0x30, 0x30, 0x30, 0x30, 0x30, // ASCII Block Number
    0x41,
];

/// ### CPU run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    Unknown = 0x00,
    Stop = 0x04,
    Run = 0x08,
}

impl CpuStatus {
    /// Anything not recognized is a Stop (old CPUs code it as 0x03)
    pub fn from_byte(b: u8) -> CpuStatus {
        match b {
            0x00 => CpuStatus::Unknown,
            0x08 => CpuStatus::Run,
            _ => CpuStatus::Stop,
        }
    }
}

/// ### Block info as returned by `get_ag_block_info()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7BlockInfo {
    pub blk_type: u8,
    pub blk_number: u16,
    pub blk_lang: u8,
    pub blk_flags: u8,
    /// The real size in bytes
    pub mc7_size: u16,
    pub load_size: i32,
    pub local_data: u16,
    pub sbb_length: u16,
    pub checksum: u16,
    pub version: u8,
    pub code_date: NaiveDate,
    pub intf_date: NaiveDate,
    pub author: String,
    pub family: String,
    pub header: String,
}

/// Block dates count days from 1984-01-01
fn siemens_date(days: u16) -> NaiveDate {
    let epoch = NaiveDate::from_ymd_opt(1984, 1, 1).unwrap_or_default();
    epoch + TimeDelta::days(days as i64)
}

fn block_string(buffer: &[u8], pos: usize, size: usize) -> String {
    String::from_utf8_lossy(&buffer[pos..pos + size])
        .trim_matches('\0')
        .to_string()
}

/// ### Encodes a session password
///
/// 8 chars, space padded, then scrambled: the first two chars are XOR-ed with 0x55,
/// the others also with the encoded char two positions before.
pub fn encode_password(password: &str) -> [u8; 8] {
    let mut pwd = [b' '; 8];
    set_chars_at(&mut pwd, 0, password);
    pwd[0] ^= 0x55;
    pwd[1] ^= 0x55;
    for c in 2..8 {
        pwd[c] = pwd[c] ^ 0x55 ^ pwd[c - 2];
    }
    pwd
}

impl S7Client {
    fn control_reply(&mut self, telegram: &[u8], function: u8, already: u8) -> Result<ControlReply, S7Error> {
        let length = self.exchange_telegram(telegram)?;
        if length <= 18 {
            return Err(S7Error::IsoInvalidPdu);
        }
        if self.pdu[19] != function {
            return Ok(ControlReply::Refused);
        }
        if length > 20 && self.pdu[20] == already {
            return Ok(ControlReply::Already);
        }
        Ok(ControlReply::Done)
    }

    /// ### Puts the CPU in RUN mode performing an HOT START
    ///
    /// ### Errors
    /// - `S7Error::CliAlreadyRun`: the CPU is already running.
    /// - `S7Error::CliCannotStartPlc`: the CPU refused the command (e.g. mode selector in STOP).
    pub fn plc_hot_start(&mut self) -> Result<(), S7Error> {
        self.run("plc_hot_start", |cli| {
            match cli.control_reply(&HOT_START, PDU_START, PDU_ALREADY_STARTED)? {
                ControlReply::Done => Ok(()),
                ControlReply::Already => Err(S7Error::CliAlreadyRun),
                ControlReply::Refused => Err(S7Error::CliCannotStartPlc),
            }
        })
    }

    /// ### Puts the CPU in RUN mode performing a COLD START
    ///
    /// ---
    /// For Errors look at `plc_hot_start()`
    pub fn plc_cold_start(&mut self) -> Result<(), S7Error> {
        self.run("plc_cold_start", |cli| {
            match cli.control_reply(&COLD_START, PDU_START, PDU_ALREADY_STARTED)? {
                ControlReply::Done => Ok(()),
                ControlReply::Already => Err(S7Error::CliAlreadyRun),
                ControlReply::Refused => Err(S7Error::CliCannotStartPlc),
            }
        })
    }

    /// ### Puts the CPU in STOP mode
    ///
    /// ### Errors
    /// - `S7Error::CliAlreadyStop`: the CPU is already stopped.
    /// - `S7Error::CliCannotStopPlc`: the CPU refused the command.
    pub fn plc_stop(&mut self) -> Result<(), S7Error> {
        self.run("plc_stop", |cli| {
            match cli.control_reply(&STOP, PDU_STOP, PDU_ALREADY_STOPPED)? {
                ControlReply::Done => Ok(()),
                ControlReply::Already => Err(S7Error::CliAlreadyStop),
                ControlReply::Refused => Err(S7Error::CliCannotStopPlc),
            }
        })
    }

    /// ### Returns the CPU status (running/stopped)
    pub fn plc_get_status(&mut self) -> Result<CpuStatus, S7Error> {
        self.run("plc_get_status", |cli| {
            let length = cli.exchange_telegram(&GET_STATUS)?;
            if length <= 30 {
                return Err(S7Error::IsoInvalidPdu);
            }
            cpu_error(make_u16!(cli.pdu[27], cli.pdu[28]))?;
            if length <= 44 {
                return Err(S7Error::CliInvalidDataSizeRecvd);
            }
            Ok(CpuStatus::from_byte(cli.pdu[44]))
        })
    }

    /// ### Returns detailed information about a block present in the CPU
    ///
    /// ### Parameters
    /// - `block_type`: `BLOCK_OB`, `BLOCK_DB`, `BLOCK_FC` ...
    /// - `block_number`: 0..=65535, sent as 5 ASCII digits.
    ///
    /// ### Errors
    /// - `S7Error::CpuItemNotAvailable` or `S7Error::CliFunctionRefused`: the block does not exist.
    /// - `S7Error::CliInvalidDataSizeRecvd`: the answer does not contain the whole record.
    pub fn get_ag_block_info(&mut self, block_type: u8, block_number: u16) -> Result<S7BlockInfo, S7Error> {
        self.run("get_ag_block_info", |cli| {
            let mut telegram = BLOCK_INFO;
            telegram[30] = block_type;
            let mut number = block_number as u32;
            for pos in (31..=35).rev() {
                telegram[pos] = b'0' + (number % 10) as u8;
                number /= 10;
            }
            let length = cli.exchange_telegram(&telegram)?;
            if length <= 32 {
                return Err(S7Error::IsoInvalidPdu);
            }
            cpu_error(make_u16!(cli.pdu[27], cli.pdu[28]))?;
            if length < BLOCK_INFO_MIN {
                return Err(S7Error::CliInvalidDataSizeRecvd);
            }
            let pdu = &cli.pdu;
            Ok(S7BlockInfo {
                blk_flags: pdu[42],
                blk_lang: pdu[43],
                blk_type: pdu[44],
                blk_number: get_word_at(pdu, 45),
                load_size: get_dint_at(pdu, 47),
                code_date: siemens_date(get_word_at(pdu, 59)),
                intf_date: siemens_date(get_word_at(pdu, 65)),
                sbb_length: get_word_at(pdu, 67),
                local_data: get_word_at(pdu, 71),
                mc7_size: get_word_at(pdu, 73),
                author: block_string(pdu, 75, 8),
                family: block_string(pdu, 83, 8),
                header: block_string(pdu, 91, 8),
                version: pdu[99],
                checksum: get_word_at(pdu, 101),
            })
        })
    }

    /// ### Reads a whole DB
    ///
    /// The DB size is taken from the block info, so the DB must be reachable by `get_ag_block_info()`.
    ///
    /// ### Returns
    /// `Ok(<DB size>)`
    ///
    /// ### Errors
    /// - `S7Error::CliBufferTooSmall`: the DB is larger than `buffer`.
    pub fn db_get(&mut self, db_number: u16, buffer: &mut [u8]) -> Result<usize, S7Error> {
        self.run("db_get", |cli| {
            let info = cli.get_ag_block_info(BLOCK_DB, db_number)?;
            let size = info.mc7_size as usize;
            if size > buffer.len() {
                return Err(S7Error::CliBufferTooSmall);
            }
            cli.db_read(db_number, 0, &mut buffer[..size])
        })
    }

    /// ### Fills a whole DB with a byte
    pub fn db_fill(&mut self, db_number: u16, fill: u8) -> Result<(), S7Error> {
        self.run("db_fill", |cli| {
            let info = cli.get_ag_block_info(BLOCK_DB, db_number)?;
            let buffer = vec![fill; info.mc7_size as usize];
            cli.db_write(db_number, 0, &buffer)?;
            Ok(())
        })
    }

    /// ### Reads the CPU clock
    pub fn get_plc_date_time(&mut self) -> Result<NaiveDateTime, S7Error> {
        self.run("get_plc_date_time", |cli| {
            let length = cli.exchange_telegram(&GET_DATE_TIME)?;
            if length <= 30 {
                return Err(S7Error::IsoInvalidPdu);
            }
            if make_u16!(cli.pdu[27], cli.pdu[28]) != 0 || cli.pdu[29] != 0xFF {
                return Err(S7Error::CliInvalidPlcAnswer);
            }
            if length < 43 {
                return Err(S7Error::CliInvalidDataSizeRecvd);
            }
            Ok(get_date_time_at(&cli.pdu, 35))
        })
    }

    /// ### Sets the CPU clock
    ///
    /// ### Notes
    /// The CPU needs the right protection level (see `set_session_password()`).
    pub fn set_plc_date_time(&mut self, value: NaiveDateTime) -> Result<(), S7Error> {
        self.run("set_plc_date_time", |cli| {
            let mut telegram = SET_DATE_TIME;
            telegram[30] = byte_to_bcd((value.year() / 100).clamp(0, 99) as u8);
            set_date_time_at(&mut telegram, 31, value);
            let length = cli.exchange_telegram(&telegram)?;
            if length <= 30 {
                return Err(S7Error::IsoInvalidPdu);
            }
            if make_u16!(cli.pdu[27], cli.pdu[28]) != 0 {
                return Err(S7Error::CliInvalidPlcAnswer);
            }
            Ok(())
        })
    }

    /// Sets the CPU clock to the local time of this machine
    pub fn set_plc_system_date_time(&mut self) -> Result<(), S7Error> {
        let now = Local::now().naive_local();
        debug!(%now, "s7 clock sync");
        self.set_plc_date_time(now)
    }

    /// ### Sends the password to the CPU to meet its protection level
    ///
    /// Only the first 8 chars are used.
    ///
    /// ### Errors
    /// - `S7Error::CpuInvalidPassword`: wrong password.
    /// - `S7Error::CpuNoPasswordToSetOrClear`: the CPU is not protected.
    pub fn set_session_password(&mut self, password: &str) -> Result<(), S7Error> {
        self.run("set_session_password", |cli| {
            let mut telegram = SET_PASSWORD;
            telegram[29..37].copy_from_slice(&encode_password(password));
            let length = cli.exchange_telegram(&telegram)?;
            if length <= 32 {
                return Err(S7Error::IsoInvalidPdu);
            }
            cpu_error(make_u16!(cli.pdu[27], cli.pdu[28]))
        })
    }

    /// Clears the password set for the current session (logout)
    pub fn clear_session_password(&mut self) -> Result<(), S7Error> {
        self.run("clear_session_password", |cli| {
            let length = cli.exchange_telegram(&CLEAR_PASSWORD)?;
            if length <= 30 {
                return Err(S7Error::IsoInvalidPdu);
            }
            cpu_error(make_u16!(cli.pdu[27], cli.pdu[28]))
        })
    }
}

enum ControlReply {
    Done,
    Already,
    Refused,
}
