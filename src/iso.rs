// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! ISO-on-TCP (RFC 1006) envelope: TPKT header + COTP header.
//!
//! ```text
//!  TPKT
//!      [0]    RFC 1006 ID          0x03
//!      [1]    Reserved             0x00
//!      [2]    HI Telegram length   Variable
//!      [3]    LO Telegram length   Variable
//!  COTP (data transfer)
//!      [4]    Length               0x02
//!      [5]    PDU Type             0xF0
//!      [6]    EOT                  0x80
//! ```

use tracing::trace;

use crate::error::S7Error;
use crate::transport::TcpTransport;

pub(crate) const ISO_ID: u8 = 0x03; // RFC 1006 ID
pub(crate) const TPKT_LEN: usize = 4; // TPKT header only
pub(crate) const ISO_H_SIZE: usize = 7; // TPKT + COTP data header
pub(crate) const MIN_PDU_SIZE: usize = 16; // Smallest meaningful telegram
pub(crate) const ISO_CONN_REQ: u8 = 0xE0; // CR - Connection Request
pub(crate) const ISO_CONN_OK: u8 = 0xD0; // CC - Connection Confirm
pub(crate) const ISO_DATA: u8 = 0xF0; // DT - Data transfer
pub(crate) const EOT: u8 = 0x80; // Last data unit

macro_rules! hi_part {
    ($x:expr) => {
        (($x >> 8) & 0xFF) as u8
    };
}

macro_rules! lo_part {
    ($x:expr) => {
        ($x & 0xFF) as u8
    };
}

macro_rules! make_u16 {
    ($hi:expr, $lo:expr) => {
        ((($hi as u16) << 8) | ($lo as u16))
    };
}

pub(crate) use {hi_part, lo_part, make_u16};

/// Writes the TPKT telegram length.
pub(crate) fn set_telegram_length(telegram: &mut [u8], length: usize) {
    telegram[2] = hi_part!(length);
    telegram[3] = lo_part!(length);
}

/// Writes a full data envelope (TPKT + COTP DT) for a telegram of `length` bytes.
pub(crate) fn write_data_header(telegram: &mut [u8], length: usize) {
    telegram[0] = ISO_ID;
    telegram[1] = 0x00;
    set_telegram_length(telegram, length);
    telegram[4] = 0x02;
    telegram[5] = ISO_DATA;
    telegram[6] = EOT;
}

/// ### Receives an ISO packet into `pdu`
///
/// Bodiless packets (a bare 7 byte TPKT+COTP acknowledge) are skipped.
/// The whole telegram, headers included, is stored from offset 0.
///
/// ### Returns
/// The telegram length and the COTP PDU type.
///
/// ### Errors
/// - `S7Error::IsoInvalidPdu`: the length is outside `16..=max_pdu + 7` or the header is not RFC 1006.
/// - Any transport error.
pub(crate) fn recv_iso_packet(
    transport: &mut TcpTransport,
    pdu: &mut [u8],
    max_pdu: usize,
) -> Result<(usize, u8), S7Error> {
    let limit = (max_pdu + ISO_H_SIZE).min(pdu.len());
    loop {
        transport.receive(&mut pdu[..TPKT_LEN])?;
        let size = make_u16!(pdu[2], pdu[3]) as usize;

        if size == ISO_H_SIZE {
            // COTP acknowledge without payload
            transport.receive(&mut pdu[TPKT_LEN..ISO_H_SIZE])?;
            trace!("s7 skipped empty iso packet");
            continue;
        }

        if pdu[0] != ISO_ID || size < MIN_PDU_SIZE || size > limit {
            return Err(S7Error::IsoInvalidPdu);
        }

        transport.receive(&mut pdu[TPKT_LEN..ISO_H_SIZE])?;
        let pdu_type = pdu[5];
        transport.receive(&mut pdu[ISO_H_SIZE..size])?;
        return Ok((size, pdu_type));
    }
}
