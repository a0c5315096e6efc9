// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! Multiple variables read/write in a single telegram.
//!
//! ```text
//!  Request item (12 bytes)
//!      [0]    Var spec.            0x12
//!      [1]    Remaining bytes      0x0A
//!      [2]    Syntax ID            0x10
//!      [3]    Word length
//!      [4..5] Amount
//!      [6..7] DB Number (0 if the area is not a DB)
//!      [8]    Area
//!      [9..11] Address
//!  Reply item
//!      [0]    Return code (0xFF = success)
//!      [1]    Transport size
//!      [2..3] Length (bits, unless transport size is bit/real/octet)
//!      [4..]  Data, padded to an even size
//! ```

use tracing::trace;

use crate::client::{
    normalize_area, transport_size, wire_address, S7Client, RES_SUCCESS, S7_AREA_DB, S7_ID, TS_RES_BIT,
    TS_RES_OCTET, TS_RES_REAL,
};
use crate::error::{cpu_error, cpu_item_error, S7Error};
use crate::iso::{self, hi_part, lo_part, make_u16};

/// Max number of items in a multi read/write
pub const MAX_VARS: usize = 20;

const MULTI_HEADER_LEN: usize = 19;
const ITEM_LEN: usize = 12;
const MULTI_RES_MIN: usize = 22;

/// ### One variable of a multi read/write
///
/// `data` is the destination of a read or the source of a write, `result` is filled by the
/// operation (`Err(S7Error::CpuItemNotAvailable)` until the CPU answers for it).
#[derive(Debug)]
pub struct S7DataItem<'a> {
    pub area: u8,
    pub word_len: u8,
    pub db_number: u16,
    /// Start element (bit index for `S7_WL_BIT`)
    pub start: u32,
    pub amount: usize,
    pub data: &'a mut [u8],
    pub result: Result<(), S7Error>,
}

impl<'a> S7DataItem<'a> {
    pub fn new(area: u8, word_len: u8, db_number: u16, start: u32, amount: usize, data: &'a mut [u8]) -> Self {
        S7DataItem {
            area,
            word_len,
            db_number,
            start,
            amount,
            data,
            result: Err(S7Error::CpuItemNotAvailable),
        }
    }
}

/// ### Tag: an address inside the PLC memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Tag {
    pub area: u8,
    pub db_number: u16,
    pub start: u32,
    pub elements: usize,
    pub word_len: u8,
}

/// Item as it travels on the wire
struct WireItem {
    area: u8,
    word_len: u8,
    db_number: u16,
    address: u32,
    amount: usize,
    size: usize,
}

fn wire_item(item: &S7DataItem) -> Result<WireItem, S7Error> {
    let (word_len, amount, word_size) = normalize_area(item.area, item.word_len, item.amount)?;
    let size = amount * word_size;
    if item.data.len() < size {
        return Err(S7Error::CliBufferTooSmall);
    }
    Ok(WireItem {
        area: item.area,
        word_len,
        db_number: if item.area == S7_AREA_DB { item.db_number } else { 0 },
        address: wire_address(word_len, item.start)?,
        amount,
        size,
    })
}

fn write_item_spec(pdu: &mut [u8], offset: usize, item: &WireItem) {
    let spec: [u8; ITEM_LEN] = [
        0x12,                               // Var spec.
        0x0a,                               // Length of remaining bytes
        0x10,                               // Syntax ID
        item.word_len,                      // Transport Size
        hi_part!(item.amount),              // Num Elements
        lo_part!(item.amount),
        hi_part!(item.db_number),           // DB Number (if any, else 0)
        lo_part!(item.db_number),
        item.area,                          // Area Type
        ((item.address >> 16) & 0xFF) as u8, // Area Offset
        ((item.address >> 8) & 0xFF) as u8,
        (item.address & 0xFF) as u8,
    ];
    pdu[offset..offset + ITEM_LEN].copy_from_slice(&spec);
}

fn write_multi_header(pdu: &mut [u8], function: u8, count: usize) {
    let param_len = count * ITEM_LEN + 2;
    let header: [u8; MULTI_HEADER_LEN] = [
        iso::ISO_ID, 0x00, 0x00, 0x1f, // TPKT, length set later
        0x02, 0xf0, 0x80,              // COTP
        S7_ID,                         // S7 Protocol ID
        0x01,                          // Job Type
        0x00, 0x00,                    // Redundancy identification
        0x05, 0x00,                    // PDU Reference
        hi_part!(param_len),           // Parameters Length
        lo_part!(param_len),
        0x00, 0x00,                    // Data Length
        function,                      // Function 4 Read Var, 5 Write Var
        count as u8,                   // Items count
    ];
    pdu[..MULTI_HEADER_LEN].copy_from_slice(&header);
}

/// Data size of a reply item
fn reply_item_size(transport_size: u8, length: u16) -> usize {
    match transport_size {
        TS_RES_OCTET | TS_RES_REAL | TS_RES_BIT => length as usize,
        _ => (length >> 3) as usize,
    }
}

impl S7Client {
    /// ### Reads up to 20 variables in a single telegram
    ///
    /// Each item is normalized like `read_area()` and has its own result.
    ///
    /// ### Returns
    /// `Ok(())` if the telegram was exchanged, check `item.result` for every variable.
    ///
    /// ### Errors
    /// - `S7Error::CliTooManyItems`: more than 20 items.
    /// - `S7Error::CliSizeOverPdu`: request larger than the negotiated PDU.
    /// - `S7Error::CliInvalidPlcAnswer`: the CPU answered for a different number of items.
    /// - `S7Error::IsoInvalidPdu`: answer too short.
    ///
    /// ### Notes
    /// There is no chunking here: the whole request and the whole answer must fit the PDU.
    pub fn read_multi_vars(&mut self, items: &mut [S7DataItem]) -> Result<(), S7Error> {
        self.run("read_multi_vars", |cli| cli.read_multi(items))
    }

    fn read_multi(&mut self, items: &mut [S7DataItem]) -> Result<(), S7Error> {
        let count = items.len();
        if count > MAX_VARS {
            return Err(S7Error::CliTooManyItems);
        }
        if count == 0 {
            return Err(S7Error::CliInvalidParams);
        }
        if !self.is_connected() {
            return Err(S7Error::TcpNotConnected);
        }
        let wire = items.iter().map(wire_item).collect::<Result<Vec<_>, _>>()?;

        write_multi_header(&mut self.pdu, 0x04, count);
        let mut offset = MULTI_HEADER_LEN;
        for item in &wire {
            write_item_spec(&mut self.pdu, offset, item);
            offset += ITEM_LEN;
        }
        if offset > self.pdu_length() as usize {
            return Err(S7Error::CliSizeOverPdu);
        }
        iso::set_telegram_length(&mut self.pdu, offset);
        trace!(items = count, size = offset, "s7 multi read");

        let length = self.exchange(offset)?;
        if length < MULTI_RES_MIN {
            return Err(S7Error::IsoInvalidPdu);
        }
        cpu_error(make_u16!(self.pdu[17], self.pdu[18]))?;
        if self.pdu[20] as usize != count {
            return Err(S7Error::CliInvalidPlcAnswer);
        }

        let mut offset = 21;
        for item in items.iter_mut() {
            if offset + 4 > length {
                return Err(S7Error::CliInvalidPlcAnswer);
            }
            let ret = self.pdu[offset];
            if ret != RES_SUCCESS {
                item.result = Err(cpu_item_error(ret));
                offset += 4;
                continue;
            }
            let size = reply_item_size(self.pdu[offset + 1], make_u16!(self.pdu[offset + 2], self.pdu[offset + 3]));
            let data_start = offset + 4;
            if data_start + size > length {
                return Err(S7Error::CliInvalidPlcAnswer);
            }
            if size > item.data.len() {
                item.result = Err(S7Error::CliInvalidDataSizeRecvd);
            } else {
                item.data[..size].copy_from_slice(&self.pdu[data_start..data_start + size]);
                item.result = Ok(());
            }
            offset = data_start + size + size % 2;
        }
        Ok(())
    }

    /// ### Writes up to 20 variables in a single telegram
    ///
    /// `item.data` is the source of each variable.
    ///
    /// ---
    /// For Errors look at `read_multi_vars()`
    pub fn write_multi_vars(&mut self, items: &mut [S7DataItem]) -> Result<(), S7Error> {
        self.run("write_multi_vars", |cli| cli.write_multi(items))
    }

    fn write_multi(&mut self, items: &mut [S7DataItem]) -> Result<(), S7Error> {
        let count = items.len();
        if count > MAX_VARS {
            return Err(S7Error::CliTooManyItems);
        }
        if count == 0 {
            return Err(S7Error::CliInvalidParams);
        }
        if !self.is_connected() {
            return Err(S7Error::TcpNotConnected);
        }
        let wire = items.iter().map(wire_item).collect::<Result<Vec<_>, _>>()?;

        // Everything must fit the telegram buffer before being copied into it
        let params_size = count * ITEM_LEN;
        let data_size: usize = wire.iter().map(|w| 4 + w.size + w.size % 2).sum();
        let total = MULTI_HEADER_LEN + params_size + data_size;
        if total > self.pdu_length() as usize || total > self.pdu.len() {
            return Err(S7Error::CliSizeOverPdu);
        }

        write_multi_header(&mut self.pdu, 0x05, count);
        let mut offset = MULTI_HEADER_LEN;
        for item in &wire {
            write_item_spec(&mut self.pdu, offset, item);
            offset += ITEM_LEN;
        }
        for (item, spec) in items.iter().zip(&wire) {
            let ts = transport_size(spec.word_len);
            let length = match ts {
                TS_RES_OCTET | TS_RES_BIT => spec.size,
                _ => spec.size * 8,
            };
            self.pdu[offset] = 0x00;
            self.pdu[offset + 1] = ts;
            self.pdu[offset + 2] = hi_part!(length);
            self.pdu[offset + 3] = lo_part!(length);
            offset += 4;
            self.pdu[offset..offset + spec.size].copy_from_slice(&item.data[..spec.size]);
            offset += spec.size;
            if spec.size % 2 != 0 {
                self.pdu[offset] = 0x00;
                offset += 1;
            }
        }
        iso::set_telegram_length(&mut self.pdu, offset);
        self.pdu[15] = hi_part!(data_size);
        self.pdu[16] = lo_part!(data_size);
        trace!(items = count, size = offset, "s7 multi write");

        let length = self.exchange(offset)?;
        if length < MULTI_RES_MIN {
            return Err(S7Error::IsoInvalidPdu);
        }
        cpu_error(make_u16!(self.pdu[17], self.pdu[18]))?;
        if self.pdu[20] as usize != count || 21 + count > length {
            return Err(S7Error::CliInvalidPlcAnswer);
        }
        for (c, item) in items.iter_mut().enumerate() {
            let ret = self.pdu[21 + c];
            item.result = if ret == RES_SUCCESS { Ok(()) } else { Err(cpu_item_error(ret)) };
        }
        Ok(())
    }
}

/// ### Multi read/write helper
///
/// Collects variables (max 20) and reads or writes them in a single telegram.
///
/// ```no_run
/// use s7client::{S7Client, S7MultiVar, S7_AREA_DB, S7_AREA_MK, S7_WL_BYTE, S7_WL_REAL};
///
/// let mut client = S7Client::new();
/// client.connect_s71200_1500("192.168.0.10").unwrap();
/// let mut db1 = [0u8; 16];
/// let mut merkers = [0u8; 4];
/// let mut mv = S7MultiVar::new(&mut client);
/// mv.add(S7_AREA_DB, S7_WL_BYTE, 1, 0, 16, &mut db1).unwrap();
/// mv.add(S7_AREA_MK, S7_WL_REAL, 0, 0, 1, &mut merkers).unwrap();
/// mv.read().unwrap();
/// ```
///
/// The client borrow (`'c`) and the variable buffers (`'b`) are independent.
pub struct S7MultiVar<'c, 'b> {
    client: &'c mut S7Client,
    items: Vec<S7DataItem<'b>>,
    results: Vec<Result<(), S7Error>>,
}

impl<'c, 'b> S7MultiVar<'c, 'b> {
    pub fn new(client: &'c mut S7Client) -> Self {
        S7MultiVar {
            client,
            items: Vec::with_capacity(MAX_VARS),
            results: Vec::new(),
        }
    }

    /// ### Adds a variable
    ///
    /// ### Errors
    /// - `S7Error::CliTooManyItems`: 20 variables already added.
    /// - `S7Error::CliInvalidWordLen`: unknown word length.
    /// - `S7Error::CliBufferTooSmall`: `buffer` cannot hold the variable.
    pub fn add(
        &mut self,
        area: u8,
        word_len: u8,
        db_number: u16,
        start: u32,
        amount: usize,
        buffer: &'b mut [u8],
    ) -> Result<(), S7Error> {
        if self.items.len() >= MAX_VARS {
            return Err(S7Error::CliTooManyItems);
        }
        let item = S7DataItem::new(area, word_len, db_number, start, amount, buffer);
        wire_item(&item)?;
        self.items.push(item);
        Ok(())
    }

    /// Adds a variable whose data lives at `offset` inside `buffer`.
    pub fn add_with_offset(
        &mut self,
        area: u8,
        word_len: u8,
        db_number: u16,
        start: u32,
        amount: usize,
        buffer: &'b mut [u8],
        offset: usize,
    ) -> Result<(), S7Error> {
        let buffer = buffer.get_mut(offset..).ok_or(S7Error::CliBufferTooSmall)?;
        self.add(area, word_len, db_number, start, amount, buffer)
    }

    pub fn add_tag(&mut self, tag: &S7Tag, buffer: &'b mut [u8]) -> Result<(), S7Error> {
        self.add(tag.area, tag.word_len, tag.db_number, tag.start, tag.elements, buffer)
    }

    /// Number of variables added
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// ### Reads all the variables
    ///
    /// Variables are removed in any case, the buffers are released when the helper is dropped.
    ///
    /// ### Errors
    /// - `S7Error::CliFunctionRefused`: no variables added.
    /// - Any error of `S7Client::read_multi_vars()`.
    pub fn read(&mut self) -> Result<(), S7Error> {
        self.execute(false)
    }

    /// ### Writes all the variables
    ///
    /// ---
    /// For Notes and Errors look at `read()`
    pub fn write(&mut self) -> Result<(), S7Error> {
        self.execute(true)
    }

    fn execute(&mut self, write: bool) -> Result<(), S7Error> {
        let mut items = std::mem::take(&mut self.items);
        if items.is_empty() {
            return Err(S7Error::CliFunctionRefused);
        }
        let outcome = if write {
            self.client.write_multi_vars(&mut items)
        } else {
            self.client.read_multi_vars(&mut items)
        };
        if outcome.is_ok() {
            self.results = items.iter().map(|item| item.result).collect();
        }
        outcome
    }

    /// Results of the last `read()`/`write()`, one per variable in the order they were added.
    pub fn results(&self) -> &[Result<(), S7Error>] {
        &self.results
    }
}
