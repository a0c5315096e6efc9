// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::data_size_byte;
use crate::config::{clamp_pdu_request, ClientConfig, Param};
use crate::error::{cpu_item_error, S7Error};
use crate::iso::{self, hi_part, lo_part, make_u16, ISO_CONN_OK, ISO_CONN_REQ, ISO_ID};
use crate::transport::TcpTransport;

// Connection types
pub const CT_PG: u16 = 0x0001; // As PG (Default)
pub const CT_OP: u16 = 0x0002; // As OP
pub const CT_S7: u16 = 0x0003; // AS S7 Basic

// Areas
pub const S7_AREA_PE: u8 = 0x81; // Process Inputs
pub const S7_AREA_PA: u8 = 0x82; // Process Outputs
pub const S7_AREA_MK: u8 = 0x83; // Merkers
pub const S7_AREA_DB: u8 = 0x84; // Data Block
pub const S7_AREA_CT: u8 = 0x1C; // Counters
pub const S7_AREA_TM: u8 = 0x1D; // Timers

// Wordlen
pub const S7_WL_BIT: u8 = 0x01;
pub const S7_WL_BYTE: u8 = 0x02;
pub const S7_WL_CHAR: u8 = 0x03;
pub const S7_WL_WORD: u8 = 0x04;
pub const S7_WL_INT: u8 = 0x05;
pub const S7_WL_DWORD: u8 = 0x06;
pub const S7_WL_DINT: u8 = 0x07;
pub const S7_WL_REAL: u8 = 0x08;
pub const S7_WL_COUNTER: u8 = 0x1C;
pub const S7_WL_TIMER: u8 = 0x1D;

// Transport size in data items
pub(crate) const TS_RES_BIT: u8 = 0x03;
pub(crate) const TS_RES_BYTE: u8 = 0x04;
pub(crate) const TS_RES_REAL: u8 = 0x07;
pub(crate) const TS_RES_OCTET: u8 = 0x09;

pub(crate) const S7_ID: u8 = 0x32; // S7 Protocol ID
pub(crate) const RES_SUCCESS: u8 = 0xFF; // Item result: success

const TELEGRAM_SIZE: usize = 2048; // Telegram buffer (> max PDU + headers)
const MAX_WIRE_ADDRESS: u32 = 0xFF_FFFF; // 24 bit area offset
const ISO_CR_LEN: usize = 22; // Connection request telegram size
const ISO_PN_REQ_LEN: usize = 25; // PDU negotiation request telegram size
const ISO_PN_RES_LEN: usize = 27; // PDU negotiation response telegram size
const READ_REQ_LEN: usize = 31; // TPKT + ISO + S7 read request
const WRITE_REQ_LEN: usize = 35; // TPKT + ISO + S7 write request (payload excluded)
const READ_RES_OVERHEAD: usize = 18; // Read reply overhead inside the PDU
const READ_RES_DATA: usize = 25; // Offset of the data inside a read reply
const WRITE_RES_LEN: usize = 22; // Write reply telegram size
const RES_OFFSET: usize = 21; // Item result inside a read/write reply

/// ### Connection life cycle
///
/// `connect()` goes through the three stages in order; any failure brings the client back
/// to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// TCP socket open
    TcpConnected,
    /// ISO (RFC 1006) connection confirmed
    IsoConnected,
    /// PDU negotiated, ready for S7 jobs
    Ready,
}

pub struct S7Client {
    transport: TcpTransport,
    config: ClientConfig,
    address: String,
    local_tsap: u16,
    remote_tsap: u16,
    state: ConnectionState,
    /// Telegram buffer shared by send and receive
    pub(crate) pdu: Vec<u8>,
    pdu_length: u16,
    last_error: u32,
    last_time: f64,
    chunks: usize,
}

impl fmt::Debug for S7Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S7Client")
            .field("address", &self.address)
            .field("local_tsap", &format_args!("0x{:04X}", self.local_tsap))
            .field("remote_tsap", &format_args!("0x{:04X}", self.remote_tsap))
            .field("state", &self.state)
            .field("pdu_length", &self.pdu_length)
            .field("last_error", &format_args!("0x{:08X}", self.last_error))
            .finish()
    }
}

impl Default for S7Client {
    fn default() -> Self {
        S7Client::new()
    }
}

/// Normalizes an area request.
///
/// Returns (word length, amount, element size): counters and timers keep their word length,
/// bit access moves a single element, everything else is turned into a byte access.
pub(crate) fn normalize_area(area: u8, word_len: u8, amount: usize) -> Result<(u8, usize, usize), S7Error> {
    let word_len = match area {
        S7_AREA_CT => S7_WL_COUNTER,
        S7_AREA_TM => S7_WL_TIMER,
        _ => word_len,
    };
    let word_size = data_size_byte(word_len);
    if word_size == 0 {
        return Err(S7Error::CliInvalidWordLen);
    }
    match word_len {
        S7_WL_BIT => Ok((S7_WL_BIT, 1, 1)),
        S7_WL_COUNTER | S7_WL_TIMER => Ok((word_len, amount, word_size)),
        _ => Ok((S7_WL_BYTE, amount * word_size, 1)),
    }
}

/// Bit, counter and timer are addressed by element, the others by bit.
///
/// The address field is 24 bit wide, anything beyond is `S7Error::CliInvalidParams`.
pub(crate) fn wire_address(word_len: u8, start: u32) -> Result<u32, S7Error> {
    let address = match word_len {
        S7_WL_BIT | S7_WL_COUNTER | S7_WL_TIMER => Some(start),
        _ => start.checked_mul(8),
    };
    address
        .filter(|address| *address <= MAX_WIRE_ADDRESS)
        .ok_or(S7Error::CliInvalidParams)
}

/// Bit start (`byte_num * 8 + bit_idx`) of a bit access
pub(crate) fn bit_start(byte_num: u32, bit_idx: u8) -> Result<u32, S7Error> {
    if bit_idx > 7 {
        return Err(S7Error::CliInvalidParams);
    }
    byte_num
        .checked_mul(8)
        .and_then(|bits| bits.checked_add(bit_idx as u32))
        .ok_or(S7Error::CliInvalidParams)
}

/// Transport size of a data item to write
pub(crate) fn transport_size(word_len: u8) -> u8 {
    match word_len {
        S7_WL_BIT => TS_RES_BIT,
        S7_WL_COUNTER | S7_WL_TIMER => TS_RES_OCTET,
        _ => TS_RES_BYTE,
    }
}

impl S7Client {
    /// ### Creates a new `S7Client` instance with default settings.
    ///
    /// The client starts disconnected, use one of `connect_XXX` methods to open a connection to a PLC.
    ///
    /// ### Returns
    /// A new `S7Client` ready to connect.
    ///
    pub fn new() -> Self {
        S7Client::with_config(ClientConfig::default())
    }

    /// ### Creates a new `S7Client` using the given parameters
    ///
    /// The requested PDU size is clamped into 240..960.
    pub fn with_config(config: ClientConfig) -> Self {
        let config = config.normalized();
        S7Client {
            transport: TcpTransport::new(config.connect_timeout, config.read_timeout, config.write_timeout),
            config,
            address: String::new(),
            local_tsap: 0x0100,
            remote_tsap: 0x0000,
            state: ConnectionState::Disconnected,
            pdu: vec![0u8; TELEGRAM_SIZE],
            pdu_length: 0,
            last_error: 0,
            last_time: 0.0,
            chunks: 0,
        }
    }

    /// ### Changes the S7 connection type to the PLC
    ///
    /// The three possible connection types are:
    /// - `CT_PG`: (as a programming device)
    /// - `CT_OP`: (as an HMI)
    /// - `CT_S7`: (as a generic device)
    ///
    /// `CT_PG` is used by default.
    ///
    /// With very old PLCs (early S7300 series) that have limited communication resources,
    /// the connection may be rejected if we have S7Manager with many online windows open at the same time.
    /// In this case, use `CT_OP` or `CT_S7`.
    ///
    /// ### Notes
    /// 1. The client must not be connected (that is, call this method before connecting).
    /// 2. This method is not useful if you use `connect_tsap()` because the connection type is already contained in the remote TSAP.
    ///
    pub fn set_connection_type(&mut self, connection_type: u16) {
        self.config.connection_type = connection_type;
    }

    /// ### Sets operations timeout
    ///
    /// ### Parameters
    /// - `co_timeout_ms` : TCP Connection timeout (ms) (Default = 1000 ms)
    /// - `rd_timeout_ms` : Receive timeout (ms) (Default = 2000 ms)
    /// - `wr_timeout_ms` : Send timeout (ms) (Default = 2000 ms)
    ///
    /// ### Notes
    /// 1. Values must be > 0, otherwise they are ignored
    /// 2. Send and receive timeouts are applied to the socket at the next connection.
    ///
    pub fn set_timeout(&mut self, co_timeout_ms: u64, rd_timeout_ms: u64, wr_timeout_ms: u64) {
        if co_timeout_ms > 0 {
            self.config.connect_timeout = Duration::from_millis(co_timeout_ms);
        }
        if rd_timeout_ms > 0 {
            self.config.read_timeout = Duration::from_millis(rd_timeout_ms);
        }
        if wr_timeout_ms > 0 {
            self.config.write_timeout = Duration::from_millis(wr_timeout_ms);
        }
        self.sync_timeouts();
    }

    /// ### Sets the TCP Connection Port
    ///
    /// The default S7 Port is 102, but if you need NAT the addresses you can use this method to change the default value.
    ///
    /// ### Notes
    /// 1. Value must be > 0, otherwise it is ignored
    /// 2. The client must not be connected (that is, call this method before connecting).
    ///
    pub fn set_connection_port(&mut self, port: u16) {
        if port > 0 {
            self.config.port = port;
        }
    }

    /// Sets the PDU size proposed to the CPU at the next connection, clamped into 240..960.
    pub fn set_pdu_size_requested(&mut self, size: u16) {
        self.config.pdu_request = clamp_pdu_request(size);
    }

    /// ### Sets a numeric connection parameter
    ///
    /// ### Errors
    /// - `S7Error::CliInvalidParams`: zero port or timeout, or a value out of its range.
    ///
    /// ### Notes
    /// `Param::from_number()` converts the legacy parameter numbers.
    pub fn set_param(&mut self, param: Param, value: u32) -> Result<(), S7Error> {
        if value == 0 {
            return Err(S7Error::CliInvalidParams);
        }
        match param {
            Param::RemotePort => {
                self.config.port = u16::try_from(value).map_err(|_| S7Error::CliInvalidParams)?;
            }
            Param::PingTimeout => self.config.connect_timeout = Duration::from_millis(value as u64),
            Param::SendTimeout => self.config.write_timeout = Duration::from_millis(value as u64),
            Param::RecvTimeout => self.config.read_timeout = Duration::from_millis(value as u64),
            Param::PduRequest => {
                let value = u16::try_from(value).unwrap_or(u16::MAX);
                self.config.pdu_request = clamp_pdu_request(value);
            }
        }
        self.sync_timeouts();
        Ok(())
    }

    /// Gets a numeric connection parameter
    pub fn get_param(&self, param: Param) -> u32 {
        match param {
            Param::RemotePort => self.config.port as u32,
            Param::PingTimeout => self.config.connect_timeout.as_millis() as u32,
            Param::SendTimeout => self.config.write_timeout.as_millis() as u32,
            Param::RecvTimeout => self.config.read_timeout.as_millis() as u32,
            Param::PduRequest => self.config.pdu_request as u32,
        }
    }

    fn sync_timeouts(&mut self) {
        self.transport.connect_timeout = self.config.connect_timeout;
        self.transport.read_timeout = self.config.read_timeout;
        self.transport.write_timeout = self.config.write_timeout;
    }

    /// ### Sets address and TSAP records used by `connect()`
    pub fn set_connection_params(&mut self, address: &str, local_tsap: u16, remote_tsap: u16) {
        self.address = address.to_string();
        self.local_tsap = local_tsap;
        self.remote_tsap = remote_tsap;
    }

    /// ### Connects to the S71200 or S71500 families
    ///
    /// This helper method is same as `connect_to()` with rack=0 and slot=0
    ///
    /// ---
    /// For Notes, Return and Errors look at `connect()`
    ///
    pub fn connect_s71200_1500(&mut self, address: &str) -> Result<(), S7Error> {
        self.connect_to(address, 0, 0)
    }

    /// ### Connects to the S7300 family
    ///
    /// This helper method is same as `connect_to()` with rack=0 and slot=2
    ///
    /// ---
    /// For Notes, Return and Errors look at `connect()`
    ///
    pub fn connect_s7300(&mut self, address: &str) -> Result<(), S7Error> {
        self.connect_to(address, 0, 2)
    }

    /// ### Connects to a Siemens PLC/Drive using Rack and Slot
    ///
    /// Rack and Slot are Hardware configuration parameters.
    ///
    /// For S7300 and S71200/1500 they are fixed, (see `connect_s7300()` and `connect_s71200_1500()` ).
    ///
    /// Ultimately, you will need of this method only to connect to S7400, WinAC or other Siemens
    /// hardware, like Drives, which Rack and Slot can vary.
    ///
    /// The remote TSAP is `(connection_type << 8) + rack * 0x20 + slot`, the local one is 0x0100.
    ///
    /// ---
    /// For Notes, Return and Errors look at `connect()`
    ///
    pub fn connect_to(&mut self, address: &str, rack: u16, slot: u16) -> Result<(), S7Error> {
        let remote_tsap: u16 = (self.config.connection_type << 8)
            .wrapping_add(rack.wrapping_mul(0x20))
            .wrapping_add(slot);
        self.set_connection_params(address, 0x0100, remote_tsap);
        self.connect()
    }

    /// ### Connects to a Siemens ISO-Hardware using TSAP records
    ///
    /// You will need it only to connect to LOGO! or S7200.
    ///
    /// ---
    /// For Notes, Return and Errors look at `connect()`
    ///
    pub fn connect_tsap(&mut self, address: &str, local_tsap: u16, remote_tsap: u16) -> Result<(), S7Error> {
        self.set_connection_params(address, local_tsap, remote_tsap);
        self.connect()
    }

    /// ### Connects using the parameters set by `set_connection_params()`
    ///
    /// Three stages: TCP connection, ISO connection, PDU negotiation.
    /// Calling it on a connected client does nothing.
    ///
    /// ### Returns
    /// `Ok(())` on success, or an `S7Error` on failure.
    ///
    /// ### Errors
    /// - `S7Error::TcpConnectionFailed`, `S7Error::TcpUnreachableHost`: TCP connection could not be established.
    /// - `S7Error::IsoConnect`: the PLC refused the ISO connection (wrong TSAP, rack or slot).
    /// - `S7Error::IsoInvalidPdu`: unexpected answer during the handshake.
    /// - `S7Error::CliNegotiatingPdu`: PDU negotiation failed.
    ///
    /// ### Notes
    /// On any failure the client is left disconnected.
    ///
    pub fn connect(&mut self) -> Result<(), S7Error> {
        if self.state == ConnectionState::Ready {
            return Ok(());
        }
        self.last_time = 0.0;
        let start_time = Instant::now();

        match self.open_session() {
            Ok(()) => {
                self.last_error = 0;
                self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
                debug!(
                    address = %self.address,
                    port = self.config.port,
                    pdu_length = self.pdu_length,
                    "s7 connected"
                );
                Ok(())
            }
            Err(err) => {
                warn!(address = %self.address, error = %err, state = ?self.state, "s7 connection failed");
                self.disconnect();
                self.last_error = err.code();
                Err(err)
            }
        }
    }

    fn open_session(&mut self) -> Result<(), S7Error> {
        self.transport.connect(&self.address, self.config.port)?;
        self.state = ConnectionState::TcpConnected;
        self.iso_connect()?;
        self.state = ConnectionState::IsoConnected;
        self.negotiate_pdu_length()?;
        self.state = ConnectionState::Ready;
        Ok(())
    }

    fn iso_connect(&mut self) -> Result<(), S7Error> {
        let iso_cr: [u8; ISO_CR_LEN] = [
            // TPKT (RFC1006 Header)
            ISO_ID,                     // RFC 1006 ID (3)
            0x00,                       // Reserved, always 0
            hi_part!(ISO_CR_LEN),       // High part of packet length (entire frame, payload and TPDU included)
            lo_part!(ISO_CR_LEN),       // Low part of packet length (entire frame, payload and TPDU included)
            // COTP (ISO 8073 Header)
            0x11,                       // PDU Size Length
            ISO_CONN_REQ,               // CR - Connection Request ID
            0x00,                       // Dst Reference HI
            0x00,                       // Dst Reference LO
            0x00,                       // Src Reference HI
            0x01,                       // Src Reference LO
            0x00,                       // Class + Options Flags
            0xC0,                       // PDU Max Length ID
            0x01,                       // PDU Max Length HI
            0x0A,                       // PDU Max Length LO
            0xC1,                       // Src TSAP Identifier
            0x02,                       // Src TSAP Length (2 bytes)
            hi_part!(self.local_tsap),  // Loc TSAP HI
            lo_part!(self.local_tsap),  // Loc TSAP LO
            0xC2,                       // Rem TSAP Identifier
            0x02,                       // Rem TSAP Length (2 bytes)
            hi_part!(self.remote_tsap), // Rem TSAP HI
            lo_part!(self.remote_tsap), // Rem TSAP LO
        ];
        self.transport.send(&iso_cr)?;

        let (size, pdu_type) = self.recv_packet()?;
        if size != ISO_CR_LEN {
            return Err(S7Error::IsoInvalidPdu);
        }
        if pdu_type != ISO_CONN_OK {
            return Err(S7Error::IsoConnect);
        }
        trace!(local_tsap = self.local_tsap, remote_tsap = self.remote_tsap, "s7 iso connected");
        Ok(())
    }

    fn negotiate_pdu_length(&mut self) -> Result<(), S7Error> {
        let pdu_request = self.config.pdu_request;
        // S7 PDU Negotiation Telegram (contains also ISO Header and COTP Header)
        let s7_pn: [u8; ISO_PN_REQ_LEN] = [
            ISO_ID, 0x00, 0x00, 0x19,    // TPKT, 25 bytes
            0x02, 0xf0, 0x80,            // COTP
            S7_ID, 0x01, 0x00, 0x00,     // S7 Job
            0x04, 0x00,                  // PDU Reference
            0x00, 0x08,                  // Parameters length
            0x00, 0x00,                  // Data length
            0xf0, 0x00,                  // Setup communication
            0x00, 0x01, 0x00, 0x01,      // Max AmQ calling/called
            hi_part!(pdu_request),       // PDU Length requested HI
            lo_part!(pdu_request),       // PDU Length requested LO
        ];
        self.transport.send(&s7_pn)?;

        let (size, _) = self.recv_packet()?;
        if size != ISO_PN_RES_LEN || self.pdu[17] != 0 || self.pdu[18] != 0 {
            return Err(S7Error::CliNegotiatingPdu);
        }
        let granted = make_u16!(self.pdu[25], self.pdu[26]);
        // The CPU may only lower the request
        if granted == 0 || granted > pdu_request || granted as usize > TELEGRAM_SIZE - iso::ISO_H_SIZE {
            warn!(granted, requested = pdu_request, "s7 bogus pdu length granted");
            return Err(S7Error::CliNegotiatingPdu);
        }
        self.pdu_length = granted;
        Ok(())
    }

    /// ### Closes the connection.
    ///
    /// Safe to call even if the client is not currently connected.
    /// After disconnection, calls to read/write will return `S7Error::TcpNotConnected`.
    ///
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            trace!(address = %self.address, "s7 disconnecting");
        }
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.pdu_length = 0;
    }

    fn recv_packet(&mut self) -> Result<(usize, u8), S7Error> {
        let max_pdu = if self.pdu_length > 0 {
            self.pdu_length
        } else {
            self.config.pdu_request
        };
        iso::recv_iso_packet(&mut self.transport, &mut self.pdu, max_pdu as usize)
    }

    /// Sends the first `size` bytes of the telegram buffer and receives the answer.
    /// Returns the answer length.
    pub(crate) fn exchange(&mut self, size: usize) -> Result<usize, S7Error> {
        if self.state != ConnectionState::Ready || !self.transport.is_connected() {
            return Err(S7Error::TcpNotConnected);
        }
        self.transport.send(&self.pdu[..size])?;
        let (length, _) = self.recv_packet()?;
        Ok(length)
    }

    /// Copies a fixed telegram into the buffer and exchanges it.
    pub(crate) fn exchange_telegram(&mut self, telegram: &[u8]) -> Result<usize, S7Error> {
        self.pdu[..telegram.len()].copy_from_slice(telegram);
        self.exchange(telegram.len())
    }

    /// ### Runs an operation keeping track of time and errors
    ///
    /// Transport and ISO errors drop the connection.
    pub(crate) fn run<T, F>(&mut self, op: &'static str, f: F) -> Result<T, S7Error>
    where
        F: FnOnce(&mut S7Client) -> Result<T, S7Error>,
    {
        self.last_time = 0.0;
        let start_time = Instant::now();
        let result = f(self);
        match &result {
            Ok(_) => {
                self.last_error = 0;
                self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
                trace!(op, elapsed_ms = self.last_time, "s7 job done");
            }
            Err(err) => {
                self.last_error = err.code();
                if err.closes_connection() && self.state != ConnectionState::Disconnected {
                    warn!(op, error = %err, "s7 job failed, dropping the connection");
                    self.disconnect();
                } else {
                    debug!(op, error = %err, "s7 job failed");
                }
            }
        }
        result
    }

    pub(crate) fn set_last_error(&mut self, err: S7Error) {
        self.last_error = err.code();
        self.last_time = 0.0;
    }

    /// ### Reads a block of data from a specific S7 memory area.
    ///
    /// ### Parameters
    /// - `area`: S7 memory area constant (e.g., `S7_AREA_PE`, `S7_AREA_PA`, `S7_AREA_DB`, `S7_AREA_MK`, `S7_AREA_CT`, `S7_AREA_TM`).
    /// - `db_number`: DB number (ignored for non-DB areas).
    /// - `start`: Starting element index (byte index for bytes, bit index for bits).
    /// - `amount`: Number of elements to read.
    /// - `word_len`: Word length constant (e.g., `S7_WL_BYTE`, `S7_WL_BIT`, `S7_WL_WORD` ...).
    /// - `buffer`: Destination buffer to store the read data.
    ///
    /// #### Bit access notes
    /// 1. The start must be expressed in bits.
    ///    For example, if you want to access bit `DBX 45.3`, the start value would be 45 * 8 + 3 = 363.
    /// 2. Only one bit is read, whatever `amount` is.
    ///
    /// ### Returns
    /// `Ok(<bytes read>)`.
    ///
    /// ### Errors
    /// #### Low level (the connection is closed)
    /// - `S7Error::TcpNotConnected`: An attempt was made to read while the client was not connected.
    /// - `S7Error::IsoInvalidPdu`, `S7Error::IsoInvalidDataSize`: malformed answer.
    /// - TCP errors.
    ///
    /// #### High level
    /// - `S7Error::CpuItemNotAvailable`: The resource was not found (e.g. Inexistent DB).
    /// - `S7Error::CpuAddressOutOfRange`:
    /// 1. Attempt to read beyond the limits.
    /// 2. The DB is optimized.
    /// - `S7Error::CliInvalidWordLen`, `S7Error::CliBufferTooSmall`: invalid parameters.
    ///
    /// ### Notes
    /// - Large blocks are automatically split into chunks based on the negotiated PDU size.
    /// - In case of error the buffer contents will be inconsistent and should not be considered.
    ///
    pub fn read_area(
        &mut self,
        area: u8,
        db_number: u16,
        start: u32,
        amount: usize,
        word_len: u8,
        buffer: &mut [u8],
    ) -> Result<usize, S7Error> {
        self.chunks = 0;
        self.run("read_area", |cli| {
            cli.read_area_chunks(area, db_number, start, amount, word_len, buffer)
        })
    }

    fn read_area_chunks(
        &mut self,
        area: u8,
        db_number: u16,
        mut start: u32,
        amount: usize,
        word_len: u8,
        buffer: &mut [u8],
    ) -> Result<usize, S7Error> {
        let (word_len, amount, word_size) = normalize_area(area, word_len, amount)?;
        wire_address(word_len, start)?;
        if buffer.len() < amount * word_size {
            return Err(S7Error::CliBufferTooSmall);
        }
        if self.state != ConnectionState::Ready {
            return Err(S7Error::TcpNotConnected);
        }

        let max_elements = (self.pdu_length as usize).saturating_sub(READ_RES_OVERHEAD) / word_size;
        if max_elements == 0 {
            return Err(S7Error::CliSizeOverPdu);
        }

        let mut offset = 0;
        let mut remaining = amount;
        while remaining > 0 {
            let num_elements = remaining.min(max_elements);
            let size = num_elements * word_size;
            self.chunks += 1;

            self.build_rw_request(0x04, area, db_number, start, num_elements, word_len, READ_REQ_LEN)?;
            trace!(chunk = self.chunks, start, num_elements, "s7 read chunk");

            let length = self.exchange(READ_REQ_LEN)?;
            if length < READ_RES_DATA {
                return Err(S7Error::IsoInvalidDataSize);
            }
            if self.pdu[RES_OFFSET] != RES_SUCCESS {
                return Err(cpu_item_error(self.pdu[RES_OFFSET]));
            }
            if length < READ_RES_DATA + size {
                return Err(S7Error::IsoInvalidDataSize);
            }
            buffer[offset..offset + size].copy_from_slice(&self.pdu[READ_RES_DATA..READ_RES_DATA + size]);

            offset += size;
            remaining -= num_elements;
            start += num_elements as u32;
        }
        Ok(offset)
    }

    /// ### Writes a block of data to a specific S7 memory area.
    ///
    /// Same parameters as `read_area()`, `buffer` is the source.
    ///
    /// #### Bit access notes
    /// 1. The start must be expressed in bits.
    /// 2. Only the first byte of the buffer is used, which is considered true if !=0 or false if ==0
    /// 3. Writing a bit affects **only that bit**, leaving adjacent bits in the byte unchanged.
    ///
    /// ### Returns
    /// `Ok(<bytes written>)`.
    ///
    /// ### Notes
    /// - Large blocks are automatically split into chunks based on the negotiated PDU size.
    /// - Writing the output buffer (`S7_AREA_PA`) usually does not produce useful results, in fact the output process image
    ///   will be rewritten by OB1 in the next round
    ///
    pub fn write_area(
        &mut self,
        area: u8,
        db_number: u16,
        start: u32,
        amount: usize,
        word_len: u8,
        buffer: &[u8],
    ) -> Result<usize, S7Error> {
        self.chunks = 0;
        self.run("write_area", |cli| {
            cli.write_area_chunks(area, db_number, start, amount, word_len, buffer)
        })
    }

    fn write_area_chunks(
        &mut self,
        area: u8,
        db_number: u16,
        mut start: u32,
        amount: usize,
        word_len: u8,
        buffer: &[u8],
    ) -> Result<usize, S7Error> {
        let (word_len, amount, word_size) = normalize_area(area, word_len, amount)?;
        wire_address(word_len, start)?;
        if buffer.len() < amount * word_size {
            return Err(S7Error::CliBufferTooSmall);
        }
        if self.state != ConnectionState::Ready {
            return Err(S7Error::TcpNotConnected);
        }

        let max_elements = (self.pdu_length as usize).saturating_sub(WRITE_REQ_LEN) / word_size;
        if max_elements == 0 {
            return Err(S7Error::CliSizeOverPdu);
        }

        let mut offset = 0;
        let mut remaining = amount;
        while remaining > 0 {
            let num_elements = remaining.min(max_elements);
            let data_size = num_elements * word_size;
            let iso_size = WRITE_REQ_LEN + data_size;
            self.chunks += 1;

            self.build_rw_request(0x05, area, db_number, start, num_elements, word_len, iso_size)?;
            // Data length
            self.pdu[15] = hi_part!(data_size + 4);
            self.pdu[16] = lo_part!(data_size + 4);
            // Data item header
            let bits_payload = match word_len {
                S7_WL_BIT | S7_WL_COUNTER | S7_WL_TIMER => data_size,
                _ => data_size << 3,
            };
            self.pdu[31] = 0x00;
            self.pdu[32] = transport_size(word_len);
            self.pdu[33] = hi_part!(bits_payload);
            self.pdu[34] = lo_part!(bits_payload);
            self.pdu[WRITE_REQ_LEN..iso_size].copy_from_slice(&buffer[offset..offset + data_size]);
            trace!(chunk = self.chunks, start, num_elements, "s7 write chunk");

            let length = self.exchange(iso_size)?;
            if length != WRITE_RES_LEN {
                return Err(S7Error::IsoInvalidPdu);
            }
            if self.pdu[RES_OFFSET] != RES_SUCCESS {
                return Err(cpu_item_error(self.pdu[RES_OFFSET]));
            }

            offset += data_size;
            remaining -= num_elements;
            start += num_elements as u32;
        }
        Ok(offset)
    }

    /// Fills the read/write var request header into the telegram buffer.
    #[allow(clippy::too_many_arguments)]
    fn build_rw_request(
        &mut self,
        function: u8,
        area: u8,
        db_number: u16,
        start: u32,
        num_elements: usize,
        word_len: u8,
        telegram_size: usize,
    ) -> Result<(), S7Error> {
        let db_number = if area == S7_AREA_DB { db_number } else { 0 };
        let address = wire_address(word_len, start)?;
        let header: [u8; READ_REQ_LEN] = [
            ISO_ID, 0x00,                  // RFC 1006 ID (constant)                   0
            hi_part!(telegram_size),       // Telegram Length HI                       2
            lo_part!(telegram_size),       // Telegram Length LO                       3
            0x02, 0xf0, 0x80,              // COTP (constant)                          4
            S7_ID,                         // S7 Protocol ID                           7
            0x01,                          // Job Type                                 8
            0x00, 0x00,                    // Redundancy identification                9
            0x05, 0x00,                    // PDU Reference                            11
            0x00, 0x0e,                    // Parameters Length (HI,LO) = 14           13
            0x00, 0x00,                    // Data Length (write only)                 15
            function,                      // Function: 4 Read Var, 5 Write Var        17
            0x01,                          // Items count                              18
            0x12,                          // Var spec.                                19
            0x0a,                          // Length of remaining bytes                20
            0x10,                          // Syntax ID                                21
            word_len,                      // WordLen                                  22
            hi_part!(num_elements),        // Num elements HI                          23
            lo_part!(num_elements),        // Num elements LO                          24
            hi_part!(db_number),           // DB Number HI                             25
            lo_part!(db_number),           // DB Number LO                             26
            area,                          // Area                                     27
            ((address >> 16) & 0xFF) as u8, // 24 bit Address                          28
            ((address >> 8) & 0xFF) as u8,  //                                         29
            (address & 0xFF) as u8,         //                                         30
        ];
        self.pdu[..READ_REQ_LEN].copy_from_slice(&header);
        Ok(())
    }

    /// ### Reads a block of byte from a specific Data Block (DB)
    ///
    /// This helper method is same as `read_area()` with:
    /// - area = `S7_AREA_DB`
    /// - wordlen = `S7_WL_BYTE`
    ///
    /// The number of bytes to read will be equal to the size of the buffer passed.
    ///
    pub fn db_read(&mut self, db_number: u16, start: u32, buffer: &mut [u8]) -> Result<usize, S7Error> {
        let amount = buffer.len();
        self.read_area(S7_AREA_DB, db_number, start, amount, S7_WL_BYTE, buffer)
    }

    /// ### Writes a block of byte to a specific Data Block (DB)
    ///
    /// The number of bytes to write will be equal to the size of the buffer passed.
    ///
    pub fn db_write(&mut self, db_number: u16, start: u32, buffer: &[u8]) -> Result<usize, S7Error> {
        self.write_area(S7_AREA_DB, db_number, start, buffer.len(), S7_WL_BYTE, buffer)
    }

    /// Reads merkers (MB) bytes
    pub fn mb_read(&mut self, start: u32, buffer: &mut [u8]) -> Result<usize, S7Error> {
        let amount = buffer.len();
        self.read_area(S7_AREA_MK, 0, start, amount, S7_WL_BYTE, buffer)
    }

    pub fn mb_write(&mut self, start: u32, buffer: &[u8]) -> Result<usize, S7Error> {
        self.write_area(S7_AREA_MK, 0, start, buffer.len(), S7_WL_BYTE, buffer)
    }

    /// Reads process inputs (EB) bytes
    pub fn eb_read(&mut self, start: u32, buffer: &mut [u8]) -> Result<usize, S7Error> {
        let amount = buffer.len();
        self.read_area(S7_AREA_PE, 0, start, amount, S7_WL_BYTE, buffer)
    }

    pub fn eb_write(&mut self, start: u32, buffer: &[u8]) -> Result<usize, S7Error> {
        self.write_area(S7_AREA_PE, 0, start, buffer.len(), S7_WL_BYTE, buffer)
    }

    /// Reads process outputs (AB) bytes
    pub fn ab_read(&mut self, start: u32, buffer: &mut [u8]) -> Result<usize, S7Error> {
        let amount = buffer.len();
        self.read_area(S7_AREA_PA, 0, start, amount, S7_WL_BYTE, buffer)
    }

    pub fn ab_write(&mut self, start: u32, buffer: &[u8]) -> Result<usize, S7Error> {
        self.write_area(S7_AREA_PA, 0, start, buffer.len(), S7_WL_BYTE, buffer)
    }

    /// ### Reads timers
    ///
    /// One `u16` per timer, `buffer.len()` timers are read starting from `start`.
    pub fn tm_read(&mut self, start: u32, buffer: &mut [u16]) -> Result<usize, S7Error> {
        let mut raw = vec![0u8; buffer.len() * 2];
        let size = self.read_area(S7_AREA_TM, 0, start, buffer.len(), S7_WL_TIMER, &mut raw)?;
        unpack_elements(&raw, buffer);
        Ok(size)
    }

    pub fn tm_write(&mut self, start: u32, buffer: &[u16]) -> Result<usize, S7Error> {
        let raw = pack_elements(buffer);
        self.write_area(S7_AREA_TM, 0, start, buffer.len(), S7_WL_TIMER, &raw)
    }

    /// ### Reads counters
    ///
    /// One `u16` per counter, use `codec::get_counter()` to decode the BCD value.
    pub fn ct_read(&mut self, start: u32, buffer: &mut [u16]) -> Result<usize, S7Error> {
        let mut raw = vec![0u8; buffer.len() * 2];
        let size = self.read_area(S7_AREA_CT, 0, start, buffer.len(), S7_WL_COUNTER, &mut raw)?;
        unpack_elements(&raw, buffer);
        Ok(size)
    }

    /// Writes counters, use `codec::to_counter()` to encode the values.
    pub fn ct_write(&mut self, start: u32, buffer: &[u16]) -> Result<usize, S7Error> {
        let raw = pack_elements(buffer);
        self.write_area(S7_AREA_CT, 0, start, buffer.len(), S7_WL_COUNTER, &raw)
    }

    /// ### Reads a bit from a specific S7 memory area
    ///
    /// This helper method is same as `read_area()` with:
    /// - wordlen = `S7_WL_BIT`
    /// - start = `byte_num * 8 + bit_idx`
    ///
    /// ### Example
    /// To read DB10.DBX71.4 use:
    ///
    /// ```my_bit = read_bit(S7_AREA_DB, 10, 71, 4);```
    ///
    /// ### Suggestion
    ///
    /// ```text
    /// Even reading a single bit requires an entire telegram.
    /// Since reading is non-invasive, if you need to read multiple bits
    /// (more or less adjacent in the same area), I recommend reading blocks
    /// of bytes and then unpacking them.
    /// ```
    ///
    pub fn read_bit(&mut self, area: u8, db_number: u16, byte_num: u32, bit_idx: u8) -> Result<bool, S7Error> {
        let start = bit_start(byte_num, bit_idx).inspect_err(|err| self.last_error = err.code())?;
        let mut buffer = [0u8; 1];
        self.read_area(area, db_number, start, 1, S7_WL_BIT, &mut buffer)?;
        Ok(buffer[0] != 0)
    }

    /// ### Writes a bit to a specific S7 memory area
    ///
    /// ### Example
    /// To write **1** into DB10.DBX71.4 use:
    ///
    /// ```write_bit(S7_AREA_DB, 10, 71, 4, true);```
    ///
    /// ### Notes
    /// ```text
    /// Writing a bit affects only that bit, leaving adjacent bits in the byte unchanged.
    /// ```
    ///
    pub fn write_bit(&mut self, area: u8, db_number: u16, byte_num: u32, bit_idx: u8, value: bool) -> Result<(), S7Error> {
        let start = bit_start(byte_num, bit_idx).inspect_err(|err| self.last_error = err.code())?;
        let data = [value as u8];
        self.write_area(area, db_number, start, 1, S7_WL_BIT, &data)?;
        Ok(())
    }

    /// ### Exchanges a raw S7 PDU
    ///
    /// The first `size` bytes of `buffer` are wrapped into the TPKT/COTP envelope and sent,
    /// the S7 part of the answer is copied back into `buffer`.
    ///
    /// ### Returns
    /// `Ok(<answer size>)`
    ///
    /// ### Errors
    /// - `S7Error::IsoInvalidPdu`: `size` is larger than the buffer or the negotiated PDU.
    /// - `S7Error::CliBufferTooSmall`: the answer does not fit into `buffer`.
    pub fn iso_exchange_buffer(&mut self, buffer: &mut [u8], size: usize) -> Result<usize, S7Error> {
        self.run("iso_exchange_buffer", |cli| {
            if size > buffer.len() || size + iso::ISO_H_SIZE > cli.pdu.len() {
                return Err(S7Error::IsoInvalidPdu);
            }
            let telegram_size = size + iso::ISO_H_SIZE;
            iso::write_data_header(&mut cli.pdu, telegram_size);
            cli.pdu[iso::ISO_H_SIZE..telegram_size].copy_from_slice(&buffer[..size]);
            let length = cli.exchange(telegram_size)?;
            let answer = length - iso::ISO_H_SIZE;
            if answer > buffer.len() {
                return Err(S7Error::CliBufferTooSmall);
            }
            buffer[..answer].copy_from_slice(&cli.pdu[iso::ISO_H_SIZE..length]);
            Ok(answer)
        })
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Client connected and PDU negotiated
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready && self.transport.is_connected()
    }

    /// PDU length negotiated with the CPU (0 when disconnected)
    pub fn pdu_length(&self) -> u16 {
        self.pdu_length
    }

    /// PDU length that will be proposed to the CPU
    pub fn requested_pdu_length(&self) -> u16 {
        self.config.pdu_request
    }

    /// ### Last error code
    ///
    /// 0 if the last operation succeeded, use `error_text()` to get a description.
    pub fn last_error(&self) -> u32 {
        self.last_error
    }

    /// ### Last Job time (ms).
    ///
    /// If an error occurred the value will be 0
    pub fn last_time(&self) -> f64 {
        self.last_time
    }

    /// ### Indicates how many pieces the data to be read or written in the last area operation was divided into
    /// Maybe you need to know it only for extreme tuning
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Timers and counters travel as two bytes per element, low byte first in the array.
fn unpack_elements(raw: &[u8], values: &mut [u16]) {
    for (value, pair) in values.iter_mut().zip(raw.chunks_exact(2)) {
        *value = ((pair[1] as u16) << 8) | pair[0] as u16;
    }
}

fn pack_elements(values: &[u16]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| [lo_part!(*v), hi_part!(*v)])
        .collect()
}

impl Drop for S7Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_normalization() {
        assert_eq!(normalize_area(S7_AREA_DB, S7_WL_BYTE, 10), Ok((S7_WL_BYTE, 10, 1)));
        assert_eq!(normalize_area(S7_AREA_DB, S7_WL_REAL, 3), Ok((S7_WL_BYTE, 12, 1)));
        assert_eq!(normalize_area(S7_AREA_MK, S7_WL_WORD, 4), Ok((S7_WL_BYTE, 8, 1)));
        assert_eq!(normalize_area(S7_AREA_DB, S7_WL_BIT, 99), Ok((S7_WL_BIT, 1, 1)));
        assert_eq!(normalize_area(S7_AREA_CT, S7_WL_BYTE, 5), Ok((S7_WL_COUNTER, 5, 2)));
        assert_eq!(normalize_area(S7_AREA_TM, S7_WL_BYTE, 5), Ok((S7_WL_TIMER, 5, 2)));
        assert_eq!(normalize_area(S7_AREA_DB, 0x42, 5), Err(S7Error::CliInvalidWordLen));
    }

    #[test]
    fn addresses_and_transport_sizes() {
        assert_eq!(wire_address(S7_WL_BYTE, 10), Ok(80));
        assert_eq!(wire_address(S7_WL_BIT, 363), Ok(363));
        assert_eq!(wire_address(S7_WL_TIMER, 7), Ok(7));
        assert_eq!(wire_address(S7_WL_BIT, 0xFF_FFFF), Ok(0xFF_FFFF));
        assert_eq!(wire_address(S7_WL_BYTE, 0x1F_FFFF), Ok(0xFF_FFF8));
        assert_eq!(transport_size(S7_WL_BIT), TS_RES_BIT);
        assert_eq!(transport_size(S7_WL_COUNTER), TS_RES_OCTET);
        assert_eq!(transport_size(S7_WL_BYTE), TS_RES_BYTE);
    }

    #[test]
    fn addresses_beyond_24_bits_are_refused() {
        assert_eq!(wire_address(S7_WL_BIT, 0x100_0000), Err(S7Error::CliInvalidParams));
        assert_eq!(wire_address(S7_WL_BYTE, 0x20_0000), Err(S7Error::CliInvalidParams));
        assert_eq!(wire_address(S7_WL_BYTE, u32::MAX), Err(S7Error::CliInvalidParams));
        assert_eq!(bit_start(71, 4), Ok(572));
        assert_eq!(bit_start(71, 8), Err(S7Error::CliInvalidParams));
        assert_eq!(bit_start(600_000_000, 1), Err(S7Error::CliInvalidParams));
        assert_eq!(bit_start(u32::MAX / 8, 7), Ok(u32::MAX));
        assert_eq!(bit_start(u32::MAX / 8 + 1, 0), Err(S7Error::CliInvalidParams));
    }

    #[test]
    fn huge_addresses_do_not_reach_the_wire() {
        let mut cli = S7Client::new();
        assert_eq!(cli.read_bit(S7_AREA_DB, 1, 600_000_000, 1), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.write_bit(S7_AREA_MK, 0, u32::MAX, 7, true), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.last_error(), S7Error::CliInvalidParams.code());
        let mut buf = [0u8; 4];
        assert_eq!(cli.db_read(1, 0x20_0000, &mut buf), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.db_write(1, u32::MAX, &buf), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.ct_read(0x100_0000, &mut [0u16; 1]), Err(S7Error::CliInvalidParams));
    }

    #[test]
    fn timer_elements_are_swapped() {
        let raw = [0x01, 0x23, 0x45, 0x67];
        let mut values = [0u16; 2];
        unpack_elements(&raw, &mut values);
        assert_eq!(values, [0x2301, 0x6745]);
        assert_eq!(pack_elements(&values), raw.to_vec());
    }

    #[test]
    fn rw_request_layout() {
        let mut cli = S7Client::new();
        cli.build_rw_request(0x04, S7_AREA_DB, 0x1234, 10, 4, S7_WL_BYTE, READ_REQ_LEN)
            .unwrap();
        assert_eq!(
            &cli.pdu[..READ_REQ_LEN],
            &[
                0x03, 0x00, 0x00, 0x1f, 0x02, 0xf0, 0x80, 0x32, 0x01, 0x00, 0x00, 0x05, 0x00, 0x00,
                0x0e, 0x00, 0x00, 0x04, 0x01, 0x12, 0x0a, 0x10, 0x02, 0x00, 0x04, 0x12, 0x34, 0x84,
                0x00, 0x00, 0x50
            ]
        );
        // DB number is only meaningful for the DB area
        cli.build_rw_request(0x04, S7_AREA_MK, 0x1234, 0, 1, S7_WL_BIT, READ_REQ_LEN)
            .unwrap();
        assert_eq!(&cli.pdu[25..28], &[0x00, 0x00, S7_AREA_MK]);
    }

    #[test]
    fn not_connected() {
        let mut cli = S7Client::new();
        let mut buf = [0u8; 4];
        assert_eq!(cli.db_read(1, 0, &mut buf), Err(S7Error::TcpNotConnected));
        assert_eq!(cli.last_error(), S7Error::TcpNotConnected.code());
        assert_eq!(cli.last_time(), 0.0);
        assert_eq!(cli.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn invalid_bit_index() {
        let mut cli = S7Client::new();
        assert_eq!(cli.read_bit(S7_AREA_DB, 1, 0, 8), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.write_bit(S7_AREA_DB, 1, 0, 9, true), Err(S7Error::CliInvalidParams));
    }

    #[test]
    fn params() {
        let mut cli = S7Client::new();
        cli.set_param(Param::RemotePort, 1102).unwrap();
        assert_eq!(cli.get_param(Param::RemotePort), 1102);
        cli.set_param(Param::PduRequest, 2000).unwrap();
        assert_eq!(cli.requested_pdu_length(), 960);
        cli.set_param(Param::RecvTimeout, 150).unwrap();
        assert_eq!(cli.get_param(Param::RecvTimeout), 150);
        assert_eq!(cli.set_param(Param::RemotePort, 70000), Err(S7Error::CliInvalidParams));
        assert_eq!(cli.set_param(Param::SendTimeout, 0), Err(S7Error::CliInvalidParams));
        cli.set_pdu_size_requested(100);
        assert_eq!(cli.requested_pdu_length(), 240);
    }
}
