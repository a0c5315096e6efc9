// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::time::Duration;

use crate::client::CT_PG;
use crate::error::S7Error;

pub const DEFAULT_PORT: u16 = 102;
pub const DEFAULT_PDU_REQUEST: u16 = 480;
pub const MIN_PDU_REQUEST: u16 = 240;
pub const MAX_PDU_REQUEST: u16 = 960;

/// ### Connection parameters
///
/// Everything here can be changed before connecting; changes made while connected
/// are used from the next `connect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// TCP port (default 102)
    pub port: u16,
    /// Reachability ping and TCP connect timeout (default 1000 ms)
    pub connect_timeout: Duration,
    /// Receive timeout (default 2000 ms)
    pub read_timeout: Duration,
    /// Send timeout (default 2000 ms)
    pub write_timeout: Duration,
    /// PDU size proposed to the CPU, clamped into 240..=960 (default 480)
    pub pdu_request: u16,
    /// Connection type: `CT_PG`, `CT_OP` or `CT_S7` (default `CT_PG`)
    pub connection_type: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(1000),
            read_timeout: Duration::from_millis(2000),
            write_timeout: Duration::from_millis(2000),
            pdu_request: DEFAULT_PDU_REQUEST,
            connection_type: CT_PG,
        }
    }
}

impl ClientConfig {
    /// Returns the config with the PDU request clamped into the allowed range.
    pub fn normalized(mut self) -> Self {
        self.pdu_request = clamp_pdu_request(self.pdu_request);
        self
    }
}

pub(crate) fn clamp_pdu_request(value: u16) -> u16 {
    value.clamp(MIN_PDU_REQUEST, MAX_PDU_REQUEST)
}

/// ### Numeric connection parameters
///
/// Compatible with the Snap7 parameter numbers, see `S7Client::set_param()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// TCP port
    RemotePort,
    /// Connect timeout (ms)
    PingTimeout,
    /// Send timeout (ms)
    SendTimeout,
    /// Receive timeout (ms)
    RecvTimeout,
    /// Requested PDU size
    PduRequest,
}

impl Param {
    pub fn number(&self) -> i32 {
        match self {
            Param::RemotePort => 2,
            Param::PingTimeout => 3,
            Param::SendTimeout => 4,
            Param::RecvTimeout => 5,
            Param::PduRequest => 10,
        }
    }

    pub fn from_number(number: i32) -> Result<Param, S7Error> {
        match number {
            2 => Ok(Param::RemotePort),
            3 => Ok(Param::PingTimeout),
            4 => Ok(Param::SendTimeout),
            5 => Ok(Param::RecvTimeout),
            10 => Ok(Param::PduRequest),
            _ => Err(S7Error::CliInvalidParamNumber),
        }
    }
}
