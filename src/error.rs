// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use thiserror::Error;

/// ### Error family
///
/// Errors are grouped in four families; the family decides whether the
/// connection survives the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
    /// Socket level: creation, connect, send, receive, reset.
    Transport,
    /// ISO-on-TCP (RFC1006/COTP) envelope.
    Iso,
    /// Client side validation and protocol handling.
    Client,
    /// Errors reported by the CPU inside a valid answer.
    Cpu,
}

/// ### S7 Client errors
///
/// Every variant carries a stable numeric code (see `code()`), so the error can be stored,
/// compared or printed through `error_text()` like any Snap7-style client does.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S7Error {
    // Transport
    #[error("TCP : Socket creation error")]
    TcpSocketCreation,
    #[error("TCP : Connection timeout")]
    TcpConnectionTimeout,
    #[error("TCP : Connection error")]
    TcpConnectionFailed,
    #[error("TCP : Data receive timeout")]
    TcpReceiveTimeout,
    #[error("TCP : Error receiving data")]
    TcpDataReceive,
    #[error("TCP : Data send timeout")]
    TcpSendTimeout,
    #[error("TCP : Error sending data")]
    TcpDataSend,
    #[error("TCP : Connection reset by the peer")]
    TcpConnectionReset,
    #[error("CLI : Client not connected")]
    TcpNotConnected,
    #[error("TCP : Unreachable host")]
    TcpUnreachableHost,

    // ISO
    #[error("ISO : Connection error")]
    IsoConnect,
    #[error("ISO : Invalid PDU received")]
    IsoInvalidPdu,
    #[error("ISO : Invalid buffer passed to send/receive")]
    IsoInvalidDataSize,

    // Client
    #[error("CLI : Error during PDU negotiation")]
    CliNegotiatingPdu,
    #[error("CLI : Invalid parameter")]
    CliInvalidParams,
    #[error("CLI : Too many items (>20) in multi read/write")]
    CliTooManyItems,
    #[error("CLI : Invalid word length")]
    CliInvalidWordLen,
    #[error("CLI : Data size exceeds the negotiated PDU size")]
    CliSizeOverPdu,
    #[error("CLI : Invalid CPU answer")]
    CliInvalidPlcAnswer,
    #[error("CLI : Cannot start the PLC")]
    CliCannotStartPlc,
    #[error("CLI : PLC already in RUN")]
    CliAlreadyRun,
    #[error("CLI : Cannot stop the PLC")]
    CliCannotStopPlc,
    #[error("CLI : PLC already in STOP")]
    CliAlreadyStop,
    #[error("CLI : Invalid data size received")]
    CliInvalidDataSizeRecvd,
    #[error("CLI : Buffer too small")]
    CliBufferTooSmall,
    #[error("CLI : Function refused by the CPU (unknown error)")]
    CliFunctionRefused,
    #[error("CLI : Invalid parameter number")]
    CliInvalidParamNumber,
    #[error("CLI : Function not implemented")]
    CliFunctionNotImplemented,

    // CPU
    #[error("CPU : Address out of range")]
    CpuAddressOutOfRange,
    #[error("CPU : Invalid transport size")]
    CpuInvalidTransportSize,
    #[error("CPU : Data size mismatch")]
    CpuWriteDataSizeMismatch,
    #[error("CPU : Item not available")]
    CpuItemNotAvailable,
    #[error("CPU : Invalid value supplied")]
    CpuInvalidValue,
    #[error("CPU : Function not available")]
    CpuFunNotAvailable,
    #[error("CPU : Function not authorized for current protection level")]
    CpuNeedPassword,
    #[error("CPU : Invalid password")]
    CpuInvalidPassword,
    #[error("CPU : No password to set or clear")]
    CpuNoPasswordToSetOrClear,
}

const ALL: [S7Error; 37] = [
    S7Error::TcpSocketCreation,
    S7Error::TcpConnectionTimeout,
    S7Error::TcpConnectionFailed,
    S7Error::TcpReceiveTimeout,
    S7Error::TcpDataReceive,
    S7Error::TcpSendTimeout,
    S7Error::TcpDataSend,
    S7Error::TcpConnectionReset,
    S7Error::TcpNotConnected,
    S7Error::TcpUnreachableHost,
    S7Error::IsoConnect,
    S7Error::IsoInvalidPdu,
    S7Error::IsoInvalidDataSize,
    S7Error::CliNegotiatingPdu,
    S7Error::CliInvalidParams,
    S7Error::CliTooManyItems,
    S7Error::CliInvalidWordLen,
    S7Error::CliSizeOverPdu,
    S7Error::CliInvalidPlcAnswer,
    S7Error::CliCannotStartPlc,
    S7Error::CliAlreadyRun,
    S7Error::CliCannotStopPlc,
    S7Error::CliAlreadyStop,
    S7Error::CliInvalidDataSizeRecvd,
    S7Error::CliBufferTooSmall,
    S7Error::CliFunctionRefused,
    S7Error::CliInvalidParamNumber,
    S7Error::CliFunctionNotImplemented,
    S7Error::CpuAddressOutOfRange,
    S7Error::CpuInvalidTransportSize,
    S7Error::CpuWriteDataSizeMismatch,
    S7Error::CpuItemNotAvailable,
    S7Error::CpuInvalidValue,
    S7Error::CpuFunNotAvailable,
    S7Error::CpuNeedPassword,
    S7Error::CpuInvalidPassword,
    S7Error::CpuNoPasswordToSetOrClear,
];

impl S7Error {
    /// ### Numeric error code
    ///
    /// Codes are stable and compatible with the Snap7 error table:
    /// - `0x0000_FFFF` mask: TCP errors
    /// - `0x000F_0000` mask: ISO errors
    /// - `0xFFF0_0000` mask: Client / CPU errors
    pub fn code(&self) -> u32 {
        match self {
            S7Error::TcpSocketCreation => 0x0000_0001,
            S7Error::TcpConnectionTimeout => 0x0000_0002,
            S7Error::TcpConnectionFailed => 0x0000_0003,
            S7Error::TcpReceiveTimeout => 0x0000_0004,
            S7Error::TcpDataReceive => 0x0000_0005,
            S7Error::TcpSendTimeout => 0x0000_0006,
            S7Error::TcpDataSend => 0x0000_0007,
            S7Error::TcpConnectionReset => 0x0000_0008,
            S7Error::TcpNotConnected => 0x0000_0009,
            S7Error::TcpUnreachableHost => 0x0000_2751,
            S7Error::IsoConnect => 0x0001_0000,
            S7Error::IsoInvalidPdu => 0x0003_0000,
            S7Error::IsoInvalidDataSize => 0x0004_0000,
            S7Error::CliNegotiatingPdu => 0x0010_0000,
            S7Error::CliInvalidParams => 0x0020_0000,
            S7Error::CliTooManyItems => 0x0040_0000,
            S7Error::CliInvalidWordLen => 0x0050_0000,
            S7Error::CliSizeOverPdu => 0x0070_0000,
            S7Error::CliInvalidPlcAnswer => 0x0080_0000,
            S7Error::CpuAddressOutOfRange => 0x0090_0000,
            S7Error::CpuInvalidTransportSize => 0x00A0_0000,
            S7Error::CpuWriteDataSizeMismatch => 0x00B0_0000,
            S7Error::CpuItemNotAvailable => 0x00C0_0000,
            S7Error::CpuInvalidValue => 0x00D0_0000,
            S7Error::CliCannotStartPlc => 0x00E0_0000,
            S7Error::CliAlreadyRun => 0x00F0_0000,
            S7Error::CliCannotStopPlc => 0x0100_0000,
            S7Error::CliAlreadyStop => 0x0130_0000,
            S7Error::CpuFunNotAvailable => 0x0140_0000,
            S7Error::CliInvalidDataSizeRecvd => 0x0160_0000,
            S7Error::CpuNeedPassword => 0x01D0_0000,
            S7Error::CpuInvalidPassword => 0x01E0_0000,
            S7Error::CpuNoPasswordToSetOrClear => 0x01F0_0000,
            S7Error::CliBufferTooSmall => 0x0220_0000,
            S7Error::CliFunctionRefused => 0x0230_0000,
            S7Error::CliInvalidParamNumber => 0x0250_0000,
            S7Error::CliFunctionNotImplemented => 0x0270_0000,
        }
    }

    /// Looks up the error matching a numeric code, `None` for 0 or unknown codes.
    pub fn from_code(code: u32) -> Option<S7Error> {
        ALL.iter().copied().find(|e| e.code() == code)
    }

    pub fn family(&self) -> ErrorFamily {
        let code = self.code();
        if code & 0x0000_FFFF != 0 {
            ErrorFamily::Transport
        } else if code & 0x000F_0000 != 0 {
            ErrorFamily::Iso
        } else {
            match self {
                S7Error::CpuAddressOutOfRange
                | S7Error::CpuInvalidTransportSize
                | S7Error::CpuWriteDataSizeMismatch
                | S7Error::CpuItemNotAvailable
                | S7Error::CpuInvalidValue
                | S7Error::CpuFunNotAvailable
                | S7Error::CpuNeedPassword
                | S7Error::CpuInvalidPassword
                | S7Error::CpuNoPasswordToSetOrClear => ErrorFamily::Cpu,
                _ => ErrorFamily::Client,
            }
        }
    }

    /// ### Tells if the error invalidates the session
    ///
    /// Transport and ISO errors leave the socket in an unknown state, the client drops
    /// the connection and a new handshake is needed.
    /// Client and CPU errors are reported inside a valid answer and the session remains usable.
    pub fn closes_connection(&self) -> bool {
        matches!(self.family(), ErrorFamily::Transport | ErrorFamily::Iso)
    }
}

/// ### Returns a human readable text for an error code
///
/// `0` gives `"OK"`, unknown codes give `"Unknown error (0x........)"`.
pub fn error_text(code: u32) -> String {
    if code == 0 {
        return "OK".to_string();
    }
    match S7Error::from_code(code) {
        Some(err) => err.to_string(),
        None => format!("Unknown error (0x{:08X})", code),
    }
}

// CPU return codes
pub(crate) const CODE_OK: u16 = 0x0000;
pub(crate) const CODE_ADDRESS_OUT_OF_RANGE: u16 = 0x0005;
pub(crate) const CODE_INVALID_TRANSPORT_SIZE: u16 = 0x0006;
pub(crate) const CODE_WRITE_DATA_SIZE_MISMATCH: u16 = 0x0007;
pub(crate) const CODE_RES_ITEM_NOT_AVAILABLE: u16 = 0x000A;
pub(crate) const CODE_RES_ITEM_NOT_AVAILABLE1: u16 = 0xD209;
pub(crate) const CODE_INVALID_VALUE: u16 = 0xDC01;
pub(crate) const CODE_NEED_PASSWORD: u16 = 0xD241;
pub(crate) const CODE_INVALID_PASSWORD: u16 = 0xD602;
pub(crate) const CODE_NO_PASSWORD_TO_CLEAR: u16 = 0xD604;
pub(crate) const CODE_NO_PASSWORD_TO_SET: u16 = 0xD605;
pub(crate) const CODE_FUN_NOT_AVAILABLE: u16 = 0x8104;
pub(crate) const CODE_DATA_OVER_PDU: u16 = 0x8500;

/// ### Maps a CPU return code to the client error set
///
/// The mapping is total: anything not recognized is reported as `CliFunctionRefused`.
pub fn cpu_error(code: u16) -> Result<(), S7Error> {
    let err = match code {
        CODE_OK => return Ok(()),
        CODE_ADDRESS_OUT_OF_RANGE => S7Error::CpuAddressOutOfRange,
        CODE_INVALID_TRANSPORT_SIZE => S7Error::CpuInvalidTransportSize,
        CODE_WRITE_DATA_SIZE_MISMATCH => S7Error::CpuWriteDataSizeMismatch,
        CODE_RES_ITEM_NOT_AVAILABLE | CODE_RES_ITEM_NOT_AVAILABLE1 => S7Error::CpuItemNotAvailable,
        CODE_DATA_OVER_PDU => S7Error::CliSizeOverPdu,
        CODE_INVALID_VALUE => S7Error::CpuInvalidValue,
        CODE_FUN_NOT_AVAILABLE => S7Error::CpuFunNotAvailable,
        CODE_NEED_PASSWORD => S7Error::CpuNeedPassword,
        CODE_INVALID_PASSWORD => S7Error::CpuInvalidPassword,
        CODE_NO_PASSWORD_TO_CLEAR | CODE_NO_PASSWORD_TO_SET => S7Error::CpuNoPasswordToSetOrClear,
        _ => S7Error::CliFunctionRefused,
    };
    Err(err)
}

/// Error of a data item whose return code is not "success" (0xFF).
pub(crate) fn cpu_item_error(code: u8) -> S7Error {
    cpu_error(code as u16).err().unwrap_or(S7Error::CliFunctionRefused)
}
