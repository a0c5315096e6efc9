#![doc = include_str!("../README.md")]

pub mod address;
pub mod client;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
mod iso;
pub mod multivar;
pub mod szl;
mod transport;

pub use address::{S7Address, S7AddressKind};
pub use client::{
    ConnectionState, S7Client,
    CT_PG, CT_OP, CT_S7,
    S7_AREA_PE, S7_AREA_PA, S7_AREA_MK, S7_AREA_DB, S7_AREA_CT, S7_AREA_TM,
    S7_WL_BIT, S7_WL_BYTE, S7_WL_CHAR, S7_WL_WORD, S7_WL_INT, S7_WL_DWORD, S7_WL_DINT, S7_WL_REAL,
    S7_WL_COUNTER, S7_WL_TIMER,
};
pub use config::{ClientConfig, Param};
pub use control::{
    encode_password, CpuStatus, S7BlockInfo,
    BLOCK_OB, BLOCK_DB, BLOCK_SDB, BLOCK_FC, BLOCK_SFC, BLOCK_FB, BLOCK_SFB,
};
pub use error::{cpu_error, error_text, ErrorFamily, S7Error};
pub use multivar::{S7DataItem, S7MultiVar, S7Tag, MAX_VARS};
pub use szl::{S7CpInfo, S7CpuInfo, S7OrderCode, S7Protection, S7Szl, SzlHeader};
