// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! ### S7 data types codec
//!
//! Helpers to extract and insert S7 typed values from/into byte buffers read from
//! (or to be written to) the PLC. All functions work at a given byte position and follow
//! the S7 conventions (big-endian, BCD dates and so on).
//!
//! Out of range positions panic like ordinary slice indexing, so size your buffers
//! according to the PLC data layout.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::client::{
    S7_WL_BIT, S7_WL_BYTE, S7_WL_CHAR, S7_WL_COUNTER, S7_WL_DINT, S7_WL_DWORD, S7_WL_INT,
    S7_WL_REAL, S7_WL_TIMER, S7_WL_WORD,
};

/// 100 ns ticks between 0001-01-01 00:00:00 and 1970-01-01 00:00:00
pub const LDT_BIAS: i64 = 621_355_968_000_000_000;

const BIT_MASK: [u8; 8] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];
const TICKS_PER_SECOND: i64 = 10_000_000;
const MS_PER_DAY: i64 = 86_400_000;

fn epoch_0001() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

fn epoch_1990() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default()
}

/// ### Size in bytes of one element of the given word length
///
/// Returns 0 for unknown word lengths.
pub fn data_size_byte(word_len: u8) -> usize {
    match word_len {
        S7_WL_BIT | S7_WL_BYTE | S7_WL_CHAR => 1, // a bit travels in a whole byte
        S7_WL_WORD | S7_WL_INT => 2,
        S7_WL_DWORD | S7_WL_DINT | S7_WL_REAL => 4,
        S7_WL_COUNTER | S7_WL_TIMER => 2,
        _ => 0,
    }
}

pub fn bcd_to_byte(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

pub fn byte_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

// Bit

/// Gets the bit `bit` (clamped into 0..7) of the byte at `pos`
pub fn get_bit_at(buffer: &[u8], pos: usize, bit: i32) -> bool {
    let bit = bit.clamp(0, 7) as usize;
    buffer[pos] & BIT_MASK[bit] != 0
}

/// Sets the bit `bit` (clamped into 0..7) of the byte at `pos`, leaving the others unchanged
pub fn set_bit_at(buffer: &mut [u8], pos: usize, bit: i32, value: bool) {
    let bit = bit.clamp(0, 7) as usize;
    if value {
        buffer[pos] |= BIT_MASK[bit];
    } else {
        buffer[pos] &= !BIT_MASK[bit];
    }
}

// 8 bit

pub fn get_sint_at(buffer: &[u8], pos: usize) -> i8 {
    buffer[pos] as i8
}

/// Stores a SInt, values outside -128..127 are clamped
pub fn set_sint_at(buffer: &mut [u8], pos: usize, value: i32) {
    buffer[pos] = value.clamp(i8::MIN as i32, i8::MAX as i32) as i8 as u8;
}

pub fn get_usint_at(buffer: &[u8], pos: usize) -> u8 {
    buffer[pos]
}

pub fn set_usint_at(buffer: &mut [u8], pos: usize, value: u8) {
    buffer[pos] = value;
}

pub fn get_byte_at(buffer: &[u8], pos: usize) -> u8 {
    buffer[pos]
}

pub fn set_byte_at(buffer: &mut [u8], pos: usize, value: u8) {
    buffer[pos] = value;
}

// 16/32/64 bit integers

macro_rules! be_accessors {
    ($get:ident, $set:ident, $t:ty, $n:expr) => {
        pub fn $get(buffer: &[u8], pos: usize) -> $t {
            let mut raw = [0u8; $n];
            raw.copy_from_slice(&buffer[pos..pos + $n]);
            <$t>::from_be_bytes(raw)
        }

        pub fn $set(buffer: &mut [u8], pos: usize, value: $t) {
            buffer[pos..pos + $n].copy_from_slice(&value.to_be_bytes());
        }
    };
}

be_accessors!(get_int_at, set_int_at, i16, 2);
be_accessors!(get_uint_at, set_uint_at, u16, 2);
be_accessors!(get_word_at, set_word_at, u16, 2);
be_accessors!(get_dint_at, set_dint_at, i32, 4);
be_accessors!(get_udint_at, set_udint_at, u32, 4);
be_accessors!(get_dword_at, set_dword_at, u32, 4);
be_accessors!(get_lint_at, set_lint_at, i64, 8);
be_accessors!(get_ulint_at, set_ulint_at, u64, 8);
be_accessors!(get_lword_at, set_lword_at, u64, 8);

// Floats

/// Gets a 32 bit IEEE float (S7 REAL)
pub fn get_real_at(buffer: &[u8], pos: usize) -> f32 {
    f32::from_bits(get_udint_at(buffer, pos))
}

/// Stores a 32 bit IEEE float (S7 REAL)
///
/// The native representation is written with its byte order fully reversed,
/// which on little-endian hosts gives the big-endian layout the PLC expects.
pub fn set_real_at(buffer: &mut [u8], pos: usize, value: f32) {
    let mut raw = value.to_ne_bytes();
    raw.reverse();
    buffer[pos..pos + 4].copy_from_slice(&raw);
}

/// Gets a 64 bit IEEE float (S7 LREAL)
pub fn get_lreal_at(buffer: &[u8], pos: usize) -> f64 {
    f64::from_bits(get_ulint_at(buffer, pos))
}

/// Stores a 64 bit IEEE float (S7 LREAL), see `set_real_at()`
pub fn set_lreal_at(buffer: &mut [u8], pos: usize, value: f64) {
    let mut raw = value.to_ne_bytes();
    raw.reverse();
    buffer[pos..pos + 8].copy_from_slice(&raw);
}

// DATE_AND_TIME

/// ### Gets a S7 DATE_AND_TIME (8 BCD bytes)
///
/// Layout: `YY MM DD hh mm ss ms(2 digits) ms(1 digit)+dow`.
/// Years < 90 belong to the 2000s, the others to the 1900s.
/// An invalid date gives `0001-01-01 00:00:00`.
pub fn get_date_time_at(buffer: &[u8], pos: usize) -> NaiveDateTime {
    let mut year = bcd_to_byte(buffer[pos]) as i32;
    year += if year < 90 { 2000 } else { 1900 };
    let month = bcd_to_byte(buffer[pos + 1]) as u32;
    let day = bcd_to_byte(buffer[pos + 2]) as u32;
    let hour = bcd_to_byte(buffer[pos + 3]) as u32;
    let min = bcd_to_byte(buffer[pos + 4]) as u32;
    let sec = bcd_to_byte(buffer[pos + 5]) as u32;
    let msec = bcd_to_byte(buffer[pos + 6]) as u32 * 10 + bcd_to_byte(buffer[pos + 7]) as u32 / 10;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_milli_opt(hour, min, sec, msec))
        .unwrap_or_else(epoch_0001)
}

/// ### Stores a S7 DATE_AND_TIME (8 BCD bytes)
///
/// Only the two low digits of the year are stored, the representable range is 1990..2089.
/// The last nibble carries the day of week (1 = Sunday).
pub fn set_date_time_at(buffer: &mut [u8], pos: usize, value: NaiveDateTime) {
    let year = (value.year().rem_euclid(100)) as u8;
    let msec = (value.nanosecond() / 1_000_000).min(999);
    let msec_h = (msec / 10) as u8;
    let msec_l = (msec % 10) as u8;
    let dow = value.weekday().number_from_sunday() as u8;

    buffer[pos] = byte_to_bcd(year);
    buffer[pos + 1] = byte_to_bcd(value.month() as u8);
    buffer[pos + 2] = byte_to_bcd(value.day() as u8);
    buffer[pos + 3] = byte_to_bcd(value.hour() as u8);
    buffer[pos + 4] = byte_to_bcd(value.minute() as u8);
    buffer[pos + 5] = byte_to_bcd(value.second() as u8);
    buffer[pos + 6] = byte_to_bcd(msec_h);
    buffer[pos + 7] = byte_to_bcd(msec_l * 10 + dow);
}

// DATE, TIME_OF_DAY, LTOD, LDT, DTL

/// Gets a S7 DATE (days since 1990-01-01)
pub fn get_date_at(buffer: &[u8], pos: usize) -> NaiveDate {
    let days = get_uint_at(buffer, pos) as u64;
    epoch_1990()
        .checked_add_days(chrono::Days::new(days))
        .unwrap_or_default()
}

/// Stores a S7 DATE, dates outside 1990-01-01..=2169-06-06 are saturated
pub fn set_date_at(buffer: &mut [u8], pos: usize, value: NaiveDate) {
    let days = value.signed_duration_since(epoch_1990()).num_days();
    set_uint_at(buffer, pos, u16::try_from(days.max(0)).unwrap_or(u16::MAX));
}

/// Gets a S7 TIME_OF_DAY (ms since midnight), values beyond one day give midnight
pub fn get_tod_at(buffer: &[u8], pos: usize) -> NaiveTime {
    let ms = get_dint_at(buffer, pos) as i64;
    if !(0..MS_PER_DAY).contains(&ms) {
        return NaiveTime::MIN;
    }
    NaiveTime::from_num_seconds_from_midnight_opt((ms / 1000) as u32, ((ms % 1000) * 1_000_000) as u32)
        .unwrap_or(NaiveTime::MIN)
}

pub fn set_tod_at(buffer: &mut [u8], pos: usize, value: NaiveTime) {
    let ms = value.num_seconds_from_midnight() as i64 * 1000 + (value.nanosecond() as i64 / 1_000_000).min(999);
    set_dint_at(buffer, pos, ms as i32);
}

/// Gets a S7-1500 LTOD (ns since midnight), the resolution is 100 ns
pub fn get_ltod_at(buffer: &[u8], pos: usize) -> NaiveTime {
    let ticks = (get_lint_at(buffer, pos) / 100).unsigned_abs();
    let secs = ticks / TICKS_PER_SECOND as u64;
    let nanos = (ticks % TICKS_PER_SECOND as u64) * 100;
    u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos as u32))
        .unwrap_or(NaiveTime::MIN)
}

pub fn set_ltod_at(buffer: &mut [u8], pos: usize, value: NaiveTime) {
    let ticks = value.num_seconds_from_midnight() as i64 * TICKS_PER_SECOND
        + (value.nanosecond() as i64 % 1_000_000_000) / 100;
    set_lint_at(buffer, pos, ticks * 100);
}

/// Gets a S7-1500 LDT (ns since 1970-01-01), the resolution is 100 ns
pub fn get_ldt_at(buffer: &[u8], pos: usize) -> NaiveDateTime {
    let ticks = get_lint_at(buffer, pos) / 100 + LDT_BIAS;
    if ticks < 0 {
        return epoch_0001();
    }
    let delta = TimeDelta::try_seconds(ticks / TICKS_PER_SECOND)
        .map(|d| d + TimeDelta::nanoseconds((ticks % TICKS_PER_SECOND) * 100));
    delta
        .and_then(|d| epoch_0001().checked_add_signed(d))
        .unwrap_or_else(epoch_0001)
}

/// Stores a S7-1500 LDT, values outside 1677..2262 are saturated
pub fn set_ldt_at(buffer: &mut [u8], pos: usize, value: NaiveDateTime) {
    let since = value.signed_duration_since(epoch_0001());
    let ns = since
        .num_seconds()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|ticks| ticks.checked_add(since.subsec_nanos() as i64 / 100))
        .map(|ticks| ticks.saturating_sub(LDT_BIAS).saturating_mul(100))
        .unwrap_or(if since < TimeDelta::zero() { i64::MIN } else { i64::MAX });
    set_lint_at(buffer, pos, ns);
}

/// ### Gets a S7-1200/1500 DTL (12 bytes)
///
/// Layout: `year(2) month day dow hour min sec nanoseconds(4)`.
/// An invalid date gives `0001-01-01 00:00:00`.
pub fn get_dtl_at(buffer: &[u8], pos: usize) -> NaiveDateTime {
    let year = get_uint_at(buffer, pos) as i32;
    let nanos = get_udint_at(buffer, pos + 8);
    NaiveDate::from_ymd_opt(year, buffer[pos + 2] as u32, buffer[pos + 3] as u32)
        .and_then(|d| {
            d.and_hms_nano_opt(
                buffer[pos + 5] as u32,
                buffer[pos + 6] as u32,
                buffer[pos + 7] as u32,
                nanos,
            )
        })
        .unwrap_or_else(epoch_0001)
}

pub fn set_dtl_at(buffer: &mut [u8], pos: usize, value: NaiveDateTime) {
    set_uint_at(buffer, pos, value.year().clamp(0, u16::MAX as i32) as u16);
    buffer[pos + 2] = value.month() as u8;
    buffer[pos + 3] = value.day() as u8;
    buffer[pos + 4] = value.weekday().number_from_sunday() as u8;
    buffer[pos + 5] = value.hour() as u8;
    buffer[pos + 6] = value.minute() as u8;
    buffer[pos + 7] = value.second() as u8;
    set_udint_at(buffer, pos + 8, value.nanosecond().min(999_999_999));
}

// Strings

/// ### Gets a S7 STRING
///
/// Layout: `max_len actual_len chars...`, the characters are decoded as UTF-8.
pub fn get_string_at(buffer: &[u8], pos: usize) -> String {
    let size = buffer[pos + 1] as usize;
    String::from_utf8_lossy(&buffer[pos + 2..pos + 2 + size]).into_owned()
}

/// ### Stores a S7 STRING
///
/// The string is truncated to `max_len` bytes on a char boundary, the bytes after the actual
/// length are untouched.
pub fn set_string_at(buffer: &mut [u8], pos: usize, max_len: u8, value: &str) {
    let bytes = value.as_bytes();
    let size = char_floor(value, bytes.len().min(max_len as usize));
    buffer[pos] = max_len;
    buffer[pos + 1] = size as u8;
    buffer[pos + 2..pos + 2 + size].copy_from_slice(&bytes[..size]);
}

/// Largest char boundary of `value` not above `size`
fn char_floor(value: &str, size: usize) -> usize {
    value
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(value.len()))
        .take_while(|&i| i <= size)
        .last()
        .unwrap_or(0)
}

/// Gets a S7 STRING whose characters are plain ASCII, other bytes become `?`
pub fn get_string_char_at(buffer: &[u8], pos: usize) -> String {
    let size = buffer[pos + 1] as usize;
    buffer[pos + 2..pos + 2 + size]
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// Stores a S7 STRING as ASCII, non ASCII characters are replaced by `?`
pub fn set_string_char_at(buffer: &mut [u8], pos: usize, max_len: u8, value: &str) {
    let size = value.chars().count().min(max_len as usize);
    buffer[pos] = max_len;
    buffer[pos + 1] = size as u8;
    for (i, c) in value.chars().take(size).enumerate() {
        buffer[pos + 2 + i] = if c.is_ascii() { c as u8 } else { b'?' };
    }
}

/// Gets a fixed size array of chars
pub fn get_chars_at(buffer: &[u8], pos: usize, size: usize) -> String {
    String::from_utf8_lossy(&buffer[pos..pos + size]).into_owned()
}

/// Stores a fixed size array of chars, truncated if the buffer has no room enough
pub fn set_chars_at(buffer: &mut [u8], pos: usize, value: &str) {
    let bytes = value.as_bytes();
    let size = char_floor(value, bytes.len().min(buffer.len().saturating_sub(pos)));
    buffer[pos..pos + size].copy_from_slice(&bytes[..size]);
}

// Counters

/// ### Decodes a counter value as read by `ct_read()`
///
/// Counters are 3 BCD digits, the low byte holds the hundreds.
pub fn get_counter(value: u16) -> u16 {
    bcd_to_byte(value as u8) as u16 * 100 + bcd_to_byte((value >> 8) as u8) as u16
}

/// Encodes a counter value (0..999) to be written with `ct_write()`
pub fn to_counter(value: u16) -> u16 {
    let value = value.min(999);
    byte_to_bcd((value / 100) as u8) as u16 + ((byte_to_bcd((value % 100) as u8) as u16) << 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
    }

    #[test]
    fn data_sizes() {
        assert_eq!(data_size_byte(S7_WL_BIT), 1);
        assert_eq!(data_size_byte(S7_WL_BYTE), 1);
        assert_eq!(data_size_byte(S7_WL_CHAR), 1);
        assert_eq!(data_size_byte(S7_WL_WORD), 2);
        assert_eq!(data_size_byte(S7_WL_INT), 2);
        assert_eq!(data_size_byte(S7_WL_DWORD), 4);
        assert_eq!(data_size_byte(S7_WL_DINT), 4);
        assert_eq!(data_size_byte(S7_WL_REAL), 4);
        assert_eq!(data_size_byte(S7_WL_COUNTER), 2);
        assert_eq!(data_size_byte(S7_WL_TIMER), 2);
        assert_eq!(data_size_byte(0x00), 0);
        assert_eq!(data_size_byte(0x09), 0);
        assert_eq!(data_size_byte(0xFF), 0);
    }

    #[test]
    fn bits_are_clamped() {
        let mut buf = [0u8; 2];
        set_bit_at(&mut buf, 1, 12, true);
        assert_eq!(buf[1], 0x80);
        set_bit_at(&mut buf, 1, -3, true);
        assert_eq!(buf[1], 0x81);
        assert!(get_bit_at(&buf, 1, 100));
        assert!(get_bit_at(&buf, 1, -1));
        set_bit_at(&mut buf, 1, 7, false);
        assert_eq!(buf[1], 0x01);
        assert_eq!(buf[0], 0x00);
    }

    #[test]
    fn sint_is_clamped() {
        let mut buf = [0u8; 1];
        set_sint_at(&mut buf, 0, 300);
        assert_eq!(get_sint_at(&buf, 0), 127);
        set_sint_at(&mut buf, 0, -1000);
        assert_eq!(get_sint_at(&buf, 0), -128);
        set_sint_at(&mut buf, 0, -5);
        assert_eq!(buf[0], 0xFB);
    }

    #[test]
    fn integers_are_big_endian() {
        let mut buf = [0u8; 8];
        set_int_at(&mut buf, 0, -2);
        assert_eq!(&buf[..2], &[0xFF, 0xFE]);
        set_dword_at(&mut buf, 2, 0x1122_3344);
        assert_eq!(&buf[2..6], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(get_word_at(&buf, 2), 0x1122);
        set_lint_at(&mut buf, 0, 0x0102_0304_0506_0708);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn real_layout() {
        let mut buf = [0u8; 4];
        set_real_at(&mut buf, 0, 1.0);
        if cfg!(target_endian = "little") {
            assert_eq!(buf, [0x3F, 0x80, 0x00, 0x00]);
        }
        assert_eq!(get_real_at(&[0x42, 0x28, 0x00, 0x00], 0), 42.0);
        assert_eq!(get_lreal_at(&[0x40, 0x45, 0, 0, 0, 0, 0, 0], 0), 42.0);
    }

    #[test]
    fn bcd_date_time() {
        let mut buf = [0u8; 8];
        // 2025-03-09 was a Sunday
        set_date_time_at(&mut buf, 0, dt(2025, 3, 9, 14, 5, 59, 123));
        assert_eq!(buf, [0x25, 0x03, 0x09, 0x14, 0x05, 0x59, 0x12, 0x31]);
        assert_eq!(get_date_time_at(&buf, 0), dt(2025, 3, 9, 14, 5, 59, 123));

        set_date_time_at(&mut buf, 0, dt(1995, 12, 31, 23, 59, 0, 0));
        assert_eq!(buf[0], 0x95);
        assert_eq!(get_date_time_at(&buf, 0).year(), 1995);
    }

    #[test]
    fn invalid_date_time_gives_default() {
        let buf = [0x25, 0x13, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(get_date_time_at(&buf, 0), epoch_0001());
        assert_eq!(epoch_0001().year(), 1);
    }

    #[test]
    fn dates_and_times() {
        let mut buf = [0u8; 8];
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        set_date_at(&mut buf, 0, day);
        assert_eq!(get_date_at(&buf, 0), day);

        let tod = NaiveTime::from_hms_milli_opt(12, 34, 56, 789).unwrap();
        set_tod_at(&mut buf, 0, tod);
        assert_eq!(get_dint_at(&buf, 0), 45_296_789);
        assert_eq!(get_tod_at(&buf, 0), tod);

        set_dint_at(&mut buf, 0, -1);
        assert_eq!(get_tod_at(&buf, 0), NaiveTime::MIN);

        let ltod = NaiveTime::from_hms_nano_opt(1, 2, 3, 456_789_100).unwrap();
        set_ltod_at(&mut buf, 0, ltod);
        assert_eq!(get_lint_at(&buf, 0), 3_723_456_789_100);
        assert_eq!(get_ltod_at(&buf, 0), ltod);
    }

    #[test]
    fn ldt_uses_tick_bias() {
        let mut buf = [0u8; 8];
        let unix = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        set_ldt_at(&mut buf, 0, unix);
        assert_eq!(get_lint_at(&buf, 0), 0);

        let value = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_nano_opt(8, 30, 0, 123_456_700)
            .unwrap();
        set_ldt_at(&mut buf, 0, value);
        assert_eq!(get_ldt_at(&buf, 0), value);
    }

    #[test]
    fn dtl_layout() {
        let mut buf = [0u8; 12];
        let value = NaiveDate::from_ymd_opt(2021, 11, 5)
            .unwrap()
            .and_hms_nano_opt(7, 8, 9, 500_000_000)
            .unwrap();
        set_dtl_at(&mut buf, 0, value);
        assert_eq!(&buf[..8], &[0x07, 0xE5, 11, 5, 6, 7, 8, 9]);
        assert_eq!(get_dtl_at(&buf, 0), value);
    }

    #[test]
    fn strings() {
        let mut buf = [0u8; 12];
        set_string_at(&mut buf, 0, 10, "hello");
        assert_eq!(&buf[..7], &[10, 5, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(get_string_at(&buf, 0), "hello");

        set_string_at(&mut buf, 0, 3, "truncated");
        assert_eq!(get_string_at(&buf, 0), "tru");

        set_string_char_at(&mut buf, 0, 10, "pé");
        assert_eq!(get_string_char_at(&buf, 0), "p?");
    }

    #[test]
    fn chars_are_truncated_to_buffer() {
        let mut buf = [0u8; 4];
        set_chars_at(&mut buf, 1, "ABCDEF");
        assert_eq!(&buf, b"\0ABC");
        assert_eq!(get_chars_at(&buf, 1, 3), "ABC");
    }

    #[test]
    fn out_of_range_dates_saturate() {
        let mut buf = [0u8; 8];
        set_date_at(&mut buf, 0, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
        assert_eq!(get_uint_at(&buf, 0), 0);
        set_date_at(&mut buf, 0, NaiveDate::from_ymd_opt(2200, 1, 1).unwrap());
        assert_eq!(get_uint_at(&buf, 0), u16::MAX);
        let day = NaiveDate::from_ymd_opt(2100, 6, 1).unwrap();
        set_date_at(&mut buf, 0, day);
        assert_eq!(get_date_at(&buf, 0), day);

        set_ldt_at(&mut buf, 0, NaiveDateTime::MAX);
        assert_eq!(get_lint_at(&buf, 0), i64::MAX);
        set_ldt_at(&mut buf, 0, NaiveDateTime::MIN);
        assert_eq!(get_lint_at(&buf, 0), i64::MIN);
        set_ldt_at(&mut buf, 0, dt(1500, 1, 1, 0, 0, 0, 0));
        assert_eq!(get_lint_at(&buf, 0), i64::MIN);
    }

    #[test]
    fn strings_are_cut_on_char_boundaries() {
        let mut buf = [0u8; 12];
        // 'è' takes two bytes
        set_string_at(&mut buf, 0, 2, "aè");
        assert_eq!(buf[1], 1);
        assert_eq!(get_string_at(&buf, 0), "a");
        set_string_at(&mut buf, 0, 3, "aèb");
        assert_eq!(get_string_at(&buf, 0), "aè");

        let mut chars = [0u8; 3];
        set_chars_at(&mut chars, 0, "abè");
        assert_eq!(&chars, b"ab\0");
    }

    #[test]
    fn counters() {
        assert_eq!(to_counter(123), 0x2301);
        assert_eq!(get_counter(0x2301), 123);
        assert_eq!(get_counter(to_counter(999)), 999);
        assert_eq!(get_counter(to_counter(0)), 0);
    }
}
