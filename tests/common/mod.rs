// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! In-process S7 PLC simulator used by the integration tests.
//!
//! It speaks just enough ISO-on-TCP/S7 to answer the client jobs: connection request,
//! PDU negotiation, read/write var, control, SZL, clock, password and block info.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use s7client::{S7Client, S7_AREA_CT, S7_AREA_TM, S7_WL_BIT, S7_WL_COUNTER, S7_WL_TIMER};

pub const PASSWORD_OK: &str = "SECRET";

/// Routes the client logs to the test output, `RUST_LOG=s7client=trace` shows the telegrams
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct PlcOptions {
    /// Largest PDU the simulator accepts
    pub max_pdu: u16,
    /// Answers the connection request with a non-CC telegram
    pub refuse_iso: bool,
    /// Items addressing this (area, db) fail with "address out of range"
    pub fail_area: Option<(u8, u16)>,
    /// Sends an empty COTP packet before every answer
    pub send_ack_first: bool,
    /// Max SZL bytes per answer slice
    pub szl_slice: usize,
    /// Answers a multi read with one item less than requested
    pub drop_multi_item: bool,
    pub running: bool,
    /// Raw status byte returned by the status SZL
    pub status_byte: Option<u8>,
    /// Encoded password expected by the CPU, `None` if not protected
    pub password: Option<[u8; 8]>,
    /// MC7 size of the DBs known to block info
    pub db_sizes: HashMap<u16, u16>,
}

impl Default for PlcOptions {
    fn default() -> Self {
        PlcOptions {
            max_pdu: 480,
            refuse_iso: false,
            fail_area: None,
            send_ack_first: false,
            szl_slice: 400,
            drop_multi_item: false,
            running: true,
            status_byte: None,
            password: Some(s7client::encode_password(PASSWORD_OK)),
            db_sizes: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PlcState {
    /// (area, db) -> memory
    pub memory: HashMap<(u8, u16), Vec<u8>>,
    /// Every S7 telegram received, TPKT header included
    pub requests: Vec<Vec<u8>>,
    /// SZL records: (id, index) -> (length_dr, n_dr, data)
    pub szl: HashMap<(u16, u16), (u16, u16, Vec<u8>)>,
    /// BCD clock (8 bytes)
    pub clock: [u8; 8],
    pub clock_century: u8,
    pub logged_in: bool,
    pub connections: usize,
    /// Remote TSAP of the last connection request
    pub remote_tsap: u16,
    pub running: bool,
}

impl PlcState {
    pub fn area(&mut self, area: u8, db: u16) -> &mut Vec<u8> {
        self.memory.entry((area, db)).or_default()
    }

    pub fn write(&mut self, area: u8, db: u16, offset: usize, data: &[u8]) {
        let mem = self.area(area, db);
        if mem.len() < offset + data.len() {
            mem.resize(offset + data.len(), 0);
        }
        mem[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read(&mut self, area: u8, db: u16, offset: usize, size: usize) -> Vec<u8> {
        let mem = self.area(area, db);
        if mem.len() < offset + size {
            mem.resize(offset + size, 0);
        }
        mem[offset..offset + size].to_vec()
    }

    /// Requests with the given S7 function code (job telegrams only)
    pub fn jobs(&self, function: u8) -> usize {
        self.requests
            .iter()
            .filter(|r| r.len() > 17 && r[8] == 0x01 && r[17] == function)
            .count()
    }
}

pub struct FakePlc {
    pub port: u16,
    pub state: Arc<Mutex<PlcState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakePlc {
    pub fn start() -> FakePlc {
        FakePlc::with_options(PlcOptions::default())
    }

    pub fn with_options(options: PlcOptions) -> FakePlc {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").expect("simulator should bind");
        let port = listener.local_addr().expect("local addr should be available").port();
        let state = Arc::new(Mutex::new(PlcState {
            clock: [0x25, 0x03, 0x09, 0x14, 0x05, 0x59, 0x12, 0x31],
            clock_century: 0x20,
            running: options.running,
            ..Default::default()
        }));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    serve(stream, &options, &state, &stop);
                }
            })
        };

        FakePlc {
            port,
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> String {
        "127.0.0.1".to_string()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, PlcState> {
        self.state.lock().expect("simulator state should lock")
    }

    /// Client pointing to the simulator, not connected yet
    pub fn client(&self) -> S7Client {
        let mut client = S7Client::new();
        client.set_connection_port(self.port);
        client.set_timeout(1000, 1000, 1000);
        client
    }

    /// Client connected as to a S71200/1500
    pub fn connected_client(&self) -> S7Client {
        let mut client = self.client();
        client
            .connect_s71200_1500(&self.address())
            .expect("client should connect to the simulator");
        client
    }
}

impl Drop for FakePlc {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblocks accept()
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Waits for the next telegram, giving up when the simulator is stopped
fn read_telegram(stream: &mut TcpStream, stop: &AtomicBool) -> Option<Vec<u8>> {
    let mut peek = [0u8; 1];
    loop {
        if stop.load(Ordering::SeqCst) {
            return None;
        }
        match stream.peek(&mut peek) {
            Ok(0) => return None,
            Ok(_) => break,
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(_) => return None,
        }
    }
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let size = u16::from_be_bytes([header[2], header[3]]) as usize;
    let mut telegram = header.to_vec();
    telegram.resize(size.max(4), 0);
    stream.read_exact(&mut telegram[4..]).ok()?;
    Some(telegram)
}

fn send(stream: &mut TcpStream, options: &PlcOptions, mut telegram: Vec<u8>) -> bool {
    let size = telegram.len();
    telegram[2] = (size >> 8) as u8;
    telegram[3] = size as u8;
    if options.send_ack_first && stream.write_all(&[0x03, 0x00, 0x00, 0x07, 0x02, 0xf0, 0x80]).is_err() {
        return false;
    }
    stream.write_all(&telegram).is_ok()
}

fn serve(mut stream: TcpStream, options: &PlcOptions, state: &Mutex<PlcState>, stop: &AtomicBool) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let mut pdu_length: usize = 0;
    let mut szl_pending: Option<(Vec<u8>, u8)> = None;
    let mut seq: u8 = 0x30;

    while let Some(req) = read_telegram(&mut stream, stop) {
        if req.len() < 7 {
            break;
        }
        if req[5] == 0xE0 {
            {
                let mut st = state.lock().expect("state");
                st.connections += 1;
                st.remote_tsap = u16::from_be_bytes([req[20], req[21]]);
            }
            let mut cc = req.clone();
            cc[5] = if options.refuse_iso { 0x80 } else { 0xD0 };
            if !send(&mut stream, options, cc) {
                break;
            }
            continue;
        }
        if req.len() < 19 || req[7] != 0x32 {
            break;
        }
        state.lock().expect("state").requests.push(req.clone());

        let reply = match req[8] {
            0x01 => match req[17] {
                0xF0 => {
                    let requested = u16::from_be_bytes([req[23], req[24]]);
                    let negotiated = requested.min(options.max_pdu);
                    pdu_length = negotiated as usize;
                    let mut r = ack_data_header(&req, 8, 0);
                    r.extend_from_slice(&[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01]);
                    r.extend_from_slice(&negotiated.to_be_bytes());
                    r
                }
                0x04 => read_var(&req, options, state),
                0x05 => write_var(&req, options, state),
                0x28 => control(&req, state, true),
                0x29 => control(&req, state, false),
                _ => break,
            },
            0x07 => {
                let group = req[22];
                let sub = req[23];
                match (group, sub) {
                    (0x44, 0x01) if req[21] == 0x11 => {
                        let slice = options.szl_slice.min(pdu_length.saturating_sub(48));
                        szl_first(&req, slice, options, state, &mut szl_pending, &mut seq)
                    }
                    (0x44, 0x01) => {
                        let slice = options.szl_slice.min(pdu_length.saturating_sub(48));
                        szl_next(&req, slice, &mut szl_pending, &mut seq)
                    }
                    (0x47, 0x01) => {
                        let st = state.lock().expect("state");
                        let mut data = vec![0x00, st.clock_century];
                        data.extend_from_slice(&st.clock);
                        userdata_reply(&req, 0, true, &data, 0)
                    }
                    (0x47, 0x02) => {
                        let mut st = state.lock().expect("state");
                        if st.logged_in || options.password.is_none() {
                            st.clock_century = req[30];
                            st.clock.copy_from_slice(&req[31..39]);
                            userdata_reply(&req, 0, false, &[], 0)
                        } else {
                            userdata_reply(&req, 0xD241, false, &[], 0)
                        }
                    }
                    (0x45, 0x01) => {
                        let mut st = state.lock().expect("state");
                        match options.password {
                            None => userdata_reply(&req, 0xD605, false, &[], 0),
                            Some(expected) if expected[..] == req[29..37] => {
                                st.logged_in = true;
                                userdata_reply(&req, 0, false, &[], 0)
                            }
                            Some(_) => userdata_reply(&req, 0xD602, false, &[], 0),
                        }
                    }
                    (0x45, 0x02) => {
                        state.lock().expect("state").logged_in = false;
                        userdata_reply(&req, 0, false, &[], 0)
                    }
                    (0x43, 0x03) => block_info(&req, options),
                    _ => break,
                }
            }
            _ => break,
        };
        if !send(&mut stream, options, reply) {
            break;
        }
    }
}

/// TPKT + COTP + S7 ACK_DATA header (19 bytes), lengths fixed by the caller
fn ack_data_header(req: &[u8], param_len: u16, data_len: u16) -> Vec<u8> {
    let mut r = vec![0x03, 0x00, 0x00, 0x00, 0x02, 0xf0, 0x80, 0x32, 0x03, 0x00, 0x00, req[11], req[12]];
    r.extend_from_slice(&param_len.to_be_bytes());
    r.extend_from_slice(&data_len.to_be_bytes());
    r.extend_from_slice(&[0x00, 0x00]); // error class, error code
    r
}

struct Item {
    word_len: u8,
    amount: usize,
    db: u16,
    area: u8,
    address: usize,
}

fn parse_item(spec: &[u8]) -> Item {
    Item {
        word_len: spec[3],
        amount: u16::from_be_bytes([spec[4], spec[5]]) as usize,
        db: u16::from_be_bytes([spec[6], spec[7]]),
        area: spec[8],
        address: ((spec[9] as usize) << 16) | ((spec[10] as usize) << 8) | spec[11] as usize,
    }
}

fn fails(item: &Item, options: &PlcOptions) -> bool {
    options.fail_area == Some((item.area, item.db))
}

fn read_var(req: &[u8], options: &PlcOptions, state: &Mutex<PlcState>) -> Vec<u8> {
    let count = req[18] as usize;
    let mut st = state.lock().expect("state");
    let mut data = Vec::new();
    for c in 0..count {
        let item = parse_item(&req[19 + c * 12..31 + c * 12]);
        if fails(&item, options) {
            data.extend_from_slice(&[0x05, 0x00, 0x00, 0x00]);
            continue;
        }
        let (ts, bytes, len_field) = match item.word_len {
            S7_WL_BIT => {
                let byte = st.read(item.area, item.db, item.address / 8, 1)[0];
                let bit = (byte >> (item.address % 8)) & 0x01;
                (0x03u8, vec![bit], 1usize)
            }
            S7_WL_COUNTER | S7_WL_TIMER => {
                let area = if item.word_len == S7_WL_COUNTER { S7_AREA_CT } else { S7_AREA_TM };
                let bytes = st.read(area, 0, item.address * 2, item.amount * 2);
                let size = bytes.len();
                (0x09, bytes, size)
            }
            _ => {
                let bytes = st.read(item.area, item.db, item.address >> 3, item.amount);
                let size = bytes.len();
                (0x04, bytes, size * 8)
            }
        };
        data.push(0xFF);
        data.push(ts);
        data.extend_from_slice(&(len_field as u16).to_be_bytes());
        let size = bytes.len();
        data.extend_from_slice(&bytes);
        if size % 2 != 0 && c + 1 < count {
            data.push(0x00);
        }
    }
    let answered = if options.drop_multi_item && count > 1 { count - 1 } else { count };
    let mut r = ack_data_header(req, 2, data.len() as u16);
    r.extend_from_slice(&[0x04, answered as u8]);
    r.extend_from_slice(&data);
    r
}

fn write_var(req: &[u8], options: &PlcOptions, state: &Mutex<PlcState>) -> Vec<u8> {
    let count = req[18] as usize;
    let mut st = state.lock().expect("state");
    let mut offset = 19 + count * 12;
    let mut results = Vec::with_capacity(count);
    for c in 0..count {
        let item = parse_item(&req[19 + c * 12..31 + c * 12]);
        let ts = req[offset + 1];
        let len = u16::from_be_bytes([req[offset + 2], req[offset + 3]]) as usize;
        let size = match ts {
            0x03 | 0x09 => len,
            _ => len / 8,
        };
        let payload = req[offset + 4..offset + 4 + size].to_vec();
        offset += 4 + size + size % 2;

        if fails(&item, options) {
            results.push(0x05);
            continue;
        }
        match item.word_len {
            S7_WL_BIT => {
                let mem = st.read(item.area, item.db, item.address / 8, 1)[0];
                let mask = 1u8 << (item.address % 8);
                let value = if payload[0] != 0 { mem | mask } else { mem & !mask };
                st.write(item.area, item.db, item.address / 8, &[value]);
            }
            S7_WL_COUNTER | S7_WL_TIMER => {
                let area = if item.word_len == S7_WL_COUNTER { S7_AREA_CT } else { S7_AREA_TM };
                st.write(area, 0, item.address * 2, &payload);
            }
            _ => st.write(item.area, item.db, item.address >> 3, &payload),
        }
        results.push(0xFF);
    }
    let mut r = ack_data_header(req, 2, count as u16);
    r.extend_from_slice(&[0x05, count as u8]);
    r.extend_from_slice(&results);
    r
}

fn control(req: &[u8], state: &Mutex<PlcState>, start: bool) -> Vec<u8> {
    let mut st = state.lock().expect("state");
    let function = if start { 0x28 } else { 0x29 };
    if st.running == start {
        let mut r = ack_data_header(req, 2, 0);
        r[17] = 0x85; // error class
        r.extend_from_slice(&[function, if start { 0x02 } else { 0x07 }]);
        r
    } else {
        st.running = start;
        let mut r = ack_data_header(req, 1, 0);
        r.push(function);
        r
    }
}

/// Userdata answer: 12 bytes of params and a data part starting at 29
fn userdata_reply(req: &[u8], error: u16, success: bool, data: &[u8], more: u8) -> Vec<u8> {
    userdata_reply_seq(req, error, success, data, more, 0)
}

fn userdata_reply_seq(req: &[u8], error: u16, success: bool, data: &[u8], more: u8, seq: u8) -> Vec<u8> {
    let mut r = vec![0x03, 0x00, 0x00, 0x00, 0x02, 0xf0, 0x80, 0x32, 0x07, 0x00, 0x00, req[11], req[12]];
    r.extend_from_slice(&12u16.to_be_bytes());
    r.extend_from_slice(&((data.len() + 4) as u16).to_be_bytes());
    r.extend_from_slice(&[0x00, 0x01, 0x12, 0x08, 0x12, 0x80 | (req[22] & 0x0F), req[23], seq, 0x00, more]);
    r.extend_from_slice(&error.to_be_bytes());
    r.push(if success { 0xFF } else { 0x0A });
    r.push(if success { 0x09 } else { 0x00 });
    r.extend_from_slice(&(data.len() as u16).to_be_bytes());
    r.extend_from_slice(data);
    r
}

fn szl_first(
    req: &[u8],
    slice: usize,
    options: &PlcOptions,
    state: &Mutex<PlcState>,
    pending: &mut Option<(Vec<u8>, u8)>,
    seq: &mut u8,
) -> Vec<u8> {
    let id = u16::from_be_bytes([req[29], req[30]]);
    let index = u16::from_be_bytes([req[31], req[32]]);
    let (length_dr, n_dr, data) = if id == 0x0424 {
        let mut record = vec![0u8; 20];
        let st = state.lock().expect("state");
        record[3] = options
            .status_byte
            .unwrap_or(if st.running { 0x08 } else { 0x04 });
        (20, 1, record)
    } else {
        match state.lock().expect("state").szl.get(&(id, index)) {
            Some(record) => record.clone(),
            None => return userdata_reply(req, 0xD401, false, &[], 0),
        }
    };

    let first_len = data.len().min(slice);
    let mut payload = Vec::with_capacity(8 + first_len);
    payload.extend_from_slice(&id.to_be_bytes());
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&length_dr.to_be_bytes());
    payload.extend_from_slice(&n_dr.to_be_bytes());
    payload.extend_from_slice(&data[..first_len]);

    *seq = seq.wrapping_add(1);
    let rest = data[first_len..].to_vec();
    let more = if rest.is_empty() { 0x00 } else { 0x01 };
    *pending = if rest.is_empty() { None } else { Some((rest, *seq)) };
    userdata_reply_seq(req, 0, true, &payload, more, *seq)
}

fn szl_next(req: &[u8], slice: usize, pending: &mut Option<(Vec<u8>, u8)>, seq: &mut u8) -> Vec<u8> {
    let Some((rest, expected_seq)) = pending.take() else {
        return userdata_reply(req, 0xD401, false, &[], 0);
    };
    if req[24] != expected_seq {
        return userdata_reply(req, 0xD401, false, &[], 0);
    }
    let len = rest.len().min(slice);
    *seq = seq.wrapping_add(1);
    let remaining = rest[len..].to_vec();
    let more = if remaining.is_empty() { 0x00 } else { 0x01 };
    *pending = if remaining.is_empty() { None } else { Some((remaining, *seq)) };
    userdata_reply_seq(req, 0, true, &rest[..len], more, *seq)
}

fn block_info(req: &[u8], options: &PlcOptions) -> Vec<u8> {
    let block_type = req[30];
    let number: u16 = std::str::from_utf8(&req[31..36])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u16::MAX);
    let size = match (block_type, options.db_sizes.get(&number)) {
        (0x41, Some(size)) => *size,
        _ => return userdata_reply(req, 0xD209, false, &[], 0),
    };
    // Data from absolute offset 33 up to 105
    let mut data = vec![0u8; 72];
    let at = |abs: usize| abs - 33;
    data[at(42)] = 0x01; // flags
    data[at(43)] = 0x05; // lang
    data[at(44)] = block_type;
    data[at(45)..at(47)].copy_from_slice(&number.to_be_bytes());
    data[at(47)..at(51)].copy_from_slice(&(size as i32 + 100).to_be_bytes());
    data[at(59)..at(61)].copy_from_slice(&366u16.to_be_bytes()); // 1985-01-01
    data[at(65)..at(67)].copy_from_slice(&0u16.to_be_bytes());
    data[at(67)..at(69)].copy_from_slice(&20u16.to_be_bytes());
    data[at(71)..at(73)].copy_from_slice(&4u16.to_be_bytes());
    data[at(73)..at(75)].copy_from_slice(&size.to_be_bytes());
    data[at(75)..at(81)].copy_from_slice(b"TESTER");
    data[at(83)..at(87)].copy_from_slice(b"FAMI");
    data[at(91)..at(95)].copy_from_slice(b"HEAD");
    data[at(99)] = 0x11;
    data[at(101)..at(103)].copy_from_slice(&0xBEEFu16.to_be_bytes());
    userdata_reply(req, 0, true, &data, 0)
}
