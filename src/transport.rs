// s7client - Native Rust S7 client for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::S7Error;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Blocking TCP channel used by the client.
///
/// Every failure is reported with the S7 transport error set, the caller decides
/// whether to drop the connection (see `S7Error::closes_connection()`).
#[derive(Debug)]
pub(crate) struct TcpTransport {
    stream: Option<TcpStream>,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
}

impl TcpTransport {
    pub(crate) fn new(connect_timeout: Duration, read_timeout: Duration, write_timeout: Duration) -> Self {
        TcpTransport {
            stream: None,
            connect_timeout,
            read_timeout,
            write_timeout,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// ### Opens the socket
    ///
    /// A first ping connection, bounded by the connect timeout, checks that something
    /// listens at the address; only then the real connection is opened with Nagle disabled.
    pub(crate) fn connect(&mut self, host: &str, port: u16) -> Result<(), S7Error> {
        self.close();

        let addr = resolve(host, port)?;

        // Reachability ping
        match TcpStream::connect_timeout(&addr, self.connect_timeout) {
            Ok(ping) => {
                let _ = ping.shutdown(Shutdown::Both);
            }
            Err(err) => {
                debug!(%addr, error = %err, "s7 ping failed");
                return Err(S7Error::TcpConnectionFailed);
            }
        }

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|err| {
            debug!(%addr, error = %err, "s7 tcp connect failed");
            match err.kind() {
                io::ErrorKind::TimedOut => S7Error::TcpConnectionTimeout,
                _ => S7Error::TcpConnectionFailed,
            }
        })?;

        stream.set_nodelay(true).map_err(|_| S7Error::TcpSocketCreation)?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|_| S7Error::TcpSocketCreation)?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|_| S7Error::TcpSocketCreation)?;

        trace!(%addr, "s7 tcp connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// ### Receives exactly `buffer.len()` bytes
    ///
    /// Waits until the whole amount is available or the read timeout expires.
    /// On timeout the bytes already arrived are flushed away, so that the next telegram
    /// does not start in the middle of this one.
    pub(crate) fn receive(&mut self, buffer: &mut [u8]) -> Result<(), S7Error> {
        let size = buffer.len();
        if size == 0 {
            return Ok(());
        }
        let read_timeout = self.read_timeout;
        let stream = self.stream.as_mut().ok_or(S7Error::TcpNotConnected)?;

        let available = match wait_for(stream, buffer, read_timeout) {
            Ok(n) => n,
            Err(err) => {
                self.close();
                return Err(err);
            }
        };

        if available < size {
            trace!(available, size, "s7 receive timeout, flushing");
            flush(stream);
            return Err(S7Error::TcpDataReceive);
        }

        if stream.read_exact(buffer).is_err() {
            self.close();
            return Err(S7Error::TcpDataReceive);
        }
        Ok(())
    }

    /// ### Sends the whole buffer
    ///
    /// Any failure closes the socket.
    pub(crate) fn send(&mut self, buffer: &[u8]) -> Result<(), S7Error> {
        let stream = self.stream.as_mut().ok_or(S7Error::TcpNotConnected)?;
        if let Err(err) = stream.write_all(buffer) {
            trace!(error = %err, "s7 send failed");
            self.close();
            return Err(S7Error::TcpDataSend);
        }
        Ok(())
    }

    /// Closes the socket, it's safe to call it more than once.
    pub(crate) fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, S7Error> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| S7Error::TcpUnreachableHost)?
        .next()
        .ok_or(S7Error::TcpUnreachableHost)
}

/// Polls the socket until `scratch.len()` bytes are readable or `timeout` expires.
/// Returns how many bytes are available.
fn wait_for(stream: &mut TcpStream, scratch: &mut [u8], timeout: Duration) -> Result<usize, S7Error> {
    let size = scratch.len();
    let start = Instant::now();
    stream.set_nonblocking(true).map_err(|_| S7Error::TcpDataReceive)?;

    let outcome = loop {
        match stream.peek(scratch) {
            Ok(0) => break Err(S7Error::TcpConnectionReset),
            Ok(n) if n >= size => break Ok(n),
            Ok(n) if start.elapsed() >= timeout => break Ok(n),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    break Ok(0);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break Err(S7Error::TcpConnectionReset),
        }
        thread::sleep(POLL_INTERVAL);
    };

    stream.set_nonblocking(false).map_err(|_| S7Error::TcpDataReceive)?;
    outcome
}

fn flush(stream: &mut TcpStream) {
    let mut junk = [0u8; 256];
    if stream.set_nonblocking(true).is_err() {
        return;
    }
    while let Ok(n) = stream.read(&mut junk) {
        if n == 0 {
            break;
        }
    }
    let _ = stream.set_nonblocking(false);
}
