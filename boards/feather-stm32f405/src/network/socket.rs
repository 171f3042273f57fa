#![deny(unsafe_code)]
//! Async TCP socket wrapper for embedded-tls integration
//!
//! Wraps `embassy_net::tcp::TcpSocket` and implements the `embedded-io-async`
//! traits that `embedded-tls` needs. Plain HTTP goes through the same type.
//!
//! The live socket sits in a `SocketSlot` owned by the transport. A TLS
//! session reaches it through a `SharedSocket` handle, so the transport can
//! still see the TCP state underneath the session.

use core::cell::RefCell;

use embassy_net::tcp::{State, TcpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};

use super::error::NetworkError;

/// Async TCP socket wrapper implementing embedded-io-async traits
pub struct AsyncTcpSocket<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> AsyncTcpSocket<'a> {
    /// Create a socket; reads and writes fail after `timeout` of inactivity
    pub fn new(
        stack: Stack<'a>,
        rx_buffer: &'a mut [u8],
        tx_buffer: &'a mut [u8],
        timeout: Duration,
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(timeout));
        Self { socket }
    }

    /// Connect to a remote endpoint
    pub async fn connect(&mut self, endpoint: IpEndpoint) -> Result<(), NetworkError> {
        self.socket
            .connect(endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    /// Send FIN and wait for queued data to drain
    pub async fn close(&mut self) {
        self.socket.close();
        let _ = self.socket.flush().await;
    }

    /// Whether the peer can still receive data
    pub fn is_open(&self) -> bool {
        self.socket.may_send() && self.socket.state() == State::Established
    }
}

/// Error type for embedded-io-async traits
impl ErrorType for AsyncTcpSocket<'_> {
    type Error = NetworkError;
}

impl Read for AsyncTcpSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket
            .read(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}

impl Write for AsyncTcpSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket
            .write(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket
            .flush()
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}

/// Holder for the one live socket
pub struct SocketSlot {
    socket: RefCell<Option<AsyncTcpSocket<'static>>>,
}

impl SocketSlot {
    pub const fn new() -> Self {
        Self {
            socket: RefCell::new(None),
        }
    }

    /// Install a connected socket, dropping any previous one
    pub fn fill(&self, socket: AsyncTcpSocket<'static>) {
        self.socket.replace(Some(socket));
    }

    /// Close and drop the socket, releasing its buffers
    pub async fn close(&self) {
        let socket = self.socket.take();
        if let Some(mut socket) = socket {
            socket.close().await;
        }
    }

    /// Whether a socket is installed and still open
    pub fn is_open(&self) -> bool {
        self.socket
            .borrow()
            .as_ref()
            .is_some_and(AsyncTcpSocket::is_open)
    }

    /// Move the socket out for one operation
    ///
    /// Holding no borrow across the await keeps `is_open` usable. If the
    /// operation is cancelled the socket is dropped and the slot reads as
    /// closed.
    fn lend(&self) -> Result<AsyncTcpSocket<'static>, NetworkError> {
        self.socket.take().ok_or(NetworkError::NotConnected)
    }

    fn restore(&self, socket: AsyncTcpSocket<'static>) {
        self.socket.replace(Some(socket));
    }
}

/// Read/write handle onto the socket in a `SocketSlot`
#[derive(Clone, Copy)]
pub struct SharedSocket<'a>(pub &'a SocketSlot);

impl ErrorType for SharedSocket<'_> {
    type Error = NetworkError;
}

impl Read for SharedSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut socket = self.0.lend()?;
        let result = socket.read(buf).await;
        self.0.restore(socket);
        result
    }
}

impl Write for SharedSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut socket = self.0.lend()?;
        let result = socket.write(buf).await;
        self.0.restore(socket);
        result
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        let mut socket = self.0.lend()?;
        let result = socket.flush().await;
        self.0.restore(socket);
        result
    }
}
