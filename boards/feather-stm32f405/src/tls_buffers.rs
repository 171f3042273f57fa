//! Connection buffers in main SRAM
//!
//! The InfluxDB client holds at most one connection at a time, so a single
//! set of TCP and TLS buffers is shared by every connection the transport
//! opens. Handing out `&'static mut` slices lets the socket and the TLS
//! session live inside the transport between writes.
//!
//! # Buffer Sizing
//!
//! **TLS read buffer (18 KB)**: maximum TLS 1.3 plaintext record (16 KB)
//! plus record header, AEAD tag and padding allowance.
//!
//! **TLS write buffer (16 KB)**: outgoing records are bounded by what we
//! write; one maximum-size record.
//!
//! **TCP buffers (4 KB each)**: enough for a line-protocol request and an
//! InfluxDB error body.
//!
//! # Safety
//!
//! The accessor hands out the same memory on every call. A caller must drop
//! every slice from the previous call (by dropping the connection built on
//! them) before calling it again.

#![allow(unsafe_code)] // Required for static mut buffers

/// TLS read buffer size: 18 KB
const TLS_READ_BUF_SIZE: usize = 18 * 1024;

/// TLS write buffer size: 16 KB
const TLS_WRITE_BUF_SIZE: usize = 16 * 1024;

/// TCP socket buffer size, per direction
const TCP_BUF_SIZE: usize = 4 * 1024;

static mut TLS_READ_BUF: [u8; TLS_READ_BUF_SIZE] = [0; TLS_READ_BUF_SIZE];
static mut TLS_WRITE_BUF: [u8; TLS_WRITE_BUF_SIZE] = [0; TLS_WRITE_BUF_SIZE];
static mut TCP_RX_BUF: [u8; TCP_BUF_SIZE] = [0; TCP_BUF_SIZE];
static mut TCP_TX_BUF: [u8; TCP_BUF_SIZE] = [0; TCP_BUF_SIZE];

/// Buffers for one connection
pub struct ConnectionBuffers {
    pub tcp_rx: &'static mut [u8],
    pub tcp_tx: &'static mut [u8],
    pub tls_read: &'static mut [u8],
    pub tls_write: &'static mut [u8],
}

/// Get the connection buffers
///
/// # Safety
///
/// No slice returned by an earlier call may still be alive. The transport
/// guarantees this by dropping its previous connection first.
pub unsafe fn connection_buffers() -> ConnectionBuffers {
    // SAFETY: Caller guarantees exclusive use; raw pointers avoid
    // references to `static mut`
    ConnectionBuffers {
        tcp_rx: &mut *core::ptr::addr_of_mut!(TCP_RX_BUF),
        tcp_tx: &mut *core::ptr::addr_of_mut!(TCP_TX_BUF),
        tls_read: &mut *core::ptr::addr_of_mut!(TLS_READ_BUF),
        tls_write: &mut *core::ptr::addr_of_mut!(TLS_WRITE_BUF),
    }
}
