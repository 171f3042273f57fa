//! Outbound connection for the InfluxDB client
//!
//! Holds at most one connection, plain TCP or TLS 1.3 over TCP. All
//! connections share the static buffers in `tls_buffers`, so an open
//! connection is always dropped before the next one is built.
//!
//! The TCP socket lives in a `SocketSlot` for both kinds of connection, so
//! the connection counts as open only while the socket underneath is.
//!
//! Validated TLS checks the server chain against the pinned ISRG Root X1
//! certificate and needs a synchronised wall clock; insecure TLS encrypts
//! without checking anything.

#![allow(unsafe_code)] // Required for static buffer access

use defmt::{debug, error, info, warn, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::{IpEndpoint, Stack};
use embedded_io_async::{Read, Write};
use embedded_tls::webpki::CertVerifier;
use embedded_tls::{
    Aes128GcmSha256, Certificate, CryptoProvider, NoVerify, TlsConfig, TlsConnection, TlsContext,
    TlsVerifier,
};
use hal_abstractions::{Endpoint, Security, TlsMode, Transport, TransportError};

use crate::time::WallClock;
use crate::tls_buffers;

use super::config::NetworkConfig;
use super::error::NetworkError;
use super::socket::{AsyncTcpSocket, SharedSocket, SocketSlot};

/// Root of the Let's Encrypt chain, DER encoded
const ISRG_ROOT_X1: &[u8] = include_bytes!("../../certs/isrg-root-x1.der");

/// Largest certificate the verifier parses
const MAX_CERT_SIZE: usize = 4096;

type TlsSession = TlsConnection<'static, SharedSocket<'static>, Aes128GcmSha256>;

/// Crypto provider pairing the hardware RNG with a certificate verifier
struct SessionProvider<'a, RNG, V> {
    rng: &'a mut RNG,
    verifier: V,
}

impl<RNG, V> CryptoProvider for SessionProvider<'_, RNG, V>
where
    RNG: rand_core::CryptoRngCore,
    V: TlsVerifier<Aes128GcmSha256>,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl rand_core::CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

enum Connection {
    Plain,
    Tls(TlsSession),
}

/// embassy-net backed transport
pub struct NetTransport<RNG> {
    stack: Stack<'static>,
    rng: RNG,
    config: NetworkConfig,
    socket: &'static SocketSlot,
    connection: Option<Connection>,
}

impl<RNG> NetTransport<RNG>
where
    RNG: rand_core::RngCore + rand_core::CryptoRng,
{
    pub fn new(
        stack: Stack<'static>,
        rng: RNG,
        config: NetworkConfig,
        socket: &'static SocketSlot,
    ) -> Self {
        Self {
            stack,
            rng,
            config,
            socket,
            connection: None,
        }
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<IpEndpoint, NetworkError> {
        let ip = self
            .stack
            .dns_query(host, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("DNS query failed: {:?}", Debug2Format(&e));
                NetworkError::DnsError
            })?
            .first()
            .copied()
            .ok_or_else(|| {
                error!("DNS returned no results for {}", host);
                NetworkError::DnsError
            })?;
        Ok(IpEndpoint::new(ip, port))
    }

    async fn open(&mut self, endpoint: &Endpoint<'_>) -> Result<Connection, NetworkError> {
        if !self.stack.is_config_up() {
            return Err(NetworkError::LinkDown);
        }

        let remote = self.resolve(endpoint.host, endpoint.port).await?;
        debug!("Resolved {} to {}", endpoint.host, Debug2Format(&remote));

        // SAFETY: `connect` drops the previous connection before calling
        // `open`, so no earlier slice is alive
        let buffers = unsafe { tls_buffers::connection_buffers() };

        let mut socket = AsyncTcpSocket::new(
            self.stack,
            buffers.tcp_rx,
            buffers.tcp_tx,
            self.config.socket_timeout,
        );
        socket.connect(remote).await?;
        self.socket.fill(socket);

        let mode = match endpoint.security {
            Security::Plain => return Ok(Connection::Plain),
            Security::Tls(mode) => mode,
        };

        let mut session = TlsSession::new(
            SharedSocket(self.socket),
            buffers.tls_read,
            buffers.tls_write,
        );
        let tls_config = TlsConfig::new().with_server_name(endpoint.host);
        let result = match mode {
            TlsMode::Insecure => {
                let provider = SessionProvider {
                    rng: &mut self.rng,
                    verifier: NoVerify,
                };
                session.open(TlsContext::new(&tls_config, provider)).await
            }
            TlsMode::Validated => {
                let tls_config = tls_config.with_ca(Certificate::X509(ISRG_ROOT_X1));
                let provider = SessionProvider {
                    rng: &mut self.rng,
                    verifier: CertVerifier::<Aes128GcmSha256, WallClock, MAX_CERT_SIZE>::new(),
                };
                session.open(TlsContext::new(&tls_config, provider)).await
            }
        };
        if let Err(e) = result {
            error!("TLS handshake failed: {:?}", Debug2Format(&e));
            drop(session);
            self.socket.close().await;
            return Err(NetworkError::TlsHandshakeFailed);
        }

        Ok(Connection::Tls(session))
    }

    /// End the current connection and release its buffers
    async fn shutdown(&mut self) {
        if let Some(Connection::Tls(session)) = self.connection.take() {
            if let Err((_, e)) = session.close().await {
                warn!("TLS close returned error: {:?}", Debug2Format(&e));
            }
        }
        self.socket.close().await;
    }
}

impl<RNG> Transport for NetTransport<RNG>
where
    RNG: rand_core::RngCore + rand_core::CryptoRng,
{
    async fn connect(&mut self, endpoint: &Endpoint<'_>) -> Result<(), TransportError> {
        self.shutdown().await;

        info!(
            "Connecting to {}:{} ({})",
            endpoint.host, endpoint.port, endpoint.security
        );
        let connection = self.open(endpoint).await.map_err(TransportError::from)?;
        self.connection = Some(connection);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some() && self.socket.is_open()
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = match self.connection.as_mut() {
            Some(Connection::Plain) => {
                let mut socket = SharedSocket(self.socket);
                match socket.write_all(data).await {
                    Ok(()) => socket.flush().await,
                    Err(e) => Err(e),
                }
            }
            Some(Connection::Tls(session)) => {
                let written = match session.write_all(data).await {
                    Ok(()) => session.flush().await,
                    Err(e) => Err(e),
                };
                written.map_err(|e| {
                    warn!("TLS write failed: {:?}", Debug2Format(&e));
                    NetworkError::TlsIoError
                })
            }
            None => Err(NetworkError::NotConnected),
        };
        result.map_err(TransportError::from)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let result = match self.connection.as_mut() {
            Some(Connection::Plain) => SharedSocket(self.socket).read(buf).await,
            Some(Connection::Tls(session)) => session.read(buf).await.map_err(|e| {
                warn!("TLS read failed: {:?}", Debug2Format(&e));
                NetworkError::TlsIoError
            }),
            None => Err(NetworkError::NotConnected),
        };
        result.map_err(TransportError::from)
    }

    async fn close(&mut self) {
        if self.connection.is_some() {
            self.shutdown().await;
            debug!("Connection closed");
        }
    }
}
