//! Recording fakes for the capability traits

use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use hal_abstractions::{
    ClimateSample, DelayNs, DisplayDriver, Endpoint, FileStore, FontSize, IdentityProvider,
    LinkStatus, Radio, Restart, Security, SensorDriver, SensorKind, StorageError, TimeSync,
    TimeSyncError, Transport, TransportError,
};

pub struct FakeStore {
    files: Vec<(String, Vec<u8>)>,
}

impl FakeStore {
    pub fn empty() -> Self {
        Self { files: Vec::new() }
    }

    pub fn with_file(path: &str, contents: &[u8]) -> Self {
        Self {
            files: vec![(path.to_owned(), contents.to_vec())],
        }
    }
}

impl FileStore for FakeStore {
    async fn read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let (_, contents) = self
            .files
            .iter()
            .find(|(p, _)| p == path)
            .ok_or(StorageError::NotFound)?;
        let dst = buf.get_mut(..contents.len()).ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(contents);
        Ok(contents.len())
    }
}

pub struct FakeSensors {
    pm: i32,
    co2: i32,
    climate: ClimateSample,
    pub calls: Vec<&'static str>,
    pub initialized: Vec<SensorKind>,
}

impl FakeSensors {
    pub fn new(pm: i32, co2: i32, temperature_c: f32, humidity: f32) -> Self {
        Self {
            pm,
            co2,
            climate: ClimateSample {
                temperature_c,
                humidity,
            },
            calls: Vec::new(),
            initialized: Vec::new(),
        }
    }
}

impl SensorDriver for FakeSensors {
    async fn init(&mut self, kind: SensorKind) {
        self.initialized.push(kind);
    }

    async fn read_particulate(&mut self) -> i32 {
        self.calls.push("pm");
        self.pm
    }

    async fn read_co2(&mut self) -> i32 {
        self.calls.push("co2");
        self.co2
    }

    async fn read_climate(&mut self) -> ClimateSample {
        self.calls.push("climate");
        self.climate
    }
}

#[derive(Default)]
pub struct FakeDisplay {
    log: Vec<(String, String, FontSize)>,
}

impl FakeDisplay {
    pub fn frames(&self) -> Vec<(&str, &str, FontSize)> {
        self.log
            .iter()
            .map(|(a, b, size)| (a.as_str(), b.as_str(), *size))
            .collect()
    }
}

impl DisplayDriver for FakeDisplay {
    async fn render(&mut self, line1: &str, line2: &str, size: FontSize) {
        self.log.push((line1.to_owned(), line2.to_owned(), size));
    }
}

/// Records every delay in milliseconds
#[derive(Default)]
pub struct FakeDelay {
    pub ms: Vec<u32>,
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.ms.push(ns / 1_000_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.ms.push(ms);
    }
}

pub struct FakeRadio {
    provision_ok: bool,
    links: VecDeque<LinkStatus>,
    rssi: i32,
    pub provision_calls: Vec<(String, u32)>,
}

impl FakeRadio {
    /// Provisions successfully, link always up
    pub fn up() -> Self {
        Self::with_links(&[])
    }

    pub fn unprovisionable() -> Self {
        Self {
            provision_ok: false,
            ..Self::up()
        }
    }

    /// Reports `links` in order, then stays up
    pub fn with_links(links: &[LinkStatus]) -> Self {
        Self {
            provision_ok: true,
            links: links.iter().copied().collect(),
            rssi: -60,
            provision_calls: Vec::new(),
        }
    }

    pub fn with_rssi(mut self, rssi: i32) -> Self {
        self.rssi = rssi;
        self
    }
}

impl Radio for FakeRadio {
    async fn auto_connect(&mut self, portal_name: &str, timeout_secs: u32) -> bool {
        self.provision_calls
            .push((portal_name.to_owned(), timeout_secs));
        self.provision_ok
    }

    fn link_status(&mut self) -> LinkStatus {
        self.links.pop_front().unwrap_or(LinkStatus::Up)
    }

    fn rssi(&mut self) -> i32 {
        self.rssi
    }
}

/// Serves one scripted response per request, a few bytes per read
pub struct FakeTransport {
    responses: VecDeque<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
    awaiting: bool,
    connected: bool,
    connect_error: Option<TransportError>,
    hang_up: bool,
    pub connects: Vec<(String, u16, Security)>,
    pub sent: String,
    pub writes: usize,
    pub closes: usize,
}

impl FakeTransport {
    const CHUNK: usize = 7;

    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            current: Vec::new(),
            pos: 0,
            awaiting: false,
            connected: false,
            connect_error: None,
            hang_up: false,
            connects: Vec::new(),
            sent: String::new(),
            writes: 0,
            closes: 0,
        }
    }

    pub fn respond(mut self, response: &[u8]) -> Self {
        self.responses.push_back(response.to_vec());
        self
    }

    pub fn fail_connect(mut self, error: TransportError) -> Self {
        self.connect_error = Some(error);
        self
    }

    /// Drop the connection from the peer side once a response is delivered
    pub fn hang_up_after_response(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

impl Transport for FakeTransport {
    async fn connect(&mut self, endpoint: &Endpoint<'_>) -> Result<(), TransportError> {
        self.connects
            .push((endpoint.host.to_owned(), endpoint.port, endpoint.security));
        if let Some(e) = self.connect_error {
            return Err(e);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.push_str(&String::from_utf8_lossy(data));
        self.writes += 1;
        self.awaiting = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.awaiting {
            self.current = self.responses.pop_front().unwrap_or_default();
            self.pos = 0;
            self.awaiting = false;
        }
        let n = buf.len().min(Self::CHUNK).min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        if self.hang_up && n > 0 && self.pos == self.current.len() {
            self.connected = false;
        }
        Ok(n)
    }

    async fn close(&mut self) {
        if self.connected {
            self.closes += 1;
            self.connected = false;
        }
    }
}

pub struct FakeIdentity;

impl FakeIdentity {
    pub const ID: &'static str = "3a0021000f51363033353732";
}

impl IdentityProvider for FakeIdentity {
    fn device_id(&self) -> &str {
        Self::ID
    }

    fn device_class(&self) -> &str {
        "STM32F405"
    }
}

#[derive(Default)]
pub struct FakeRestart {
    pub count: usize,
}

impl Restart for FakeRestart {
    fn restart(&mut self) {
        self.count += 1;
    }
}

pub struct FakeClock {
    result: Result<u64, TimeSyncError>,
    pub calls: Vec<(String, Vec<String>)>,
}

impl FakeClock {
    pub fn new(result: Result<u64, TimeSyncError>) -> Self {
        Self {
            result,
            calls: Vec::new(),
        }
    }
}

impl TimeSync for FakeClock {
    async fn sync(&mut self, timezone: &str, servers: &[&str]) -> Result<u64, TimeSyncError> {
        self.calls.push((
            timezone.to_owned(),
            servers.iter().map(|s| (*s).to_owned()).collect(),
        ));
        self.result
    }
}
