//! Boot sequence and the acquisition/publication cycle
//!
//! `TelemetryApp` owns every collaborator the cycle needs. It is built once
//! by `boot` and then driven by `run`, which never returns. A failure inside
//! a cycle is logged and the next cycle starts from a clean point; the only
//! fatal outcome is failing to provision the network at boot.

use hal_abstractions::{
    DelayNs, DisplayDriver, FontSize, IdentityProvider, Radio, Restart, SensorDriver, TimeSync,
    Transport,
};

use crate::client::TelemetryClient;
use crate::config::DeviceConfig;
use crate::connectivity::{portal_name, ConnectivityError, ConnectivityManager, ConnectivityState};
use crate::point::{TelemetryPoint, TelemetryPointBuilder};
use crate::sensors::{SamplerConfig, SensorSampler};

/// Pause before the next link check while disconnected
pub const DISCONNECTED_PAUSE_MS: u32 = 1000;

/// Pause between a fatal boot error and the restart
pub const RESTART_DELAY_MS: u32 = 3000;

/// Boot-time clock synchronisation settings
#[derive(Debug, Clone, Copy)]
pub struct TimeSyncConfig {
    /// POSIX TZ string
    pub timezone: &'static str,
    /// Tried in order until one answers
    pub servers: &'static [&'static str],
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            timezone: "EST5EDT",
            servers: &["pool.ntp.org", "time.nis.gov", "time-a-g.nist.gov"],
        }
    }
}

/// Fatal boot errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// The network could not be provisioned; the device was restarted
    Provisioning(ConnectivityError),
}

impl core::fmt::Display for BootError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Provisioning(e) => write!(f, "network provisioning failed: {}", e),
        }
    }
}

impl core::error::Error for BootError {}

impl From<ConnectivityError> for BootError {
    fn from(e: ConnectivityError) -> Self {
        Self::Provisioning(e)
    }
}

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    /// Link down; nothing was sampled or sent
    Skipped,
    Published,
    /// Sampled but the write failed; the point was dropped
    PublishFailed,
}

/// Everything `boot` needs to assemble the app
pub struct AppParts<R, S, T, D, L> {
    pub radio: R,
    pub sensors: S,
    pub transport: T,
    pub display: D,
    pub delay: L,
    pub config: DeviceConfig,
    pub sampler: SamplerConfig,
    pub time_sync: TimeSyncConfig,
}

/// Application context
pub struct TelemetryApp<R, S, T, D, L> {
    connectivity: ConnectivityManager<R>,
    sampler: SensorSampler<S>,
    builder: TelemetryPointBuilder,
    client: TelemetryClient<T>,
    display: D,
    delay: L,
    sample_delay_ms: u32,
}

impl<R, S, T, D, L> TelemetryApp<R, S, T, D, L>
where
    R: Radio,
    S: SensorDriver,
    T: Transport,
    D: DisplayDriver,
    L: DelayNs,
{
    /// Bring the device up
    ///
    /// On provisioning failure waits `RESTART_DELAY_MS`, calls
    /// `restart.restart()` once and returns the error. On hardware the
    /// restart does not return.
    pub async fn boot<I, C, X>(
        parts: AppParts<R, S, T, D, L>,
        identity: &I,
        clock: &mut C,
        restart: &mut X,
    ) -> Result<Self, BootError>
    where
        I: IdentityProvider,
        C: TimeSync,
        X: Restart,
    {
        let AppParts {
            radio,
            sensors,
            transport,
            mut display,
            mut delay,
            config,
            sampler,
            time_sync,
        } = parts;
        let device_id = identity.device_id();

        info!(
            "Booting {} {} as {}",
            identity.device_class(),
            device_id,
            config.device_name.as_str()
        );
        display.render("Init", device_id, FontSize::Small).await;

        let mut sampler = SensorSampler::new(sensors, sampler);
        sampler.init_sensors().await;

        let mut connectivity = ConnectivityManager::new(radio);
        if let Err(e) = connectivity.provision(&portal_name(device_id)).await {
            error!("Fatal: {}, restarting in {} ms", e, RESTART_DELAY_MS);
            delay.delay_ms(RESTART_DELAY_MS).await;
            restart.restart();
            return Err(e.into());
        }

        match clock.sync(time_sync.timezone, time_sync.servers).await {
            Ok(unix) => info!("Clock synchronised: {} s since epoch", unix),
            Err(e) => warn!("Clock synchronisation failed: {}", e),
        }

        let builder =
            TelemetryPointBuilder::new(identity.device_class(), device_id, &config.device_name);

        let mut client = TelemetryClient::new(transport, &config);
        client.validate_connection().await;

        Ok(Self {
            connectivity,
            sampler,
            builder,
            client,
            display,
            delay,
            sample_delay_ms: config.sample_delay_ms,
        })
    }

    /// One cycle: check the link, sample, publish, wait
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.builder.begin_cycle();

        if self.connectivity.poll() != ConnectivityState::Connected {
            self.delay.delay_ms(DISCONNECTED_PAUSE_MS).await;
            return CycleOutcome::Skipped;
        }

        let sample = self
            .sampler
            .sample(&mut self.display, &mut self.delay)
            .await;
        let rssi = self.connectivity.rssi();
        let point = self.builder.build(&sample, rssi);

        let outcome = match self.client.write_point(point).await {
            Ok(()) => {
                info!("Point published");
                CycleOutcome::Published
            }
            Err(_) => CycleOutcome::PublishFailed,
        };

        self.delay.delay_ms(self.sample_delay_ms).await;
        outcome
    }

    /// Run cycles forever
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_cycle().await;
        }
    }

    pub fn connectivity(&self) -> &ConnectivityManager<R> {
        &self.connectivity
    }

    pub fn sampler(&self) -> &SensorSampler<S> {
        &self.sampler
    }

    pub fn client(&self) -> &TelemetryClient<T> {
        &self.client
    }

    pub fn point(&self) -> &TelemetryPoint {
        self.builder.point()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn delay(&self) -> &L {
        &self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;
    use crate::point::field;
    use crate::test_support::{
        FakeClock, FakeDelay, FakeDisplay, FakeIdentity, FakeRadio, FakeRestart, FakeSensors,
        FakeTransport,
    };
    use embassy_futures::block_on;
    use hal_abstractions::{LinkStatus, SensorKind, TimeSyncError};

    type App = TelemetryApp<FakeRadio, FakeSensors, FakeTransport, FakeDisplay, FakeDelay>;

    const OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    const NO_CONTENT: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\n";
    const SERVER_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";

    fn parts(
        radio: FakeRadio,
        sensors: FakeSensors,
        transport: FakeTransport,
    ) -> AppParts<FakeRadio, FakeSensors, FakeTransport, FakeDisplay, FakeDelay> {
        AppParts {
            radio,
            sensors,
            transport,
            display: FakeDisplay::default(),
            delay: FakeDelay::default(),
            config: parse(
                br#"{"device_name":"room1","sample_delay":5000,"influx_db":{"url":"http://influx.lan:8086","token":"t","org":"o","bucket":"b"}}"#,
            )
            .unwrap(),
            sampler: SamplerConfig {
                settle_ms: 10,
                ..SamplerConfig::default()
            },
            time_sync: TimeSyncConfig::default(),
        }
    }

    fn boot(parts: AppParts<FakeRadio, FakeSensors, FakeTransport, FakeDisplay, FakeDelay>) -> (Result<App, BootError>, FakeClock, FakeRestart) {
        let mut clock = FakeClock::new(Ok(1_700_000_000));
        let mut restart = FakeRestart::default();
        let app = block_on(App::boot(parts, &FakeIdentity, &mut clock, &mut restart));
        (app, clock, restart)
    }

    #[test]
    fn test_boot_sequence() {
        let (app, clock, restart) = boot(parts(
            FakeRadio::up(),
            FakeSensors::new(5, 600, 21.0, 40.0),
            FakeTransport::new().respond(OK),
        ));
        let app = app.unwrap();

        assert_eq!(
            app.display().frames(),
            [("Init", FakeIdentity::ID, FontSize::Small)]
        );
        assert_eq!(
            app.sampler().driver().initialized,
            [SensorKind::Particulate, SensorKind::Co2, SensorKind::Climate]
        );
        assert!(app.sampler().driver().calls.is_empty());
        assert_eq!(
            app.connectivity().radio().provision_calls,
            [(
                std::format!("AIRGRADIENT-{}", FakeIdentity::ID),
                crate::connectivity::PROVISIONING_TIMEOUT_SECS
            )]
        );
        assert_eq!(
            clock.calls,
            [(
                "EST5EDT".to_owned(),
                std::vec![
                    "pool.ntp.org".to_owned(),
                    "time.nis.gov".to_owned(),
                    "time-a-g.nist.gov".to_owned()
                ]
            )]
        );
        assert!(app
            .client()
            .transport()
            .sent
            .starts_with("GET /health HTTP/1.1\r\n"));
        assert_eq!(restart.count, 0);
        assert_eq!(app.point().tag("id"), Some(FakeIdentity::ID));
        assert_eq!(app.point().tag("device_name"), Some("room1"));
        assert_eq!(app.point().tag("device"), Some("STM32F405"));
    }

    #[test]
    fn test_boot_tolerates_clock_and_health_failures() {
        let mut clock = FakeClock::new(Err(TimeSyncError::AllServersFailed));
        let mut restart = FakeRestart::default();
        let parts = parts(
            FakeRadio::up(),
            FakeSensors::new(5, 600, 21.0, 40.0),
            FakeTransport::new().respond(SERVER_ERROR),
        );
        let app = block_on(App::boot(parts, &FakeIdentity, &mut clock, &mut restart));
        assert!(app.is_ok());
        assert_eq!(restart.count, 0);
    }

    #[test]
    fn test_provisioning_failure_restarts_once() {
        let (app, clock, restart) = boot(parts(
            FakeRadio::unprovisionable(),
            FakeSensors::new(5, 600, 21.0, 40.0),
            FakeTransport::new(),
        ));

        assert!(matches!(
            app,
            Err(BootError::Provisioning(ConnectivityError::ProvisioningTimeout))
        ));
        assert_eq!(restart.count, 1);
        assert!(clock.calls.is_empty());
    }

    #[test]
    fn test_disconnected_cycle_skips_everything() {
        let (app, _, _) = boot(parts(
            FakeRadio::with_links(&[LinkStatus::Down, LinkStatus::Down]),
            FakeSensors::new(5, 600, 21.0, 40.0),
            FakeTransport::new().respond(OK),
        ));
        let mut app = app.unwrap();
        let sent_at_boot = app.client().transport().sent.len();
        let connects_at_boot = app.client().transport().connects.len();

        assert_eq!(block_on(app.run_cycle()), CycleOutcome::Skipped);
        assert_eq!(block_on(app.run_cycle()), CycleOutcome::Skipped);

        assert!(app.sampler().driver().calls.is_empty());
        assert_eq!(app.client().transport().sent.len(), sent_at_boot);
        assert_eq!(app.client().transport().connects.len(), connects_at_boot);
        assert_eq!(app.delay().ms, [DISCONNECTED_PAUSE_MS, DISCONNECTED_PAUSE_MS]);
        assert_eq!(app.display().frames().len(), 1);
    }

    #[test]
    fn test_published_cycle() {
        let (app, _, _) = boot(parts(
            FakeRadio::up().with_rssi(-58),
            FakeSensors::new(-1, 600, 25.0, 40.5),
            FakeTransport::new().respond(OK).respond(NO_CONTENT),
        ));
        let mut app = app.unwrap();

        assert_eq!(block_on(app.run_cycle()), CycleOutcome::Published);

        let fields: std::vec::Vec<_> = app.point().fields().map(|(k, _)| k).collect();
        assert_eq!(fields, ["co2", "temp_c", "temp_f", "humidity", "rssi"]);
        assert_eq!(app.sampler().driver().calls, ["pm", "co2", "climate"]);

        let sent = &app.client().transport().sent;
        assert!(sent.contains("POST /api/v2/write?org=o&bucket=b HTTP/1.1\r\n"));
        assert!(sent.contains("co2=600i,"));
        assert!(sent.contains("rssi=-58i"));
        assert!(!sent.contains("pm2.5"));

        // Three settle delays, then the configured sample delay
        assert_eq!(app.delay().ms, [10, 10, 10, 5000]);
    }

    #[test]
    fn test_publish_failure_does_not_halt() {
        let (app, _, _) = boot(parts(
            FakeRadio::with_links(&[LinkStatus::Up, LinkStatus::Down, LinkStatus::Up]),
            FakeSensors::new(7, 600, 20.0, 50.0),
            FakeTransport::new()
                .respond(OK)
                .respond(SERVER_ERROR)
                .respond(NO_CONTENT),
        ));
        let mut app = app.unwrap();

        assert_eq!(block_on(app.run_cycle()), CycleOutcome::PublishFailed);
        assert!(app.point().field(field::PM25).is_some());

        // The next cycle starts from an empty field set
        assert_eq!(block_on(app.run_cycle()), CycleOutcome::Skipped);
        assert!(!app.point().has_fields());
        assert_eq!(app.point().tag("id"), Some(FakeIdentity::ID));

        assert_eq!(block_on(app.run_cycle()), CycleOutcome::Published);
        assert_eq!(app.sampler().driver().calls.len(), 6);
    }
}
