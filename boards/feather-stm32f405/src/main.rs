#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod device_id;
mod display;
mod eth;
mod network;
mod sensors;
mod storage;
mod system;
mod time;
mod tls_buffers;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART6])]
mod app {
    use super::*;
    use core::cell::RefCell;
    use defmt::{error, info};
    use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
    use embassy_futures::join::join3;
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::flash::Flash;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::i2c::{self, I2c};
    use embassy_stm32::mode::Blocking;
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::rng::Rng;
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use embassy_stm32::usart::{self, BufferedUart};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::blocking_mutex::Mutex;
    use embassy_time::Delay;
    use rand_core::RngCore;
    use static_cell::StaticCell;
    use telemetry_core::config::CONFIG_PATH;
    use telemetry_core::sensors::SamplerConfig;
    use telemetry_core::{AppParts, ConfigStore, TelemetryApp, TimeSyncConfig};

    use device_id::BoardIdentity;
    use display::OledDisplay;
    use network::{EthernetLink, NetTransport, NetworkConfig, SntpClock, SntpConfig, SocketSlot};
    use sensors::BoardSensors;
    use storage::FlashConfigStore;
    use system::SystemReset;

    type P<T> = embassy_stm32::Peri<'static, T>;

    type I2cBus = Mutex<CriticalSectionRawMutex, RefCell<I2c<'static, Blocking>>>;

    /// W5500 FeatherWing on SPI2
    struct NetworkPeripherals {
        spi: P<peripherals::SPI2>,
        sck: P<peripherals::PB13>,
        mosi: P<peripherals::PB15>,
        miso: P<peripherals::PB14>,
        cs: P<peripherals::PC6>,
        reset: P<peripherals::PC3>,
        int: P<peripherals::PC2>,
        exti: P<peripherals::EXTI2>,
        dma_tx: P<peripherals::DMA1_CH4>,
        dma_rx: P<peripherals::DMA1_CH3>,
        rng: P<peripherals::RNG>,
    }

    /// Sensors, display and config flash
    struct NodePeripherals {
        pms_uart: P<peripherals::USART3>,
        pms_tx: P<peripherals::PB10>,
        pms_rx: P<peripherals::PB11>,
        s8_uart: P<peripherals::UART4>,
        s8_tx: P<peripherals::PA0>,
        s8_rx: P<peripherals::PA1>,
        i2c: P<peripherals::I2C1>,
        scl: P<peripherals::PB6>,
        sda: P<peripherals::PB7>,
        flash: P<peripherals::FLASH>,
    }

    embassy_stm32::bind_interrupts!(struct Irqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
        USART3 => usart::BufferedInterruptHandler<peripherals::USART3>;
        UART4 => usart::BufferedInterruptHandler<peripherals::UART4>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Sensor node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (RNG clock)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("PLL configured: SYSCLK=84MHz, PLLQ=48MHz for RNG");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
            rng: p.RNG,
        };

        let node_periph = NodePeripherals {
            pms_uart: p.USART3,
            pms_tx: p.PB10,
            pms_rx: p.PB11,
            s8_uart: p.UART4,
            s8_tx: p.PA0,
            s8_rx: p.PA1,
            i2c: p.I2C1,
            scl: p.PB6,
            sda: p.PB7,
            flash: p.FLASH,
        };

        heartbeat::spawn().ok();
        telemetry_task::spawn(net_periph, node_periph).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat task
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Runs the network stack and the telemetry cycle side by side
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn telemetry_task(
        _cx: telemetry_task::Context,
        net: NetworkPeripherals,
        node: NodePeripherals,
    ) -> ! {
        use embassy_net::{Config, StackResources};

        // Config is read before anything else touches the network
        let flash = Flash::new_blocking(node.flash);
        let device_config = ConfigStore::new(FlashConfigStore::new(flash))
            .load_or_default(CONFIG_PATH)
            .await;

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            net.spi,
            net.sck,
            net.mosi,
            net.miso,
            net.dma_tx,
            net.dma_rx,
            spi_config,
        );

        let eth_periph = eth::EthPeripherals {
            spi,
            cs: Output::new(net.cs, Level::High, Speed::VeryHigh),
            reset: Output::new(net.reset, Level::High, Speed::Low),
            int: ExtiInput::new(net.int, net.exti, Pull::Up),
        };

        let mac_addr = network::mac_from_uid(device_id::uid());
        let (device, w5500_runner) = match eth::init_w5500(eth_periph, mac_addr).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Ethernet unavailable: {}", e);
                Mono::delay(3.secs()).await;
                cortex_m::peripheral::SCB::sys_reset();
            }
        };

        let mut rng = Rng::new(net.rng, Irqs);
        let seed = rng.next_u64();

        static RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            seed,
        );
        info!("Network stack initialized with DHCP");

        let mut uart_config = usart::Config::default();
        uart_config.baudrate = 9600;

        static PMS_BUFS: StaticCell<([u8; 64], [u8; 128])> = StaticCell::new();
        let (pms_tx_buf, pms_rx_buf) = PMS_BUFS.init(([0; 64], [0; 128]));
        static S8_BUFS: StaticCell<([u8; 32], [u8; 32])> = StaticCell::new();
        let (s8_tx_buf, s8_rx_buf) = S8_BUFS.init(([0; 32], [0; 32]));

        let pms_uart = BufferedUart::new(
            node.pms_uart,
            node.pms_rx,
            node.pms_tx,
            pms_tx_buf,
            pms_rx_buf,
            Irqs,
            uart_config,
        );
        let s8_uart = BufferedUart::new(
            node.s8_uart,
            node.s8_rx,
            node.s8_tx,
            s8_tx_buf,
            s8_rx_buf,
            Irqs,
            uart_config,
        );
        let (pms_uart, s8_uart) = match (pms_uart, s8_uart) {
            (Ok(pms), Ok(s8)) => (pms, s8),
            _ => {
                error!("Sensor UART configuration rejected");
                Mono::delay(3.secs()).await;
                cortex_m::peripheral::SCB::sys_reset();
            }
        };

        let mut i2c_config = i2c::Config::default();
        i2c_config.frequency = Hertz(100_000);
        static I2C_BUS: StaticCell<I2cBus> = StaticCell::new();
        let i2c_bus: &'static I2cBus = I2C_BUS.init(Mutex::new(RefCell::new(I2c::new_blocking(
            node.i2c, node.scl, node.sda, i2c_config,
        ))));

        let sensors = BoardSensors::new(pms_uart, s8_uart, I2cDevice::new(i2c_bus));
        let oled = OledDisplay::new(I2cDevice::new(i2c_bus));

        static SOCKET: StaticCell<SocketSlot> = StaticCell::new();
        let socket = SOCKET.init(SocketSlot::new());

        let app_logic = async {
            let parts = AppParts {
                radio: EthernetLink::new(stack),
                sensors,
                transport: NetTransport::new(stack, rng, NetworkConfig::default(), socket),
                display: oled,
                delay: Delay,
                config: device_config,
                sampler: SamplerConfig::default(),
                time_sync: TimeSyncConfig::default(),
            };
            let identity = BoardIdentity::new();
            let mut clock = SntpClock::new(stack, SntpConfig::default());
            let mut restart = SystemReset;

            match TelemetryApp::boot(parts, &identity, &mut clock, &mut restart).await {
                Ok(mut telemetry) => telemetry.run().await,
                Err(e) => {
                    // Unreachable on hardware: the restart does not return
                    error!("Boot failed: {}", e);
                    cortex_m::peripheral::SCB::sys_reset();
                }
            }
        };

        join3(w5500_runner.run(), net_runner.run(), app_logic).await;
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
