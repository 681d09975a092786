//! inkwake firmware - ESP32-S3 e-paper frame that wakes, refreshes, and powers off
//!
//! Everything the device needs at runtime lives on the SD card:
//! - `/CONFIG.JSN`: network credentials, bitmap URL, refresh watermark
//! - `/CALENDAR.PBM`: the bitmap shown on the panel
//!
//! One wake cycle runs, then the power-off line goes high so the external
//! power timer can cut the supply. If power isn't cut, the chip deep sleeps
//! and retries after `FALLBACK_SLEEP_SECS`.

#![no_std]
#![no_main]

extern crate alloc;

use core::time::Duration as CoreDuration;

use embassy_executor::Spawner;
use embassy_net::{
    Runner, Stack, StackResources,
    tcp::client::{TcpClient, TcpClientState},
};
use embassy_time::{Delay, Duration};
use embedded_hal::delay::DelayNs;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    ram,
    rng::Rng,
    rtc_cntl::{Rtc, sleep::TimerWakeupSource},
    spi::{
        Mode,
        master::{Config as SpiConfig, Spi},
    },
    time::Rate,
    timer::timg::TimerGroup,
};
use esp_println::println;
use esp_radio::{
    Controller,
    wifi::{Config as WifiConfig, WifiDevice},
};
use inkwake_core::cycle::{Paths, WakeCycle};
use inkwake_firmware::epd::Epd7in5;
use inkwake_firmware::sdcard::SdStorage;
use inkwake_firmware::wifi::{Tcp, WifiNetwork};

esp_bootloader_esp_idf::esp_app_desc!();

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

const PATHS: Paths = Paths {
    config: "/CONFIG.JSN",
    render_source: "/CALENDAR.PBM",
};

/// Deep sleep length when the power-off line didn't cut the supply (1 hour)
const FALLBACK_SLEEP_SECS: u64 = 60 * 60;

/// Socket read/write timeout
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    // Init logger first so we can see any early crashes
    esp_println::logger::init_logger_from_env();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Power-off line: low while working, high once it's safe to cut power
    let mut done = Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default());
    // Status LED (active low), lit for the whole wake
    let _status_led = Output::new(peripherals.GPIO45, Level::Low, OutputConfig::default());
    let mut rtc = Rtc::new(peripherals.LPWR);
    let mut delay = Delay;

    println!("Boot! Wake reason: {:?}", esp_hal::rtc_cntl::wakeup_cause());

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 64 * 1024);
    esp_alloc::heap_allocator!(size: 36 * 1024);
    // Bitmap buffer (48 KB) and radio buffers
    esp_alloc::psram_allocator!(&peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(
        timg0.timer0,
        #[cfg(target_arch = "riscv32")]
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT)
            .software_interrupt0,
    );
    println!("RTOS started");

    // ==================== SD Card ====================
    // SD card SPI pins: CS=GPIO38, CLK=GPIO39, MISO=GPIO40, MOSI=GPIO41
    let Ok(sd_spi) = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(20))
            .with_mode(Mode::_0),
    ) else {
        println!("SD SPI init failed");
        power_down(&mut done, &mut rtc, &mut delay);
    };
    let sd_spi = sd_spi
        .with_sck(peripherals.GPIO39)
        .with_mosi(peripherals.GPIO41)
        .with_miso(peripherals.GPIO40);
    let sd_cs = Output::new(peripherals.GPIO38, Level::High, OutputConfig::default());
    let Ok(sd_spi_device) = ExclusiveDevice::new_no_delay(sd_spi, sd_cs);

    let storage = match SdStorage::new(sd_spi_device, Delay) {
        Ok(storage) => storage,
        Err(e) => {
            println!("SD card init failed: {:?}", e);
            power_down(&mut done, &mut rtc, &mut delay);
        }
    };

    // ==================== E-Paper Display ====================
    // DC=GPIO8, CS=GPIO9, SCK=GPIO10, MOSI=GPIO11, RST=GPIO12, BUSY=GPIO13
    let Ok(epd_spi) = Spi::new(
        peripherals.SPI3,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(10))
            .with_mode(Mode::_0),
    ) else {
        println!("EPD SPI init failed");
        power_down(&mut done, &mut rtc, &mut delay);
    };
    let epd_spi = epd_spi
        .with_sck(peripherals.GPIO10)
        .with_mosi(peripherals.GPIO11);
    let cs = Output::new(peripherals.GPIO9, Level::High, OutputConfig::default());
    let Ok(epd_spi_device) = ExclusiveDevice::new_no_delay(epd_spi, cs);

    let busy = Input::new(
        peripherals.GPIO13,
        InputConfig::default().with_pull(Pull::Up),
    );
    let dc = Output::new(peripherals.GPIO8, Level::Low, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO12, Level::High, OutputConfig::default());
    let epd = Epd7in5::new(epd_spi_device, busy, dc, rst, Delay);

    // ==================== WiFi ====================
    let ctrl = match esp_radio::init() {
        Ok(ctrl) => mk_static!(Controller<'static>, ctrl),
        Err(e) => {
            println!("Radio init failed: {:?}", e);
            power_down(&mut done, &mut rtc, &mut delay);
        }
    };
    let (wifi_ctrl, ifaces) = match esp_radio::wifi::new(ctrl, peripherals.WIFI, WifiConfig::default()) {
        Ok(wifi) => wifi,
        Err(e) => {
            println!("WiFi init failed: {:?}", e);
            power_down(&mut done, &mut rtc, &mut delay);
        }
    };

    let rng = Rng::new();
    let net_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, runner) = embassy_net::new(
        ifaces.sta,
        net_config,
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        rng.random() as u64,
    );
    let stack = mk_static!(Stack<'static>, stack);
    spawner.spawn(net_task(runner)).ok();

    let tcp_state = mk_static!(TcpClientState<1, 1024, 1024>, TcpClientState::new());
    let mut tcp: Tcp = TcpClient::new(*stack, tcp_state);
    tcp.set_timeout(Some(SOCKET_TIMEOUT));
    let network = WifiNetwork::new(wifi_ctrl, *stack, tcp);

    // ==================== Wake Cycle ====================
    let mut cycle = WakeCycle::new(storage, network, epd, done, PATHS);
    match cycle.run().await {
        Ok(outcome) => println!("Done: {:?}. Shutting down.", outcome),
        Err(e) => println!("Cycle failed: {:?}", e),
    }

    // Only reached if the power-off line didn't cut the supply
    println!("Power still on, falling back to deep sleep");
    enter_deep_sleep(&mut rtc, &mut delay, FALLBACK_SLEEP_SECS);
}

/// Assert the power-off line, then deep sleep in case nobody's listening
fn power_down(done: &mut Output<'_>, rtc: &mut Rtc, delay: &mut Delay) -> ! {
    done.set_high();
    enter_deep_sleep(rtc, delay, FALLBACK_SLEEP_SECS)
}

/// Enter deep sleep with a timer wake source
fn enter_deep_sleep(rtc: &mut Rtc, delay: &mut Delay, seconds: u64) -> ! {
    let timer = TimerWakeupSource::new(CoreDuration::from_secs(seconds));

    // Small delay to let serial output flush
    delay.delay_ms(100);

    // Enter deep sleep (never returns - device reboots on wake)
    rtc.sleep_deep(&[&timer])
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
