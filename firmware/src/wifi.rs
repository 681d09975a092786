//! Wi-Fi station on esp-radio + embassy-net
//!
//! The radio, the embassy-net stack and its runner task are set up at boot;
//! this wraps them as the pipeline's `Network`. Joining polls for link and a
//! DHCP lease every 500 ms inside the caller's timeout.

use core::net::Ipv4Addr;
use core::time::Duration as CoreDuration;

use embassy_net::Stack;
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::TcpClient;
use embassy_time::{Duration, Timer, with_timeout};
use esp_println::println;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use inkwake_core::network::{JoinError, Network};

/// One socket, 1 KiB each way
pub type Tcp = TcpClient<'static, 1, 1024, 1024>;

/// Link and address poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Station interface with its TCP client and resolver
pub struct WifiNetwork {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    tcp: Tcp,
    dns: DnsSocket<'static>,
}

impl WifiNetwork {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>, tcp: Tcp) -> Self {
        Self {
            controller,
            stack,
            tcp,
            dns: DnsSocket::new(stack),
        }
    }

    /// Associate, retrying until the deadline cuts us off
    async fn connect(&mut self) {
        loop {
            match self.controller.connect_async().await {
                Ok(_) => {
                    println!("WiFi connected!");
                    return;
                }
                Err(e) => {
                    println!("Failed to connect: {e:?}, retrying...");
                    Timer::after(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Wait for network stack to get an IP address
    async fn wait_for_ip(&self) {
        println!("Waiting for link...");
        while !self.stack.is_link_up() {
            Timer::after(POLL_INTERVAL).await;
        }

        println!("Waiting for IP...");
        while self.stack.config_v4().is_none() {
            Timer::after(POLL_INTERVAL).await;
        }
    }
}

impl Network for WifiNetwork {
    type Tcp = Tcp;
    type Dns = DnsSocket<'static>;

    async fn join(&mut self, ssid: &str, secret: &str, timeout: CoreDuration) -> Result<(), JoinError> {
        let client_config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(secret.into()),
        );
        self.controller.set_config(&client_config).map_err(|e| {
            println!("WiFi config rejected: {:?}", e);
            JoinError::Driver
        })?;

        if !matches!(self.controller.is_started(), Ok(true)) {
            println!("Starting WiFi...");
            self.controller.start_async().await.map_err(|e| {
                println!("WiFi start failed: {:?}", e);
                JoinError::Driver
            })?;
        }

        let deadline = Duration::from_millis(timeout.as_millis() as u64);
        let joined = with_timeout(deadline, async {
            self.connect().await;
            self.wait_for_ip().await;
        })
        .await;

        match joined {
            Ok(()) => Ok(()),
            Err(_) => {
                println!("No link/address after {} ms", deadline.as_millis());
                Err(JoinError::Timeout)
            }
        }
    }

    fn address(&self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }

    /// Disconnect and stop WiFi to save power
    async fn release(&mut self) {
        if let Err(e) = self.controller.disconnect_async().await {
            println!("Disconnect error (may already be disconnected): {:?}", e);
        }
        if let Err(e) = self.controller.stop_async().await {
            println!("Stop error: {:?}", e);
        }
        println!("WiFi stopped");
    }

    fn tcp(&self) -> &Tcp {
        &self.tcp
    }

    fn dns(&self) -> &DnsSocket<'static> {
        &self.dns
    }
}
