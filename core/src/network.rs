//! Network collaborator
//!
//! Joining and leaving the wireless network is board specific. Once joined,
//! the board hands out TCP and DNS handles implementing the
//! `embedded-nal-async` traits, which is what `embassy-net`'s `TcpClient`
//! and `DnsSocket` provide.

use core::net::Ipv4Addr;
use core::time::Duration;

use embedded_nal_async::{Dns, TcpConnect};

/// Network join error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// No link and address within the join timeout
    Timeout,
    /// Radio driver rejected the request
    Driver,
}

/// Wireless network handle
#[allow(async_fn_in_trait)]
pub trait Network {
    type Tcp: TcpConnect;
    type Dns: Dns;

    /// Associate and wait for an address, giving up after `timeout`
    async fn join(&mut self, ssid: &str, secret: &str, timeout: Duration) -> Result<(), JoinError>;

    /// Address assigned by the join, if any
    fn address(&self) -> Option<Ipv4Addr>;

    /// Disconnect and power the radio down. Safe to call when not joined.
    async fn release(&mut self);

    fn tcp(&self) -> &Self::Tcp;

    fn dns(&self) -> &Self::Dns;
}
