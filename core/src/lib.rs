//! inkwake core - the conditional-fetch and safe-update pipeline
//!
//! Everything here is hardware independent. Board support implements the
//! collaborator traits ([`storage::Storage`], [`network::Network`],
//! [`display::Display`], and `embedded_hal::digital::OutputPin` for the
//! power-off line) and hands them to [`cycle::WakeCycle`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod cycle;
pub mod date;
pub mod display;
pub mod fetch;
pub mod http;
pub mod network;
pub mod pbm;
pub mod storage;

#[cfg(test)]
mod testing;
