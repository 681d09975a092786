#![no_std]

extern crate alloc;

pub mod epd;
pub mod sdcard;
pub mod wifi;
