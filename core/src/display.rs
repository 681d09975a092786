//! Display collaborator

use crate::pbm::Bitmap;

/// Display error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// SPI or GPIO failure talking to the panel
    Interface,
    /// Panel stayed busy past its deadline
    Timeout,
    /// Bitmap doesn't match the panel resolution
    Geometry { width: u32, height: u32 },
}

/// E-paper panel, driven as a black box.
///
/// The bitmap is in the panel's native packed format: 1 bit per pixel,
/// MSB first, 1 = ink.
pub trait Display {
    /// Power up and configure the panel
    fn initialize(&mut self) -> Result<(), DisplayError>;

    /// Transfer `bitmap` and refresh, returning once the refresh is done
    fn render(&mut self, bitmap: &Bitmap) -> Result<(), DisplayError>;

    fn delay_ms(&mut self, ms: u32);

    /// Enter deep sleep. The panel keeps showing the last image.
    fn sleep(&mut self) -> Result<(), DisplayError>;
}
