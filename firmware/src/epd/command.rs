//! Command definitions for the UC8179 controller (Waveshare 7.5" V2, 800x480 mono)

/// Display commands
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
pub enum Command {
    /// Panel Setting
    PSR = 0x00,
    /// Power Setting
    PWR = 0x01,
    /// Power Off
    POF = 0x02,
    /// Power On
    PON = 0x04,
    /// Booster Soft Start
    BTST = 0x06,
    /// Deep Sleep
    DSLP = 0x07,
    /// Data Start Transmission 1 (old frame)
    DTM1 = 0x10,
    /// Display Refresh
    DRF = 0x12,
    /// Data Start Transmission 2 (new frame)
    DTM2 = 0x13,
    /// Dual SPI
    DUSPI = 0x15,
    /// VCOM and Data Interval Setting
    CDI = 0x50,
    /// TCON Setting
    TCON = 0x60,
    /// Resolution Setting
    TRES = 0x61,
}

impl Command {
    /// Get the command address byte
    #[inline]
    pub fn addr(self) -> u8 {
        self as u8
    }
}
