//! Driver for the Waveshare 7.5inch e-Paper V2 (UC8179 controller, 800x480,
//! black and white).
//!
//! Refreshes are full-screen and blocking. BUSY is polled with a deadline so a
//! disconnected panel can't hang the wake cycle.

mod command;

use command::Command;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use inkwake_core::display::{Display, DisplayError};
use inkwake_core::pbm::Bitmap;

/// Display width in pixels
pub const WIDTH: u32 = 800;
/// Display height in pixels
pub const HEIGHT: u32 = 480;
/// Buffer size: 1 bit per pixel
pub const BUFFER_SIZE: usize = (WIDTH as usize * HEIGHT as usize) / 8;

/// Longest BUSY wait (a full refresh takes about 4 s)
const BUSY_TIMEOUT_MS: u32 = 30_000;
const BUSY_POLL_MS: u32 = 10;

/// Bytes per SPI transfer when streaming a frame
const CHUNK: usize = 256;

/// Driver for the 7.5" mono e-paper display
pub struct Epd7in5<SPI, BUSY, DC, RST, DELAY> {
    spi: SPI,
    busy: BUSY,
    dc: DC,
    rst: RST,
    delay: DELAY,
}

impl<SPI, BUSY, DC, RST, DELAY> Epd7in5<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    /// Create a driver. The panel isn't touched until [`Display::initialize`].
    pub fn new(spi: SPI, busy: BUSY, dc: DC, rst: RST, delay: DELAY) -> Self {
        Self {
            spi,
            busy,
            dc,
            rst,
            delay,
        }
    }

    /// Hardware reset sequence
    fn hardware_reset(&mut self) {
        let _ = self.rst.set_high();
        self.delay.delay_ms(20);
        let _ = self.rst.set_low();
        self.delay.delay_ms(2);
        let _ = self.rst.set_high();
        self.delay.delay_ms(20);
    }

    /// Wait for the display to become idle (BUSY pin high)
    fn wait_until_idle(&mut self) -> Result<(), DisplayError> {
        let mut waited = 0;
        // BUSY is active low on this display
        while self.busy.is_low().map_err(|_| DisplayError::Interface)? {
            if waited >= BUSY_TIMEOUT_MS {
                return Err(DisplayError::Timeout);
            }
            self.delay.delay_ms(BUSY_POLL_MS);
            waited += BUSY_POLL_MS;
        }
        Ok(())
    }

    /// Send a command to the display
    fn send_command(&mut self, command: Command) -> Result<(), DisplayError> {
        let _ = self.dc.set_low();
        self.spi
            .write(&[command.addr()])
            .map_err(|_| DisplayError::Interface)
    }

    /// Send data to the display
    fn send_data(&mut self, data: &[u8]) -> Result<(), DisplayError> {
        let _ = self.dc.set_high();
        self.spi.write(data).map_err(|_| DisplayError::Interface)
    }

    /// Send command followed by data
    fn cmd_with_data(&mut self, command: Command, data: &[u8]) -> Result<(), DisplayError> {
        self.send_command(command)?;
        self.send_data(data)
    }

    /// Stream a frame, optionally complemented, in `CHUNK`-sized transfers
    fn send_frame(&mut self, command: Command, frame: &[u8], complement: bool) -> Result<(), DisplayError> {
        self.send_command(command)?;
        let _ = self.dc.set_high();

        let mut chunk = [0u8; CHUNK];
        for part in frame.chunks(CHUNK) {
            for (out, byte) in chunk.iter_mut().zip(part) {
                *out = if complement { !*byte } else { *byte };
            }
            self.spi
                .write(&chunk[..part.len()])
                .map_err(|_| DisplayError::Interface)?;
        }
        Ok(())
    }
}

impl<SPI, BUSY, DC, RST, DELAY> Display for Epd7in5<SPI, BUSY, DC, RST, DELAY>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    DC: OutputPin,
    RST: OutputPin,
    DELAY: DelayNs,
{
    fn initialize(&mut self) -> Result<(), DisplayError> {
        self.hardware_reset();

        // VGH=20V, VGL=-20V, VDH=15V, VDL=-15V
        self.cmd_with_data(Command::PWR, &[0x07, 0x07, 0x3F, 0x3F])?;
        self.cmd_with_data(Command::BTST, &[0x17, 0x17, 0x28, 0x17])?;

        self.send_command(Command::PON)?;
        self.delay.delay_ms(100);
        self.wait_until_idle()?;

        // KW mode, LUT from OTP
        self.cmd_with_data(Command::PSR, &[0x1F])?;

        // Resolution: 800x480 (0x0320 x 0x01E0)
        self.cmd_with_data(Command::TRES, &[0x03, 0x20, 0x01, 0xE0])?;

        self.cmd_with_data(Command::DUSPI, &[0x00])?;
        self.cmd_with_data(Command::CDI, &[0x10, 0x07])?;
        self.cmd_with_data(Command::TCON, &[0x22])?;

        Ok(())
    }

    fn render(&mut self, bitmap: &Bitmap) -> Result<(), DisplayError> {
        if bitmap.width() != WIDTH
            || bitmap.height() != HEIGHT
            || bitmap.as_bytes().len() != BUFFER_SIZE
        {
            return Err(DisplayError::Geometry {
                width: bitmap.width(),
                height: bitmap.height(),
            });
        }

        // DTM1 takes the frame with 1 = white, DTM2 with 1 = black
        self.send_frame(Command::DTM1, bitmap.as_bytes(), true)?;
        self.send_frame(Command::DTM2, bitmap.as_bytes(), false)?;

        self.send_command(Command::DRF)?;
        self.delay.delay_ms(100);
        self.wait_until_idle()
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        self.send_command(Command::POF)?;
        self.wait_until_idle()?;

        self.cmd_with_data(Command::DSLP, &[0xA5])?;
        self.delay.delay_ms(2);

        Ok(())
    }
}
