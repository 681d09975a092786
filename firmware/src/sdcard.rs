//! SD card storage
//!
//! Implements the pipeline's `Storage` on a FAT volume through
//! `embedded-sdmmc` raw handles. Paths are absolute and every component must
//! be a valid 8.3 short name (`/CONFIG.JSN`, `/IMAGES/CAL.PBM`).
//!
//! FAT has no rename in `embedded-sdmmc`, so `rename` copies the file and
//! deletes the source. The config store tolerates a crash halfway through
//! that copy: the source (the temporary document) survives until the copy
//! is complete.

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{
    Error as SdError, Mode, RawDirectory, RawFile, RawVolume, SdCard, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};
use esp_println::println;
use inkwake_core::storage::{OpenMode, Storage, StorageError};

/// Copy buffer for `rename`, one sector
const COPY_BUF_SIZE: usize = 512;

/// Fixed time source (there is no RTC time on a cold wake)
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55, // 2025
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

fn map_err<E: core::fmt::Debug>(e: SdError<E>) -> StorageError {
    match e {
        SdError::NotFound => StorageError::NotFound,
        SdError::FileAlreadyExists | SdError::DirAlreadyExists => StorageError::AlreadyExists,
        SdError::FilenameError(_) => StorageError::InvalidPath,
        SdError::DeviceError(e) => {
            println!("SD card error: {:?}", e);
            StorageError::Filesystem
        }
        _ => StorageError::Filesystem,
    }
}

/// First FAT volume on the card
pub struct SdStorage<SPI: SpiDevice, DELAY: DelayNs> {
    volume_mgr: VolumeManager<SdCard<SPI, DELAY>, FixedTimeSource>,
    volume: RawVolume,
}

impl<SPI, DELAY> SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    /// Probe the card and open its first volume
    pub fn new(spi: SPI, delay: DELAY) -> Result<Self, StorageError> {
        let sd_card = SdCard::new(spi, delay);

        // Get card size to verify it's working
        match sd_card.num_bytes() {
            Ok(size) => println!("SD card size: {} MB", size / 1024 / 1024),
            Err(e) => {
                println!("Failed to read SD card size: {:?}", e);
                return Err(StorageError::Filesystem);
            }
        }

        let volume_mgr = VolumeManager::new(sd_card, FixedTimeSource);
        let volume = volume_mgr.open_raw_volume(VolumeIdx(0)).map_err(map_err)?;

        Ok(Self { volume_mgr, volume })
    }

    /// Open the directory holding `path`, returning it with the final
    /// component. The caller closes the directory.
    fn open_parent<'p>(&mut self, path: &'p str) -> Result<(RawDirectory, &'p str), StorageError> {
        let path = path.strip_prefix('/').ok_or(StorageError::InvalidPath)?;
        let (dirs, name) = path.rsplit_once('/').unwrap_or(("", path));
        if name.is_empty() {
            return Err(StorageError::InvalidPath);
        }

        let mut dir = self
            .volume_mgr
            .open_root_dir(self.volume)
            .map_err(map_err)?;
        for part in dirs.split('/').filter(|part| !part.is_empty()) {
            let next = self.volume_mgr.open_dir(dir, part);
            let _ = self.volume_mgr.close_dir(dir);
            dir = next.map_err(map_err)?;
        }
        Ok((dir, name))
    }

    fn open_mode(&mut self, path: &str, mode: Mode) -> Result<RawFile, StorageError> {
        let (dir, name) = self.open_parent(path)?;
        let file = self.volume_mgr.open_file_in_dir(dir, name, mode);
        let _ = self.volume_mgr.close_dir(dir);
        file.map_err(map_err)
    }

    fn copy(&mut self, from: RawFile, to: RawFile) -> Result<usize, StorageError> {
        let mut buf = [0u8; COPY_BUF_SIZE];
        let mut total = 0;
        loop {
            let n = self
                .volume_mgr
                .read(from, &mut buf)
                .map_err(|_| StorageError::Read)?;
            if n == 0 {
                return Ok(total);
            }
            self.volume_mgr
                .write(to, &buf[..n])
                .map_err(|_| StorageError::Write)?;
            total += n;
        }
    }
}

impl<SPI, DELAY> Storage for SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    type File = RawFile;

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<RawFile, StorageError> {
        let mode = match mode {
            OpenMode::Read => Mode::ReadOnly,
            OpenMode::Truncate => Mode::ReadWriteCreateOrTruncate,
        };
        self.open_mode(path, mode)
    }

    fn read(&mut self, file: &mut RawFile, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.volume_mgr
            .read(*file, buf)
            .map_err(|_| StorageError::Read)
    }

    fn write(&mut self, file: &mut RawFile, data: &[u8]) -> Result<(), StorageError> {
        self.volume_mgr
            .write(*file, data)
            .map_err(|_| StorageError::Write)
    }

    fn close(&mut self, file: RawFile) -> Result<(), StorageError> {
        self.volume_mgr.close_file(file).map_err(map_err)
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        let (dir, name) = self.open_parent(path)?;
        let result = self.volume_mgr.delete_file_in_dir(dir, name);
        let _ = self.volume_mgr.close_dir(dir);
        result.map_err(map_err)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let source = self.open_mode(from, Mode::ReadOnly)?;
        // ReadWriteCreate refuses an existing target
        let target = match self.open_mode(to, Mode::ReadWriteCreate) {
            Ok(target) => target,
            Err(e) => {
                let _ = self.volume_mgr.close_file(source);
                return Err(e);
            }
        };

        let copied = self.copy(source, target);
        let _ = self.volume_mgr.close_file(source);
        let closed = self.volume_mgr.close_file(target).map_err(map_err);

        match copied.and_then(|len| closed.map(|_| len)) {
            Ok(len) => {
                println!("Moved {} -> {} ({} bytes)", from, to, len);
                self.remove(from)
            }
            Err(e) => {
                // Don't leave a partial target behind
                let _ = self.remove(to);
                Err(e)
            }
        }
    }

    fn make_dir(&mut self, path: &str) -> Result<(), StorageError> {
        let (dir, name) = self.open_parent(path)?;
        let result = self.volume_mgr.make_dir_in_dir(dir, name);
        let _ = self.volume_mgr.close_dir(dir);
        result.map_err(map_err)
    }
}
