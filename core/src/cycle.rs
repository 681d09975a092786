//! One wake cycle: load config, join, fetch if newer, render, persist, power down
//!
//! ```text
//! Idle -> ConfigLoaded -> NetworkJoined -> FetchEvaluated
//!   FetchEvaluated -> SkippedRender -> Persisted            (nothing new)
//!   FetchEvaluated -> Rendered -> Persisted                 (new bitmap)
//!   Persisted -> ShutdownSignaled
//!   any failure -> Failed (power-off line still asserted)
//! ```
//!
//! The watermark is written back only after the new bitmap made it onto the
//! panel. A render failure leaves the old watermark in place, so the next
//! wake downloads and tries again.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{error, info, warn};

use crate::config::{self, ConfigError};
use crate::date::Timestamp;
use crate::display::{Display, DisplayError};
use crate::fetch::{self, FetchError, FetchOutcome};
use crate::network::{JoinError, Network};
use crate::pbm::{self, Bitmap, DecodeError};
use crate::storage::Storage;

/// How long to wait for association and an address
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause after a refresh before the panel is put to sleep
pub const RENDER_SETTLE_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ConfigLoaded,
    NetworkJoined,
    FetchEvaluated,
    Rendered,
    SkippedRender,
    Persisted,
    ShutdownSignaled,
    Failed,
}

/// How a successful cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New bitmap rendered and its timestamp persisted
    Updated { watermark: Timestamp },
    /// Remote not newer than the watermark
    NotModified,
    /// Downloaded, but without a usable `Last-Modified`; not rendered
    Unversioned,
}

/// Wake cycle error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    Config(ConfigError),
    Join(JoinError),
    Fetch(FetchError),
    Decode(DecodeError),
    Display(DisplayError),
    /// Rendered, but the new watermark couldn't be saved
    Persist(ConfigError),
}

impl From<ConfigError> for CycleError {
    fn from(e: ConfigError) -> Self {
        CycleError::Config(e)
    }
}

impl From<JoinError> for CycleError {
    fn from(e: JoinError) -> Self {
        CycleError::Join(e)
    }
}

impl From<FetchError> for CycleError {
    fn from(e: FetchError) -> Self {
        CycleError::Fetch(e)
    }
}

impl From<DecodeError> for CycleError {
    fn from(e: DecodeError) -> Self {
        CycleError::Decode(e)
    }
}

impl From<DisplayError> for CycleError {
    fn from(e: DisplayError) -> Self {
        CycleError::Display(e)
    }
}

/// Fixed locations on the storage medium
#[derive(Debug, Clone, Copy)]
pub struct Paths {
    /// Configuration document
    pub config: &'static str,
    /// Bitmap handed to the panel. Downloads go to the configured
    /// `target_path`, which is only the same file if configured that way.
    pub render_source: &'static str,
}

/// Owns every collaborator for the duration of one wake
pub struct WakeCycle<S, N, D, P> {
    storage: S,
    network: N,
    display: D,
    power: P,
    paths: Paths,
    stage: Stage,
}

impl<S, N, D, P> WakeCycle<S, N, D, P>
where
    S: Storage,
    N: Network,
    D: Display,
    P: OutputPin,
{
    pub fn new(storage: S, network: N, display: D, power: P, paths: Paths) -> Self {
        Self {
            storage,
            network,
            display,
            power,
            paths,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn into_parts(self) -> (S, N, D, P) {
        (self.storage, self.network, self.display, self.power)
    }

    /// Run the cycle to completion. The power-off line is asserted on return,
    /// whether the cycle succeeded or not.
    pub async fn run(&mut self) -> Result<CycleOutcome, CycleError> {
        let result = self.update().await;

        match &result {
            Ok(outcome) => info!("Wake cycle complete: {:?}", outcome),
            Err(e) => {
                error!("Wake cycle failed after {:?}: {:?}", self.stage, e);
                self.enter(Stage::Failed);
            }
        }

        info!("Signaling power-down");
        if let Err(e) = self.power.set_high() {
            error!("Power-off line: {:?}", e);
        }
        if result.is_ok() {
            self.enter(Stage::ShutdownSignaled);
        }
        result
    }

    async fn update(&mut self) -> Result<CycleOutcome, CycleError> {
        let mut config = config::load(&mut self.storage, self.paths.config)?;
        self.enter(Stage::ConfigLoaded);

        info!("Joining {}", config.network_name);
        if let Err(e) = self
            .network
            .join(&config.network_name, &config.network_secret, JOIN_TIMEOUT)
            .await
        {
            self.network.release().await;
            return Err(e.into());
        }
        if let Some(ip) = self.network.address() {
            info!("Got IP: {}", ip);
        }
        self.enter(Stage::NetworkJoined);

        info!("Fetching {}", config.source_url);
        let fetched = fetch::fetch_if_newer(
            self.network.tcp(),
            self.network.dns(),
            &mut self.storage,
            &config.source_url,
            &config.target_path,
            config.last_modified,
        )
        .await;
        self.network.release().await;
        info!("Network released");
        let outcome = fetched?;
        self.enter(Stage::FetchEvaluated);

        let watermark = match outcome {
            FetchOutcome::NotModified { .. } => {
                info!("Nothing newer than {}, display left as is", config.last_modified);
                self.skip_render();
                return Ok(CycleOutcome::NotModified);
            }
            FetchOutcome::Updated { modified: None, bytes } => {
                warn!("Downloaded {} bytes without a timestamp, not rendering", bytes);
                self.skip_render();
                return Ok(CycleOutcome::Unversioned);
            }
            FetchOutcome::Updated {
                modified: Some(watermark),
                ..
            } => watermark,
        };

        let bitmap = pbm::decode_file(&mut self.storage, self.paths.render_source, config.invert)?;
        info!(
            "Loaded {}x{} bitmap from {}",
            bitmap.width(),
            bitmap.height(),
            self.paths.render_source
        );
        self.show(&bitmap)?;
        self.enter(Stage::Rendered);

        info!("Updating last_modified to {}", watermark);
        config.last_modified = watermark;
        config::save(&mut self.storage, self.paths.config, &config).map_err(CycleError::Persist)?;
        self.enter(Stage::Persisted);

        Ok(CycleOutcome::Updated { watermark })
    }

    fn show(&mut self, bitmap: &Bitmap) -> Result<(), DisplayError> {
        self.display.initialize()?;

        if let Err(e) = self.display.render(bitmap) {
            // Don't leave the panel powered
            if let Err(sleep_err) = self.display.sleep() {
                warn!("Display sleep after failed render: {:?}", sleep_err);
            }
            return Err(e);
        }

        self.display.delay_ms(RENDER_SETTLE_MS);
        self.display.sleep()
    }

    fn skip_render(&mut self) {
        self.enter(Stage::SkippedRender);
        self.enter(Stage::Persisted);
    }

    fn enter(&mut self, stage: Stage) {
        info!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}
