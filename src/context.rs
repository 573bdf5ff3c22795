//! Application context.
//!
//! Owns the device handle, the settings document, and the process-wide
//! device claim. The physical rig must never be initialized twice while a
//! handle is live, so constructing a second context fails fast instead of
//! relying on callers to remember.
//!
//! Shutdown runs three exit hooks: power off the motors, flush the last
//! known carriage position into the settings document, release the sampling
//! channel. All three are best-effort and never abort once shutdown has
//! begun.

use crate::config::{CalibrationStore, Settings};
use crate::error::{GradError, GradResult};
use crate::hardware::GradiometerDriver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

static DEVICE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Proof that this process holds the one allowed device handle.
///
/// Released on drop, after the owning context has shut the hardware down, so
/// a sequential re-construction (tests, long-lived daemons) stays possible
/// while concurrent double-initialization is impossible.
#[derive(Debug)]
struct DeviceClaim;

impl DeviceClaim {
    fn acquire() -> GradResult<Self> {
        if DEVICE_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GradError::DeviceAlreadyClaimed);
        }
        Ok(DeviceClaim)
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        DEVICE_CLAIMED.store(false, Ordering::SeqCst);
    }
}

/// Explicit application context passed to workflow constructors.
pub struct AppContext {
    settings: Settings,
    store: CalibrationStore,
    driver: Arc<dyn GradiometerDriver>,
    _claim: DeviceClaim,
}

impl AppContext {
    /// Claim the device and build the context.
    ///
    /// Fails fast with [`GradError::DeviceAlreadyClaimed`] if another live
    /// context already owns the device.
    pub fn new(
        settings: Settings,
        store: CalibrationStore,
        driver: Arc<dyn GradiometerDriver>,
    ) -> GradResult<Self> {
        let claim = DeviceClaim::acquire()?;
        Ok(Self {
            settings,
            store,
            driver,
            _claim: claim,
        })
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Settings/calibration store handle.
    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Shared device handle.
    pub fn driver(&self) -> Arc<dyn GradiometerDriver> {
        Arc::clone(&self.driver)
    }

    /// Best-effort hardware shutdown; consumes the context and releases the
    /// device claim.
    pub async fn shutdown(self) {
        if let Err(err) = self.driver.turn_off_motors().await {
            warn!(%err, "failed to power off motors during shutdown");
        }

        match self.driver.position().await {
            Ok(position_cm) => {
                if let Err(err) = self.store.update_last_position(position_cm) {
                    warn!(%err, "failed to persist last carriage position");
                } else {
                    info!(position_cm, "carriage position persisted");
                }
            }
            Err(err) => warn!(%err, "failed to read carriage position during shutdown"),
        }

        if let Err(err) = self.driver.close_daq_channel().await {
            warn!(%err, "failed to release sampling channel during shutdown");
        }
    }
}
