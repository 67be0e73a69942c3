//! Model residency state machine.
//!
//! ```text
//!              ensure_resident()
//!   Unloaded ─────────────────────▶ Resident
//!                                   │     ▲
//!                         offload() │     │ ensure_resident()
//!                                   ▼     │
//!                                  Offloaded
//! ```
//!
//! `ensure_resident` is idempotent: on a resident model it does nothing.

use candle_core::{DType, Device};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::ModelSource;

/// Where the model weights currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// No weights loaded.
    Unloaded,
    /// Weights on the load device, ready for inference.
    Resident,
    /// Weights parked on the offload device.
    Offloaded,
}

/// Residency transitions a device manager can drive.
pub trait Placement {
    /// Current state.
    fn residency(&self) -> Residency;

    /// Moves the model to its load device if it is not already there.
    fn ensure_resident(&mut self) -> Result<()>;

    /// Moves a resident model to its offload device.
    fn offload(&mut self) -> Result<()>;
}

/// Owns a model and tracks its placement.
pub struct ModelHandle<S: ModelSource> {
    source: S,
    load_device: Device,
    offload_device: Device,
    dtype: DType,
    model: Option<S::Model>,
    state: Residency,
}

impl<S: ModelSource> ModelHandle<S> {
    /// Creates an unloaded handle.
    pub fn new(source: S, load_device: Device, offload_device: Device, dtype: DType) -> Self {
        Self {
            source,
            load_device,
            offload_device,
            dtype,
            model: None,
            state: Residency::Unloaded,
        }
    }

    /// Loads an unloaded model onto the offload device.
    ///
    /// Used at construction so a broken checkpoint fails immediately
    /// rather than on the first generation.
    pub fn preload(&mut self) -> Result<()> {
        if self.state != Residency::Unloaded {
            return Ok(());
        }
        debug!(device = ?self.offload_device, "preloading model");
        self.model = Some(self.source.load(&self.offload_device, self.dtype)?);
        self.state = Residency::Offloaded;
        Ok(())
    }

    /// The resident model.
    pub fn model_mut(&mut self) -> Result<&mut S::Model> {
        match (self.state, self.model.as_mut()) {
            (Residency::Resident, Some(model)) => Ok(model),
            (state, _) => Err(Error::Device(format!("model is not resident ({state:?})"))),
        }
    }
}

impl<S: ModelSource> Placement for ModelHandle<S> {
    fn residency(&self) -> Residency {
        self.state
    }

    fn ensure_resident(&mut self) -> Result<()> {
        match self.state {
            Residency::Resident => return Ok(()),
            Residency::Offloaded if self.offload_device.same_device(&self.load_device) => {
                debug!("model already on load device");
            }
            Residency::Offloaded | Residency::Unloaded => {
                debug!(device = ?self.load_device, from = ?self.state, "loading model");
                self.model = Some(self.source.load(&self.load_device, self.dtype)?);
            }
        }
        self.state = Residency::Resident;
        Ok(())
    }

    fn offload(&mut self) -> Result<()> {
        if self.state != Residency::Resident {
            return Ok(());
        }
        if !self.offload_device.same_device(&self.load_device) {
            debug!(device = ?self.offload_device, "offloading model");
            // Drop the resident copy first so both never coexist.
            self.model = None;
            self.state = Residency::Unloaded;
            self.model = Some(self.source.load(&self.offload_device, self.dtype)?);
        }
        self.state = Residency::Offloaded;
        Ok(())
    }
}
