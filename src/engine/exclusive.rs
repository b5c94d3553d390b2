//! Serialized access to the shared engine.
//!
//! Inference, device moves and model reloads all go through one mutex, held
//! for the whole operation. The guard is scoped, so the section is released on
//! every exit path, including errors and cancelled futures.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, error, info};

use super::backend::{EngineFactory, EngineSpec, Generation, InferenceEngine};
use super::device::{Device, DeviceState, Precision};
use super::model::ModelSize;
use crate::chat::Message;
use crate::error::ChatResult;

/// Published view of the engine, readable without entering the section.
#[derive(Clone, Debug, Serialize)]
pub struct EngineSnapshot {
    /// Device state.
    pub device: DeviceState,
    /// Loaded size.
    pub model_size: ModelSize,
    /// Loaded model identifier.
    pub model_id: String,
    /// Weight precision.
    pub precision: Precision,
    /// When the current engine instance was constructed.
    pub loaded_at: DateTime<Utc>,
}

struct Slot {
    engine: Box<dyn InferenceEngine>,
    device: Device,
}

/// Owner of the engine instance and its device/model state.
pub struct ExclusiveEngine {
    slot: Mutex<Slot>,
    state: watch::Sender<EngineSnapshot>,
    cache_dir: PathBuf,
    model_dir: PathBuf,
    acquisitions: AtomicU64,
}

impl ExclusiveEngine {
    /// Wrap an engine that was loaded from `spec`.
    #[must_use]
    pub fn new(engine: Box<dyn InferenceEngine>, spec: &EngineSpec) -> Self {
        let snapshot = EngineSnapshot {
            device: DeviceState::settled(spec.device),
            model_size: spec.model_size,
            model_id: engine.model_id().to_string(),
            precision: spec.precision,
            loaded_at: Utc::now(),
        };
        let (state, _) = watch::channel(snapshot);

        Self {
            slot: Mutex::new(Slot {
                engine,
                device: spec.device,
            }),
            state,
            cache_dir: spec.cache_dir.clone(),
            model_dir: spec.model_dir.clone(),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Current published state.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.state.subscribe()
    }

    /// Number of times the section has been entered.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Enter the section, waiting for any operation in flight.
    pub async fn lock(&self) -> EngineSection<'_> {
        debug!("Trying to acquire device lock...");
        let guard = self.slot.lock().await;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!("Device lock acquired");
        EngineSection {
            guard,
            owner: self,
        }
    }

    /// Run inference in its own section.
    ///
    /// # Errors
    /// Returns the collaborator's error unchanged.
    pub async fn infer(&self, messages: &[Message]) -> ChatResult<Vec<Generation>> {
        self.lock().await.generate(messages).await
    }

    /// Move the engine to `device`.
    ///
    /// Nothing is published while waiting for the section, so a caller dropped
    /// in the queue leaves the state untouched.
    ///
    /// # Errors
    /// Returns the collaborator's error; the previous device stays in effect.
    pub async fn move_to(&self, device: Device) -> ChatResult<DeviceState> {
        let mut section = self.lock().await;
        section.move_to(device).await
    }

    /// Replace the engine with a freshly loaded `size` on the current device.
    ///
    /// # Errors
    /// Returns the factory's error; the previous engine keeps serving.
    pub async fn reload(&self, size: ModelSize, factory: &dyn EngineFactory) -> ChatResult<EngineSnapshot> {
        let mut section = self.lock().await;
        section.reload(size, factory).await
    }
}

/// Held section. Dropping it releases the engine.
pub struct EngineSection<'a> {
    guard: MutexGuard<'a, Slot>,
    owner: &'a ExclusiveEngine,
}

impl EngineSection<'_> {
    /// Run the model over `messages`.
    ///
    /// # Errors
    /// Returns the collaborator's error unchanged.
    pub async fn generate(&self, messages: &[Message]) -> ChatResult<Vec<Generation>> {
        self.guard.engine.generate(messages).await
    }

    /// Device the engine is on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.guard.device
    }

    /// Move the weights and publish the new state once the move completes.
    ///
    /// `AcceleratorRequested` is published for the duration of a move to the
    /// accelerator. If the move fails or the future is dropped midway, the
    /// previous settled state is re-published.
    ///
    /// # Errors
    /// Returns the collaborator's error; the previous state is re-published.
    pub async fn move_to(&mut self, device: Device) -> ChatResult<DeviceState> {
        let owner = self.owner;
        let slot = &mut *self.guard;
        let pending = PendingMove::start(&owner.state, slot.device, device);

        if let Err(err) = slot.engine.move_to(device).await {
            error!(%device, "Device move failed: {err}");
            return Err(err);
        }

        slot.device = device;
        let settled = pending.settle(device);
        info!(%device, "Engine moved");
        Ok(settled)
    }

    /// Load `size` on the current device and swap it in.
    ///
    /// # Errors
    /// Returns the factory's error; nothing is swapped.
    pub async fn reload(&mut self, size: ModelSize, factory: &dyn EngineFactory) -> ChatResult<EngineSnapshot> {
        let spec = EngineSpec::new(
            size,
            self.guard.device,
            self.owner.cache_dir.clone(),
            self.owner.model_dir.clone(),
        );
        info!(
            model = %spec.model_id,
            device = %spec.device,
            precision = %spec.precision,
            "Loading model"
        );

        let engine = match factory.load(&spec).await {
            Ok(engine) => engine,
            Err(err) => {
                error!(model = %spec.model_id, "Error loading model: {err}");
                return Err(err);
            }
        };

        let model_id = engine.model_id().to_string();
        self.guard.engine = engine;
        self.owner.state.send_modify(|s| {
            s.model_size = size;
            s.model_id = model_id;
            s.precision = spec.precision;
            s.loaded_at = Utc::now();
        });
        info!(model = %spec.model_id, "Model loaded successfully");
        Ok(self.owner.snapshot())
    }
}

/// Published state of a move in progress.
///
/// Re-publishes the device it started from unless settled.
struct PendingMove<'a> {
    state: &'a watch::Sender<EngineSnapshot>,
    previous: Device,
    settled: bool,
}

impl<'a> PendingMove<'a> {
    fn start(state: &'a watch::Sender<EngineSnapshot>, previous: Device, target: Device) -> Self {
        if target == Device::Cuda {
            state.send_modify(|s| s.device = DeviceState::AcceleratorRequested);
        }
        Self {
            state,
            previous,
            settled: false,
        }
    }

    fn settle(mut self, device: Device) -> DeviceState {
        self.settled = true;
        publish_settled(self.state, device)
    }
}

impl Drop for PendingMove<'_> {
    fn drop(&mut self) {
        if !self.settled {
            publish_settled(self.state, self.previous);
        }
    }
}

fn publish_settled(state: &watch::Sender<EngineSnapshot>, device: Device) -> DeviceState {
    let settled = DeviceState::settled(device);
    state.send_modify(|s| {
        s.device = settled;
        s.precision = device.precision();
    });
    settled
}

impl Drop for EngineSection<'_> {
    fn drop(&mut self) {
        debug!("Device lock released");
    }
}
