//! Inference engine: device and model selection, the collaborator contract,
//! and serialized access to the shared instance.

pub mod backend;
pub mod device;
pub mod exclusive;
pub mod model;
pub mod remote;

pub use backend::{
    EngineFactory, EngineSpec, GeneratedContent, GeneratedMessage, Generation, InferenceEngine,
    reply_text,
};
pub use device::{Device, DeviceProbe, DeviceState, Precision, StaticProbe, resolve_startup_device};
pub use exclusive::{EngineSection, EngineSnapshot, ExclusiveEngine};
pub use model::ModelSize;
pub use remote::{RemoteClient, RemoteFactory, RemotePipeline};
