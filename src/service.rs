//! Chat service: owns the engine, the remembered media context and the
//! attachment rules, and implements the three user actions (submit a turn,
//! change device, change model size).

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chat::{
    ConversationMemory, MediaKinds, Turn, assemble_prompt, attached_media, format_message,
};
use crate::config::AppConfig;
use crate::engine::{
    Device, DeviceProbe, DeviceState, EngineFactory, EngineSnapshot, EngineSpec, ExclusiveEngine,
    ModelSize, reply_text, resolve_startup_device,
};
use crate::error::ChatResult;

/// Notice shown when the accelerator was requested but is missing.
pub const ACCELERATOR_UNAVAILABLE: &str = "CUDA isn't available!";

/// Outcome of a device change request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DeviceChange {
    /// Device now selected.
    pub device: Device,
    /// Resulting device state.
    pub state: DeviceState,
    /// Transient message for the user, if the request was rejected.
    pub notice: Option<String>,
}

/// The chat service.
pub struct ChatService {
    engine: ExclusiveEngine,
    factory: Arc<dyn EngineFactory>,
    probe: Arc<dyn DeviceProbe>,
    memory: ConversationMemory,
    media_kinds: MediaKinds,
}

impl ChatService {
    /// Assemble a service from already constructed parts.
    #[must_use]
    pub fn new(
        engine: ExclusiveEngine,
        factory: Arc<dyn EngineFactory>,
        probe: Arc<dyn DeviceProbe>,
        memory: ConversationMemory,
        media_kinds: MediaKinds,
    ) -> Self {
        Self {
            engine,
            factory,
            probe,
            memory,
            media_kinds,
        }
    }

    /// Load the configured model and build the service around it.
    ///
    /// # Errors
    /// Returns an error if the initial model cannot be loaded.
    pub async fn start(
        config: &AppConfig,
        factory: Arc<dyn EngineFactory>,
        probe: Arc<dyn DeviceProbe>,
    ) -> ChatResult<Self> {
        let device = resolve_startup_device(config.device, probe.as_ref()).await;
        let spec = EngineSpec::new(
            config.model_size,
            device,
            config.cache_dir.clone(),
            config.model_dir.clone(),
        );

        info!(model = %spec.model_id, "Loading model");
        info!(%device, "Device");
        info!(model_size = %spec.model_size, "Model size");
        info!(cache_dir = %spec.cache_dir.display(), "Cache directory");
        info!(model_dir = %spec.model_dir.display(), "Model directory");

        let engine = factory.load(&spec).await?;
        info!("Model loaded successfully");

        Ok(Self::new(
            ExclusiveEngine::new(engine, &spec),
            factory,
            probe,
            ConversationMemory::new(config.memory_scope),
            config.media_kinds.clone(),
        ))
    }

    /// Answer a turn.
    ///
    /// Text-only turns reuse the remembered media of the caller's memory
    /// slot. Turns with media are sent alone, and their media becomes the
    /// remembered context once the engine has answered.
    ///
    /// # Errors
    /// Returns the engine's error; memory is left untouched in that case.
    pub async fn answer(&self, turn: &Turn, session: Option<&str>) -> ChatResult<String> {
        info!(?turn, ?session, "Message");

        let message = format_message(turn, &self.media_kinds);
        let media = attached_media(&message);
        let key = self.memory.key_for(session);

        let section = self.engine.lock().await;
        let prompt = assemble_prompt(self.memory.recall(&key), message, !media.is_empty());
        let generations = section.generate(&prompt).await?;
        if !media.is_empty() {
            self.memory.remember(key, media);
        }
        drop(section);

        reply_text(&generations)
    }

    /// Switch the engine to `requested`.
    ///
    /// A missing accelerator is not an error: the request is rejected with a
    /// notice and the engine is not touched.
    ///
    /// # Errors
    /// Returns the engine's error if the move itself fails.
    pub async fn change_device(&self, requested: Device) -> ChatResult<DeviceChange> {
        if requested == Device::Cuda && !self.probe.accelerator_available().await {
            warn!("{ACCELERATOR_UNAVAILABLE}");
            return Ok(DeviceChange {
                device: Device::Cpu,
                state: DeviceState::Cpu,
                notice: Some(ACCELERATOR_UNAVAILABLE.to_string()),
            });
        }

        let state = self.engine.move_to(requested).await?;
        Ok(DeviceChange {
            device: requested,
            state,
            notice: None,
        })
    }

    /// Reload the engine with another model size.
    ///
    /// # Errors
    /// Returns the load error; the current engine keeps serving.
    pub async fn change_model_size(&self, size: ModelSize) -> ChatResult<EngineSnapshot> {
        info!(%size, "Changing model size");
        self.engine.reload(size, self.factory.as_ref()).await
    }

    /// Drop the remembered context of a session slot.
    pub fn forget(&self, session: Option<&str>) -> bool {
        self.memory.forget(&self.memory.key_for(session))
    }

    /// Current engine state.
    #[must_use]
    pub fn status(&self) -> EngineSnapshot {
        self.engine.snapshot()
    }

    /// Remembered media contexts.
    #[must_use]
    pub const fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// The guarded engine.
    #[must_use]
    pub const fn engine(&self) -> &ExclusiveEngine {
        &self.engine
    }

    /// Attachment rules.
    #[must_use]
    pub const fn media_kinds(&self) -> &MediaKinds {
        &self.media_kinds
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::chat::{ContentItem, MemoryKey, MemoryScope, Message};
    use crate::engine::{GeneratedMessage, Generation, InferenceEngine, StaticProbe};
    use crate::error::ChatError;

    #[derive(Default)]
    struct Probe {
        prompts: Mutex<Vec<Vec<Message>>>,
        moves: Mutex<Vec<Device>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct FakeEngine {
        model_id: String,
        probe: Arc<Probe>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl InferenceEngine for FakeEngine {
        async fn generate(&self, messages: &[Message]) -> ChatResult<Vec<Generation>> {
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.probe.prompts.lock().await.push(messages.to_vec());
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(ChatError::Inference("boom".to_string()));
            }
            Ok(vec![Generation {
                generated_text: vec![
                    GeneratedMessage {
                        role: crate::chat::Role::User,
                        content: crate::engine::GeneratedContent::Items(
                            messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                        ),
                    },
                    GeneratedMessage::assistant(format!("{} says hi", self.model_id)),
                ],
            }])
        }

        async fn move_to(&mut self, device: Device) -> ChatResult<()> {
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.probe.moves.lock().await.push(device);
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        fn model_id(&self) -> &str {
            &self.model_id
        }
    }

    struct FakeFactory {
        probe: Arc<Probe>,
        fail_loads: AtomicBool,
        loads: AtomicUsize,
        fail_generate: bool,
        delay: Duration,
    }

    impl FakeFactory {
        fn new(probe: Arc<Probe>) -> Self {
            Self {
                probe,
                fail_loads: AtomicBool::new(false),
                loads: AtomicUsize::new(0),
                fail_generate: false,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl EngineFactory for FakeFactory {
        async fn load(&self, spec: &EngineSpec) -> ChatResult<Box<dyn InferenceEngine>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(ChatError::ModelLoad {
                    model: spec.model_id.clone(),
                    reason: "out of memory".to_string(),
                });
            }
            Ok(Box::new(FakeEngine {
                model_id: spec.model_id.clone(),
                probe: Arc::clone(&self.probe),
                delay: self.delay,
                fail: self.fail_generate,
            }))
        }
    }

    async fn service_with(
        factory: Arc<FakeFactory>,
        accelerator: bool,
        scope: MemoryScope,
    ) -> ChatService {
        let config = AppConfig {
            memory_scope: scope,
            cache_dir: PathBuf::from("cache"),
            model_dir: PathBuf::from("models"),
            ..AppConfig::default()
        };
        ChatService::start(&config, factory, Arc::new(StaticProbe(accelerator)))
            .await
            .expect("start")
    }

    async fn service(accelerator: bool) -> (ChatService, Arc<Probe>, Arc<FakeFactory>) {
        let probe = Arc::new(Probe::default());
        let factory = Arc::new(FakeFactory::new(Arc::clone(&probe)));
        let service = service_with(Arc::clone(&factory), accelerator, MemoryScope::Global).await;
        (service, probe, factory)
    }

    #[tokio::test]
    async fn test_dog_scenario_end_to_end() {
        let (service, probe, _) = service(false).await;

        let reply = service
            .answer(&Turn::text("Describe the image").with_file("dog.jpg"), None)
            .await
            .expect("answer");
        assert_eq!(reply, "HuggingFaceTB/SmolVLM2-256M-Video-Instruct says hi");

        let memory = Message::system(vec![ContentItem::image("dog.jpg")]);
        assert_eq!(service.memory().recall(&MemoryKey::Global), Some(memory.clone()));

        service
            .answer(&Turn::text("What breed?"), None)
            .await
            .expect("answer");

        let prompts = probe.prompts.lock().await;
        assert_eq!(
            prompts[0],
            vec![Message::user(vec![
                ContentItem::text("Describe the image"),
                ContentItem::image("dog.jpg"),
            ])]
        );
        assert_eq!(
            prompts[1],
            vec![memory, Message::user(vec![ContentItem::text("What breed?")])]
        );
    }

    #[tokio::test]
    async fn test_memory_tracks_latest_media_turn() {
        let (service, _, _) = service(false).await;
        let turns = [
            (Turn::text("t0"), None),
            (Turn::text("t1").with_file("a.png"), Some(vec![ContentItem::image("a.png")])),
            (Turn::text("t2"), Some(vec![ContentItem::image("a.png")])),
            (
                Turn::text("t3").with_file("b.mp4").with_file("c.jpeg"),
                Some(vec![ContentItem::video("b.mp4"), ContentItem::image("c.jpeg")]),
            ),
            (Turn::text("t4"), Some(vec![ContentItem::video("b.mp4"), ContentItem::image("c.jpeg")])),
            (Turn::text("t5").with_file("d.jpg"), Some(vec![ContentItem::image("d.jpg")])),
        ];

        for (turn, expected) in turns {
            service.answer(&turn, None).await.expect("answer");
            let recalled = service.memory().recall(&MemoryKey::Global);
            assert_eq!(recalled, expected.map(Message::system), "after {}", turn.text);
        }
    }

    #[tokio::test]
    async fn test_text_only_turn_without_memory_is_not_augmented() {
        let (service, probe, _) = service(false).await;
        service.answer(&Turn::text("hello"), None).await.expect("answer");
        let prompts = probe.prompts.lock().await;
        assert_eq!(prompts[0].len(), 1);
        assert!(service.memory().is_empty());
    }

    #[tokio::test]
    async fn test_media_turn_is_never_augmented() {
        let (service, probe, _) = service(false).await;
        service
            .answer(&Turn::text("one").with_file("a.png"), None)
            .await
            .expect("answer");
        service
            .answer(&Turn::text("two").with_file("b.png"), None)
            .await
            .expect("answer");

        let prompts = probe.prompts.lock().await;
        assert_eq!(
            prompts[1],
            vec![Message::user(vec![ContentItem::text("two"), ContentItem::image("b.png")])]
        );
    }

    #[tokio::test]
    async fn test_unsupported_file_does_not_become_memory() {
        let (service, probe, _) = service(false).await;
        service
            .answer(&Turn::text("read this").with_file("notes.txt"), None)
            .await
            .expect("answer");
        assert!(service.memory().is_empty());
        let prompts = probe.prompts.lock().await;
        assert_eq!(
            prompts[0][0].content[1],
            ContentItem::text(crate::chat::CONTENT_ERROR_TEXT)
        );
    }

    #[tokio::test]
    async fn test_failed_inference_keeps_memory_and_releases_section() {
        let probe = Arc::new(Probe::default());
        let mut factory = FakeFactory::new(Arc::clone(&probe));
        factory.fail_generate = true;
        let service = service_with(Arc::new(factory), false, MemoryScope::Global).await;

        let result = service
            .answer(&Turn::text("x").with_file("a.png"), None)
            .await;
        assert!(matches!(result, Err(ChatError::Inference(_))));
        assert!(service.memory().is_empty());

        // The section must be free again.
        let change = tokio::time::timeout(Duration::from_secs(1), service.change_device(Device::Cpu))
            .await
            .expect("section released");
        assert!(change.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_accelerator_is_rejected_without_locking() {
        let (service, probe, _) = service(false).await;
        let before = service.engine().acquisitions();

        let change = service.change_device(Device::Cuda).await.expect("change");

        assert_eq!(change.device, Device::Cpu);
        assert_eq!(change.state, DeviceState::Cpu);
        assert_eq!(change.notice.as_deref(), Some(ACCELERATOR_UNAVAILABLE));
        assert_eq!(service.engine().acquisitions(), before);
        assert!(probe.moves.lock().await.is_empty());
        assert_eq!(service.status().device, DeviceState::Cpu);
    }

    #[tokio::test]
    async fn test_available_accelerator_moves_engine() {
        let (service, probe, _) = service(true).await;

        let change = service.change_device(Device::Cuda).await.expect("change");
        assert_eq!(change.state, DeviceState::AcceleratorActive);
        assert_eq!(change.notice, None);
        assert_eq!(*probe.moves.lock().await, vec![Device::Cuda]);

        let status = service.status();
        assert_eq!(status.device, DeviceState::AcceleratorActive);
        assert_eq!(status.precision, crate::engine::Precision::Float16);
    }

    #[tokio::test]
    async fn test_concurrent_operations_never_overlap() {
        let probe = Arc::new(Probe::default());
        let mut factory = FakeFactory::new(Arc::clone(&probe));
        factory.delay = Duration::from_millis(20);
        let service = Arc::new(service_with(Arc::new(factory), true, MemoryScope::Global).await);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                if i % 3 == 0 {
                    let device = if i % 2 == 0 { Device::Cuda } else { Device::Cpu };
                    service.change_device(device).await.map(|_| ())
                } else {
                    service
                        .answer(&Turn::text(format!("q{i}")), Some("s"))
                        .await
                        .map(|_| ())
                }
            }));
        }
        for result in futures::future::join_all(tasks).await {
            assert!(result.expect("task").is_ok());
        }

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_engine() {
        let (service, _, factory) = service(false).await;
        factory.fail_loads.store(true, Ordering::SeqCst);

        let result = service.change_model_size(ModelSize::M500).await;
        assert!(matches!(result, Err(ChatError::ModelLoad { .. })));

        let status = service.status();
        assert_eq!(status.model_size, ModelSize::M256);
        let reply = service.answer(&Turn::text("still there?"), None).await;
        assert_eq!(
            reply.ok().as_deref(),
            Some("HuggingFaceTB/SmolVLM2-256M-Video-Instruct says hi")
        );
    }

    #[tokio::test]
    async fn test_reload_swaps_engine() {
        let (service, _, factory) = service(false).await;

        let snapshot = service
            .change_model_size(ModelSize::M500)
            .await
            .expect("reload");
        assert_eq!(snapshot.model_size, ModelSize::M500);
        assert_eq!(factory.loads.load(Ordering::SeqCst), 2);

        let reply = service.answer(&Turn::text("hi"), None).await.expect("answer");
        assert_eq!(reply, "HuggingFaceTB/SmolVLM2-500M-Video-Instruct says hi");
    }

    #[tokio::test]
    async fn test_reload_keeps_current_device() {
        let (service, _, _) = service(true).await;
        service.change_device(Device::Cuda).await.expect("change");
        let snapshot = service
            .change_model_size(ModelSize::M500)
            .await
            .expect("reload");
        assert_eq!(snapshot.device, DeviceState::AcceleratorActive);
        assert_eq!(snapshot.precision, crate::engine::Precision::Float16);
    }

    #[tokio::test]
    async fn test_session_scope_isolates_memory() {
        let probe = Arc::new(Probe::default());
        let factory = Arc::new(FakeFactory::new(Arc::clone(&probe)));
        let service = service_with(factory, false, MemoryScope::Session).await;

        service
            .answer(&Turn::text("mine").with_file("a.png"), Some("alice"))
            .await
            .expect("answer");
        service
            .answer(&Turn::text("what is it?"), Some("bob"))
            .await
            .expect("answer");

        let prompts = probe.prompts.lock().await;
        assert_eq!(prompts[1].len(), 1);
        assert!(service.forget(Some("alice")));
    }

    #[tokio::test]
    async fn test_global_scope_shares_memory_across_sessions() {
        let (service, probe, _) = service(false).await;
        service
            .answer(&Turn::text("mine").with_file("a.png"), Some("alice"))
            .await
            .expect("answer");
        service
            .answer(&Turn::text("what is it?"), Some("bob"))
            .await
            .expect("answer");

        let prompts = probe.prompts.lock().await;
        assert_eq!(prompts[1][0], Message::system(vec![ContentItem::image("a.png")]));
    }

    #[tokio::test]
    async fn test_startup_on_missing_accelerator_uses_cpu() {
        let probe = Arc::new(Probe::default());
        let factory = Arc::new(FakeFactory::new(Arc::clone(&probe)));
        let config = AppConfig {
            device: Device::Cuda,
            ..AppConfig::default()
        };
        let service = ChatService::start(&config, factory, Arc::new(StaticProbe(false)))
            .await
            .expect("start");
        assert_eq!(service.status().device, DeviceState::Cpu);
        assert_eq!(service.status().precision, crate::engine::Precision::Float32);
    }
}
