use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::audio_module::EngineAudioModule;
use crate::models::config::EngineAudioConfig;
use crate::models::error::FactoryError;
use crate::traits::audio_device::AudioDevice;

use super::session::{AudioSession, SessionMode};

/// Which audio I/O the engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioLayer {
    /// The engine's built-in platform audio.
    PlatformDefault,
    /// A host-supplied `AudioDevice`.
    External,
}

/// Serializable description of a factory.
#[derive(Debug, Clone, Serialize)]
pub struct FactoryInfo {
    pub id: Uuid,
    pub audio_layer: AudioLayer,
    pub created_at: DateTime<Utc>,
    pub audio_module_started: bool,
    pub config: EngineAudioConfig,
}

#[derive(Default)]
pub(crate) struct StreamUsers {
    pub(crate) playout: usize,
    pub(crate) recording: usize,
}

pub(crate) struct FactoryInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: EngineAudioConfig,
    device: Option<Arc<dyn AudioDevice>>,
    module: Mutex<Option<Arc<EngineAudioModule>>>,
    pub(crate) users: Mutex<StreamUsers>,
}

impl FactoryInner {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn audio_layer(&self) -> AudioLayer {
        if self.device.is_some() {
            AudioLayer::External
        } else {
            AudioLayer::PlatformDefault
        }
    }

    pub(crate) fn audio_module(&self) -> Result<Arc<EngineAudioModule>, FactoryError> {
        let Some(device) = &self.device else {
            return Err(FactoryError::NoAudioDevice);
        };

        let mut slot = self.module.lock();
        if let Some(module) = slot.as_ref() {
            return Ok(Arc::clone(module));
        }

        let module = EngineAudioModule::new(Arc::clone(device), self.config.clone())?;
        if !module.init() {
            return Err(FactoryError::DeviceInitializationFailed);
        }
        log::info!("factory {}: audio module started on external device", self.id);
        *slot = Some(Arc::clone(&module));
        Ok(module)
    }
}

impl Drop for FactoryInner {
    fn drop(&mut self) {
        if let Some(module) = self.module.get_mut().take() {
            if !module.terminate() {
                log::error!("factory {}: audio device did not terminate cleanly", self.id);
            }
            log::info!("factory {}: audio module released", self.id);
        }
    }
}

/// Builder for `PeerConnectionFactory`.
pub struct FactoryBuilder {
    device: Option<Arc<dyn AudioDevice>>,
    config: EngineAudioConfig,
}

impl FactoryBuilder {
    pub fn new() -> Self {
        Self {
            device: None,
            config: EngineAudioConfig::default(),
        }
    }

    /// Use `device` for all audio I/O instead of the platform default.
    pub fn audio_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn engine_config(mut self, config: EngineAudioConfig) -> Result<Self, FactoryError> {
        config.validate().map_err(FactoryError::ConfigurationFailed)?;
        self.config = config;
        Ok(self)
    }

    pub fn build(self) -> PeerConnectionFactory {
        let inner = FactoryInner {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config: self.config,
            device: self.device,
            module: Mutex::new(None),
            users: Mutex::new(StreamUsers::default()),
        };
        log::info!(
            "created factory {} with {:?} audio",
            inner.id,
            inner.audio_layer()
        );
        PeerConnectionFactory {
            inner: Arc::new(inner),
        }
    }
}

impl Default for FactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a factory wired to `audio_device`, or to the platform default when
/// `None`.
///
/// The device is not touched here; it is initialized with the engine's
/// delegate the first time audio is needed.
pub fn make_factory(audio_device: Option<Arc<dyn AudioDevice>>) -> PeerConnectionFactory {
    let builder = FactoryBuilder::new();
    match audio_device {
        Some(device) => builder.audio_device(device).build(),
        None => builder.build(),
    }
}

/// Handle to an assembled media engine. Cheap to clone; the engine is torn
/// down when the last handle and session are gone.
#[derive(Clone)]
pub struct PeerConnectionFactory {
    inner: Arc<FactoryInner>,
}

impl PeerConnectionFactory {
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn audio_layer(&self) -> AudioLayer {
        self.inner.audio_layer()
    }

    pub fn audio_device(&self) -> Option<&Arc<dyn AudioDevice>> {
        self.inner.device.as_ref()
    }

    /// The engine's audio module, started on first use.
    ///
    /// Fails with `NoAudioDevice` when the factory runs on platform audio.
    pub fn audio_module(&self) -> Result<Arc<EngineAudioModule>, FactoryError> {
        self.inner.audio_module()
    }

    pub fn audio_module_started(&self) -> bool {
        self.inner.module.lock().is_some()
    }

    /// Open an audio session. On an external device this binds the engine to
    /// the device if that has not happened yet.
    pub fn create_audio_session(&self, mode: SessionMode) -> Result<AudioSession, FactoryError> {
        let module = match self.audio_layer() {
            AudioLayer::External => Some(self.inner.audio_module()?),
            AudioLayer::PlatformDefault => None,
        };
        Ok(AudioSession::new(Arc::clone(&self.inner), module, mode))
    }

    pub fn info(&self) -> FactoryInfo {
        FactoryInfo {
            id: self.inner.id,
            audio_layer: self.audio_layer(),
            created_at: self.inner.created_at,
            audio_module_started: self.audio_module_started(),
            config: self.inner.config.clone(),
        }
    }
}
