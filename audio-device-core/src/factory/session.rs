use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::audio_module::EngineAudioModule;
use crate::models::error::FactoryError;

use super::peer_connection::{AudioLayer, FactoryInner};

/// Which directions a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    SendOnly,
    ReceiveOnly,
    SendReceive,
}

impl SessionMode {
    pub fn sends(self) -> bool {
        matches!(self, Self::SendOnly | Self::SendReceive)
    }

    pub fn receives(self) -> bool {
        matches!(self, Self::ReceiveOnly | Self::SendReceive)
    }
}

/// Serializable description of a session.
#[derive(Debug, Clone, Serialize)]
pub struct AudioSessionInfo {
    pub id: Uuid,
    pub factory_id: Uuid,
    pub mode: SessionMode,
    pub audio_layer: AudioLayer,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// One user of the factory's audio streams.
///
/// Sessions share the device: playout runs while at least one started
/// session receives, recording while at least one sends. Dropping a session
/// stops it.
pub struct AudioSession {
    id: Uuid,
    factory: Arc<FactoryInner>,
    module: Option<Arc<EngineAudioModule>>,
    mode: SessionMode,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
}

impl AudioSession {
    pub(crate) fn new(
        factory: Arc<FactoryInner>,
        module: Option<Arc<EngineAudioModule>>,
        mode: SessionMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            factory,
            module,
            mode,
            created_at: Utc::now(),
            started_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// The engine module this session runs on, if the factory uses an
    /// external device.
    pub fn audio_module(&self) -> Option<&Arc<EngineAudioModule>> {
        self.module.as_ref()
    }

    /// Start the streams this session needs.
    ///
    /// On failure nothing this call started is left running.
    pub fn start(&mut self) -> Result<(), FactoryError> {
        if self.is_started() {
            return Ok(());
        }
        let Some(module) = &self.module else {
            log::info!("session {} started on platform audio", self.id);
            self.started_at = Some(Utc::now());
            return Ok(());
        };

        let mut users = self.factory.users.lock();
        if self.mode.receives() {
            if users.playout == 0 && !module.start_playout() {
                return Err(FactoryError::StreamTransitionFailed {
                    stream: "playout",
                    action: "started",
                });
            }
            users.playout += 1;
        }
        if self.mode.sends() {
            if users.recording == 0 && !module.start_recording() {
                if self.mode.receives() {
                    users.playout -= 1;
                    if users.playout == 0 {
                        module.stop_playout();
                    }
                }
                return Err(FactoryError::StreamTransitionFailed {
                    stream: "recording",
                    action: "started",
                });
            }
            users.recording += 1;
        }
        drop(users);

        self.started_at = Some(Utc::now());
        log::info!("session {} started ({:?})", self.id, self.mode);
        Ok(())
    }

    /// Stop this session's use of the streams. The last user stops them.
    pub fn stop(&mut self) -> Result<(), FactoryError> {
        if self.started_at.take().is_none() {
            return Ok(());
        }
        let Some(module) = &self.module else {
            return Ok(());
        };

        let mut result = Ok(());
        let mut users = self.factory.users.lock();
        if self.mode.receives() {
            users.playout = users.playout.saturating_sub(1);
            if users.playout == 0 && !module.stop_playout() {
                result = Err(FactoryError::StreamTransitionFailed {
                    stream: "playout",
                    action: "stopped",
                });
            }
        }
        if self.mode.sends() {
            users.recording = users.recording.saturating_sub(1);
            if users.recording == 0 && !module.stop_recording() {
                result = Err(FactoryError::StreamTransitionFailed {
                    stream: "recording",
                    action: "stopped",
                });
            }
        }
        log::info!("session {} stopped", self.id);
        result
    }

    pub fn info(&self) -> AudioSessionInfo {
        AudioSessionInfo {
            id: self.id,
            factory_id: self.factory.id(),
            mode: self.mode,
            audio_layer: self.factory.audio_layer(),
            created_at: self.created_at,
            started_at: self.started_at,
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("session {} did not stop cleanly: {}", self.id, e);
        }
    }
}
