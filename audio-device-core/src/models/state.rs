/// Lifecycle flags of one audio device.
///
/// Transitions within a session:
/// ```text
/// uninitialized → initialized → {playout, recording}_initialized → playing / recording
///                      ↑                                               ↓
///                  terminate ←──────────────── stop (releases the stream)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceLifecycleState {
    pub initialized: bool,
    pub playout_initialized: bool,
    pub playing: bool,
    pub recording_initialized: bool,
    pub recording: bool,
}

impl DeviceLifecycleState {
    /// No stream is running.
    pub fn is_quiescent(&self) -> bool {
        !self.playing && !self.recording
    }

    pub fn can_initialize_playout(&self) -> bool {
        self.initialized && !self.playout_initialized
    }

    pub fn can_initialize_recording(&self) -> bool {
        self.initialized && !self.recording_initialized
    }

    pub fn can_start_playout(&self) -> bool {
        self.initialized && self.playout_initialized
    }

    pub fn can_start_recording(&self) -> bool {
        self.initialized && self.recording_initialized
    }

    /// A playout stop that actually stopped something releases the stream.
    pub(crate) fn playout_stopped(&mut self) {
        self.playing = false;
        self.playout_initialized = false;
    }

    pub(crate) fn recording_stopped(&mut self) {
        self.recording = false;
        self.recording_initialized = false;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
