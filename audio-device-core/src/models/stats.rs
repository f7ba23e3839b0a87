use serde::Serialize;

/// Snapshot of the engine's real-time callback counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioCallbackStats {
    pub playout_callbacks: u64,
    pub playout_frames: u64,
    pub playout_underruns: u64,
    pub record_callbacks: u64,
    pub recorded_frames: u64,
    pub record_overruns: u64,
    /// Playout pulls made through a render block during capture.
    pub duplex_renders: u64,
    /// Render block calls refused because the slice was already pulled.
    pub render_block_rejections: u64,
    pub input_interruptions: u64,
    pub output_interruptions: u64,
    pub parameter_changes: u64,
    pub last_input_host_time_ns: u64,
    pub last_playout_host_time_ns: u64,
}
