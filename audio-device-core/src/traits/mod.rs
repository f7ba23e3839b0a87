pub mod audio_device;
pub mod device_delegate;
pub mod dispatch;
pub mod stream_backend;
