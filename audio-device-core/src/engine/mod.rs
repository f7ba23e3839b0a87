pub mod audio_module;
