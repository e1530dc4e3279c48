pub mod audio_source;
pub mod clip_delegate;
pub mod clip_encoder;
pub mod frame_source;
