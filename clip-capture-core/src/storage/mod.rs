pub mod avi_encoder;
pub mod avi_writer;
pub mod exporter;
pub mod ffmpeg_encoder;
pub mod metadata;
pub mod wav_format;
