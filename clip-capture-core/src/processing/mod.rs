pub mod rolling_buffer;
pub mod sample_queue;
pub mod stereo_mixer;
