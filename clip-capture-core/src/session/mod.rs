pub mod capture_loop;
pub mod clip_session;
pub mod recorder;
