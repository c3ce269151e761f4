pub mod audio_source;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod led_ring;
pub mod recorder;
pub mod reporter;
pub mod signal;
pub mod status;
pub mod storage;
pub mod trigger;
