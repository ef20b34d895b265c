pub mod classifier;
pub mod gate;
pub mod recorder;
