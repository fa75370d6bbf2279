pub mod clock;
pub mod file;
pub mod meter;
pub mod source;
pub mod window;

pub use clock::SampleClock;
pub use file::{read_wav, write_wav};
pub use meter::{frame_rms, spawn_vu_meter};
pub use source::{AudioDevice, AudioFrame, AudioSource, DeviceError, FinalizedAudio, SyntheticDevice};
pub use window::{AudioWindow, WindowAccumulator};
