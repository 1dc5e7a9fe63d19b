pub mod device;
pub mod ppm;
pub mod rate;
pub mod wire;

pub use device::{Device, DeviceReader, MAX_FREQ_HZ, MAX_SAMPLE_RATE, MIN_FREQ_HZ};
pub use rate::{next_valid_rate, validate_freq, validate_rate};
