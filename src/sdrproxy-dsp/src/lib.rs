pub mod dcblock;
pub mod demod;
pub mod filter;
pub mod mixer;
pub mod resampler;
pub mod spectrum;

pub use dcblock::DcBlocker;
pub use demod::FmDemodulator;
pub use filter::LowpassFilter;
pub use mixer::Mixer;
pub use resampler::Resampler;
pub use spectrum::{SpectralAnalyzer, SpectralStats};
