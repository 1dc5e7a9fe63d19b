pub mod band;
pub mod error;
pub mod iq;
pub mod model;

pub use band::{band_merge, band_range, FreqBand, HzBand};
pub use error::{ProxyError, ProxyResult};
pub use model::{RequestBand, RxRequest, RxResponse, RxSignal, SdrFormat, SdrHwInfo};
