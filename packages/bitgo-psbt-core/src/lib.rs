pub mod bitgo_psbt;
mod error;
pub mod fixed_script_wallet;

// re-export bitcoin from the miniscript crate so callers share one version
pub use ::miniscript::bitcoin;
pub use musig2;

pub use error::UtxoPsbtError;
pub use fixed_script_wallet::*;
