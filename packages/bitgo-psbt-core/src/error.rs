use thiserror::Error;

use crate::bitgo_psbt::musig2_session::Musig2SessionError;
use crate::bitgo_psbt::p2tr_musig2_input::Musig2Error;
use crate::bitgo_psbt::parse_input::ParseInputError;
use crate::bitgo_psbt::propkv::BitGoKeyValueError;
use crate::bitgo_psbt::script_type::ScriptTypeError;
use crate::bitgo_psbt::signature_count::SignatureCountError;

/// Errors surfaced by the PSBT-level helpers that walk every input.
#[derive(Debug, Error)]
pub enum UtxoPsbtError {
    #[error(transparent)]
    KeyValue(#[from] BitGoKeyValueError),

    #[error(transparent)]
    Musig2(#[from] Musig2Error),

    #[error(transparent)]
    Session(#[from] Musig2SessionError),

    #[error(transparent)]
    ScriptType(#[from] ScriptTypeError),

    #[error(transparent)]
    ParseInput(#[from] ParseInputError),

    #[error(transparent)]
    SignatureCount(#[from] SignatureCountError),

    /// An input-specific failure, annotated with the input index.
    #[error("input {index}: {source}")]
    Input {
        index: usize,
        #[source]
        source: Box<UtxoPsbtError>,
    },
}

impl UtxoPsbtError {
    pub fn at_input(index: usize, err: impl Into<UtxoPsbtError>) -> Self {
        UtxoPsbtError::Input {
            index,
            source: Box::new(err.into()),
        }
    }
}
