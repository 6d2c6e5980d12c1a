//! Signing and validation core for BitGo fixed-script wallet PSBTs
//!
//! Read path: classify an input ([`script_type`]), parse it
//! ([`parse_input`]) and count its signatures ([`signature_count`]).
//! Write path: encode MuSig2 records ([`p2tr_musig2_input`]), run a signing
//! round ([`musig2_session`]) and check the records against the input
//! ([`p2tr_musig2_validate`]) before finalizing.

pub mod musig2_session;
pub mod p2tr_musig2_input;
pub mod p2tr_musig2_validate;
pub mod parse_input;
pub mod propkv;
pub mod script_type;
pub mod sighash;
pub mod signature_count;
pub mod signature_script;

pub use musig2_session::{
    aggregate_nonces, aggregate_signatures, create_session, deterministic_nonce,
    deterministic_sign, partial_verify, start_session, tap_tweak, DeterministicSignature,
    Musig2NonceStore, Musig2SessionError, SigningSession,
};
pub use p2tr_musig2_input::{
    parse_musig2_nonces, parse_musig2_partial_sigs, parse_musig2_participants, Musig2Error,
    Musig2Input, Musig2PartialSig, Musig2Participants, Musig2PubNonce,
};
pub use p2tr_musig2_validate::{extract_sighash_type, validate_nonces, validate_participants};
pub use parse_input::{parse_psbt_input, ParseInputError, ParsedPsbtInput};
pub use propkv::{BitGoKeyValue, ProprietaryKeySubtype, BITGO};
pub use script_type::{get_psbt_input_script_type, InputScriptType, ScriptTypeError};
pub use sighash::{validate_tap_sighash_type, SIGHASH_DEFAULT};
pub use signature_count::{
    get_strict_signature_count_psbt, get_strict_signature_count_tx,
    get_strict_signature_counts_psbt, get_strict_signature_counts_tx, SignatureCount,
    SignatureCountError,
};
pub use signature_script::{parse_signature_script, ParsedSignatureScript, SignatureScriptError};

use crate::error::UtxoPsbtError;
use miniscript::bitcoin::{psbt::Psbt, secp256k1};

/// Finalize every MuSig2 key path input, attempting each input even if some fail.
///
/// Inputs without MuSig2 records are left untouched.
///
/// # Returns
/// - `Ok(n)` with the number of finalized inputs
/// - `Err(errors)` with one [`UtxoPsbtError::Input`] per failed input
pub fn finalize_musig2_inputs<C: secp256k1::Verification>(
    psbt: &mut Psbt,
    secp: &secp256k1::Secp256k1<C>,
) -> Result<usize, Vec<UtxoPsbtError>> {
    let musig2_inputs: Vec<usize> = psbt
        .inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| Musig2Input::is_musig2_input(input))
        .map(|(index, _)| index)
        .collect();

    let errors: Vec<UtxoPsbtError> = musig2_inputs
        .iter()
        .filter_map(|&index| {
            Musig2Input::finalize_input(psbt, secp, index)
                .err()
                .map(|e| UtxoPsbtError::at_input(index, e))
        })
        .collect();

    if errors.is_empty() {
        Ok(musig2_inputs.len())
    } else {
        Err(errors)
    }
}
