//! Strict signature counting for PSBT inputs and transaction inputs.
//!
//! A wallet input is unsigned, half-signed or fully signed. Placeholder
//! slots never count, and any other number of signatures is an error.

use std::convert::TryFrom;

use miniscript::bitcoin::psbt::Input;
use miniscript::bitcoin::{Psbt, Script, Transaction, TxIn, Witness};
use thiserror::Error;

use super::parse_input::{parse_psbt_input, ParseInputError};
use super::script_type::InputScriptType;
use super::signature_script::{parse_signature_script, SignatureScriptError};
use crate::error::UtxoPsbtError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureCountError {
    #[error("invalid signature count: {0}")]
    InvalidCount(usize),

    #[error(transparent)]
    ParseInput(#[from] ParseInputError),

    #[error(transparent)]
    SignatureScript(#[from] SignatureScriptError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignatureCount {
    Unsigned = 0,
    HalfSigned = 1,
    FullySigned = 2,
}

impl SignatureCount {
    pub fn count(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<usize> for SignatureCount {
    type Error = SignatureCountError;

    fn try_from(count: usize) -> Result<Self, Self::Error> {
        match count {
            0 => Ok(SignatureCount::Unsigned),
            1 => Ok(SignatureCount::HalfSigned),
            2 => Ok(SignatureCount::FullySigned),
            n => Err(SignatureCountError::InvalidCount(n)),
        }
    }
}

/// An unsigned slot: the empty push `OP_0`.
pub fn is_placeholder_signature(signature: &[u8]) -> bool {
    signature.is_empty()
}

fn count_signatures(signatures: &[Vec<u8>]) -> Result<SignatureCount, SignatureCountError> {
    let count = signatures
        .iter()
        .filter(|sig| !is_placeholder_signature(sig))
        .count();
    SignatureCount::try_from(count)
}

fn count_signature_script(
    script_sig: &Script,
    witness: &Witness,
) -> Result<SignatureCount, SignatureCountError> {
    if script_sig.is_empty() && witness.is_empty() {
        return Ok(SignatureCount::Unsigned);
    }
    let parsed = parse_signature_script(script_sig, witness)?;
    // a key path spend only has a witness once the aggregate signature exists
    if parsed.script_type == InputScriptType::TaprootKeyPathSpend {
        return Ok(SignatureCount::FullySigned);
    }
    count_signatures(&parsed.signatures)
}

pub fn get_strict_signature_count_tx(tx_in: &TxIn) -> Result<SignatureCount, SignatureCountError> {
    count_signature_script(&tx_in.script_sig, &tx_in.witness)
}

/// Count the signatures of a PSBT input.
///
/// A finalized input is counted from its final script sig and witness, the
/// same way as a transaction input.
pub fn get_strict_signature_count_psbt(input: &Input) -> Result<SignatureCount, SignatureCountError> {
    if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
        let script_sig = input.final_script_sig.clone().unwrap_or_default();
        let witness = input.final_script_witness.clone().unwrap_or_default();
        return count_signature_script(&script_sig, &witness);
    }
    let parsed = parse_psbt_input(input)?;
    count_signatures(parsed.signatures().unwrap_or(&[]))
}

pub fn get_strict_signature_counts_psbt(psbt: &Psbt) -> Result<Vec<SignatureCount>, UtxoPsbtError> {
    psbt.inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            get_strict_signature_count_psbt(input).map_err(|e| UtxoPsbtError::at_input(i, e))
        })
        .collect()
}

pub fn get_strict_signature_counts_tx(tx: &Transaction) -> Result<Vec<SignatureCount>, UtxoPsbtError> {
    tx.input
        .iter()
        .enumerate()
        .map(|(i, tx_in)| {
            get_strict_signature_count_tx(tx_in).map_err(|e| UtxoPsbtError::at_input(i, e))
        })
        .collect()
}
