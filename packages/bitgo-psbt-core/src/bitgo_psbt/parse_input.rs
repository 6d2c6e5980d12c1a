//! Structured view of a non-finalized wallet PSBT input.
//!
//! The script type decides which fields hold the script and the
//! signatures. Signatures are ordered by the position of their key in the
//! script; key path signatures are the MuSig2 partial signatures, aligned
//! with `participant_public_keys`.

use miniscript::bitcoin::psbt::Input;
use miniscript::bitcoin::secp256k1::Secp256k1;
use miniscript::bitcoin::{CompressedPublicKey, PublicKey, Script, ScriptBuf, XOnlyPublicKey};
use thiserror::Error;

use super::p2tr_musig2_input::{parse_musig2_partial_sigs, Musig2Error};
use super::script_type::{get_psbt_input_script_type, InputScriptType, ScriptTypeError};
use crate::fixed_script_wallet::PubTriple;
use crate::fixed_script_wallet::wallet_scripts::{
    parse_multisig_script_2_of_3, parse_p2pk_script, parse_p2tr_ns_script, WalletScriptError,
};

/// Control blocks commit to at most 128 merkle path nodes.
const TAPROOT_CONTROL_MAX_NODE_COUNT: usize = 128;
const TAPROOT_CONTROL_BASE_SIZE: usize = 33;
const TAPROOT_CONTROL_NODE_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseInputError {
    #[error("input is already finalized")]
    AlreadyFinalized,

    #[error(transparent)]
    ScriptType(#[from] ScriptTypeError),

    #[error(transparent)]
    Musig2(#[from] Musig2Error),

    #[error(transparent)]
    WalletScript(#[from] WalletScriptError),

    #[error("too many signatures: expected at most 2, got {0}")]
    TooManySignatures(usize),

    #[error("invalid control block length: {0}")]
    InvalidControlBlock(usize),

    #[error("signature by {0}, which is not a key of the script")]
    UnknownSignatureKey(String),

    #[error("expected 2 keys in tap leaf script, got {0}")]
    InvalidTapLeafKeyCount(usize),
}

/// p2sh, p2wsh and p2shP2wsh inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMultisigInput {
    pub pub_script: ScriptBuf,
    /// The p2wsh program, for p2shP2wsh inputs only.
    pub redeem_script: Option<ScriptBuf>,
    pub public_keys: PubTriple,
    pub signatures: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedP2shP2pkInput {
    pub pub_script: ScriptBuf,
    pub public_key: CompressedPublicKey,
    pub signatures: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTaprootScriptPathInput {
    pub pub_script: ScriptBuf,
    pub public_keys: [XOnlyPublicKey; 2],
    pub signatures: Option<Vec<Vec<u8>>>,
    pub control_block: Vec<u8>,
    pub leaf_version: u8,
    /// Number of merkle path nodes in the control block.
    pub script_path_level: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTaprootKeyPathInput {
    pub pub_script: ScriptBuf,
    pub participant_public_keys: Vec<CompressedPublicKey>,
    pub signatures: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPsbtInput {
    P2sh(ParsedMultisigInput),
    P2shP2pk(ParsedP2shP2pkInput),
    P2wsh(ParsedMultisigInput),
    P2shP2wsh(ParsedMultisigInput),
    TaprootScriptPathSpend(ParsedTaprootScriptPathInput),
    TaprootKeyPathSpend(ParsedTaprootKeyPathInput),
}

impl ParsedPsbtInput {
    pub fn script_type(&self) -> InputScriptType {
        match self {
            ParsedPsbtInput::P2sh(_) => InputScriptType::P2sh,
            ParsedPsbtInput::P2shP2pk(_) => InputScriptType::P2shP2pk,
            ParsedPsbtInput::P2wsh(_) => InputScriptType::P2wsh,
            ParsedPsbtInput::P2shP2wsh(_) => InputScriptType::P2shP2wsh,
            ParsedPsbtInput::TaprootScriptPathSpend(_) => InputScriptType::TaprootScriptPathSpend,
            ParsedPsbtInput::TaprootKeyPathSpend(_) => InputScriptType::TaprootKeyPathSpend,
        }
    }

    pub fn pub_script(&self) -> &Script {
        match self {
            ParsedPsbtInput::P2sh(p) | ParsedPsbtInput::P2wsh(p) | ParsedPsbtInput::P2shP2wsh(p) => {
                &p.pub_script
            }
            ParsedPsbtInput::P2shP2pk(p) => &p.pub_script,
            ParsedPsbtInput::TaprootScriptPathSpend(p) => &p.pub_script,
            ParsedPsbtInput::TaprootKeyPathSpend(p) => &p.pub_script,
        }
    }

    pub fn signatures(&self) -> Option<&[Vec<u8>]> {
        let signatures = match self {
            ParsedPsbtInput::P2sh(p) | ParsedPsbtInput::P2wsh(p) | ParsedPsbtInput::P2shP2wsh(p) => {
                &p.signatures
            }
            ParsedPsbtInput::P2shP2pk(p) => &p.signatures,
            ParsedPsbtInput::TaprootScriptPathSpend(p) => &p.signatures,
            ParsedPsbtInput::TaprootKeyPathSpend(p) => &p.signatures,
        };
        signatures.as_deref()
    }
}

/// Returns `(leaf_version, script_path_level)` of a serialized control block.
pub fn parse_control_block(control_block: &[u8]) -> Result<(u8, usize), ParseInputError> {
    let len = control_block.len();
    if len < TAPROOT_CONTROL_BASE_SIZE
        || (len - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE != 0
        || (len - TAPROOT_CONTROL_BASE_SIZE) / TAPROOT_CONTROL_NODE_SIZE
            > TAPROOT_CONTROL_MAX_NODE_COUNT
    {
        return Err(ParseInputError::InvalidControlBlock(len));
    }
    let level = (len - TAPROOT_CONTROL_BASE_SIZE) / TAPROOT_CONTROL_NODE_SIZE;
    Ok((control_block[0] & 0xfe, level))
}

fn to_signatures(signatures: Vec<Vec<u8>>) -> Result<Option<Vec<Vec<u8>>>, ParseInputError> {
    match signatures.len() {
        0 => Ok(None),
        1 | 2 => Ok(Some(signatures)),
        n => Err(ParseInputError::TooManySignatures(n)),
    }
}

/// `partial_sigs` in the order of `keys`.
fn ecdsa_signatures(
    input: &Input,
    keys: &[CompressedPublicKey],
) -> Result<Vec<Vec<u8>>, ParseInputError> {
    if input.partial_sigs.len() > 2 {
        return Err(ParseInputError::TooManySignatures(input.partial_sigs.len()));
    }
    let keys: Vec<PublicKey> = keys.iter().map(|k| PublicKey::from(*k)).collect();
    if let Some(unknown) = input.partial_sigs.keys().find(|k| !keys.contains(k)) {
        return Err(ParseInputError::UnknownSignatureKey(unknown.to_string()));
    }
    Ok(keys
        .iter()
        .filter_map(|k| input.partial_sigs.get(k))
        .map(|sig| sig.to_vec())
        .collect())
}

/// `tap_script_sigs` in the order of `keys`.
fn schnorr_signatures(
    input: &Input,
    keys: &[XOnlyPublicKey],
) -> Result<Vec<Vec<u8>>, ParseInputError> {
    if input.tap_script_sigs.len() > 2 {
        return Err(ParseInputError::TooManySignatures(input.tap_script_sigs.len()));
    }
    if let Some((unknown, _)) = input
        .tap_script_sigs
        .keys()
        .find(|(k, _)| !keys.contains(k))
    {
        return Err(ParseInputError::UnknownSignatureKey(unknown.to_string()));
    }
    Ok(keys
        .iter()
        .flat_map(|key| {
            input
                .tap_script_sigs
                .iter()
                .filter(move |((k, _), _)| k == key)
                .map(|(_, sig)| sig.to_vec())
        })
        .collect())
}

fn parse_multisig(
    input: &Input,
    pub_script: &Script,
    redeem_script: Option<ScriptBuf>,
) -> Result<ParsedMultisigInput, ParseInputError> {
    let public_keys = parse_multisig_script_2_of_3(pub_script)?;
    let signatures = to_signatures(ecdsa_signatures(input, &public_keys)?)?;
    Ok(ParsedMultisigInput {
        pub_script: pub_script.to_owned(),
        redeem_script,
        public_keys,
        signatures,
    })
}

fn parse_p2sh_p2pk(input: &Input, redeem_script: &Script) -> Result<ParsedP2shP2pkInput, ParseInputError> {
    let public_key = parse_p2pk_script(redeem_script)?;
    let signatures = to_signatures(ecdsa_signatures(input, &[public_key])?)?;
    Ok(ParsedP2shP2pkInput {
        pub_script: redeem_script.to_owned(),
        public_key,
        signatures,
    })
}

fn parse_script_path(input: &Input) -> Result<ParsedTaprootScriptPathInput, ParseInputError> {
    let (control_block, (leaf_script, _)) = input
        .tap_scripts
        .iter()
        .next()
        .ok_or(ScriptTypeError::Unclassifiable)?;

    let control_block = control_block.serialize();
    let (leaf_version, script_path_level) = parse_control_block(&control_block)?;

    let keys = parse_p2tr_ns_script(leaf_script)?;
    let public_keys: [XOnlyPublicKey; 2] = keys
        .as_slice()
        .try_into()
        .map_err(|_| ParseInputError::InvalidTapLeafKeyCount(keys.len()))?;
    let signatures = to_signatures(schnorr_signatures(input, &public_keys)?)?;

    Ok(ParsedTaprootScriptPathInput {
        pub_script: leaf_script.clone(),
        public_keys,
        signatures,
        control_block,
        leaf_version,
        script_path_level,
    })
}

fn parse_key_path(input: &Input) -> Result<ParsedTaprootKeyPathInput, ParseInputError> {
    let pub_script = match (&input.witness_utxo, input.tap_internal_key) {
        (Some(utxo), _) => utxo.script_pubkey.clone(),
        (None, Some(internal_key)) => {
            let secp = Secp256k1::verification_only();
            ScriptBuf::new_p2tr(&secp, internal_key, input.tap_merkle_root)
        }
        (None, None) => return Err(ScriptTypeError::Unclassifiable.into()),
    };

    let partial_sigs = parse_musig2_partial_sigs(input)?;
    let participant_public_keys = partial_sigs.iter().map(|s| s.participant_pub_key).collect();
    let signatures = to_signatures(partial_sigs.into_iter().map(|s| s.partial_sig).collect())?;

    Ok(ParsedTaprootKeyPathInput {
        pub_script,
        participant_public_keys,
        signatures,
    })
}

pub fn parse_psbt_input(input: &Input) -> Result<ParsedPsbtInput, ParseInputError> {
    if input.final_script_sig.is_some() || input.final_script_witness.is_some() {
        return Err(ParseInputError::AlreadyFinalized);
    }

    let script_type = get_psbt_input_script_type(input)?;
    // classification guarantees the fields each branch reads
    let redeem_script = || input.redeem_script.as_deref().ok_or(ScriptTypeError::Unclassifiable);
    let witness_script = || input.witness_script.as_deref().ok_or(ScriptTypeError::Unclassifiable);

    Ok(match script_type {
        InputScriptType::P2sh => ParsedPsbtInput::P2sh(parse_multisig(input, redeem_script()?, None)?),
        InputScriptType::P2shP2pk => {
            ParsedPsbtInput::P2shP2pk(parse_p2sh_p2pk(input, redeem_script()?)?)
        }
        InputScriptType::P2wsh => {
            ParsedPsbtInput::P2wsh(parse_multisig(input, witness_script()?, None)?)
        }
        InputScriptType::P2shP2wsh => ParsedPsbtInput::P2shP2wsh(parse_multisig(
            input,
            witness_script()?,
            Some(redeem_script()?.to_owned()),
        )?),
        InputScriptType::TaprootScriptPathSpend => {
            ParsedPsbtInput::TaprootScriptPathSpend(parse_script_path(input)?)
        }
        InputScriptType::TaprootKeyPathSpend => {
            ParsedPsbtInput::TaprootKeyPathSpend(parse_key_path(input)?)
        }
    })
}
