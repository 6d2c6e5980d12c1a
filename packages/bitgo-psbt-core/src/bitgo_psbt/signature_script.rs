//! Parsing of the script sig and witness of a signed wallet input.
//!
//! Signature slots keep their placeholders: an unsigned slot is an empty
//! push (`OP_0`) in both script sigs and witnesses.

use miniscript::bitcoin::blockdata::script::Instruction;
use miniscript::bitcoin::{Script, ScriptBuf, Witness};
use thiserror::Error;

use super::parse_input::parse_control_block;
use super::script_type::InputScriptType;

/// First byte of a taproot annex witness element.
const TAPROOT_ANNEX_PREFIX: u8 = 0x50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureScriptError {
    #[error("empty signature script")]
    Empty,

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("unexpected non-push opcode in script sig")]
    NonPushOpcode,

    #[error("unrecognized {0} signature script")]
    Unrecognized(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignatureScript {
    pub script_type: InputScriptType,
    /// Signature slots in script order, placeholders included.
    pub signatures: Vec<Vec<u8>>,
    /// Redeem, witness or leaf script. `None` for key path spends.
    pub pub_script: Option<ScriptBuf>,
}

fn decompile_pushes(script: &Script) -> Result<Vec<Vec<u8>>, SignatureScriptError> {
    script
        .instructions()
        .map(|instruction| {
            match instruction.map_err(|e| SignatureScriptError::InvalidScript(e.to_string()))? {
                Instruction::PushBytes(bytes) => Ok(bytes.as_bytes().to_vec()),
                Instruction::Op(_) => Err(SignatureScriptError::NonPushOpcode),
            }
        })
        .collect()
}

fn parse_script_sig(script_sig: &Script) -> Result<ParsedSignatureScript, SignatureScriptError> {
    let pushes = decompile_pushes(script_sig)?;
    let (redeem_script, slots) = pushes.split_last().ok_or(SignatureScriptError::Empty)?;
    let redeem_script = ScriptBuf::from_bytes(redeem_script.clone());

    if redeem_script.is_p2pk() {
        return match slots {
            [signature] => Ok(ParsedSignatureScript {
                script_type: InputScriptType::P2shP2pk,
                signatures: vec![signature.clone()],
                pub_script: Some(redeem_script),
            }),
            _ => Err(SignatureScriptError::Unrecognized("p2shP2pk")),
        };
    }

    match slots {
        [dummy, signatures @ ..] if dummy.is_empty() && !signatures.is_empty() => {
            Ok(ParsedSignatureScript {
                script_type: InputScriptType::P2sh,
                signatures: signatures.to_vec(),
                pub_script: Some(redeem_script),
            })
        }
        _ => Err(SignatureScriptError::Unrecognized("p2sh")),
    }
}

fn parse_witness(
    script_sig: &Script,
    witness: &Witness,
) -> Result<ParsedSignatureScript, SignatureScriptError> {
    let mut elements: Vec<&[u8]> = witness.iter().collect();
    if elements.len() >= 2
        && elements
            .last()
            .is_some_and(|annex| annex.first() == Some(&TAPROOT_ANNEX_PREFIX))
    {
        elements.pop();
    }

    match elements.as_slice() {
        [signature] if script_sig.is_empty() => Ok(ParsedSignatureScript {
            script_type: InputScriptType::TaprootKeyPathSpend,
            signatures: vec![signature.to_vec()],
            pub_script: None,
        }),
        [signatures @ .., leaf_script, control_block]
            if script_sig.is_empty()
                && !signatures.is_empty()
                && parse_control_block(control_block).is_ok() =>
        {
            // the stack holds the last key's signature first
            Ok(ParsedSignatureScript {
                script_type: InputScriptType::TaprootScriptPathSpend,
                signatures: signatures.iter().rev().map(|s| s.to_vec()).collect(),
                pub_script: Some(ScriptBuf::from_bytes(leaf_script.to_vec())),
            })
        }
        [dummy, signatures @ .., witness_script] if dummy.is_empty() && !signatures.is_empty() => {
            let script_type = if script_sig.is_empty() {
                InputScriptType::P2wsh
            } else {
                InputScriptType::P2shP2wsh
            };
            Ok(ParsedSignatureScript {
                script_type,
                signatures: signatures.iter().map(|s| s.to_vec()).collect(),
                pub_script: Some(ScriptBuf::from_bytes(witness_script.to_vec())),
            })
        }
        _ => Err(SignatureScriptError::Unrecognized("witness")),
    }
}

/// Parse the unlocking data of a signed input.
pub fn parse_signature_script(
    script_sig: &Script,
    witness: &Witness,
) -> Result<ParsedSignatureScript, SignatureScriptError> {
    match (script_sig.is_empty(), witness.is_empty()) {
        (true, true) => Err(SignatureScriptError::Empty),
        (false, true) => parse_script_sig(script_sig),
        (_, false) => parse_witness(script_sig, witness),
    }
}
