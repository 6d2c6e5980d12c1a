//! 2-of-3 `OP_CHECKMULTISIG` scripts used by the p2sh, p2shP2wsh and p2wsh chains.

use super::WalletScriptError;
use crate::bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::{CompressedPublicKey, Script, ScriptBuf};
use crate::fixed_script_wallet::wallet_keys::PubTriple;

/// Build bare multisig script. Needs to wrapped to be useful as an output script.
pub fn build_multisig_script_2_of_3(keys: &PubTriple) -> ScriptBuf {
    let quorum = 2;
    let total_count = 3;
    let mut builder = Builder::default().push_int(quorum as i64);
    for key in keys {
        builder = builder.push_slice(key.to_bytes())
    }
    builder
        .push_int(total_count as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Extract the user, backup and bitgo keys of a 2-of-3 multisig script.
pub fn parse_multisig_script_2_of_3(script: &Script) -> Result<PubTriple, WalletScriptError> {
    use crate::bitcoin::blockdata::opcodes::all::{OP_PUSHNUM_2, OP_PUSHNUM_3};
    use crate::bitcoin::blockdata::script::Instruction;

    let instructions: Vec<_> = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            WalletScriptError::InvalidScript(format!("failed to parse script instructions: {}", e))
        })?;

    // Expected format: OP_2 <pubkey1> <pubkey2> <pubkey3> OP_3 OP_CHECKMULTISIG
    if instructions.len() != 6 {
        return Err(WalletScriptError::InvalidScript(format!(
            "invalid multisig script length: expected 6 instructions, got {}",
            instructions.len()
        )));
    }

    // Check OP_2 (quorum)
    if instructions[0] != Instruction::Op(OP_PUSHNUM_2) {
        return Err(WalletScriptError::InvalidScript(
            "first instruction should be OP_2".to_string(),
        ));
    }

    // Check OP_3 (total keys)
    if instructions[4] != Instruction::Op(OP_PUSHNUM_3) {
        return Err(WalletScriptError::InvalidScript(
            "fifth instruction should be OP_3".to_string(),
        ));
    }

    // Check OP_CHECKMULTISIG
    if instructions[5] != Instruction::Op(OP_CHECKMULTISIG) {
        return Err(WalletScriptError::InvalidScript(
            "last instruction should be OP_CHECKMULTISIG".to_string(),
        ));
    }

    // Extract the three public keys
    let mut keys = Vec::new();
    for (idx, instruction) in instructions.iter().enumerate().skip(1).take(3) {
        match instruction {
            Instruction::PushBytes(bytes) => {
                let key = CompressedPublicKey::from_slice(bytes.as_bytes()).map_err(|e| {
                    WalletScriptError::InvalidScript(format!(
                        "failed to parse compressed public key at position {}: {}",
                        idx, e
                    ))
                })?;
                keys.push(key);
            }
            _ => {
                return Err(WalletScriptError::InvalidScript(format!(
                    "instruction at position {} should be a push bytes instruction",
                    idx
                )));
            }
        }
    }

    keys.try_into().map_err(|_| {
        WalletScriptError::InvalidScript("expected exactly 3 keys".to_string())
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptP2sh {
    pub redeem_script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptP2shP2wsh {
    pub redeem_script: ScriptBuf,
    pub witness_script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptP2wsh {
    pub witness_script: ScriptBuf,
}
