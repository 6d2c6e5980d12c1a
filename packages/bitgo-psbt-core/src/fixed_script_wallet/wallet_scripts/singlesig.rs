/// This contains code relating to replay protection inputs.
/// Unlike WalletScripts, these are single-signature where the key is with BitGo.
use super::WalletScriptError;
use crate::bitcoin::blockdata::opcodes::all::OP_CHECKSIG;
use crate::bitcoin::blockdata::script::{Builder, Instruction};
use crate::bitcoin::{CompressedPublicKey, Script, ScriptBuf};

/// Build bare p2pk script (used for p2sh-p2pk replay protection)
pub fn build_p2pk_script(key: CompressedPublicKey) -> ScriptBuf {
    Builder::default()
        .push_slice(key.to_bytes())
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Extract the key of a `<pubkey> OP_CHECKSIG` script.
pub fn parse_p2pk_script(script: &Script) -> Result<CompressedPublicKey, WalletScriptError> {
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            WalletScriptError::InvalidScript(format!("failed to parse script instructions: {}", e))
        })?;

    match instructions.as_slice() {
        [Instruction::PushBytes(bytes), Instruction::Op(OP_CHECKSIG)] => {
            CompressedPublicKey::from_slice(bytes.as_bytes()).map_err(|e| {
                WalletScriptError::InvalidScript(format!("invalid p2pk public key: {}", e))
            })
        }
        _ => Err(WalletScriptError::InvalidScript(
            "expected <pubkey> OP_CHECKSIG".to_string(),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptP2shP2pk {
    pub redeem_script: ScriptBuf,
}

impl ScriptP2shP2pk {
    pub fn new(key: CompressedPublicKey) -> Self {
        ScriptP2shP2pk {
            redeem_script: build_p2pk_script(key),
        }
    }

    pub fn output_script(&self) -> ScriptBuf {
        self.redeem_script.to_p2sh()
    }
}
