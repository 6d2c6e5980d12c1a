//! Taproot leaf scripts and the p2trMusig2 script tree.

use miniscript::bitcoin::taproot::{LeafVersion, TaprootBuilder, TaprootSpendInfo};

use super::bitgo_musig::key_agg_p2tr_musig2;
use super::WalletScriptError;
use crate::bitcoin::blockdata::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY};
use crate::bitcoin::blockdata::script::{Builder, Instruction};
use crate::bitcoin::secp256k1::Secp256k1;
use crate::bitcoin::{CompressedPublicKey, Script, ScriptBuf, XOnlyPublicKey};
use crate::fixed_script_wallet::wallet_keys::PubTriple;

/// Helper to convert CompressedPublicKey to x-only (32 bytes)
fn to_xonly_pubkey(key: CompressedPublicKey) -> [u8; 32] {
    key.0.x_only_public_key().0.serialize()
}

/// Helper to build p2tr_ns script (n-of-n checksig chain)
pub fn build_p2tr_ns_script(keys: &[CompressedPublicKey]) -> ScriptBuf {
    let mut builder = Builder::default();
    for (i, key) in keys.iter().enumerate() {
        builder = builder.push_slice(to_xonly_pubkey(*key));
        if i == keys.len() - 1 {
            builder = builder.push_opcode(OP_CHECKSIG);
        } else {
            builder = builder.push_opcode(OP_CHECKSIGVERIFY);
        }
    }
    builder.into_script()
}

/// Extract the x-only keys of an n-of-n checksig chain, in script order.
pub fn parse_p2tr_ns_script(script: &Script) -> Result<Vec<XOnlyPublicKey>, WalletScriptError> {
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            WalletScriptError::InvalidScript(format!("failed to parse script instructions: {}", e))
        })?;

    if instructions.is_empty() || instructions.len() % 2 != 0 {
        return Err(WalletScriptError::InvalidScript(format!(
            "invalid checksig chain length: {}",
            instructions.len()
        )));
    }

    let pairs = instructions.len() / 2;
    instructions
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            let expected_op = if i == pairs - 1 {
                OP_CHECKSIG
            } else {
                OP_CHECKSIGVERIFY
            };
            match pair {
                [Instruction::PushBytes(bytes), Instruction::Op(op)] if *op == expected_op => {
                    XOnlyPublicKey::from_slice(bytes.as_bytes()).map_err(|e| {
                        WalletScriptError::InvalidScript(format!(
                            "invalid x-only key at position {}: {}",
                            i, e
                        ))
                    })
                }
                _ => Err(WalletScriptError::InvalidScript(format!(
                    "expected <key> {} at position {}",
                    expected_op, i
                ))),
            }
        })
        .collect()
}

/// Script tree of a p2trMusig2 output.
///
/// The internal key is the MuSig2 aggregate of user and bitgo. The tree has
/// two leaves at depth 1: user+backup and backup+bitgo.
#[derive(Debug, Clone)]
pub struct ScriptP2tr {
    pub spend_info: TaprootSpendInfo,
}

impl ScriptP2tr {
    pub fn new(keys: &PubTriple) -> Result<ScriptP2tr, WalletScriptError> {
        let secp = Secp256k1::verification_only();
        let [user, backup, bitgo] = *keys;

        let agg_key_bytes = key_agg_p2tr_musig2(&[user, bitgo])?;
        let internal_key = XOnlyPublicKey::from_slice(&agg_key_bytes)
            .map_err(|e| WalletScriptError::Taproot(e.to_string()))?;

        let spend_info = TaprootBuilder::new()
            .add_leaf(1, build_p2tr_ns_script(&[user, backup]))
            .and_then(|b| b.add_leaf(1, build_p2tr_ns_script(&[backup, bitgo])))
            .map_err(|e| WalletScriptError::Taproot(e.to_string()))?
            .finalize(&secp, internal_key)
            .map_err(|_| WalletScriptError::Taproot("incomplete script tree".to_string()))?;

        Ok(ScriptP2tr { spend_info })
    }

    /// The leaf scripts, user+backup first.
    pub fn leaf_scripts(&self, keys: &PubTriple) -> [ScriptBuf; 2] {
        let [user, backup, bitgo] = *keys;
        [
            build_p2tr_ns_script(&[user, backup]),
            build_p2tr_ns_script(&[backup, bitgo]),
        ]
    }

    pub fn leaf_version(&self) -> LeafVersion {
        LeafVersion::TapScript
    }

    pub fn output_script(&self) -> ScriptBuf {
        let output_key = self.spend_info.output_key().to_x_only_public_key();

        Builder::new()
            .push_int(1)
            .push_slice(output_key.serialize())
            .into_script()
    }
}
