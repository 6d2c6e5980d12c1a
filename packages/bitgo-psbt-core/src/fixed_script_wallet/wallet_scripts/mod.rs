/// Code relating to script types of BitGo's 2-of-3 multisig wallets.
mod bitgo_musig;
mod checkmultisig;
mod checksigverify;
mod singlesig;

pub use bitgo_musig::{key_agg_p2tr_musig2, BitGoMusigError};
pub use checkmultisig::{
    build_multisig_script_2_of_3, parse_multisig_script_2_of_3, ScriptP2sh, ScriptP2shP2wsh,
    ScriptP2wsh,
};
pub use checksigverify::{build_p2tr_ns_script, parse_p2tr_ns_script, ScriptP2tr};
pub use singlesig::{build_p2pk_script, parse_p2pk_script, ScriptP2shP2pk};

use crate::bitcoin::bip32::{ChildNumber, DerivationPath};
use crate::bitcoin::secp256k1::{Secp256k1, Verification};
use crate::bitcoin::ScriptBuf;
use crate::fixed_script_wallet::wallet_keys::{to_pub_triple, PubTriple, XpubTriple};
use std::convert::TryFrom;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletScriptError {
    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error(transparent)]
    Musig(#[from] BitGoMusigError),

    #[error("taproot tree: {0}")]
    Taproot(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("no chain for {0}")]
    UnknownChain(u32),
}

/// Scripts that belong to fixed-script BitGo wallets.
#[derive(Debug)]
pub enum WalletScripts {
    /// Chains 0 and 1. Legacy Pay-To-Script-Hash.
    P2sh(ScriptP2sh),
    /// Chains 10 and 11. Legacy Wrapped-Segwit Pay-To-Script-Hash.
    P2shP2wsh(ScriptP2shP2wsh),
    /// Chains 20 and 21. Native Wrapped-Segwit Pay-To-Script-Hash.
    P2wsh(ScriptP2wsh),
    /// Chains 40 and 41. Taproot with Musig2 key-path spend support.
    P2trMusig2(ScriptP2tr),
}

impl std::fmt::Display for WalletScripts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WalletScripts::P2sh(_) => "P2sh",
            WalletScripts::P2shP2wsh(_) => "P2shP2wsh",
            WalletScripts::P2wsh(_) => "P2wsh",
            WalletScripts::P2trMusig2(_) => "P2trMusig2",
        })
    }
}

impl WalletScripts {
    pub fn new(keys: &PubTriple, chain: Chain) -> Result<WalletScripts, WalletScriptError> {
        match chain {
            Chain::P2shExternal | Chain::P2shInternal => {
                let script = build_multisig_script_2_of_3(keys);
                Ok(WalletScripts::P2sh(ScriptP2sh {
                    redeem_script: script,
                }))
            }
            Chain::P2shP2wshExternal | Chain::P2shP2wshInternal => {
                let script = build_multisig_script_2_of_3(keys);
                Ok(WalletScripts::P2shP2wsh(ScriptP2shP2wsh {
                    redeem_script: script.clone().to_p2wsh(),
                    witness_script: script,
                }))
            }
            Chain::P2wshExternal | Chain::P2wshInternal => {
                let script = build_multisig_script_2_of_3(keys);
                Ok(WalletScripts::P2wsh(ScriptP2wsh {
                    witness_script: script,
                }))
            }
            Chain::P2trMusig2Internal | Chain::P2trMusig2External => {
                Ok(WalletScripts::P2trMusig2(ScriptP2tr::new(keys)?))
            }
        }
    }

    pub fn from_xpubs(
        xpubs: &XpubTriple,
        chain: Chain,
        index: u32,
    ) -> Result<WalletScripts, WalletScriptError> {
        let secp = Secp256k1::verification_only();
        let derived_keys = derive_xpubs(xpubs, &secp, chain, index)?;
        WalletScripts::new(&to_pub_triple(&derived_keys), chain)
    }

    pub fn output_script(&self) -> ScriptBuf {
        match self {
            WalletScripts::P2sh(script) => script.redeem_script.to_p2sh(),
            WalletScripts::P2shP2wsh(script) => script.redeem_script.to_p2sh(),
            WalletScripts::P2wsh(script) => script.witness_script.to_p2wsh(),
            WalletScripts::P2trMusig2(script) => script.output_script(),
        }
    }
}

/// BitGo-Defined mappings between derivation path component and script type
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Chain {
    P2shExternal = 0,
    P2shInternal = 1,
    P2shP2wshExternal = 10,
    P2shP2wshInternal = 11,
    P2wshExternal = 20,
    P2wshInternal = 21,
    P2trMusig2Internal = 40,
    P2trMusig2External = 41,
}

/// Useful for iterating over enum values
const ALL_CHAINS: [Chain; 8] = [
    Chain::P2shExternal,
    Chain::P2shInternal,
    Chain::P2shP2wshExternal,
    Chain::P2shP2wshInternal,
    Chain::P2wshExternal,
    Chain::P2wshInternal,
    Chain::P2trMusig2Internal,
    Chain::P2trMusig2External,
];

impl Chain {
    pub fn all() -> &'static [Chain; 8] {
        &ALL_CHAINS
    }
}

impl TryFrom<u32> for Chain {
    type Error = WalletScriptError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        ALL_CHAINS
            .iter()
            .find(|chain| **chain as u32 == value)
            .copied()
            .ok_or(WalletScriptError::UnknownChain(value))
    }
}

impl FromStr for Chain {
    type Err = WalletScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chain: u32 =
            u32::from_str(s).map_err(|e| WalletScriptError::Derivation(e.to_string()))?;
        Chain::try_from(chain)
    }
}

/// Return derived WalletKeys. All keys are derived with the same path.
pub fn derive_xpubs_with_path<C: Verification>(
    xpubs: &XpubTriple,
    ctx: &Secp256k1<C>,
    p: &DerivationPath,
) -> Result<XpubTriple, WalletScriptError> {
    let derive = |i: usize| {
        xpubs[i]
            .derive_pub(ctx, p)
            .map_err(|e| WalletScriptError::Derivation(e.to_string()))
    };
    Ok([derive(0)?, derive(1)?, derive(2)?])
}

/// Derive the wallet keys at `m/0/0/<chain>/<index>`.
pub fn derive_xpubs<C: Verification>(
    xpubs: &XpubTriple,
    ctx: &Secp256k1<C>,
    chain: Chain,
    index: u32,
) -> Result<XpubTriple, WalletScriptError> {
    let p = DerivationPath::from(vec![
        ChildNumber::Normal { index: 0 },
        ChildNumber::Normal { index: 0 },
        ChildNumber::Normal {
            index: chain as u32,
        },
        ChildNumber::Normal { index },
    ]);
    derive_xpubs_with_path(xpubs, ctx, &p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_script_wallet::wallet_keys::tests::get_test_wallet_keys;
    use rstest::rstest;

    #[rstest]
    #[case(Chain::P2shExternal, "a914999a8eb861e3fabae1efe4fb16ff4752e1f5976687")]
    #[case(Chain::P2shInternal, "a914487ca5843f23b9f3b85a00136bec647846d179ab87")]
    #[case(Chain::P2shP2wshExternal, "a9141219b6d9430fffb8de14f14969a5c07172c4613b87")]
    #[case(Chain::P2shP2wshInternal, "a914cbfab1a5a25afab05ff420bd9dd0958c6f1a7a2f87")]
    #[case(
        Chain::P2wshExternal,
        "0020ce670e65fd69ef2eb1aa6087643a18ae5bff198ca20ef26da546e85962386c76"
    )]
    #[case(
        Chain::P2wshInternal,
        "00209cca08a252f9846a1417afbe46ed96bf09d5ec6d25f0effb7d841188d5992b7c"
    )]
    #[case(
        Chain::P2trMusig2Internal,
        "5120c7c4dd55b2bf3cd7ea5b27d3da521699ce761aa345523d8486f0336364957ef2"
    )]
    #[case(
        Chain::P2trMusig2External,
        "51202629eea5dbef6841160a0b752dedd4b8e206f046835ee944848679d6dea2ac2c"
    )]
    fn test_build_multisig_chain(#[case] chain: Chain, #[case] expected_script: &str) {
        let keys = get_test_wallet_keys("lol");
        let scripts = WalletScripts::from_xpubs(&keys, chain, 0).unwrap();
        assert_eq!(scripts.output_script().to_hex_string(), expected_script);
    }

    #[test]
    fn test_chain_conversions() {
        for chain in Chain::all() {
            assert_eq!(Chain::try_from(*chain as u32), Ok(*chain));
            assert_eq!(Chain::from_str(&(*chain as u32).to_string()), Ok(*chain));
        }
        assert_eq!(Chain::try_from(30), Err(WalletScriptError::UnknownChain(30)));
        assert!(Chain::from_str("x").is_err());
    }

    #[test]
    fn test_p2sh_p2wsh_wraps_witness_script() {
        let keys = get_test_wallet_keys("wrap");
        match WalletScripts::from_xpubs(&keys, Chain::P2shP2wshExternal, 3).unwrap() {
            WalletScripts::P2shP2wsh(script) => {
                assert_eq!(script.redeem_script, script.witness_script.to_p2wsh());
                assert!(parse_multisig_script_2_of_3(&script.witness_script).is_ok());
            }
            other => panic!("unexpected scripts {}", other),
        }
    }
}
