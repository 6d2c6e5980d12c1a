use std::convert::TryInto;
use std::str::FromStr;

use crate::bitcoin::{bip32::Xpub, CompressedPublicKey};
use crate::fixed_script_wallet::wallet_scripts::WalletScriptError;

/// User, backup and bitgo keys, in that order.
pub type XpubTriple = [Xpub; 3];

pub type PubTriple = [CompressedPublicKey; 3];

pub fn xpub_triple_from_strings(xpub_strings: &[String; 3]) -> Result<XpubTriple, WalletScriptError> {
    let xpubs: Vec<Xpub> = xpub_strings
        .iter()
        .map(|s| {
            Xpub::from_str(s)
                .map_err(|e| WalletScriptError::Derivation(format!("failed to parse xpub: {}", e)))
        })
        .collect::<Result<_, _>>()?;

    xpubs
        .try_into()
        .map_err(|_| WalletScriptError::Derivation("expected exactly 3 xpubs".to_string()))
}

pub fn to_pub_triple(xpubs: &XpubTriple) -> PubTriple {
    xpubs.map(|x| x.to_pub())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bitcoin::bip32::{Xpriv, Xpub};
    use crate::bitcoin::hashes::{sha256, Hash};

    pub type XprivTriple = [Xpriv; 3];

    pub fn get_xpriv_from_seed(seed: &str) -> Xpriv {
        use crate::bitcoin::Network;

        // hash seed into 32 bytes
        let seed_hash = sha256::Hash::hash(seed.as_bytes()).to_byte_array();

        Xpriv::new_master(Network::Testnet, &seed_hash).expect("could not create xpriv from seed")
    }

    pub fn get_test_wallet_xprvs(seed: &str) -> XprivTriple {
        let a = get_xpriv_from_seed(&format!("{}/0", seed));
        let b = get_xpriv_from_seed(&format!("{}/1", seed));
        let c = get_xpriv_from_seed(&format!("{}/2", seed));
        [a, b, c]
    }

    pub fn get_test_wallet_keys(seed: &str) -> XpubTriple {
        let xprvs = get_test_wallet_xprvs(seed);
        let secp = crate::bitcoin::secp256k1::Secp256k1::new();
        let xpubs: XpubTriple = xprvs.map(|x| Xpub::from_priv(&secp, &x));
        xpubs
    }

    #[test]
    fn it_works() {
        let keys = get_test_wallet_keys("test");
        assert_eq!(keys[0].to_string(), "tpubD6NzVbkrYhZ4XUs2skvAi3vaZPKQ2oebm4FNyzbHwo8cWoZ81e2Gt1w836KdQWNtf7AgsPBtZ4t4KuoTuaKdzAbgeoygoKqgU6L2GnisU9a");
    }

    #[test]
    fn test_xpub_triple_from_strings() {
        let keys = get_test_wallet_keys("strings");
        let strings = keys.map(|k| k.to_string());
        assert_eq!(xpub_triple_from_strings(&strings).unwrap(), keys);

        let mut broken = strings.clone();
        broken[1] = "tpubnope".to_string();
        assert!(matches!(
            xpub_triple_from_strings(&broken),
            Err(WalletScriptError::Derivation(_))
        ));
    }

    #[test]
    fn test_to_pub_triple_keeps_order() {
        let keys = get_test_wallet_keys("order");
        let pubs = to_pub_triple(&keys);
        for (xpub, pubkey) in keys.iter().zip(pubs.iter()) {
            assert_eq!(xpub.to_pub(), *pubkey);
        }
    }
}
