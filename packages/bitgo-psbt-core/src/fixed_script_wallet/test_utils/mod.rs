//! Test utilities for fixed_script_wallet and bitgo_psbt modules
//!
//! Keys are derived from seed strings, so every fixture is deterministic
//! apart from the random nonces of [`signed_musig2_psbt`].

use super::wallet_keys::tests::get_test_wallet_xprvs;
use super::wallet_keys::{PubTriple, XpubTriple};
use super::wallet_scripts::{build_multisig_script_2_of_3, build_p2pk_script, Chain, ScriptP2tr};
use crate::bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint};
use crate::bitcoin::ecdsa;
use crate::bitcoin::hashes::Hash;
use crate::bitcoin::key::Keypair;
use crate::bitcoin::psbt::{Input as PsbtInput, Output as PsbtOutput, Psbt};
use crate::bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use crate::bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use crate::bitcoin::taproot::{self, TapLeafHash, TapNodeHash};
use crate::bitcoin::{
    Amount, CompressedPublicKey, OutPoint, Script, Sequence, Transaction, TxIn, TxOut, Txid,
};
use crate::bitgo_psbt::musig2_session::{create_session, Musig2NonceStore};
use crate::bitgo_psbt::propkv::set_kv;
use crate::bitgo_psbt::{Musig2PartialSig, Musig2Participants, Musig2PubNonce};
use musig2::{PubNonce, SecNonce};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Wallet keys derived at `m/0/0/<chain>/<index>`, private and public.
#[derive(Debug, Clone)]
pub struct WalletFixture {
    pub secret_keys: [SecretKey; 3],
    pub pub_keys: PubTriple,
}

pub fn wallet_fixture(seed: &str, chain: Chain, index: u32) -> WalletFixture {
    let secp = Secp256k1::new();
    let path = DerivationPath::from(
        [0, 0, chain as u32, index]
            .map(|index| ChildNumber::Normal { index })
            .to_vec(),
    );
    let secret_keys = get_test_wallet_xprvs(seed)
        .map(|xprv| xprv.derive_priv(&secp, &path).unwrap().private_key);
    let pub_keys = secret_keys.map(|sk| CompressedPublicKey(sk.public_key(&secp)));
    WalletFixture {
        secret_keys,
        pub_keys,
    }
}

/// The p2trMusig2 wallet at chain 40, index 0, with the user and bitgo
/// keys as the MuSig2 participants.
#[derive(Debug, Clone)]
pub struct Musig2Fixture {
    pub wallet: WalletFixture,
    pub script: ScriptP2tr,
    pub participants: Musig2Participants,
    pub merkle_root: TapNodeHash,
    pub user_pub_key: CompressedPublicKey,
    pub bitgo_pub_key: CompressedPublicKey,
    pub user_secret_key: SecretKey,
    pub bitgo_secret_key: SecretKey,
    pub user_nonce: PubNonce,
    pub bitgo_nonce: PubNonce,
}

pub fn musig2_fixture() -> Musig2Fixture {
    let wallet = wallet_fixture("musig2", Chain::P2trMusig2Internal, 0);
    let script = ScriptP2tr::new(&wallet.pub_keys).unwrap();
    let [user_pub_key, _, bitgo_pub_key] = wallet.pub_keys;
    let [user_secret_key, _, bitgo_secret_key] = wallet.secret_keys;

    let participants = Musig2Participants {
        tap_output_key: script.spend_info.output_key().to_x_only_public_key(),
        tap_internal_key: script.spend_info.internal_key(),
        participant_pub_keys: [user_pub_key, bitgo_pub_key],
    };
    let merkle_root = script.spend_info.merkle_root().unwrap();

    Musig2Fixture {
        wallet,
        script,
        participants,
        merkle_root,
        user_pub_key,
        bitgo_pub_key,
        user_secret_key,
        bitgo_secret_key,
        user_nonce: SecNonce::build([0x01; 32]).build().public_nonce(),
        bitgo_nonce: SecNonce::build([0x02; 32]).build().public_nonce(),
    }
}

/// Composable function to create a test PSBT from inputs and outputs
pub fn create_test_psbt(
    xpubs: &XpubTriple,
    inputs: Vec<PsbtInput>,
    tx_inputs: Vec<TxIn>,
    outputs: Vec<PsbtOutput>,
    tx_outputs: Vec<TxOut>,
) -> Psbt {
    let tx = Transaction {
        version: crate::bitcoin::transaction::Version::TWO,
        lock_time: crate::bitcoin::locktime::absolute::LockTime::ZERO,
        input: tx_inputs,
        output: tx_outputs,
    };

    Psbt {
        unsigned_tx: tx,
        version: 0,
        xpub: {
            let mut map = BTreeMap::new();
            for (i, xpub) in xpubs.iter().enumerate() {
                let path = DerivationPath::from_str(&format!("m/999'/0'/{}'", i))
                    .expect("invalid derivation path");
                map.insert(*xpub, (Fingerprint::default(), path));
            }
            map
        },
        proprietary: BTreeMap::new(),
        unknown: BTreeMap::new(),
        inputs,
        outputs,
    }
}

/// A single-input PSBT spending `prevout` back to the same script.
pub fn spend_psbt(mut input: PsbtInput, prevout: TxOut) -> Psbt {
    let tx_in = TxIn {
        previous_output: OutPoint {
            txid: Txid::from_byte_array([0x11; 32]),
            vout: 0,
        },
        sequence: Sequence::MAX,
        ..Default::default()
    };
    let tx_out = TxOut {
        value: Amount::from_sat(prevout.value.to_sat() - 1_000),
        script_pubkey: prevout.script_pubkey.clone(),
    };
    input.witness_utxo = Some(prevout);
    create_test_psbt(
        &super::wallet_keys::tests::get_test_wallet_keys("psbt"),
        vec![input],
        vec![tx_in],
        vec![PsbtOutput::default()],
        vec![tx_out],
    )
}

pub fn p2sh_input(keys: &PubTriple) -> PsbtInput {
    PsbtInput {
        redeem_script: Some(build_multisig_script_2_of_3(keys)),
        ..Default::default()
    }
}

pub fn p2sh_p2wsh_input(keys: &PubTriple) -> PsbtInput {
    let witness_script = build_multisig_script_2_of_3(keys);
    PsbtInput {
        redeem_script: Some(witness_script.to_p2wsh()),
        witness_script: Some(witness_script),
        ..Default::default()
    }
}

pub fn p2wsh_input(keys: &PubTriple) -> PsbtInput {
    PsbtInput {
        witness_script: Some(build_multisig_script_2_of_3(keys)),
        ..Default::default()
    }
}

pub fn p2sh_p2pk_input(key: CompressedPublicKey) -> PsbtInput {
    PsbtInput {
        redeem_script: Some(build_p2pk_script(key)),
        ..Default::default()
    }
}

/// Script path input for leaf 0 (user+backup) or leaf 1 (backup+bitgo).
pub fn taproot_script_path_input(fixture: &Musig2Fixture, leaf: usize) -> PsbtInput {
    let script = &fixture.script;
    let leaf_script = script.leaf_scripts(&fixture.wallet.pub_keys)[leaf].clone();
    let control_block = script
        .spend_info
        .control_block(&(leaf_script.clone(), script.leaf_version()))
        .unwrap();

    let mut input = PsbtInput::default();
    input
        .tap_scripts
        .insert(control_block, (leaf_script, script.leaf_version()));
    input
}

/// Key path input with the participants record but no nonces or signatures.
pub fn taproot_key_path_input(fixture: &Musig2Fixture) -> PsbtInput {
    let mut input = PsbtInput {
        tap_internal_key: Some(fixture.participants.tap_internal_key),
        tap_merkle_root: Some(fixture.merkle_root),
        witness_utxo: Some(TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: fixture.script.output_script(),
        }),
        ..Default::default()
    };
    set_kv(&mut input, &fixture.participants.to_key_value().unwrap());
    input
}

fn dummy_message() -> Message {
    Message::from_digest([0x42; 32])
}

pub fn ecdsa_signature(secret_key: &SecretKey) -> ecdsa::Signature {
    let secp = Secp256k1::new();
    ecdsa::Signature {
        signature: secp.sign_ecdsa(&dummy_message(), secret_key),
        sighash_type: EcdsaSighashType::All,
    }
}

pub fn schnorr_signature(secret_key: &SecretKey) -> taproot::Signature {
    let secp = Secp256k1::new();
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    taproot::Signature {
        signature: secp.sign_schnorr_no_aux_rand(&dummy_message(), &keypair),
        sighash_type: TapSighashType::Default,
    }
}

pub fn add_ecdsa_signature(input: &mut PsbtInput, secret_key: &SecretKey) {
    let secp = Secp256k1::new();
    let pub_key = CompressedPublicKey(secret_key.public_key(&secp));
    input
        .partial_sigs
        .insert(pub_key.into(), ecdsa_signature(secret_key));
}

pub fn add_tap_script_signature(input: &mut PsbtInput, leaf_script: &Script, secret_key: &SecretKey) {
    let secp = Secp256k1::new();
    let (x_only, _) = secret_key.x_only_public_key(&secp);
    let leaf_hash = TapLeafHash::from_script(leaf_script, taproot::LeafVersion::TapScript);
    input
        .tap_script_sigs
        .insert((x_only, leaf_hash), schnorr_signature(secret_key));
}

/// A key path PSBT carrying both public nonces and both partial signatures.
///
/// Partial signatures get a trailing sighash byte unless `sighash_type` is
/// `Default`.
pub fn signed_musig2_psbt(fixture: &Musig2Fixture, sighash_type: TapSighashType) -> Psbt {
    let input = taproot_key_path_input(fixture);
    let prevout = input.witness_utxo.clone().unwrap();
    let mut psbt = spend_psbt(input, prevout.clone());

    let message = SighashCache::new(&psbt.unsigned_tx)
        .taproot_key_spend_signature_hash(0, &Prevouts::All(&[prevout]), sighash_type)
        .unwrap()
        .to_byte_array();

    let output_key = fixture.participants.tap_output_key;
    let signers = [
        (fixture.user_secret_key, fixture.user_pub_key),
        (fixture.bitgo_secret_key, fixture.bitgo_pub_key),
    ];
    let mut store = Musig2NonceStore::new();
    let nonces: Vec<PubNonce> = signers
        .iter()
        .map(|(sk, pk)| {
            store
                .create_nonce(sk, pk, &output_key, &message, None)
                .unwrap()
        })
        .collect();
    let session = create_session(
        &nonces,
        &message,
        &fixture.participants.participant_pub_keys,
        &fixture.participants.tap_internal_key,
        &fixture.merkle_root,
    )
    .unwrap();

    let input = &mut psbt.inputs[0];
    for ((sk, pk), nonce) in signers.iter().zip(&nonces) {
        let partial_sig = store
            .partial_sign(sk, &nonce.serialize(), &session)
            .unwrap();
        let mut sig_bytes = partial_sig.serialize().to_vec();
        if sighash_type != TapSighashType::Default {
            sig_bytes.push(sighash_type as u8);
        }

        let pub_nonce = Musig2PubNonce {
            participant_pub_key: *pk,
            tap_output_key: output_key,
            pub_nonce: nonce.clone(),
        };
        set_kv(input, &pub_nonce.to_key_value());
        let sig = Musig2PartialSig::new(*pk, output_key, sig_bytes).unwrap();
        set_kv(input, &sig.to_key_value().unwrap());
    }
    psbt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_script_wallet::wallet_keys::tests::get_test_wallet_keys;
    use crate::fixed_script_wallet::wallet_keys::to_pub_triple;
    use crate::fixed_script_wallet::wallet_scripts::{derive_xpubs, WalletScripts};

    #[test]
    fn test_wallet_fixture_matches_xpub_derivation() {
        let secp = Secp256k1::verification_only();
        let xpubs = get_test_wallet_keys("fixture");
        let derived = derive_xpubs(&xpubs, &secp, Chain::P2wshExternal, 7).unwrap();
        let fixture = wallet_fixture("fixture", Chain::P2wshExternal, 7);
        assert_eq!(fixture.pub_keys, to_pub_triple(&derived));
    }

    #[test]
    fn test_musig2_fixture_is_the_chain_40_output() {
        let fixture = musig2_fixture();
        let scripts = WalletScripts::from_xpubs(
            &get_test_wallet_keys("musig2"),
            Chain::P2trMusig2Internal,
            0,
        )
        .unwrap();
        assert_eq!(fixture.script.output_script(), scripts.output_script());
    }
}
