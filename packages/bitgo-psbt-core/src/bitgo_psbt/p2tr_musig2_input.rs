//! MuSig2 PSBT proprietary key-value parsing
//!
//! Encoding and decoding of the MuSig2 records BitGo stores on taproot
//! key-path inputs, following the format specified in:
//! https://gist.github.com/sanket1729/4b525c6049f4d9e034d27368c49f28a6
//!
//! | subtype | keydata | value |
//! |---|---|---|
//! | participants | `<tapOutputKey><tapInternalKey>` | `<participantKey1><participantKey2>` |
//! | pub nonce | `<participantPubKey><tapOutputKey>` | `<pubNonce>` (66 bytes) |
//! | partial sig | `<participantPubKey><tapOutputKey>` | `<partialSig>` (32 or 33 bytes) |

use miniscript::bitcoin::hashes::Hash;
use miniscript::bitcoin::psbt::Input;
use miniscript::bitcoin::sighash::{Prevouts, SighashCache};
use miniscript::bitcoin::taproot::TapNodeHash;
use miniscript::bitcoin::{secp256k1, taproot, Psbt, Transaction, TxOut};
use musig2::PubNonce;
use thiserror::Error;
use tracing::debug;

use super::musig2_session::{self, Musig2SessionError};
use super::p2tr_musig2_validate::{extract_sighash_type, validate_nonces, validate_participants};
use super::propkv::{
    find_kv, is_musig2_key, BitGoKeyValue, BitGoKeyValueError, ProprietaryKey,
    ProprietaryKeySubtype,
};
use super::sighash::{to_tap_sighash_type, SighashError};
use crate::bitcoin::key::{UntweakedPublicKey, XOnlyPublicKey};
use crate::bitcoin::CompressedPublicKey;

/// Error types for MuSig2 record parsing and validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Musig2Error {
    #[error("missing participants")]
    MissingParticipants,

    #[error(transparent)]
    KeyValue(#[from] BitGoKeyValueError),

    #[error("invalid subtype: expected {expected:?}, got {got:?}")]
    InvalidSubtype {
        expected: ProprietaryKeySubtype,
        got: ProprietaryKeySubtype,
    },

    #[error("invalid keydata length: expected {expected}, got {got}")]
    InvalidKeydataLength { expected: usize, got: usize },

    #[error("invalid value length: expected {expected}, got {got}")]
    InvalidValueLength { expected: &'static str, got: usize },

    /// A fixed-size field has the wrong number of bytes.
    #[error("invalid {field} length: expected {expected}, got {got}")]
    InvalidFieldLength {
        field: &'static str,
        expected: String,
        got: usize,
    },

    /// A field has the right length but does not decode.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("duplicate participant public keys found")]
    DuplicateParticipantKeys,

    #[error("too many {kind} key-values: expected up to {expected}, got {got}")]
    TooManyKeyValues {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("input is missing {0}")]
    MissingInputField(&'static str),

    /// The participants record disagrees with the aggregate of its own participant keys.
    #[error("tap internal key mismatch: record has {expected}, participant keys aggregate to {got}")]
    TapInternalKeyMismatch { expected: String, got: String },

    #[error("tap output key mismatch: expected {expected}, got {got}")]
    TapOutputKeyMismatch { expected: String, got: String },

    /// The input's internal key disagrees with the aggregate of the participant keys.
    #[error("internal key mismatch: input has {expected}, participant keys aggregate to {got}")]
    InternalKeyMismatch { expected: String, got: String },

    #[error("duplicate nonce for participant {0}")]
    DuplicateNonceParticipant(String),

    #[error("nonce participant {0} is not a declared participant")]
    UnknownNonceParticipant(String),

    #[error("no partial signatures")]
    NoPartialSignatures,

    #[error("mixed sighash types in partial signatures: {first:#04x} and {other:#04x}")]
    MixedSighashTypes { first: u8, other: u8 },

    #[error("key aggregation failed: {0}")]
    KeyAggregation(String),

    #[error("signature aggregation error: {0}")]
    SignatureAggregation(String),

    #[error(transparent)]
    Sighash(#[from] SighashError),

    #[error(transparent)]
    Session(#[from] Musig2SessionError),
}

/// MuSig2 participant data
///
/// Maps: `<tapOutputKey><tapInternalKey>` => `<participantKey1><participantKey2>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2Participants {
    pub tap_output_key: XOnlyPublicKey,
    pub tap_internal_key: UntweakedPublicKey,
    pub participant_pub_keys: [CompressedPublicKey; 2],
}

/// MuSig2 public nonce data
///
/// Maps: `<participantPubKey><tapOutputKey>` => `<pubNonce>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2PubNonce {
    pub participant_pub_key: CompressedPublicKey,
    pub tap_output_key: XOnlyPublicKey,
    pub pub_nonce: PubNonce,
}

/// MuSig2 partial signature data
///
/// Maps: `<participantPubKey><tapOutputKey>` => `<partialSig>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2PartialSig {
    pub participant_pub_key: CompressedPublicKey,
    pub tap_output_key: XOnlyPublicKey,
    /// 32 bytes, or 33 with a trailing sighash type
    pub partial_sig: Vec<u8>,
}

fn check_len(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), Musig2Error> {
    if bytes.len() != expected {
        return Err(Musig2Error::InvalidFieldLength {
            field,
            expected: expected.to_string(),
            got: bytes.len(),
        });
    }
    Ok(())
}

fn parse_x_only(field: &'static str, bytes: &[u8]) -> Result<UntweakedPublicKey, Musig2Error> {
    check_len(field, bytes, 32)?;
    UntweakedPublicKey::from_slice(bytes).map_err(|e| Musig2Error::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn parse_compressed(field: &'static str, bytes: &[u8]) -> Result<CompressedPublicKey, Musig2Error> {
    check_len(field, bytes, 33)?;
    CompressedPublicKey::from_slice(bytes).map_err(|e| Musig2Error::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn parse_pub_nonce(bytes: &[u8]) -> Result<PubNonce, Musig2Error> {
    check_len("pub_nonce", bytes, 66)?;
    PubNonce::try_from(bytes).map_err(|e| Musig2Error::InvalidField {
        field: "pub_nonce",
        reason: e.to_string(),
    })
}

fn check_partial_sig_len(partial_sig: &[u8]) -> Result<(), Musig2Error> {
    match partial_sig.len() {
        32 | 33 => Ok(()),
        got => Err(Musig2Error::InvalidFieldLength {
            field: "partial_sig",
            expected: "32 or 33".to_string(),
            got,
        }),
    }
}

fn check_subtype(kv: &BitGoKeyValue, expected: ProprietaryKeySubtype) -> Result<(), Musig2Error> {
    if kv.subtype != expected {
        return Err(Musig2Error::InvalidSubtype {
            expected,
            got: kv.subtype,
        });
    }
    Ok(())
}

fn check_keydata_len(kv: &BitGoKeyValue, expected: usize) -> Result<(), Musig2Error> {
    if kv.key.len() != expected {
        return Err(Musig2Error::InvalidKeydataLength {
            expected,
            got: kv.key.len(),
        });
    }
    Ok(())
}

impl Musig2Participants {
    /// Build a record from raw bytes, checking each field's length.
    pub fn from_slices(
        tap_output_key: &[u8],
        tap_internal_key: &[u8],
        participant_pub_keys: [&[u8]; 2],
    ) -> Result<Self, Musig2Error> {
        let record = Self {
            tap_output_key: parse_x_only("tap_output_key", tap_output_key)?,
            tap_internal_key: parse_x_only("tap_internal_key", tap_internal_key)?,
            participant_pub_keys: [
                parse_compressed("participant_pub_key", participant_pub_keys[0])?,
                parse_compressed("participant_pub_key", participant_pub_keys[1])?,
            ],
        };
        Ok(record)
    }

    /// Convert to proprietary key-value pair
    pub fn to_key_value(&self) -> Result<BitGoKeyValue, Musig2Error> {
        if self.participant_pub_keys[0] == self.participant_pub_keys[1] {
            return Err(Musig2Error::DuplicateParticipantKeys);
        }

        let mut key_field = Vec::with_capacity(64);
        key_field.extend_from_slice(&self.tap_output_key.serialize());
        key_field.extend_from_slice(&self.tap_internal_key.serialize());

        let mut value = Vec::with_capacity(66);
        value.extend_from_slice(&self.participant_pub_keys[0].to_bytes());
        value.extend_from_slice(&self.participant_pub_keys[1].to_bytes());

        Ok(BitGoKeyValue::new(
            ProprietaryKeySubtype::Musig2ParticipantPubKeys,
            key_field,
            value,
        ))
    }

    /// Create from proprietary key-value pair
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_subtype(kv, ProprietaryKeySubtype::Musig2ParticipantPubKeys)?;
        check_keydata_len(kv, 64)?;
        if kv.value.len() != 66 {
            return Err(Musig2Error::InvalidValueLength {
                expected: "66",
                got: kv.value.len(),
            });
        }

        let record = Self::from_slices(
            &kv.key[0..32],
            &kv.key[32..64],
            [&kv.value[0..33], &kv.value[33..66]],
        )?;

        if record.participant_pub_keys[0] == record.participant_pub_keys[1] {
            return Err(Musig2Error::DuplicateParticipantKeys);
        }

        Ok(record)
    }

    pub fn from_proprietary(key: &ProprietaryKey, value: &[u8]) -> Result<Self, Musig2Error> {
        Self::from_key_value(&BitGoKeyValue::from_key_value(key, value)?)
    }
}

impl Musig2PubNonce {
    pub fn from_slices(
        participant_pub_key: &[u8],
        tap_output_key: &[u8],
        pub_nonce: &[u8],
    ) -> Result<Self, Musig2Error> {
        Ok(Self {
            participant_pub_key: parse_compressed("participant_pub_key", participant_pub_key)?,
            tap_output_key: parse_x_only("tap_output_key", tap_output_key)?,
            pub_nonce: parse_pub_nonce(pub_nonce)?,
        })
    }

    /// Convert to proprietary key-value pair
    pub fn to_key_value(&self) -> BitGoKeyValue {
        let mut key_field = Vec::with_capacity(65);
        key_field.extend_from_slice(&self.participant_pub_key.to_bytes());
        key_field.extend_from_slice(&self.tap_output_key.serialize());

        BitGoKeyValue::new(
            ProprietaryKeySubtype::Musig2PubNonce,
            key_field,
            self.pub_nonce.serialize().to_vec(),
        )
    }

    /// Create from proprietary key-value pair
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_subtype(kv, ProprietaryKeySubtype::Musig2PubNonce)?;
        check_keydata_len(kv, 65)?;
        if kv.value.len() != 66 {
            return Err(Musig2Error::InvalidValueLength {
                expected: "66",
                got: kv.value.len(),
            });
        }
        Self::from_slices(&kv.key[0..33], &kv.key[33..65], &kv.value)
    }

    pub fn from_proprietary(key: &ProprietaryKey, value: &[u8]) -> Result<Self, Musig2Error> {
        Self::from_key_value(&BitGoKeyValue::from_key_value(key, value)?)
    }
}

impl Musig2PartialSig {
    pub fn new(
        participant_pub_key: CompressedPublicKey,
        tap_output_key: XOnlyPublicKey,
        partial_sig: Vec<u8>,
    ) -> Result<Self, Musig2Error> {
        check_partial_sig_len(&partial_sig)?;
        Ok(Self {
            participant_pub_key,
            tap_output_key,
            partial_sig,
        })
    }

    pub fn from_slices(
        participant_pub_key: &[u8],
        tap_output_key: &[u8],
        partial_sig: &[u8],
    ) -> Result<Self, Musig2Error> {
        Self::new(
            parse_compressed("participant_pub_key", participant_pub_key)?,
            parse_x_only("tap_output_key", tap_output_key)?,
            partial_sig.to_vec(),
        )
    }

    /// Convert to proprietary key-value pair
    pub fn to_key_value(&self) -> Result<BitGoKeyValue, Musig2Error> {
        check_partial_sig_len(&self.partial_sig)?;

        let mut key_field = Vec::with_capacity(65);
        key_field.extend_from_slice(&self.participant_pub_key.to_bytes());
        key_field.extend_from_slice(&self.tap_output_key.serialize());

        Ok(BitGoKeyValue::new(
            ProprietaryKeySubtype::Musig2PartialSig,
            key_field,
            self.partial_sig.clone(),
        ))
    }

    /// Create from proprietary key-value pair
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_subtype(kv, ProprietaryKeySubtype::Musig2PartialSig)?;
        check_keydata_len(kv, 65)?;
        if kv.value.len() != 32 && kv.value.len() != 33 {
            return Err(Musig2Error::InvalidValueLength {
                expected: "32 or 33",
                got: kv.value.len(),
            });
        }
        Self::from_slices(&kv.key[0..33], &kv.key[33..65], &kv.value)
    }

    pub fn from_proprietary(key: &ProprietaryKey, value: &[u8]) -> Result<Self, Musig2Error> {
        Self::from_key_value(&BitGoKeyValue::from_key_value(key, value)?)
    }

    /// The explicit sighash type, if the signature carries one.
    pub fn sighash_type(&self) -> Option<u8> {
        match self.partial_sig.len() {
            33 => Some(self.partial_sig[32]),
            _ => None,
        }
    }

    /// Get the normalized partial signature (32 bytes, with sighash byte removed if present)
    pub fn normalized_signature(&self) -> Result<musig2::PartialSignature, Musig2Error> {
        check_partial_sig_len(&self.partial_sig)?;
        musig2::PartialSignature::try_from(&self.partial_sig[..32]).map_err(|e| {
            Musig2Error::InvalidField {
                field: "partial_sig",
                reason: e.to_string(),
            }
        })
    }
}

/// Parse MuSig2 participants from PSBT input
///
/// Returns `None` if no participant data is found.
pub fn parse_musig2_participants(input: &Input) -> Result<Option<Musig2Participants>, Musig2Error> {
    let kvs: Vec<_> = find_kv(
        ProprietaryKeySubtype::Musig2ParticipantPubKeys,
        &input.proprietary,
    )
    .collect();

    match kvs.as_slice() {
        [] => Ok(None),
        [kv] => Musig2Participants::from_key_value(kv).map(Some),
        _ => Err(Musig2Error::TooManyKeyValues {
            kind: "participants",
            expected: 1,
            got: kvs.len(),
        }),
    }
}

/// Parse MuSig2 public nonces from PSBT input
///
/// Returns empty vector if no nonces are found.
pub fn parse_musig2_nonces(input: &Input) -> Result<Vec<Musig2PubNonce>, Musig2Error> {
    let kvs: Vec<_> = find_kv(ProprietaryKeySubtype::Musig2PubNonce, &input.proprietary).collect();

    if kvs.len() > 2 {
        return Err(Musig2Error::TooManyKeyValues {
            kind: "nonce",
            expected: 2,
            got: kvs.len(),
        });
    }

    kvs.iter().map(Musig2PubNonce::from_key_value).collect()
}

/// Parse MuSig2 partial signatures from PSBT input
///
/// Returns empty vector if no partial signatures are found.
pub fn parse_musig2_partial_sigs(input: &Input) -> Result<Vec<Musig2PartialSig>, Musig2Error> {
    let kvs: Vec<_> =
        find_kv(ProprietaryKeySubtype::Musig2PartialSig, &input.proprietary).collect();

    if kvs.len() > 2 {
        return Err(Musig2Error::TooManyKeyValues {
            kind: "partial signature",
            expected: 2,
            got: kvs.len(),
        });
    }

    kvs.iter().map(Musig2PartialSig::from_key_value).collect()
}

/// The MuSig2 records of one taproot key-path input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2Input {
    pub participants: Musig2Participants,
    pub nonces: Vec<Musig2PubNonce>,
    pub partial_sigs: Vec<Musig2PartialSig>,
}

/// Collect all prevouts (funding outputs) from PSBT inputs
fn collect_prevouts(psbt: &Psbt) -> Result<Vec<TxOut>, Musig2Error> {
    let tx = &psbt.unsigned_tx;
    psbt.inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            if let Some(witness_utxo) = &input.witness_utxo {
                return Ok(witness_utxo.clone());
            }
            let vout = tx
                .input
                .get(i)
                .map(|txin| txin.previous_output.vout as usize);
            input
                .non_witness_utxo
                .as_ref()
                .zip(vout)
                .and_then(|(prev_tx, vout)| prev_tx.output.get(vout).cloned())
                .ok_or_else(|| {
                    Musig2Error::SignatureAggregation(format!("missing UTXO data for input {}", i))
                })
        })
        .collect()
}

impl Musig2Input {
    /// Returns true if the input has any MuSig2 key-value pairs
    pub fn is_musig2_input(input: &Input) -> bool {
        input.proprietary.keys().any(is_musig2_key)
    }

    pub fn from_input(input: &Input) -> Result<Self, Musig2Error> {
        let participants =
            parse_musig2_participants(input)?.ok_or(Musig2Error::MissingParticipants)?;
        let nonces = parse_musig2_nonces(input)?;
        let partial_sigs = parse_musig2_partial_sigs(input)?;
        Ok(Self {
            participants,
            nonces,
            partial_sigs,
        })
    }

    pub fn get_pub_nonces(&self) -> Vec<PubNonce> {
        self.nonces.iter().map(|n| n.pub_nonce.clone()).collect()
    }

    /// Get normalized partial signatures (32 bytes each, with sighash byte removed if present)
    pub fn get_normalized_partial_sigs(
        &self,
    ) -> Result<Vec<musig2::PartialSignature>, Musig2Error> {
        self.partial_sigs
            .iter()
            .map(Musig2PartialSig::normalized_signature)
            .collect()
    }

    /// Aggregate the two partial signatures into a taproot key-path signature.
    ///
    /// Participants and nonces are checked against the input's internal key
    /// and merkle root first; the sighash type is the one the partial
    /// signatures agree on.
    pub fn aggregate_signature<T: std::borrow::Borrow<Transaction>>(
        &self,
        sighash_cache: &mut SighashCache<T>,
        prevouts: &[TxOut],
        input_index: usize,
        tap_internal_key: &UntweakedPublicKey,
        tap_merkle_root: &TapNodeHash,
    ) -> Result<taproot::Signature, Musig2Error> {
        validate_participants(&self.participants, tap_internal_key, tap_merkle_root)?;
        validate_nonces(&self.nonces, &self.participants)?;

        if self.nonces.len() != 2 {
            return Err(Musig2Error::SignatureAggregation(format!(
                "2 public nonces are required, got {}",
                self.nonces.len()
            )));
        }
        if self.partial_sigs.len() != 2 {
            return Err(Musig2Error::SignatureAggregation(format!(
                "2 partial signatures are required, got {}",
                self.partial_sigs.len()
            )));
        }

        let (stripped_sigs, sighash_byte) = extract_sighash_type(&self.partial_sigs)?;
        let sighash_type = to_tap_sighash_type(sighash_byte)?;

        let sighash = sighash_cache
            .taproot_key_spend_signature_hash(input_index, &Prevouts::All(prevouts), sighash_type)
            .map_err(|e| {
                Musig2Error::SignatureAggregation(format!("failed to compute sighash: {}", e))
            })?;
        let message = sighash.to_byte_array();

        let session = musig2_session::create_session(
            &self.get_pub_nonces(),
            &message,
            &self.participants.participant_pub_keys,
            tap_internal_key,
            tap_merkle_root,
        )?;

        let partial_sigs = stripped_sigs
            .iter()
            .map(|sig| {
                musig2::PartialSignature::try_from(&sig[..]).map_err(|e| {
                    Musig2Error::InvalidField {
                        field: "partial_sig",
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sig_bytes = musig2_session::aggregate_signatures(&partial_sigs, &session)?;

        let signature = secp256k1::schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| Musig2Error::SignatureAggregation(format!("invalid signature: {}", e)))?;
        Ok(taproot::Signature {
            signature,
            sighash_type,
        })
    }

    /// Finalize a MuSig2 PSBT input by aggregating signatures and delegating to miniscript
    ///
    /// The aggregate signature is written to `tap_key_sig`, the MuSig2
    /// proprietary records are removed, and miniscript builds the witness.
    pub fn finalize_input<C: secp256k1::Verification>(
        psbt: &mut Psbt,
        secp: &secp256k1::Secp256k1<C>,
        input_index: usize,
    ) -> Result<(), Musig2Error> {
        use miniscript::psbt::PsbtExt;

        let input = psbt.inputs.get(input_index).ok_or_else(|| {
            Musig2Error::SignatureAggregation(format!("no input at index {}", input_index))
        })?;
        let musig2_input = Self::from_input(input)?;
        let tap_internal_key = input
            .tap_internal_key
            .ok_or(Musig2Error::MissingInputField("tap_internal_key"))?;
        let tap_merkle_root = input
            .tap_merkle_root
            .ok_or(Musig2Error::MissingInputField("tap_merkle_root"))?;

        let prevouts = collect_prevouts(psbt)?;
        let mut sighash_cache = SighashCache::new(&psbt.unsigned_tx);
        let taproot_sig = musig2_input.aggregate_signature(
            &mut sighash_cache,
            &prevouts,
            input_index,
            &tap_internal_key,
            &tap_merkle_root,
        )?;

        let input = &mut psbt.inputs[input_index];
        input.tap_key_sig = Some(taproot_sig);
        input.proprietary.retain(|key, _| !is_musig2_key(key));

        psbt.finalize_inp_mut(secp, input_index).map_err(|e| {
            Musig2Error::SignatureAggregation(format!("finalization failed: {}", e))
        })?;

        debug!(input_index, "finalized musig2 key path input");
        Ok(())
    }
}
