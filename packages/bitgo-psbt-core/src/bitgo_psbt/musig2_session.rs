//! MuSig2 signing rounds for p2trMusig2 key path inputs
//!
//! A round runs `create_nonce` -> `aggregate_nonces` -> `start_session`
//! (or `create_session`) -> `partial_sign` -> `aggregate_signatures`.
//!
//! Secret nonces live in a [`Musig2NonceStore`] owned by the signer. They are
//! looked up by the bytes of their public nonce, so a public nonce that was
//! serialized and parsed again still finds its secret counterpart. A secret
//! nonce leaves the store when it signs.

use std::fmt;

use miniscript::bitcoin::hashes::{sha256, Hash, HashEngine};
use miniscript::bitcoin::key::XOnlyPublicKey;
use miniscript::bitcoin::secp256k1::SecretKey;
use miniscript::bitcoin::taproot::{TapNodeHash, TapTweakHash};
use miniscript::bitcoin::CompressedPublicKey;
use musig2::secp::{MaybeScalar, Point, Scalar};
use musig2::{AggNonce, KeyAggContext, PartialSignature, PubNonce, SecNonce};
use thiserror::Error;
use tracing::{debug, warn};

const DETERMINISTIC_NONCE_TAG: &str = "MuSig/deterministic/nonce";

/// Signers in a p2trMusig2 key path round (user or backup, and bitgo).
const MUSIG2_PARTICIPANTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Musig2SessionError {
    #[error("invalid message hash: expected 32 bytes, got {0}")]
    InvalidMessageHash(usize),

    #[error("invalid public nonce: {0}")]
    InvalidPubNonce(String),

    #[error("expected {MUSIG2_PARTICIPANTS} public nonces, got {0}")]
    InvalidNonceCount(usize),

    #[error("no public keys")]
    NoPublicKeys,

    #[error("invalid x-only key: {0}")]
    InvalidXOnlyKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid taproot tweak")]
    InvalidTweak,

    #[error("key aggregation failed")]
    KeyAggregation,

    #[error("internal key mismatch: expected {expected}, got {got}")]
    InternalKeyMismatch { expected: String, got: String },

    #[error("unknown nonce")]
    UnknownNonce,

    #[error("nonce already generated")]
    DuplicateNonce,

    #[error("partial signing failed: {0}")]
    Signing(String),

    #[error("signature aggregation failed: {0}")]
    Aggregation(String),
}

/// Everything a signer needs to produce or check a partial signature.
#[derive(Debug, Clone)]
pub struct SigningSession {
    key_agg_ctx: KeyAggContext,
    aggregate_nonce: AggNonce,
    message: Vec<u8>,
}

impl SigningSession {
    /// Key aggregation context with the taproot tweak applied
    pub fn key_agg_ctx(&self) -> &KeyAggContext {
        &self.key_agg_ctx
    }

    pub fn aggregate_nonce(&self) -> &AggNonce {
        &self.aggregate_nonce
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// The tweaked aggregate key, i.e. the taproot output key
    pub fn output_key(&self) -> [u8; 32] {
        self.key_agg_ctx.aggregated_pubkey::<Point>().serialize_xonly()
    }
}

/// Output of [`deterministic_sign`]
#[derive(Debug, Clone)]
pub struct DeterministicSignature {
    pub signature: PartialSignature,
    pub session: SigningSession,
    pub public_nonce: PubNonce,
}

/// Secret nonces generated by one signer, in creation order.
#[derive(Default)]
pub struct Musig2NonceStore {
    entries: Vec<([u8; 66], SecNonce)>,
}

impl fmt::Debug for Musig2NonceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Musig2NonceStore")
            .field("len", &self.entries.len())
            .finish()
    }
}

fn check_nonce_count(count: usize) -> Result<(), Musig2SessionError> {
    if count != MUSIG2_PARTICIPANTS {
        return Err(Musig2SessionError::InvalidNonceCount(count));
    }
    Ok(())
}

fn check_message(message: &[u8]) -> Result<(), Musig2SessionError> {
    if message.len() != 32 {
        return Err(Musig2SessionError::InvalidMessageHash(message.len()));
    }
    Ok(())
}

fn to_scalar(secret_key: &SecretKey) -> Result<Scalar, Musig2SessionError> {
    Scalar::try_from(&secret_key.secret_bytes()[..])
        .map_err(|_| Musig2SessionError::InvalidSecretKey)
}

fn to_point(public_key: &CompressedPublicKey) -> Result<Point, Musig2SessionError> {
    Point::try_from(&public_key.to_bytes()[..])
        .map_err(|e| Musig2SessionError::InvalidPublicKey(e.to_string()))
}

/// Lift an x-only key to the point with even y
fn x_only_to_point(key: &XOnlyPublicKey) -> Result<Point, Musig2SessionError> {
    let mut bytes = [0x02; 33];
    bytes[1..].copy_from_slice(&key.serialize());
    Point::try_from(&bytes[..]).map_err(|e| Musig2SessionError::InvalidXOnlyKey(e.to_string()))
}

fn key_agg_context(public_keys: &[CompressedPublicKey]) -> Result<KeyAggContext, Musig2SessionError> {
    if public_keys.is_empty() {
        return Err(Musig2SessionError::NoPublicKeys);
    }
    let points = public_keys
        .iter()
        .map(to_point)
        .collect::<Result<Vec<_>, _>>()?;
    KeyAggContext::new(points).map_err(|_| Musig2SessionError::KeyAggregation)
}

fn tagged_hash(tag: &str, msg: &[u8]) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(tag.as_bytes());
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_ref());
    engine.input(tag_hash.as_ref());
    engine.input(msg);
    sha256::Hash::from_engine(engine).to_byte_array()
}

impl Musig2NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generate a nonce pair and keep the secret half.
    ///
    /// `x_only_aggregate_key` is the key the round signs for (the taproot
    /// output key). Without a `session_id` the nonce seed is random.
    pub fn create_nonce(
        &mut self,
        secret_key: &SecretKey,
        public_key: &CompressedPublicKey,
        x_only_aggregate_key: &XOnlyPublicKey,
        message_hash: &[u8],
        session_id: Option<[u8; 32]>,
    ) -> Result<PubNonce, Musig2SessionError> {
        check_message(message_hash)?;

        let seed: [u8; 32] = session_id.unwrap_or_else(rand::random);
        let sec_nonce = SecNonce::build(seed)
            .with_seckey(to_scalar(secret_key)?)
            .with_pubkey(to_point(public_key)?)
            .with_aggregated_pubkey(x_only_to_point(x_only_aggregate_key)?)
            .with_message(&message_hash)
            .build();
        let pub_nonce = sec_nonce.public_nonce();
        let pub_nonce_bytes = pub_nonce.serialize();

        if self.entries.iter().any(|(bytes, _)| *bytes == pub_nonce_bytes) {
            warn!("refusing to store a nonce that was already generated");
            return Err(Musig2SessionError::DuplicateNonce);
        }
        self.entries.push((pub_nonce_bytes, sec_nonce));

        debug!(stored = self.entries.len(), "created musig2 nonce");
        Ok(pub_nonce)
    }

    /// Sign with the secret nonce whose public nonce serializes to `pub_nonce`.
    ///
    /// The secret nonce is removed from the store before signing, so each
    /// nonce signs at most once.
    pub fn partial_sign(
        &mut self,
        secret_key: &SecretKey,
        pub_nonce: &[u8],
        session: &SigningSession,
    ) -> Result<PartialSignature, Musig2SessionError> {
        check_message(&session.message)?;
        let secret_key = to_scalar(secret_key)?;

        let Some(position) = self
            .entries
            .iter()
            .position(|(bytes, _)| bytes.as_slice() == pub_nonce)
        else {
            warn!(pub_nonce = %hex::encode(pub_nonce), "no stored nonce matches");
            return Err(Musig2SessionError::UnknownNonce);
        };
        let (_, sec_nonce) = self.entries.remove(position);

        musig2::sign_partial(
            &session.key_agg_ctx,
            secret_key,
            sec_nonce,
            &session.aggregate_nonce,
            &session.message,
        )
        .map_err(|e| Musig2SessionError::Signing(e.to_string()))
    }
}

/// Sum the two public nonces of a round, given as serialized 66-byte values.
pub fn aggregate_nonces<T: AsRef<[u8]>>(pub_nonces: &[T]) -> Result<AggNonce, Musig2SessionError> {
    check_nonce_count(pub_nonces.len())?;
    let parsed = pub_nonces
        .iter()
        .map(|bytes| {
            let bytes = bytes.as_ref();
            if bytes.len() != 66 {
                return Err(Musig2SessionError::InvalidPubNonce(format!(
                    "expected 66 bytes, got {}",
                    bytes.len()
                )));
            }
            PubNonce::from_bytes(bytes)
                .map_err(|e| Musig2SessionError::InvalidPubNonce(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AggNonce::sum(parsed))
}

/// BIP-341 tweak of an x-only internal key by a script tree root.
pub fn tap_tweak(
    internal_key: &[u8],
    merkle_root: Option<&TapNodeHash>,
) -> Result<[u8; 32], Musig2SessionError> {
    let internal_key = XOnlyPublicKey::from_slice(internal_key)
        .map_err(|e| Musig2SessionError::InvalidXOnlyKey(e.to_string()))?;
    Ok(TapTweakHash::from_key_and_tweak(internal_key, merkle_root.copied()).to_byte_array())
}

/// Start a session with an x-only tweak applied to the aggregate of `public_keys`.
///
/// Key order matters: it is the order the participants are aggregated in.
pub fn start_session(
    aggregate_nonce: AggNonce,
    message_hash: &[u8],
    public_keys: &[CompressedPublicKey],
    tweak: [u8; 32],
) -> Result<SigningSession, Musig2SessionError> {
    let tweak = Scalar::try_from(&tweak[..]).map_err(|_| Musig2SessionError::InvalidTweak)?;
    let key_agg_ctx = key_agg_context(public_keys)?
        .with_xonly_tweak(tweak)
        .map_err(|_| Musig2SessionError::InvalidTweak)?;
    Ok(SigningSession {
        key_agg_ctx,
        aggregate_nonce,
        message: message_hash.to_vec(),
    })
}

/// Check a partial signature. An invalid signature yields `Ok(false)`.
pub fn partial_verify(
    signature: PartialSignature,
    public_key: &CompressedPublicKey,
    public_nonce: &PubNonce,
    session: &SigningSession,
) -> Result<bool, Musig2SessionError> {
    check_message(&session.message)?;
    let point = to_point(public_key)?;
    Ok(musig2::verify_partial(
        &session.key_agg_ctx,
        signature,
        &session.aggregate_nonce,
        point,
        public_nonce,
        &session.message,
    )
    .is_ok())
}

/// Combine partial signatures into a 64-byte BIP-340 signature.
pub fn aggregate_signatures(
    partial_signatures: &[PartialSignature],
    session: &SigningSession,
) -> Result<[u8; 64], Musig2SessionError> {
    let signature: [u8; 64] = musig2::aggregate_partial_signatures(
        &session.key_agg_ctx,
        &session.aggregate_nonce,
        partial_signatures.iter().copied(),
        &session.message,
    )
    .map_err(|e| Musig2SessionError::Aggregation(e.to_string()))?;
    debug!(
        signatures = partial_signatures.len(),
        "aggregated musig2 partial signatures"
    );
    Ok(signature)
}

/// Aggregate nonces, compute the tweak and start the session in one step.
///
/// The untweaked aggregate of `public_keys` must equal `internal_key`.
pub fn create_session(
    pub_nonces: &[PubNonce],
    message_hash: &[u8],
    public_keys: &[CompressedPublicKey],
    internal_key: &XOnlyPublicKey,
    merkle_root: &TapNodeHash,
) -> Result<SigningSession, Musig2SessionError> {
    check_message(message_hash)?;
    check_nonce_count(pub_nonces.len())?;

    let untweaked: [u8; 32] = key_agg_context(public_keys)?
        .aggregated_pubkey_untweaked::<Point>()
        .serialize_xonly();
    if untweaked != internal_key.serialize() {
        return Err(Musig2SessionError::InternalKeyMismatch {
            expected: hex::encode(internal_key.serialize()),
            got: hex::encode(untweaked),
        });
    }

    let aggregate_nonce = AggNonce::sum(pub_nonces);
    let tweak = tap_tweak(&internal_key.serialize(), Some(merkle_root))?;
    let session = start_session(aggregate_nonce, message_hash, public_keys, tweak)?;
    debug!(
        nonces = pub_nonces.len(),
        output_key = %hex::encode(session.output_key()),
        "created musig2 signing session"
    );
    Ok(session)
}

/// Secret nonce of a stateless signer that has already seen the other party's nonce.
///
/// Each half is `tagged_hash("MuSig/deterministic/nonce", sk || aggOtherNonce ||
/// outputKey || len(msg) || msg || i) mod n`.
fn deterministic_sec_nonce(
    private_key: &SecretKey,
    other_party_nonce: &PubNonce,
    output_key: &[u8; 32],
    message_hash: &[u8],
) -> Result<SecNonce, Musig2SessionError> {
    let agg_other_nonce = AggNonce::sum([other_party_nonce]).serialize();
    let msg_length = (message_hash.len() as u64).to_be_bytes();

    let mut halves = Vec::with_capacity(2);
    for i in 0u8..2 {
        let mut hash_input = Vec::with_capacity(32 + 66 + 32 + 8 + message_hash.len() + 1);
        hash_input.extend_from_slice(&private_key.secret_bytes());
        hash_input.extend_from_slice(&agg_other_nonce);
        hash_input.extend_from_slice(output_key);
        hash_input.extend_from_slice(&msg_length);
        hash_input.extend_from_slice(message_hash);
        hash_input.push(i);

        let k_hash = tagged_hash(DETERMINISTIC_NONCE_TAG, &hash_input);
        match MaybeScalar::reduce_from(&k_hash) {
            MaybeScalar::Valid(k) => halves.push(k),
            MaybeScalar::Zero => {
                return Err(Musig2SessionError::Signing(
                    "deterministic nonce reduced to zero".to_string(),
                ))
            }
        }
    }
    Ok(SecNonce::new(halves[0], halves[1]))
}

fn output_key_for(
    public_keys: &[CompressedPublicKey],
    internal_key: &XOnlyPublicKey,
    merkle_root: &TapNodeHash,
) -> Result<[u8; 32], Musig2SessionError> {
    let tweak = tap_tweak(&internal_key.serialize(), Some(merkle_root))?;
    let tweak = Scalar::try_from(&tweak[..]).map_err(|_| Musig2SessionError::InvalidTweak)?;
    let key_agg_ctx = key_agg_context(public_keys)?
        .with_xonly_tweak(tweak)
        .map_err(|_| Musig2SessionError::InvalidTweak)?;
    Ok(key_agg_ctx.aggregated_pubkey::<Point>().serialize_xonly())
}

/// Public nonce of a stateless signer, derived after seeing the other party's nonce.
pub fn deterministic_nonce(
    private_key: &SecretKey,
    other_party_nonce: &PubNonce,
    public_keys: &[CompressedPublicKey],
    internal_key: &XOnlyPublicKey,
    merkle_root: &TapNodeHash,
    message_hash: &[u8],
) -> Result<PubNonce, Musig2SessionError> {
    check_message(message_hash)?;
    let output_key = output_key_for(public_keys, internal_key, merkle_root)?;
    let sec_nonce = deterministic_sec_nonce(private_key, other_party_nonce, &output_key, message_hash)?;
    Ok(sec_nonce.public_nonce())
}

/// Nonce generation and partial signing in one call, without stored state.
pub fn deterministic_sign(
    private_key: &SecretKey,
    other_party_nonce: &PubNonce,
    public_keys: &[CompressedPublicKey],
    internal_key: &XOnlyPublicKey,
    merkle_root: &TapNodeHash,
    message_hash: &[u8],
) -> Result<DeterministicSignature, Musig2SessionError> {
    check_message(message_hash)?;
    let output_key = output_key_for(public_keys, internal_key, merkle_root)?;
    let sec_nonce = deterministic_sec_nonce(private_key, other_party_nonce, &output_key, message_hash)?;
    let public_nonce = sec_nonce.public_nonce();

    let session = create_session(
        &[other_party_nonce.clone(), public_nonce.clone()],
        message_hash,
        public_keys,
        internal_key,
        merkle_root,
    )?;
    let signature = musig2::sign_partial(
        &session.key_agg_ctx,
        to_scalar(private_key)?,
        sec_nonce,
        &session.aggregate_nonce,
        &session.message,
    )
    .map_err(|e| Musig2SessionError::Signing(e.to_string()))?;

    debug!("created deterministic musig2 partial signature");
    Ok(DeterministicSignature {
        signature,
        session,
        public_nonce,
    })
}
