//! Consistency checks between the MuSig2 records of an input and its taproot fields.

use miniscript::bitcoin::key::{TapTweak, UntweakedPublicKey};
use miniscript::bitcoin::secp256k1::Secp256k1;
use miniscript::bitcoin::taproot::TapNodeHash;

use super::p2tr_musig2_input::{Musig2Error, Musig2PartialSig, Musig2Participants, Musig2PubNonce};
use super::sighash::SIGHASH_DEFAULT;
use crate::fixed_script_wallet::wallet_scripts::key_agg_p2tr_musig2;

/// Check the participants record against itself and against the input.
///
/// - the participant keys aggregate to the record's internal key
/// - tweaking that key with `tap_merkle_root` gives the record's output key
/// - the input's `tap_internal_key` is that same aggregate
pub fn validate_participants(
    participants: &Musig2Participants,
    tap_internal_key: &UntweakedPublicKey,
    tap_merkle_root: &TapNodeHash,
) -> Result<(), Musig2Error> {
    let aggregate = key_agg_p2tr_musig2(&participants.participant_pub_keys)
        .map_err(|e| Musig2Error::KeyAggregation(e.to_string()))?;

    if aggregate != participants.tap_internal_key.serialize() {
        return Err(Musig2Error::TapInternalKeyMismatch {
            expected: hex::encode(participants.tap_internal_key.serialize()),
            got: hex::encode(aggregate),
        });
    }

    let secp = Secp256k1::verification_only();
    let (output_key, _) = participants
        .tap_internal_key
        .tap_tweak(&secp, Some(*tap_merkle_root));
    let output_key = output_key.to_x_only_public_key();
    if output_key != participants.tap_output_key {
        return Err(Musig2Error::TapOutputKeyMismatch {
            expected: hex::encode(participants.tap_output_key.serialize()),
            got: hex::encode(output_key.serialize()),
        });
    }

    if aggregate != tap_internal_key.serialize() {
        return Err(Musig2Error::InternalKeyMismatch {
            expected: hex::encode(tap_internal_key.serialize()),
            got: hex::encode(aggregate),
        });
    }

    Ok(())
}

/// Each nonce must come from a distinct declared participant and commit to
/// the participants' output key.
pub fn validate_nonces(
    nonces: &[Musig2PubNonce],
    participants: &Musig2Participants,
) -> Result<(), Musig2Error> {
    if nonces.len() > 2 {
        return Err(Musig2Error::TooManyKeyValues {
            kind: "nonce",
            expected: 2,
            got: nonces.len(),
        });
    }

    for (i, nonce) in nonces.iter().enumerate() {
        let participant = hex::encode(nonce.participant_pub_key.to_bytes());
        if nonces[..i]
            .iter()
            .any(|other| other.participant_pub_key == nonce.participant_pub_key)
        {
            return Err(Musig2Error::DuplicateNonceParticipant(participant));
        }
        if !participants
            .participant_pub_keys
            .contains(&nonce.participant_pub_key)
        {
            return Err(Musig2Error::UnknownNonceParticipant(participant));
        }
        if nonce.tap_output_key != participants.tap_output_key {
            return Err(Musig2Error::TapOutputKeyMismatch {
                expected: hex::encode(participants.tap_output_key.serialize()),
                got: hex::encode(nonce.tap_output_key.serialize()),
            });
        }
    }

    Ok(())
}

/// Split the partial signatures into 32-byte signatures and their shared sighash type.
pub fn extract_sighash_type(
    partial_sigs: &[Musig2PartialSig],
) -> Result<(Vec<[u8; 32]>, u8), Musig2Error> {
    let mut sighash_type = None;
    let mut signatures = Vec::with_capacity(partial_sigs.len());

    for sig in partial_sigs {
        let bytes: [u8; 32] = sig
            .partial_sig
            .get(..32)
            .and_then(|b| b.try_into().ok())
            .filter(|_| sig.partial_sig.len() <= 33)
            .ok_or_else(|| Musig2Error::InvalidFieldLength {
                field: "partial_sig",
                expected: "32 or 33".to_string(),
                got: sig.partial_sig.len(),
            })?;
        let this_type = sig.sighash_type().unwrap_or(SIGHASH_DEFAULT);

        match sighash_type {
            None => sighash_type = Some(this_type),
            Some(first) if first != this_type => {
                return Err(Musig2Error::MixedSighashTypes {
                    first,
                    other: this_type,
                })
            }
            Some(_) => {}
        }
        signatures.push(bytes);
    }

    let sighash_type = sighash_type.ok_or(Musig2Error::NoPartialSignatures)?;
    Ok((signatures, sighash_type))
}
