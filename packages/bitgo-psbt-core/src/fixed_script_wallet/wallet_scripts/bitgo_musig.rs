//! MuSig2 key aggregation for p2trMusig2 outputs
//!
//! Standard BIP327 aggregation over the compressed participant keys, without
//! sorting: the order of the keys changes the aggregate key.

use miniscript::bitcoin::CompressedPublicKey;
use musig2::secp::Point;
use musig2::KeyAggContext;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitGoMusigError {
    #[error("invalid pubkey count: {0}")]
    InvalidPubkeyCount(String),

    #[error("invalid pubkey: {0}")]
    InvalidPubkey(String),

    #[error("aggregation failed: {0}")]
    AggregationFailed(String),
}

/// Aggregate the participant keys into the untweaked x-only internal key.
pub fn key_agg_p2tr_musig2(pubkeys: &[CompressedPublicKey]) -> Result<[u8; 32], BitGoMusigError> {
    if pubkeys.len() < 2 {
        return Err(BitGoMusigError::InvalidPubkeyCount(
            "at least two pubkeys are required for MuSig key aggregation".to_string(),
        ));
    }

    let first = &pubkeys[0];
    if pubkeys.iter().skip(1).all(|pk| pk == first) {
        return Err(BitGoMusigError::InvalidPubkeyCount(
            "all pubkeys are identical, MuSig requires at least two distinct keys".to_string(),
        ));
    }

    let points = pubkeys
        .iter()
        .enumerate()
        .map(|(i, pk)| {
            Point::try_from(&pk.to_bytes()[..]).map_err(|e| {
                BitGoMusigError::InvalidPubkey(format!("invalid pubkey at index {}: {}", i, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let key_agg_ctx = KeyAggContext::new(points).map_err(|e| {
        BitGoMusigError::AggregationFailed(format!("KeyAggContext creation failed: {}", e))
    })?;

    Ok(key_agg_ctx.aggregated_pubkey::<Point>().serialize_xonly())
}
