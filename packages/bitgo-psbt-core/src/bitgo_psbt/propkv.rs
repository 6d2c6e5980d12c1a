//! Proprietary key-value utilities for PSBT fields
//!
//! BitGo stores its PSBT extensions (MuSig2 participants, public nonces and
//! partial signatures) as BIP-174 proprietary records with the `BITGO`
//! identifier. This module is the only place such records are discovered.

use std::collections::BTreeMap;

pub use miniscript::bitcoin::psbt::raw::ProprietaryKey;
use miniscript::bitcoin::psbt::Input;
use thiserror::Error;

/// BitGo proprietary key identifier
pub const BITGO: &[u8] = b"BITGO";

/// Subtypes for proprietary keys that BitGo uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProprietaryKeySubtype {
    ZecConsensusBranchId = 0x00,
    Musig2ParticipantPubKeys = 0x01,
    Musig2PubNonce = 0x02,
    Musig2PartialSig = 0x03,
}

impl TryFrom<u8> for ProprietaryKeySubtype {
    type Error = BitGoKeyValueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProprietaryKeySubtype::ZecConsensusBranchId),
            0x01 => Ok(ProprietaryKeySubtype::Musig2ParticipantPubKeys),
            0x02 => Ok(ProprietaryKeySubtype::Musig2PubNonce),
            0x03 => Ok(ProprietaryKeySubtype::Musig2PartialSig),
            other => Err(BitGoKeyValueError::UnknownSubtype(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitGoKeyValueError {
    #[error("invalid proprietary key identifier: expected BITGO, got {0}")]
    InvalidIdentifier(String),

    #[error("unknown or unsupported BitGo proprietary key subtype: {0}")]
    UnknownSubtype(u8),
}

/// A decoded `BITGO` proprietary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitGoKeyValue {
    pub subtype: ProprietaryKeySubtype,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BitGoKeyValue {
    pub fn new(subtype: ProprietaryKeySubtype, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            subtype,
            key,
            value,
        }
    }

    /// Rejects records whose identifier is not `BITGO` or whose subtype is unknown.
    pub fn from_key_value(key: &ProprietaryKey, value: &[u8]) -> Result<Self, BitGoKeyValueError> {
        if key.prefix.as_slice() != BITGO {
            return Err(BitGoKeyValueError::InvalidIdentifier(hex::encode(
                &key.prefix,
            )));
        }
        let subtype = ProprietaryKeySubtype::try_from(key.subtype)?;
        Ok(Self::new(subtype, key.key.clone(), value.to_vec()))
    }

    pub fn to_key_value(&self) -> (ProprietaryKey, Vec<u8>) {
        let key = ProprietaryKey {
            prefix: BITGO.to_vec(),
            subtype: self.subtype as u8,
            key: self.key.clone(),
        };
        (key, self.value.clone())
    }
}

/// Selects proprietary records by identifier and, optionally, subtype and exact keydata.
#[derive(Debug, Clone, Copy)]
pub struct ProprietaryKeyFilter<'a> {
    pub identifier: &'a [u8],
    pub subtype: Option<u8>,
    pub keydata: Option<&'a [u8]>,
}

impl<'a> ProprietaryKeyFilter<'a> {
    pub fn bitgo(subtype: ProprietaryKeySubtype) -> Self {
        Self {
            identifier: BITGO,
            subtype: Some(subtype as u8),
            keydata: None,
        }
    }

    pub fn with_keydata(self, keydata: &'a [u8]) -> Self {
        Self {
            keydata: Some(keydata),
            ..self
        }
    }

    pub fn matches(&self, key: &ProprietaryKey) -> bool {
        if key.prefix.as_slice() != self.identifier {
            return false;
        }
        if let Some(subtype) = self.subtype {
            if key.subtype != subtype {
                return false;
            }
        }
        if let Some(keydata) = self.keydata {
            if key.key.as_slice() != keydata {
                return false;
            }
        }
        true
    }
}

fn find_kv_iter<'a>(
    map: &'a BTreeMap<ProprietaryKey, Vec<u8>>,
    filter: ProprietaryKeyFilter<'a>,
) -> impl Iterator<Item = (&'a ProprietaryKey, &'a Vec<u8>)> + 'a {
    map.iter().filter(move |(k, _)| filter.matches(k))
}

/// Linear scan of the input's proprietary records.
///
/// Returns an empty list when nothing matches.
pub fn get_proprietary_key_vals<'a>(
    input: &'a Input,
    filter: &ProprietaryKeyFilter<'_>,
) -> Vec<(&'a ProprietaryKey, &'a Vec<u8>)> {
    input
        .proprietary
        .iter()
        .filter(|(k, _)| filter.matches(k))
        .collect()
}

/// All `BITGO` records of the given subtype, in key order.
pub fn find_kv(
    subtype: ProprietaryKeySubtype,
    map: &BTreeMap<ProprietaryKey, Vec<u8>>,
) -> impl Iterator<Item = BitGoKeyValue> + '_ {
    find_kv_iter(map, ProprietaryKeyFilter::bitgo(subtype))
        .map(move |(key, value)| BitGoKeyValue::new(subtype, key.key.clone(), value.clone()))
}

/// Insert a record, replacing any record with the same identifier, subtype and keydata.
pub fn set_kv(input: &mut Input, kv: &BitGoKeyValue) {
    let (key, value) = kv.to_key_value();
    input.proprietary.insert(key, value);
}

/// Remove every record matching the filter. Returns the number of records removed.
pub fn delete_proprietary_key_vals(input: &mut Input, filter: &ProprietaryKeyFilter<'_>) -> usize {
    let before = input.proprietary.len();
    input.proprietary.retain(|key, _| !filter.matches(key));
    before - input.proprietary.len()
}

/// Check if a proprietary key is a BitGo key
pub fn is_bitgo_key(key: &ProprietaryKey) -> bool {
    key.prefix.as_slice() == BITGO
}

/// Check if a proprietary key is a BitGo MuSig2 key
pub fn is_musig2_key(key: &ProprietaryKey) -> bool {
    if !is_bitgo_key(key) {
        return false;
    }
    matches!(
        ProprietaryKeySubtype::try_from(key.subtype),
        Ok(ProprietaryKeySubtype::Musig2ParticipantPubKeys)
            | Ok(ProprietaryKeySubtype::Musig2PubNonce)
            | Ok(ProprietaryKeySubtype::Musig2PartialSig)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn key(prefix: &[u8], subtype: u8, keydata: &[u8]) -> ProprietaryKey {
        ProprietaryKey {
            prefix: prefix.to_vec(),
            subtype,
            key: keydata.to_vec(),
        }
    }

    fn input_with(records: &[(ProprietaryKey, Vec<u8>)]) -> Input {
        let mut input = Input::default();
        for (k, v) in records {
            input.proprietary.insert(k.clone(), v.clone());
        }
        input
    }

    #[test]
    fn test_to_key_value_uses_bitgo_identifier() {
        let kv = BitGoKeyValue::new(
            ProprietaryKeySubtype::Musig2PartialSig,
            vec![1, 2, 3],
            vec![4],
        );
        let (key, value) = kv.to_key_value();
        assert_eq!(key.prefix, b"BITGO");
        assert_eq!(key.subtype, 0x03);
        assert_eq!(key.key, vec![1, 2, 3]);
        assert_eq!(value, vec![4]);
        assert_eq!(BitGoKeyValue::from_key_value(&key, &value).unwrap(), kv);
    }

    #[rstest]
    #[case::foreign_identifier(key(b"OTHER", 0x01, &[]), BitGoKeyValueError::InvalidIdentifier("4f54484552".to_string()))]
    #[case::unknown_subtype(key(BITGO, 0x09, &[]), BitGoKeyValueError::UnknownSubtype(0x09))]
    fn test_from_key_value_rejects(#[case] key: ProprietaryKey, #[case] expected: BitGoKeyValueError) {
        assert_eq!(BitGoKeyValue::from_key_value(&key, &[]), Err(expected));
    }

    #[test]
    fn test_lookup_filters_by_identifier_subtype_and_keydata() {
        let input = input_with(&[
            (key(BITGO, 0x02, &[0xaa]), vec![1]),
            (key(BITGO, 0x02, &[0xbb]), vec![2]),
            (key(BITGO, 0x03, &[0xaa]), vec![3]),
            (key(b"OTHER", 0x02, &[0xaa]), vec![4]),
        ]);

        let nonces = ProprietaryKeyFilter::bitgo(ProprietaryKeySubtype::Musig2PubNonce);
        assert_eq!(get_proprietary_key_vals(&input, &nonces).len(), 2);

        let one = nonces.with_keydata(&[0xbb]);
        let found = get_proprietary_key_vals(&input, &one);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, &vec![2]);

        let any_bitgo = ProprietaryKeyFilter {
            identifier: BITGO,
            subtype: None,
            keydata: None,
        };
        assert_eq!(get_proprietary_key_vals(&input, &any_bitgo).len(), 3);

        let nothing = nonces.with_keydata(&[0xcc]);
        assert!(get_proprietary_key_vals(&input, &nothing).is_empty());
    }

    #[test]
    fn test_set_and_delete() {
        let mut input = Input::default();
        let kv = BitGoKeyValue::new(ProprietaryKeySubtype::Musig2PubNonce, vec![1], vec![1]);
        set_kv(&mut input, &kv);
        set_kv(
            &mut input,
            &BitGoKeyValue::new(ProprietaryKeySubtype::Musig2PubNonce, vec![1], vec![2]),
        );
        set_kv(
            &mut input,
            &BitGoKeyValue::new(ProprietaryKeySubtype::ZecConsensusBranchId, vec![], vec![0]),
        );
        assert_eq!(input.proprietary.len(), 2);
        assert_eq!(
            find_kv(ProprietaryKeySubtype::Musig2PubNonce, &input.proprietary)
                .next()
                .map(|kv| kv.value),
            Some(vec![2])
        );

        let removed = delete_proprietary_key_vals(
            &mut input,
            &ProprietaryKeyFilter::bitgo(ProprietaryKeySubtype::Musig2PubNonce),
        );
        assert_eq!(removed, 1);
        assert_eq!(input.proprietary.len(), 1);
    }

    #[rstest]
    #[case(key(BITGO, 0x00, &[]), false)]
    #[case(key(BITGO, 0x01, &[]), true)]
    #[case(key(BITGO, 0x02, &[]), true)]
    #[case(key(BITGO, 0x03, &[]), true)]
    #[case(key(BITGO, 0x04, &[]), false)]
    #[case(key(b"OTHER", 0x01, &[]), false)]
    fn test_is_musig2_key(#[case] key: ProprietaryKey, #[case] expected: bool) {
        assert_eq!(is_musig2_key(&key), expected);
    }
}
