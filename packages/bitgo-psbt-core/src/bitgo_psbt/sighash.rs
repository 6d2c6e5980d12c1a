//! Taproot sighash type handling for MuSig2 partial signatures
//!
//! A 33-byte partial signature carries its sighash type as the trailing
//! byte; a 32-byte one implies `SIGHASH_DEFAULT`.

use miniscript::bitcoin::sighash::TapSighashType;
use thiserror::Error;

/// Implied sighash type of a 32-byte partial signature
pub const SIGHASH_DEFAULT: u8 = 0x00;

const SIGHASH_ALL: u8 = 0x01;
const SIGHASH_NONE: u8 = 0x02;
const SIGHASH_SINGLE: u8 = 0x03;
const SIGHASH_ANYONECANPAY: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SighashError {
    #[error("invalid taproot sighash type: {0:#04x}")]
    InvalidTapSighashType(u8),
}

/// Validates a taproot sighash type byte
///
/// Valid values are 0x00 and the base types 0x01..=0x03, optionally
/// combined with ANYONECANPAY (0x80).
pub fn validate_tap_sighash_type(sighash_type: u8) -> Result<(), SighashError> {
    if sighash_type == SIGHASH_DEFAULT {
        return Ok(());
    }

    let base_type = sighash_type & !SIGHASH_ANYONECANPAY;
    match base_type {
        SIGHASH_ALL | SIGHASH_NONE | SIGHASH_SINGLE => Ok(()),
        _ => Err(SighashError::InvalidTapSighashType(sighash_type)),
    }
}

pub fn to_tap_sighash_type(sighash_type: u8) -> Result<TapSighashType, SighashError> {
    validate_tap_sighash_type(sighash_type)?;
    TapSighashType::from_consensus_u8(sighash_type)
        .map_err(|_| SighashError::InvalidTapSighashType(sighash_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x00, TapSighashType::Default)]
    #[case(0x01, TapSighashType::All)]
    #[case(0x02, TapSighashType::None)]
    #[case(0x03, TapSighashType::Single)]
    #[case(0x81, TapSighashType::AllPlusAnyoneCanPay)]
    #[case(0x82, TapSighashType::NonePlusAnyoneCanPay)]
    #[case(0x83, TapSighashType::SinglePlusAnyoneCanPay)]
    fn test_valid_tap_sighash_types(#[case] byte: u8, #[case] expected: TapSighashType) {
        assert_eq!(to_tap_sighash_type(byte), Ok(expected));
    }

    #[rstest]
    #[case(0x04)]
    #[case(0x41)]
    #[case(0x80)]
    #[case(0x84)]
    #[case(0xff)]
    fn test_invalid_tap_sighash_types(#[case] byte: u8) {
        assert_eq!(
            to_tap_sighash_type(byte),
            Err(SighashError::InvalidTapSighashType(byte))
        );
    }
}
