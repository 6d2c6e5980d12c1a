//! Script type of a PSBT input, determined from the fields it populates.

use std::fmt;

use miniscript::bitcoin::psbt::Input;
use miniscript::bitcoin::{Script, XOnlyPublicKey};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputScriptType {
    P2sh,
    P2shP2pk,
    P2wsh,
    P2shP2wsh,
    TaprootScriptPathSpend,
    TaprootKeyPathSpend,
}

impl InputScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputScriptType::P2sh => "p2sh",
            InputScriptType::P2shP2pk => "p2shP2pk",
            InputScriptType::P2wsh => "p2wsh",
            InputScriptType::P2shP2wsh => "p2shP2wsh",
            InputScriptType::TaprootScriptPathSpend => "taprootScriptPathSpend",
            InputScriptType::TaprootKeyPathSpend => "taprootKeyPathSpend",
        }
    }

    pub fn is_taproot(&self) -> bool {
        matches!(
            self,
            InputScriptType::TaprootScriptPathSpend | InputScriptType::TaprootKeyPathSpend
        )
    }
}

impl fmt::Display for InputScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptTypeError {
    #[error("found both {found} and {other} metadata")]
    Conflict {
        found: InputScriptType,
        other: &'static str,
    },

    #[error("unsupported: input has {0} tap leaf scripts")]
    MultipleTapLeafScripts(usize),

    #[error("could not classify input")]
    Unclassifiable,
}

/// The input fields that decide the script type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptTypeFields<'a> {
    pub redeem_script: Option<&'a Script>,
    pub witness_script: Option<&'a Script>,
    pub tap_leaf_script_count: usize,
    pub tap_internal_key: Option<&'a XOnlyPublicKey>,
}

impl<'a> From<&'a Input> for ScriptTypeFields<'a> {
    fn from(input: &'a Input) -> Self {
        ScriptTypeFields {
            redeem_script: input.redeem_script.as_deref(),
            witness_script: input.witness_script.as_deref(),
            tap_leaf_script_count: input.tap_scripts.len(),
            tap_internal_key: input.tap_internal_key.as_ref(),
        }
    }
}

/// Classify the fields in precedence order.
///
/// Redeem and witness scripts decide the legacy and segwit types. Tap leaf
/// scripts or a tap internal key next to any of them is a contradiction, as
/// are both taproot fields together.
pub fn classify(fields: &ScriptTypeFields<'_>) -> Result<InputScriptType, ScriptTypeError> {
    let mut script_type = match (fields.redeem_script, fields.witness_script) {
        (Some(_), Some(_)) => Some(InputScriptType::P2shP2wsh),
        (Some(redeem_script), None) if redeem_script.is_p2pk() => Some(InputScriptType::P2shP2pk),
        (Some(_), None) => Some(InputScriptType::P2sh),
        (None, Some(_)) => Some(InputScriptType::P2wsh),
        (None, None) => None,
    };

    if fields.tap_leaf_script_count > 0 {
        if let Some(found) = script_type {
            return Err(ScriptTypeError::Conflict {
                found,
                other: "taproot script-path",
            });
        }
        if fields.tap_leaf_script_count > 1 {
            return Err(ScriptTypeError::MultipleTapLeafScripts(
                fields.tap_leaf_script_count,
            ));
        }
        script_type = Some(InputScriptType::TaprootScriptPathSpend);
    }

    if fields.tap_internal_key.is_some() {
        if let Some(found) = script_type {
            return Err(ScriptTypeError::Conflict {
                found,
                other: "taproot key-path",
            });
        }
        script_type = Some(InputScriptType::TaprootKeyPathSpend);
    }

    script_type.ok_or(ScriptTypeError::Unclassifiable)
}

pub fn get_psbt_input_script_type(input: &Input) -> Result<InputScriptType, ScriptTypeError> {
    classify(&ScriptTypeFields::from(input))
}
