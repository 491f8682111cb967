//! Block key conventions.
//!
//! Every consumer locates a faction's data by constructing one of two keys:
//!
//! ```text
//! <code>_translated      merged faction document
//! <code>_flat_<lang>     flat translation map, lang in {en, fr}
//! ```
//!
//! The same convention determines where each block lives on the remote host.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TRANSLATED_SUFFIX: &str = "_translated";
const FLAT_INFIX: &str = "_flat_";

/// Short identifier for a playable faction (e.g. "SM", "CSM").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactionCode(pub String);

impl FactionCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FactionCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

/// Language of a flat translation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Fr,
}

impl Lang {
    pub const ALL: [Lang; 2] = [Lang::En, Lang::Fr];

    pub fn code(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Fr => "fr",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Lang::En),
            "fr" => Ok(Lang::Fr),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}

/// Identifies one block in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockKey {
    /// Merged faction document.
    Translated(FactionCode),
    /// Flat translation map for one language.
    Flat(FactionCode, Lang),
}

impl BlockKey {
    pub fn translated(code: impl Into<FactionCode>) -> Self {
        BlockKey::Translated(code.into())
    }

    pub fn flat(code: impl Into<FactionCode>, lang: Lang) -> Self {
        BlockKey::Flat(code.into(), lang)
    }

    /// The three blocks fetched for one faction code, in fetch order.
    pub fn all_for(code: &FactionCode) -> [BlockKey; 3] {
        [
            BlockKey::Translated(code.clone()),
            BlockKey::Flat(code.clone(), Lang::En),
            BlockKey::Flat(code.clone(), Lang::Fr),
        ]
    }

    pub fn code(&self) -> &FactionCode {
        match self {
            BlockKey::Translated(code) | BlockKey::Flat(code, _) => code,
        }
    }

    /// Generates the storage key string.
    pub fn to_storage_key(&self) -> String {
        match self {
            BlockKey::Translated(code) => format!("{}{}", code, TRANSLATED_SUFFIX),
            BlockKey::Flat(code, lang) => format!("{}{}{}", code, FLAT_INFIX, lang),
        }
    }

    /// Parses a storage key string back into a BlockKey.
    ///
    /// Returns `None` for keys outside the two block families.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        if let Some(code) = key.strip_suffix(TRANSLATED_SUFFIX) {
            if code.is_empty() {
                return None;
            }
            return Some(BlockKey::Translated(FactionCode::from(code)));
        }

        let (code, lang) = key.rsplit_once(FLAT_INFIX)?;
        if code.is_empty() {
            return None;
        }
        Some(BlockKey::Flat(FactionCode::from(code), lang.parse().ok()?))
    }

    /// Path of the block's document relative to the dataset base URL.
    pub fn remote_path(&self) -> String {
        match self {
            BlockKey::Translated(code) => format!("{}.translated.json", code),
            BlockKey::Flat(code, lang) => format!("{}/{}.flat.json", lang, code),
        }
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, BlockKey::Translated(_))
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}
