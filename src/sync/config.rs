//! Sync configuration.

use crate::data::keys::FactionCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Faction codes fetched when no explicit list is configured.
///
/// Umbrella factions come before the subfactions that reference them.
pub const DEFAULT_FACTION_CODES: &[&str] = &[
    "core", "AC", "AdM", "AE", "AM", "AoI", "AS", "CD", "CSM", "DG", "DRU", "EC", "GC", "GK",
    "QI", "QT", "LoV", "NEC", "ORK", "SM", "TAU", "TL", "TS", "TYR", "WE", "BA", "BT", "DA",
    "DW", "SW", "CHBT",
];

/// Static exclusion rules: faction code -> category -> unit names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionConfig(pub BTreeMap<String, BTreeMap<String, Vec<String>>>);

impl ExclusionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `names` under `category` for `code`.
    pub fn exclude<I, S>(mut self, code: &str, category: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(code.to_string())
            .or_default()
            .entry(category.to_string())
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Faction codes that carry exclusion rules.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every excluded name for `code`, flattened across categories.
    pub fn names_for(&self, code: &str) -> BTreeSet<&str> {
        self.0
            .get(code)
            .map(|categories| {
                categories
                    .values()
                    .flat_map(|names| names.iter().map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn default_codes() -> Vec<FactionCode> {
    DEFAULT_FACTION_CODES
        .iter()
        .map(|code| FactionCode::from(*code))
        .collect()
}

fn default_desktop_timeout_ms() -> u64 {
    30_000
}

fn default_mobile_timeout_ms() -> u64 {
    90_000
}

/// Configuration for one datasource sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Root URL of the static dataset host.
    pub base_url: String,
    /// Faction codes to fetch, in order.
    #[serde(default = "default_codes")]
    pub codes: Vec<FactionCode>,
    /// Batch timeout for regular browsers.
    #[serde(default = "default_desktop_timeout_ms")]
    pub desktop_timeout_ms: u64,
    /// Batch timeout for constrained mobile browsers.
    #[serde(default = "default_mobile_timeout_ms")]
    pub mobile_timeout_ms: u64,
    #[serde(default)]
    pub exclusions: ExclusionConfig,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            codes: default_codes(),
            desktop_timeout_ms: default_desktop_timeout_ms(),
            mobile_timeout_ms: default_mobile_timeout_ms(),
            exclusions: ExclusionConfig::default(),
        }
    }

    pub fn with_codes<I, C>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<FactionCode>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionConfig) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_timeouts(mut self, desktop: Duration, mobile: Duration) -> Self {
        self.desktop_timeout_ms = desktop.as_millis() as u64;
        self.mobile_timeout_ms = mobile.as_millis() as u64;
        self
    }

    /// Batch timeout for the given client.
    pub fn timeout(&self, constrained_mobile: bool) -> Duration {
        if constrained_mobile {
            Duration::from_millis(self.mobile_timeout_ms)
        } else {
            Duration::from_millis(self.desktop_timeout_ms)
        }
    }

    /// Joins `path` onto the base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Whether a user agent belongs to a constrained mobile browser.
pub fn is_constrained_mobile(user_agent: &str) -> bool {
    const MARKERS: [&str; 5] = ["iPhone", "iPad", "iPod", "Android", "Mobile"];
    MARKERS.iter().any(|marker| user_agent.contains(marker))
}
