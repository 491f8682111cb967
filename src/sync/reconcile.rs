//! Post-fetch cleanup of faction datasheet lists.
//!
//! Two rules run over the full block set, always in this order:
//!
//! 1. **Exclusions**: configured unit names are removed from the
//!    `<code>_translated` block of each configured code.
//! 2. **Subfaction de-duplication**: a parent faction loses every datasheet
//!    whose normalized name also appears in one of its subfactions.
//!
//! Both rules are membership filters over the current data, so running the
//! pass again on its own output changes nothing. Name sets for rule 2 are
//! captured from the post-exclusion snapshot before any parent is trimmed,
//! which makes the result independent of block iteration order.
//!
//! The pass never touches the store. It reports which blocks it changed so
//! the caller can persist them.

use super::config::ExclusionConfig;
use crate::data::keys::BlockKey;
use crate::data::model::{normalize_name, FactionHeader};
use crate::storage::BlockMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Storage keys of blocks whose datasheet list changed.
    pub changed: BTreeSet<String>,
    /// Datasheets removed by exclusion rules.
    pub excluded: usize,
    /// Datasheets removed from parents as subfaction duplicates.
    pub deduplicated: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Applies exclusions, then subfaction de-duplication, to `blocks` in place.
pub fn reconcile(blocks: &mut BlockMap, exclusions: &ExclusionConfig) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    apply_exclusions(blocks, exclusions, &mut outcome);
    deduplicate_subfactions(blocks, &mut outcome);

    if !outcome.is_noop() {
        log::info!(
            "Reconciled {} block(s): {} excluded, {} duplicate(s) removed",
            outcome.changed.len(),
            outcome.excluded,
            outcome.deduplicated
        );
    }
    outcome
}

fn is_translated_key(key: &str) -> bool {
    BlockKey::from_storage_key(key).is_some_and(|k| k.is_translated())
}

fn datasheets(block: &Value) -> Option<&Vec<Value>> {
    block.get("datasheets")?.as_array()
}

fn datasheets_mut(block: &mut Value) -> Option<&mut Vec<Value>> {
    block.get_mut("datasheets")?.as_array_mut()
}

fn datasheet_name(datasheet: &Value) -> Option<&str> {
    datasheet.get("name")?.as_str()
}

/// Retains datasheets for which `keep` holds; returns how many were removed.
fn retain_datasheets(list: &mut Vec<Value>, keep: impl Fn(&str) -> bool) -> usize {
    let before = list.len();
    list.retain(|datasheet| datasheet_name(datasheet).map_or(true, &keep));
    before - list.len()
}

fn apply_exclusions(
    blocks: &mut BlockMap,
    exclusions: &ExclusionConfig,
    outcome: &mut ReconcileOutcome,
) {
    for code in exclusions.codes() {
        let names = exclusions.names_for(code);
        let key = BlockKey::translated(code).to_storage_key();
        let Some(list) = blocks.get_mut(&key).and_then(datasheets_mut) else {
            continue;
        };

        let removed = retain_datasheets(list, |name| !names.contains(name));
        if removed > 0 {
            log::debug!("Excluded {} datasheet(s) from {}", removed, key);
            outcome.excluded += removed;
            outcome.changed.insert(key);
        }
    }
}

/// Normalized names contributed by one subfaction block.
struct SubfactionNames {
    source_key: String,
    names: HashSet<String>,
}

fn deduplicate_subfactions(blocks: &mut BlockMap, outcome: &mut ReconcileOutcome) {
    let mut by_parent: BTreeMap<String, Vec<SubfactionNames>> = BTreeMap::new();

    for (key, block) in blocks.iter() {
        if !is_translated_key(key) {
            continue;
        }
        let Some(header) = FactionHeader::from_block(block) else {
            continue;
        };
        if !header.is_subfaction {
            continue;
        }
        let (Some(parent_id), Some(list)) = (header.parent_id, datasheets(block)) else {
            continue;
        };

        by_parent.entry(parent_id).or_default().push(SubfactionNames {
            source_key: key.clone(),
            names: list
                .iter()
                .filter_map(datasheet_name)
                .map(normalize_name)
                .collect(),
        });
    }

    if by_parent.is_empty() {
        return;
    }

    for (key, block) in blocks.iter_mut() {
        if !is_translated_key(key) {
            continue;
        }
        let Some(subfactions) = block
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| by_parent.get(id))
        else {
            continue;
        };

        // A block never de-duplicates against itself.
        let names: HashSet<&str> = subfactions
            .iter()
            .filter(|sub| sub.source_key != *key)
            .flat_map(|sub| sub.names.iter().map(String::as_str))
            .collect();
        if names.is_empty() {
            continue;
        }

        let Some(list) = datasheets_mut(block) else {
            continue;
        };

        let removed =
            retain_datasheets(list, |name| !names.contains(normalize_name(name).as_str()));
        if removed > 0 {
            log::debug!("Removed {} subfaction duplicate(s) from {}", removed, key);
            outcome.deduplicated += removed;
            outcome.changed.insert(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sheets(names: &[&str]) -> Value {
        Value::Array(names.iter().map(|n| json!({ "name": n })).collect())
    }

    fn faction(id: &str, names: &[&str]) -> Value {
        json!({ "id": id, "is_subfaction": false, "datasheets": sheets(names) })
    }

    fn subfaction(id: &str, parent: &str, names: &[&str]) -> Value {
        json!({ "id": id, "is_subfaction": true, "parent_id": parent, "datasheets": sheets(names) })
    }

    fn names_of(blocks: &BlockMap, key: &str) -> Vec<String> {
        datasheets(&blocks[key])
            .unwrap()
            .iter()
            .filter_map(datasheet_name)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_subfaction_duplicates_removed_from_parent() {
        let mut blocks = BlockMap::from([
            ("SM_translated".to_string(), faction("SM", &["Intercessor Squad", "Captain"])),
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["Captain"])),
        ]);

        let outcome = reconcile(&mut blocks, &ExclusionConfig::default());

        assert_eq!(names_of(&blocks, "SM_translated"), ["Intercessor Squad"]);
        assert_eq!(names_of(&blocks, "CHBT_translated"), ["Captain"]);
        assert_eq!(outcome.changed, BTreeSet::from(["SM_translated".to_string()]));
        assert_eq!(outcome.deduplicated, 1);
    }

    #[test]
    fn test_exclusion_removes_configured_names() {
        let mut blocks = BlockMap::from([(
            "SM_translated".to_string(),
            faction("SM", &["Intercessor Squad", "Captain"]),
        )]);
        let exclusions = ExclusionConfig::new().exclude("SM", "core", ["Captain"]);

        let outcome = reconcile(&mut blocks, &exclusions);

        assert_eq!(names_of(&blocks, "SM_translated"), ["Intercessor Squad"]);
        assert_eq!(outcome.excluded, 1);
    }

    #[test]
    fn test_exclusion_only_affects_its_own_faction() {
        let mut blocks = BlockMap::from([
            ("SM_translated".to_string(), faction("SM", &["Captain"])),
            ("CSM_translated".to_string(), faction("CSM", &["Captain"])),
        ]);
        let exclusions = ExclusionConfig::new().exclude("SM", "core", ["Captain"]);

        reconcile(&mut blocks, &exclusions);

        assert!(names_of(&blocks, "SM_translated").is_empty());
        assert_eq!(names_of(&blocks, "CSM_translated"), ["Captain"]);
    }

    #[test]
    fn test_excluded_subfaction_unit_does_not_trim_parent() {
        let mut blocks = BlockMap::from([
            ("SM_translated".to_string(), faction("SM", &["Captain", "Chaplain"])),
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["Captain", "Chaplain"])),
        ]);
        let exclusions = ExclusionConfig::new().exclude("CHBT", "legends", ["Chaplain"]);

        reconcile(&mut blocks, &exclusions);

        assert_eq!(names_of(&blocks, "CHBT_translated"), ["Captain"]);
        assert_eq!(names_of(&blocks, "SM_translated"), ["Chaplain"]);
    }

    #[test]
    fn test_name_matching_is_normalized_and_order_preserved() {
        let mut blocks = BlockMap::from([
            (
                "SM_translated".to_string(),
                faction("SM", &["Scouts", "  CAPTAIN ", "Terminators", "Lieutenant"]),
            ),
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["captain", "lieutenant  "])),
        ]);

        reconcile(&mut blocks, &ExclusionConfig::default());

        assert_eq!(names_of(&blocks, "SM_translated"), ["Scouts", "Terminators"]);
    }

    #[test]
    fn test_parent_located_by_id_field() {
        // The parent's block key differs from its id.
        let mut blocks = BlockMap::from([
            ("space_marines_translated".to_string(), faction("SM", &["Captain", "Scouts"])),
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["Captain"])),
        ]);

        reconcile(&mut blocks, &ExclusionConfig::default());

        assert_eq!(names_of(&blocks, "space_marines_translated"), ["Scouts"]);
    }

    #[test]
    fn test_missing_parent_or_datasheets_is_noop() {
        let mut blocks = BlockMap::from([
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["Captain"])),
            (
                "DW_translated".to_string(),
                json!({
                    "id": "DW",
                    "is_subfaction": true,
                    "datasheets": sheets(&["Watch Master"]),
                }),
            ),
            (
                "BA_translated".to_string(),
                json!({ "id": "BA", "is_subfaction": true, "parent_id": "SM" }),
            ),
            ("SM_flat_en".to_string(), json!({ "Captain": "Captain" })),
        ]);
        let before = blocks.clone();

        let outcome = reconcile(&mut blocks, &ExclusionConfig::new().exclude("XX", "core", ["A"]));

        assert!(outcome.is_noop());
        assert_eq!(blocks, before);
    }

    #[test]
    fn test_unrelated_malformed_subfaction_field_still_deduplicates() {
        let mut blocks = BlockMap::from([
            ("SM_translated".to_string(), faction("SM", &["Captain", "Scouts"])),
            (
                "CHBT_translated".to_string(),
                json!({
                    "id": 7,
                    "is_subfaction": true,
                    "parent_id": "SM",
                    "datasheets": sheets(&["Captain"]),
                }),
            ),
        ]);

        let outcome = reconcile(&mut blocks, &ExclusionConfig::default());

        assert_eq!(names_of(&blocks, "SM_translated"), ["Scouts"]);
        assert_eq!(outcome.deduplicated, 1);
    }

    #[test]
    fn test_parent_without_datasheets_is_skipped() {
        let mut blocks = BlockMap::from([
            ("SM_translated".to_string(), json!({ "id": "SM", "datasheets": "broken" })),
            ("CHBT_translated".to_string(), subfaction("CHBT", "SM", &["Captain"])),
        ]);
        let before = blocks.clone();

        assert!(reconcile(&mut blocks, &ExclusionConfig::default()).is_noop());
        assert_eq!(blocks, before);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut blocks = BlockMap::from([
            (
                "SM_translated".to_string(),
                faction("SM", &["Intercessor Squad", "Captain", "Chaplain"]),
            ),
            (
                "CHBT_translated".to_string(),
                subfaction("CHBT", "SM", &["Captain", "Emperor's Champion"]),
            ),
            (
                "BA_translated".to_string(),
                subfaction("BA", "SM", &["Chaplain", "Sanguinary Priest"]),
            ),
        ]);
        let exclusions = ExclusionConfig::new()
            .exclude("SM", "core", ["Intercessor Squad"])
            .exclude("BA", "legends", ["Sanguinary Priest"]);

        reconcile(&mut blocks, &exclusions);
        let once = blocks.clone();
        let second = reconcile(&mut blocks, &exclusions);

        assert!(second.is_noop());
        assert_eq!(blocks, once);
        assert!(names_of(&blocks, "SM_translated").is_empty());
    }

    /// Builds parent <- middle <- leaf using the given block codes.
    fn chain(parent: &str, middle: &str, leaf: &str) -> BlockMap {
        BlockMap::from([
            (
                format!("{parent}_translated"),
                faction(parent, &["Captain", "Scouts", "Dreadnought"]),
            ),
            (
                format!("{middle}_translated"),
                json!({
                    "id": middle,
                    "is_subfaction": true,
                    "parent_id": parent,
                    "datasheets": sheets(&["Captain", "Dreadnought", "Death Company"]),
                }),
            ),
            (format!("{leaf}_translated"), subfaction(leaf, middle, &["Dreadnought"])),
        ])
    }

    #[test]
    fn test_result_independent_of_iteration_order() {
        // Same structure, codes chosen so the middle sorts before and after the leaf.
        let mut first = chain("M", "A", "Z");
        let mut second = chain("M", "Z", "A");

        reconcile(&mut first, &ExclusionConfig::default());
        reconcile(&mut second, &ExclusionConfig::default());

        assert_eq!(names_of(&first, "M_translated"), ["Scouts"]);
        assert_eq!(names_of(&second, "M_translated"), ["Scouts"]);
        assert_eq!(names_of(&first, "A_translated"), ["Captain", "Death Company"]);
        assert_eq!(names_of(&second, "Z_translated"), ["Captain", "Death Company"]);
    }

    #[test]
    fn test_self_parented_subfaction_keeps_its_list() {
        let mut blocks = BlockMap::from([(
            "SM_translated".to_string(),
            subfaction("SM", "SM", &["Captain"]),
        )]);

        assert!(reconcile(&mut blocks, &ExclusionConfig::default()).is_noop());
        assert_eq!(names_of(&blocks, "SM_translated"), ["Captain"]);
    }
}
