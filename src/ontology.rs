//! Ontology and yearly-summary metadata.
//!
//! Two JSON companion files describe clusters: the ontology file and the
//! older labels file. Both are keyed by cluster and carry the same shapes.
//! For each cluster the ontology file wins; the labels file only fills
//! clusters the ontology file left without content.
//!
//! Ontology items cite tweets by cluster-local ids. [`LocalIdMap`] remaps
//! them to canonical tweet ids, and [`resolve_references`] keeps only the
//! references that land on a known row.

use crate::model::{Ontology, OntologyItem, TweetDetail, TweetRow, YearlySummary};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Items kept per ontology category.
pub const MAX_ITEMS_PER_CATEGORY: usize = 4;

/// Per-cluster ontology and yearly summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNotes {
    pub ontology: HashMap<String, Ontology>,
    pub yearly: HashMap<String, Vec<YearlySummary>>,
}

impl ClusterNotes {
    /// Build notes for `cluster_ids` from the ontology file, then the labels
    /// file for whatever it left empty.
    #[must_use]
    pub fn from_sources(
        ontology_file: Option<&Value>,
        labels_file: Option<&Value>,
        cluster_ids: &HashSet<String>,
    ) -> Self {
        let mut notes = Self::default();
        for source in [ontology_file, labels_file].into_iter().flatten() {
            notes.absorb(source, cluster_ids);
        }
        notes
    }

    fn absorb(&mut self, source: &Value, cluster_ids: &HashSet<String>) {
        let Some(entries) = source.as_object() else {
            return;
        };
        for (key, entry) in entries {
            let cluster = match entry.get("cluster_id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => key.clone(),
            };
            if cluster.is_empty() || !cluster_ids.contains(&cluster) {
                continue;
            }
            let container = entry
                .get("ontology_items")
                .filter(|v| v.is_object())
                .unwrap_or(entry);

            if !self.yearly.contains_key(&cluster) {
                let yearly = parse_yearly(container.get("yearly_summaries"));
                if !yearly.is_empty() {
                    self.yearly.insert(cluster.clone(), yearly);
                }
            }
            if !self.ontology.contains_key(&cluster) {
                let ontology = parse_ontology(container);
                if !ontology.is_empty() {
                    self.ontology.insert(cluster, ontology);
                }
            }
        }
    }
}

/// JSON scalar as trimmed text.
#[must_use]
pub fn json_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.as_i64().map_or_else(
            || match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
                Some(f) => f.to_string(),
                None => n.to_string(),
            },
            |i| i.to_string(),
        ),
        _ => String::new(),
    }
}

fn parse_yearly(value: Option<&Value>) -> Vec<YearlySummary> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let item = item.as_object()?;
            let text = |k: &str| item.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
            let (period, summary) = (text("period"), text("summary"));
            (!period.is_empty() || !summary.is_empty())
                .then_some(YearlySummary { period, summary })
        })
        .collect()
}

/// Parse the six ontology categories from one cluster entry.
#[must_use]
pub fn parse_ontology(container: &Value) -> Ontology {
    let category = |name: &str, label: &str, detail: &str| {
        parse_items(container.get(name), label, detail)
    };
    Ontology {
        entities: category("entities", "name", "description"),
        beliefs_and_values: category("beliefs_and_values", "belief", "description"),
        goals: category("goals", "goal", "description"),
        social_relationships: category("social_relationships", "username", "interaction_type"),
        moods_and_emotional_tones: category("moods_and_emotional_tones", "mood", "description"),
        key_concepts_and_ideas: category("key_concepts_and_ideas", "concept", "description"),
    }
}

fn parse_items(value: Option<&Value>, label_key: &str, detail_key: &str) -> Vec<OntologyItem> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let entry = entry.as_object()?;
            let label = json_text(entry.get(label_key));
            let description = json_text(entry.get(detail_key));
            if label.is_empty() && description.is_empty() {
                return None;
            }
            let tweet_references = entry
                .get("tweet_references")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|r| json_text(Some(r)))
                .filter(|r| !r.is_empty())
                .collect();
            Some(OntologyItem {
                id: json_text(entry.get("id")),
                label,
                description,
                tweet_references,
            })
        })
        .take(MAX_ITEMS_PER_CATEGORY)
        .collect()
}

// =============================================================================
// Reference resolution
// =============================================================================

/// Cluster-local to canonical tweet id tables, `{cluster: {local: canonical}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdMap {
    clusters: HashMap<String, HashMap<String, String>>,
}

impl LocalIdMap {
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        let clusters = value
            .as_object()
            .into_iter()
            .flatten()
            .filter_map(|(cluster, table)| {
                let table = table
                    .as_object()?
                    .iter()
                    .map(|(local, canonical)| (local.clone(), json_text(Some(canonical))))
                    .filter(|(_, canonical)| !canonical.is_empty())
                    .collect();
                Some((cluster.clone(), table))
            })
            .collect();
        Self { clusters }
    }

    /// Canonical id for `reference` in `cluster`. `None` when the cluster
    /// has no table or the table has no such local id.
    #[must_use]
    pub fn resolve(&self, cluster: &str, reference: &str) -> Option<String> {
        self.clusters.get(cluster)?.get(reference).cloned()
    }

    /// Number of distinct canonical ids across all clusters.
    #[must_use]
    pub fn canonical_count(&self) -> usize {
        self.clusters
            .values()
            .flat_map(HashMap::values)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Remap every item's references to canonical ids that exist in `rows`,
/// dropping the rest, and return the cited tweets in first-cited order.
/// Avatar URLs are left empty for the caller to fill.
pub fn resolve_references(
    ontology: &mut Ontology,
    cluster: &str,
    ids: &LocalIdMap,
    rows: &HashMap<&str, &TweetRow>,
) -> Vec<TweetDetail> {
    let mut details = Vec::new();
    let mut cited = HashSet::new();

    for item in ontology.items_mut() {
        let mut seen = HashSet::new();
        item.tweet_references = item
            .tweet_references
            .iter()
            .filter_map(|reference| ids.resolve(cluster, reference))
            .filter(|id| rows.contains_key(id.as_str()) && seen.insert(id.clone()))
            .collect();

        for id in &item.tweet_references {
            if cited.insert(id.clone()) {
                let row = rows[id.as_str()];
                details.push(TweetDetail {
                    id: id.clone(),
                    account_id: row.account_id.clone(),
                    username: row.username.clone(),
                    full_text: row.full_text.clone(),
                    created_at: row.created_at,
                    favorite_count: row.favorite_count,
                    avatar_url: String::new(),
                });
            }
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn ontology_file_wins_per_cluster() {
        let ontology = json!({
            "a": {"ontology_items": {
                "entities": [{"id": 1, "name": "Rust", "description": "lang"}],
                "yearly_summaries": [{"period": "2023", "summary": "busy"}]
            }}
        });
        let labels = json!({
            "a": {"entities": [{"name": "Ignored"}]},
            "b": {"cluster_id": "b", "goals": [{"goal": "ship"}],
                  "yearly_summaries": [{"period": "", "summary": ""}]}
        });
        let notes = ClusterNotes::from_sources(Some(&ontology), Some(&labels), &ids(&["a", "b"]));

        assert_eq!(notes.ontology["a"].entities[0].label, "Rust");
        assert_eq!(notes.ontology["a"].entities[0].id, "1");
        assert_eq!(notes.ontology["b"].goals[0].label, "ship");
        assert_eq!(notes.yearly["a"][0].summary, "busy");
        assert!(!notes.yearly.contains_key("b"));
    }

    #[test]
    fn unknown_clusters_are_skipped() {
        let ontology = json!({"zzz": {"entities": [{"name": "x"}]}});
        let notes = ClusterNotes::from_sources(Some(&ontology), None, &ids(&["a"]));
        assert!(notes.ontology.is_empty());
    }

    #[test]
    fn categories_cap_at_four_and_skip_blank_items() {
        let container = json!({
            "social_relationships": [
                {"username": "", "interaction_type": ""},
                {"username": "a", "interaction_type": "reply"},
                {"username": "b"}, {"username": "c"}, {"username": "d"}, {"username": "e"}
            ]
        });
        let ontology = parse_ontology(&container);
        let labels: Vec<_> = ontology.social_relationships.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, ["a", "b", "c", "d"]);
        assert_eq!(ontology.social_relationships[0].description, "reply");
    }

    #[test]
    fn references_resolve_through_local_ids() {
        let map = LocalIdMap::from_json(&json!({"a": {"0": "100", "1": "999"}}));
        let row = TweetRow {
            tweet_id: "100".into(),
            username: "alice".into(),
            ..TweetRow::default()
        };
        let rows: HashMap<&str, &TweetRow> = [("100", &row)].into_iter().collect();

        let mut ontology = Ontology {
            entities: vec![OntologyItem {
                id: "e".into(),
                label: "x".into(),
                description: String::new(),
                tweet_references: vec!["0".into(), "1".into(), "7".into(), "0".into()],
            }],
            ..Ontology::default()
        };
        let details = resolve_references(&mut ontology, "a", &map, &rows);

        assert_eq!(ontology.entities[0].tweet_references, ["100"]);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].username, "alice");
    }

    #[test]
    fn clusters_without_a_table_drop_references() {
        let map = LocalIdMap::from_json(&json!({"a": {"0": "100"}}));
        assert_eq!(map.resolve("a", "0").as_deref(), Some("100"));
        assert_eq!(map.resolve("b", "100"), None);

        // Even a reference that equals a known tweet id is dropped.
        let row = TweetRow {
            tweet_id: "100".into(),
            ..TweetRow::default()
        };
        let rows: HashMap<&str, &TweetRow> = [("100", &row)].into_iter().collect();
        let mut ontology = Ontology {
            goals: vec![OntologyItem {
                id: String::new(),
                label: "g".into(),
                description: String::new(),
                tweet_references: vec!["100".into()],
            }],
            ..Ontology::default()
        };
        let details = resolve_references(&mut ontology, "b", &map, &rows);
        assert!(ontology.goals[0].tweet_references.is_empty());
        assert!(details.is_empty());
    }

    #[test]
    fn canonical_count_dedupes() {
        let map = LocalIdMap::from_json(&json!({"a": {"0": "1", "1": "2"}, "b": {"0": "2"}}));
        assert_eq!(map.canonical_count(), 2);
    }
}
