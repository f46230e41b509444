//! Cluster aggregation.
//!
//! Joins normalized rows against the level-0 slice of the cluster hierarchy
//! and produces one [`ClusterStat`] per cluster: like statistics, median
//! date, a gap-filled monthly histogram, reply targets, related clusters,
//! yearly summaries, and the ontology with resolved tweet references.
//!
//! Everything here is a pure function of its inputs; re-running it on the
//! same data yields identical output.

use crate::error::Result;
use crate::model::{ClusterStat, MonthlyCount, RelatedCluster, ReplyTarget, TweetRow};
use crate::ontology::{ClusterNotes, LocalIdMap, json_text, resolve_references};
use crate::rows::to_text;
use crate::table::{self, Cell};
use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Columns read from the hierarchy table.
pub const HIERARCHY_COLUMNS: &[&str] = &["cluster_id", "name", "summary", "low_quality_cluster", "level"];

/// Reply targets kept per cluster.
pub const TOP_REPLY_TARGETS: usize = 5;

/// One level-0 cluster from the hierarchy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub low_quality: bool,
}

/// Decode the hierarchy table, keeping level-0 clusters in file order.
///
/// # Errors
///
/// Propagates table decode errors.
pub fn parse_hierarchy(bytes: Bytes) -> Result<Vec<HierarchyEntry>> {
    let records = table::decode(bytes, HIERARCHY_COLUMNS)?;
    let entries: Vec<HierarchyEntry> = records
        .iter()
        .filter(|record| match record.get("level") {
            Some(Cell::Text(level)) => level.trim() == "0",
            Some(cell) => cell.as_i64() == Some(0),
            None => false,
        })
        .filter_map(|record| {
            let text = |name: &str| record.get(name).map(to_text).unwrap_or_default();
            let id = text("cluster_id");
            if id.is_empty() {
                return None;
            }
            let name = match record.get("name") {
                Some(Cell::Text(name)) if !name.trim().is_empty() => name.trim().to_string(),
                _ => id.clone(),
            };
            let low_quality = match record.get("low_quality_cluster") {
                Some(Cell::Bool(flag)) => *flag,
                Some(cell) => to_text(cell) == "1",
                None => false,
            };
            Some(HierarchyEntry {
                summary: record.get("summary").and_then(Cell::as_text).unwrap_or_default().trim().to_string(),
                id,
                name,
                low_quality,
            })
        })
        .collect();
    debug!(clusters = entries.len(), "Parsed level-0 hierarchy");
    Ok(entries)
}

/// Symmetric "discussed together" links: cluster id to `{other id: name}`.
pub type RelatedMap = HashMap<String, BTreeMap<String, String>>;

/// Build related-cluster links from the group results file. Every pair of
/// members of one group becomes mutually related.
#[must_use]
pub fn related_from_groups(groups_file: Option<&Value>, names: &HashMap<String, String>) -> RelatedMap {
    let mut related = RelatedMap::new();
    let groups = groups_file
        .and_then(|v| v.get("groups"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten();

    for group in groups {
        let members: Vec<(String, String)> = group
            .get("members")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let id = json_text(entry.get("id"));
                if id.is_empty() {
                    return None;
                }
                let name = Some(json_text(entry.get("name")))
                    .filter(|n| !n.is_empty())
                    .or_else(|| names.get(&id).cloned())
                    .unwrap_or_else(|| id.clone());
                Some((id, name))
            })
            .collect();

        for (id, _) in &members {
            for (other, other_name) in &members {
                if other != id {
                    related
                        .entry(id.clone())
                        .or_default()
                        .insert(other.clone(), other_name.clone());
                }
            }
        }
    }
    related
}

/// Aggregate every hierarchy cluster. Rows whose cluster is not in the
/// hierarchy are ignored. Output is ordered by median date, newest first,
/// with undated clusters last in hierarchy order. Tweet detail avatars are
/// left empty.
#[must_use]
pub fn aggregate(
    hierarchy: &[HierarchyEntry],
    rows: &[TweetRow],
    notes: &ClusterNotes,
    related: &RelatedMap,
    ids: &LocalIdMap,
) -> Vec<ClusterStat> {
    let known: HashSet<&str> = hierarchy.iter().map(|h| h.id.as_str()).collect();

    let mut members: HashMap<&str, Vec<&TweetRow>> = HashMap::new();
    for row in rows {
        if known.contains(row.cluster_id.as_str()) {
            members.entry(row.cluster_id.as_str()).or_default().push(row);
        }
    }
    // Last occurrence wins on duplicate ids.
    let by_id: HashMap<&str, &TweetRow> = rows
        .iter()
        .filter(|r| !r.tweet_id.is_empty())
        .map(|r| (r.tweet_id.as_str(), r))
        .collect();

    let mut stats: Vec<ClusterStat> = hierarchy
        .iter()
        .map(|entry| {
            let cluster_rows = members.get(entry.id.as_str()).map_or(&[][..], Vec::as_slice);
            let likes: Vec<i64> = cluster_rows.iter().map(|r| r.favorite_count).collect();
            let dates: Vec<DateTime<Utc>> = cluster_rows.iter().filter_map(|r| r.created_at).collect();

            let mut ontology = notes.ontology.get(&entry.id).cloned().unwrap_or_default();
            let ontology_tweet_details = resolve_references(&mut ontology, &entry.id, ids, &by_id);

            let mut related_clusters: Vec<RelatedCluster> = related
                .get(&entry.id)
                .into_iter()
                .flatten()
                .filter(|(id, _)| known.contains(id.as_str()))
                .map(|(id, name)| RelatedCluster {
                    id: id.clone(),
                    name: name.clone(),
                })
                .collect();
            related_clusters.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

            ClusterStat {
                id: entry.id.clone(),
                name: entry.name.clone(),
                summary: entry.summary.clone(),
                low_quality: entry.low_quality,
                tweets_count: cluster_rows.len(),
                total_likes: likes.iter().sum(),
                median_likes: median_likes(&likes),
                median_date: median_date(&dates),
                tweets_per_month: monthly_histogram(&dates),
                most_replied_to: reply_targets(cluster_rows),
                related_clusters,
                yearly_summaries: notes.yearly.get(&entry.id).cloned().unwrap_or_default(),
                ontology,
                ontology_tweet_details,
            }
        })
        .collect();

    stats.sort_by(|a, b| match (a.median_date, b.median_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    stats
}

/// Median of like counts, rounded half to even.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
#[must_use]
pub fn median_likes(likes: &[i64]) -> i64 {
    if likes.is_empty() {
        return 0;
    }
    let mut sorted = likes.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        ((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0).round_ties_even() as i64
    }
}

/// Median instant; the midpoint of the two middle instants for even counts.
#[must_use]
pub fn median_date(dates: &[DateTime<Utc>]) -> Option<DateTime<Utc>> {
    if dates.is_empty() {
        return None;
    }
    let mut micros: Vec<i64> = dates.iter().map(DateTime::timestamp_micros).collect();
    micros.sort_unstable();
    let mid = micros.len() / 2;
    let value = if micros.len() % 2 == 1 {
        micros[mid]
    } else {
        let sum = i128::from(micros[mid - 1]) + i128::from(micros[mid]);
        i64::try_from(sum / 2).ok()?
    };
    DateTime::from_timestamp_micros(value)
}

/// Monthly counts from the first to the last observed month, zero-filled.
#[must_use]
pub fn monthly_histogram(dates: &[DateTime<Utc>]) -> Vec<MonthlyCount> {
    let mut counts: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    for date in dates {
        *counts.entry((date.year(), date.month())).or_default() += 1;
    }
    let (Some(&first), Some(&last)) = (counts.keys().next(), counts.keys().next_back()) else {
        return Vec::new();
    };

    let mut buckets = Vec::new();
    let (mut year, mut month) = first;
    while (year, month) <= last {
        if let Some(start) = NaiveDate::from_ymd_opt(year, month, 1).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            buckets.push(MonthlyCount {
                month: start.and_utc(),
                count: counts.get(&(year, month)).copied().unwrap_or(0),
            });
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    buckets
}

/// Most frequent reply targets, count descending then username ascending.
#[must_use]
pub fn reply_targets(rows: &[&TweetRow]) -> Vec<ReplyTarget> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let username = row.reply_to_username.trim();
        if !username.is_empty() {
            *counts.entry(username).or_default() += 1;
        }
    }
    let mut targets: Vec<ReplyTarget> = counts
        .into_iter()
        .map(|(username, count)| ReplyTarget {
            username: username.to_string(),
            count,
        })
        .collect();
    targets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.username.cmp(&b.username)));
    targets.truncate(TOP_REPLY_TARGETS);
    targets
}

/// Account ids cited by ontology tweet details across clusters.
#[must_use]
pub fn cited_accounts(stats: &[ClusterStat]) -> Vec<String> {
    let mut seen = HashSet::new();
    stats
        .iter()
        .flat_map(|s| &s.ontology_tweet_details)
        .filter(|d| !d.account_id.is_empty() && seen.insert(d.account_id.as_str()))
        .map(|d| d.account_id.clone())
        .collect()
}

/// Fill tweet detail avatars from `resolved`, falling back to `placeholder`.
pub fn apply_avatars(stats: &mut [ClusterStat], resolved: &HashMap<String, String>, placeholder: &str) {
    for detail in stats.iter_mut().flat_map(|s| &mut s.ontology_tweet_details) {
        detail.avatar_url = resolved
            .get(&detail.account_id)
            .cloned()
            .unwrap_or_else(|| placeholder.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ontology, OntologyItem};
    use crate::table::tests::{Column, write_table};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn row(id: &str, cluster: &str, likes: i64, date: Option<DateTime<Utc>>) -> TweetRow {
        TweetRow {
            tweet_id: id.into(),
            account_id: "1".into(),
            cluster_id: cluster.into(),
            favorite_count: likes,
            created_at: date,
            ..TweetRow::default()
        }
    }

    fn entry(id: &str, name: &str) -> HierarchyEntry {
        HierarchyEntry {
            id: id.into(),
            name: name.into(),
            summary: String::new(),
            low_quality: false,
        }
    }

    #[test]
    fn histogram_is_contiguous_and_zero_filled() {
        let buckets = monthly_histogram(&[at(2023, 4, 20), at(2023, 1, 3)]);
        let counts: Vec<usize> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, [1, 0, 0, 1]);
        assert_eq!(buckets[0].month, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(buckets[3].month, Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn histogram_crosses_year_boundary() {
        let buckets = monthly_histogram(&[at(2022, 11, 1), at(2023, 2, 1)]);
        assert_eq!(buckets.len(), 4);
        assert!(monthly_histogram(&[]).is_empty());
    }

    #[test]
    fn medians() {
        assert_eq!(median_likes(&[]), 0);
        assert_eq!(median_likes(&[5, 1, 3]), 3);
        assert_eq!(median_likes(&[1, 2]), 2); // 1.5 rounds to even
        assert_eq!(median_likes(&[2, 3]), 2); // 2.5 rounds to even
        assert_eq!(median_date(&[at(2023, 1, 1), at(2023, 1, 3)]), Some(at(2023, 1, 2)));
        assert_eq!(median_date(&[]), None);
    }

    #[test]
    fn reply_ranking_breaks_ties_by_name() {
        let mut rows = Vec::new();
        for (i, name) in ["zed", "amy", "bob", "bob", "c", "d", "e"].iter().enumerate() {
            let mut r = row(&i.to_string(), "a", 0, None);
            r.reply_to_username = (*name).to_string();
            rows.push(r);
        }
        let refs: Vec<&TweetRow> = rows.iter().collect();
        let targets = reply_targets(&refs);
        let names: Vec<&str> = targets.iter().map(|t| t.username.as_str()).collect();
        assert_eq!(names, ["bob", "amy", "c", "d", "e"]);
        assert_eq!(targets[0].count, 2);
    }

    #[test]
    fn aggregate_orders_by_median_date_and_ignores_unknown_clusters() {
        let hierarchy = vec![entry("a", "Alpha"), entry("b", "Beta"), entry("c", "Gamma")];
        let rows = vec![
            row("1", "a", 10, Some(at(2022, 1, 1))),
            row("2", "b", 4, Some(at(2023, 6, 1))),
            row("3", "b", 6, None),
            row("4", "zzz", 100, Some(at(2024, 1, 1))),
        ];
        let stats = aggregate(&hierarchy, &rows, &ClusterNotes::default(), &RelatedMap::new(), &LocalIdMap::default());

        let order: Vec<&str> = stats.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, ["b", "a", "c"]);
        assert_eq!(stats[0].tweets_count, 2);
        assert_eq!(stats[0].total_likes, 10);
        assert_eq!(stats[0].median_likes, 5);
        assert_eq!(stats[2].tweets_count, 0);
        assert_eq!(stats[2].median_date, None);
    }

    #[test]
    fn aggregate_is_idempotent() {
        let hierarchy = vec![entry("a", "Alpha"), entry("b", "Beta")];
        let rows = vec![row("1", "a", 1, Some(at(2023, 1, 1))), row("2", "b", 2, Some(at(2023, 2, 1)))];
        let related = related_from_groups(
            Some(&json!({"groups": [{"members": [{"id": "a"}, {"id": "b"}]}]})),
            &HashMap::new(),
        );
        let run = || {
            serde_json::to_string(&aggregate(&hierarchy, &rows, &ClusterNotes::default(), &related, &LocalIdMap::default()))
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn related_clusters_are_symmetric_and_restricted() {
        let names: HashMap<String, String> = [("a".to_string(), "Alpha".to_string())].into_iter().collect();
        let groups = json!({"groups": [
            {"members": [{"id": "a"}, {"id": "b", "name": "Beta"}, {"id": "gone"}]},
            {"members": [{"id": "b"}]}
        ]});
        let related = related_from_groups(Some(&groups), &names);
        assert_eq!(related["b"]["a"], "Alpha");
        assert_eq!(related["a"]["b"], "Beta");

        let hierarchy = vec![entry("a", "Alpha"), entry("b", "Beta")];
        let stats = aggregate(&hierarchy, &[], &ClusterNotes::default(), &related, &LocalIdMap::default());
        let a = stats.iter().find(|s| s.id == "a").unwrap();
        assert_eq!(a.related_clusters, vec![RelatedCluster { id: "b".into(), name: "Beta".into() }]);
    }

    #[test]
    fn ontology_details_get_avatars() {
        let hierarchy = vec![entry("a", "Alpha")];
        let rows = vec![row("1", "a", 1, None)];
        let mut notes = ClusterNotes::default();
        notes.ontology.insert(
            "a".into(),
            Ontology {
                goals: vec![OntologyItem {
                    id: String::new(),
                    label: "g".into(),
                    description: String::new(),
                    tweet_references: vec!["0".into()],
                }],
                ..Ontology::default()
            },
        );
        let ids = LocalIdMap::from_json(&json!({"a": {"0": "1"}}));
        let mut stats = aggregate(&hierarchy, &rows, &notes, &RelatedMap::new(), &ids);
        assert_eq!(cited_accounts(&stats), ["1"]);

        apply_avatars(&mut stats, &HashMap::new(), "placeholder.png");
        assert_eq!(stats[0].ontology_tweet_details[0].avatar_url, "placeholder.png");
    }

    #[test]
    fn hierarchy_keeps_level_zero() {
        let bytes = write_table(&[
            Column::Int64("cluster_id", vec![1, 2, 3]),
            Column::Utf8("name", vec!["One", "", "Three"]),
            Column::Utf8("summary", vec!["s1", "s2", "s3"]),
            Column::Int64("low_quality_cluster", vec![0, 1, 0]),
            Column::Int64("level", vec![0, 0, 1]),
        ]);
        let entries = parse_hierarchy(bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "One");
        assert_eq!(entries[1].name, "2");
        assert!(entries[1].low_quality);
    }
}
