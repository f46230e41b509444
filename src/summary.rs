//! Account summary.
//!
//! The archive owner is the account with the most rows; every count is taken
//! from the owner's point of view.

use crate::clusters::monthly_histogram;
use crate::model::{SENTINEL_CLUSTER, TweetRow, UserSummary};
use crate::ontology::LocalIdMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Companion metadata the summary draws on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummarySources<'a> {
    pub group_results: Option<&'a Value>,
    pub clustering_params: Option<&'a Value>,
    pub local_ids: Option<&'a LocalIdMap>,
}

/// The account id with the most rows; ties go to the first seen.
#[must_use]
pub fn owner_account(rows: &[TweetRow]) -> Option<&str> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, row) in rows.iter().enumerate() {
        if !row.account_id.is_empty() {
            counts.entry(row.account_id.as_str()).or_insert((0, position)).0 += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then_with(|| first_b.cmp(first_a))
        })
        .map(|(account, _)| account)
}

/// Build the summary. `None` when there are no rows and neither the group
/// results nor the clustering parameters exist. The avatar URL is left
/// empty for the caller to fill.
#[must_use]
pub fn build(rows: &[TweetRow], sources: SummarySources<'_>) -> Option<UserSummary> {
    if rows.is_empty() && sources.group_results.is_none() && sources.clustering_params.is_none() {
        return None;
    }

    let description = sources
        .group_results
        .and_then(|g| g.get("overall_summary"))
        .and_then(Value::as_str)
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let owner = owner_account(rows);
    let owned: Vec<&TweetRow> = rows
        .iter()
        .filter(|r| owner.is_some_and(|o| r.account_id == o))
        .collect();

    let clusters = sources
        .clustering_params
        .and_then(|p| p.get("n_clusters"))
        .and_then(|n| n.as_u64().or_else(|| n.as_str().and_then(|s| s.trim().parse().ok())))
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            owned
                .iter()
                .map(|r| r.cluster_id.as_str())
                .filter(|c| !c.is_empty() && *c != SENTINEL_CLUSTER)
                .collect::<HashSet<_>>()
                .len()
        });

    let mut following = HashSet::new();
    let mut followers = HashSet::new();
    if let Some(owner) = owner {
        for row in rows {
            if row.account_id == owner {
                if !row.reply_to_user_id.is_empty() && row.reply_to_user_id != owner {
                    following.insert(row.reply_to_user_id.as_str());
                }
            } else if row.reply_to_user_id == owner && !row.account_id.is_empty() {
                followers.insert(row.account_id.as_str());
            }
        }
    }

    let tweets = if owned.is_empty() {
        sources.local_ids.map_or(0, LocalIdMap::canonical_count)
    } else {
        owned.len()
    };

    let username = owned
        .iter()
        .map(|r| r.username.as_str())
        .find(|u| !u.is_empty())
        .unwrap_or_default()
        .to_string();
    let handle = if username.is_empty() {
        String::new()
    } else {
        format!("@{username}")
    };

    let dates: Vec<_> = owned.iter().filter_map(|r| r.created_at).collect();

    Some(UserSummary {
        handle,
        username,
        description,
        clusters,
        tweets,
        followers: followers.len(),
        following: following.len(),
        likes: owned.iter().map(|r| r.favorite_count).sum(),
        avatar_url: String::new(),
        tweets_over_time: monthly_histogram(&dates),
    })
}
