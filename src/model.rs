//! Data models for the archive pipeline.
//!
//! [`TweetRow`] is the canonical per-tweet record every producer shares; the
//! rest are the view models handed to the presentation layer. All of them
//! serialize in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cluster id written by the clustering job for tweets that did not cluster.
pub const SENTINEL_CLUSTER: &str = "-1";

/// Canonical tweet record, one per row of the tweet table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRow {
    pub tweet_id: String,
    pub account_id: String,
    pub cluster_id: String,
    pub cluster_probability: f64,
    pub favorite_count: i64,
    pub reply_to_user_id: String,
    pub reply_to_username: String,
    pub reply_to_tweet_id: String,
    pub username: String,
    pub full_text: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Raw timestamp text when it could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_text: Option<String>,
}

/// One bucket of a monthly histogram. `month` is the first instant of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCount {
    pub month: DateTime<Utc>,
    pub count: usize,
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub username: String,
    pub handle: String,
    pub description: String,
    pub clusters: usize,
    pub tweets: usize,
    pub followers: usize,
    pub following: usize,
    pub likes: i64,
    pub avatar_url: String,
    pub tweets_over_time: Vec<MonthlyCount>,
}

// =============================================================================
// Clusters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClusters {
    pub clusters: Vec<ClusterStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStat {
    pub id: String,
    pub name: String,
    pub summary: String,
    pub low_quality: bool,
    pub tweets_count: usize,
    pub total_likes: i64,
    pub median_likes: i64,
    pub median_date: Option<DateTime<Utc>>,
    pub tweets_per_month: Vec<MonthlyCount>,
    pub most_replied_to: Vec<ReplyTarget>,
    pub related_clusters: Vec<RelatedCluster>,
    pub yearly_summaries: Vec<YearlySummary>,
    pub ontology: Ontology,
    pub ontology_tweet_details: Vec<TweetDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub username: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedCluster {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlySummary {
    pub period: String,
    pub summary: String,
}

/// Semantic units extracted per cluster, six fixed categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ontology {
    pub entities: Vec<OntologyItem>,
    pub beliefs_and_values: Vec<OntologyItem>,
    pub goals: Vec<OntologyItem>,
    pub social_relationships: Vec<OntologyItem>,
    pub moods_and_emotional_tones: Vec<OntologyItem>,
    pub key_concepts_and_ideas: Vec<OntologyItem>,
}

impl Ontology {
    /// All items across the six categories, in category order.
    pub fn items(&self) -> impl Iterator<Item = &OntologyItem> {
        self.entities
            .iter()
            .chain(&self.beliefs_and_values)
            .chain(&self.goals)
            .chain(&self.social_relationships)
            .chain(&self.moods_and_emotional_tones)
            .chain(&self.key_concepts_and_ideas)
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut OntologyItem> {
        self.entities
            .iter_mut()
            .chain(&mut self.beliefs_and_values)
            .chain(&mut self.goals)
            .chain(&mut self.social_relationships)
            .chain(&mut self.moods_and_emotional_tones)
            .chain(&mut self.key_concepts_and_ideas)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items().next().is_none()
    }
}

/// One ontology item. `label` holds the category's headline field (name,
/// belief, goal, username, mood, concept); `description` holds its detail
/// (the interaction type for social relationships).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OntologyItem {
    pub id: String,
    pub label: String,
    pub description: String,
    pub tweet_references: Vec<String>,
}

/// A tweet cited as ontology evidence, resolved against the tweet table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetDetail {
    pub id: String,
    pub account_id: String,
    pub username: String,
    pub full_text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub favorite_count: i64,
    pub avatar_url: String,
}

// =============================================================================
// Threads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserThreads {
    pub threads: Vec<ThreadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEntry {
    pub id: String,
    pub cluster_id: String,
    pub is_incomplete: bool,
    pub root_is_reply: bool,
    pub contains_retweet: bool,
    pub total_favorites: i64,
    pub root_created_at: Option<DateTime<Utc>>,
    pub max_cluster_probability: f64,
    pub tweets: Vec<ThreadTweet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadTweet {
    pub id: String,
    pub username: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Raw timestamp text when it could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_text: Option<String>,
    pub full_text: String,
    pub favorite_count: i64,
    pub cluster_id: String,
    pub cluster_probability: f64,
    pub is_reply: bool,
    pub is_retweet: bool,
}

// =============================================================================
// Embeddings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEmbeddings {
    pub embeddings: Vec<EmbeddingPoint>,
    pub original_dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingPoint {
    pub tweet_id: String,
    pub cluster_id: String,
    pub x: f64,
    pub y: f64,
}

// =============================================================================
// Bundle
// =============================================================================

/// Which producer a bundle slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    Summary,
    Clusters,
    Threads,
    Embeddings,
}

impl std::fmt::Display for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Clusters => write!(f, "clusters"),
            Self::Threads => write!(f, "threads"),
            Self::Embeddings => write!(f, "embeddings"),
        }
    }
}

/// The four views of one account. A slot is `None` when its producer had no
/// data or failed; failures are reported in `errors` keyed by producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBundle {
    pub summary: Option<UserSummary>,
    pub clusters: Option<UserClusters>,
    pub threads: Option<UserThreads>,
    pub embeddings: Option<UserEmbeddings>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub errors: BTreeMap<Producer, String>,
}
