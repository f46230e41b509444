//! Thread reconstruction.
//!
//! The tree artifacts map a root tweet id to `{tweets, children, paths}`.
//! For each root the longest path is chosen as "the" thread: from the
//! precomputed `paths` when present, otherwise by walking `children`. Each
//! tweet on the path is filled from the normalized rows first and from the
//! tree's own tweet record second.

use crate::model::{ThreadEntry, ThreadTweet, TweetRow};
use crate::pickle::{ObjectGraph, Value};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One tree source and whether it holds incomplete conversations.
#[derive(Debug, Clone, Copy)]
pub struct TreeSource<'a> {
    pub graph: &'a ObjectGraph,
    pub incomplete: bool,
}

/// True when `text` is a retweet (`rt @` prefix, case-insensitive).
#[must_use]
pub fn is_retweet(text: &str) -> bool {
    text.trim_start().to_lowercase().starts_with("rt @")
}

/// Reconstruct threads from the given sources, earlier sources taking
/// precedence for roots present in several. Ordered by root date, newest
/// first, undated threads last in discovery order.
#[must_use]
pub fn reconstruct(rows: &[TweetRow], sources: &[TreeSource<'_>]) -> Vec<ThreadEntry> {
    // Last occurrence wins on duplicate ids.
    let lookup: HashMap<&str, &TweetRow> = rows
        .iter()
        .filter(|r| !r.tweet_id.is_empty())
        .map(|r| (r.tweet_id.as_str(), r))
        .collect();

    let mut seen = HashSet::new();
    let mut threads = Vec::new();
    for source in sources {
        let graph = source.graph;
        let Some(entries) = graph.entries(&graph.root) else {
            continue;
        };
        for (key, tree) in entries {
            let Some(root) = graph.key_text(key) else {
                continue;
            };
            if !seen.insert(root.clone()) {
                continue;
            }
            let Some(tree) = Tree::read(graph, tree) else {
                continue;
            };
            if let Some(thread) = tree.thread(&root, source.incomplete, &lookup) {
                threads.push(thread);
            }
        }
    }

    threads.sort_by(|a, b| match (a.root_created_at, b.root_created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    debug!(threads = threads.len(), "Reconstructed threads");
    threads
}

struct Tree<'g> {
    graph: &'g ObjectGraph,
    tweets: Option<&'g Value>,
    children: HashMap<String, Vec<String>>,
    paths: Vec<Vec<String>>,
}

impl<'g> Tree<'g> {
    fn read(graph: &'g ObjectGraph, tree: &'g Value) -> Option<Self> {
        if graph.entries(tree).is_none() {
            return None;
        }

        let id_list = |value: &Value| -> Vec<String> {
            graph
                .items(value)
                .unwrap_or_default()
                .iter()
                .filter_map(|v| graph.key_text(v))
                .collect()
        };

        let children = graph
            .get(tree, "children")
            .and_then(|c| graph.entries(c))
            .unwrap_or_default()
            .iter()
            .filter_map(|(parent, list)| {
                let kids = id_list(list);
                Some((graph.key_text(parent)?, kids)).filter(|(_, kids)| !kids.is_empty())
            })
            .collect();

        let paths = graph
            .get(tree, "paths")
            .and_then(|p| graph.entries(p))
            .unwrap_or_default()
            .iter()
            .map(|(_, path)| id_list(path))
            .filter(|path| !path.is_empty())
            .collect();

        Some(Self {
            graph,
            tweets: graph.get(tree, "tweets").filter(|t| graph.entries(t).is_some()),
            children,
            paths,
        })
    }

    /// Longest candidate from `paths` (root prepended when missing, first
    /// found wins ties), else the deepest leaf of a depth-first walk.
    fn longest_path(&self, root: &str) -> Vec<String> {
        let mut best: Vec<String> = Vec::new();
        for path in &self.paths {
            let mut candidate = path.clone();
            if candidate.first().map(String::as_str) != Some(root) {
                candidate.insert(0, root.to_string());
            }
            if candidate.len() > best.len() {
                best = candidate;
            }
        }
        if !best.is_empty() {
            return best;
        }

        let mut stack = vec![vec![root.to_string()]];
        while let Some(path) = stack.pop() {
            let node = path.last().map(String::as_str).unwrap_or_default();
            let mut extended = false;
            for child in self.children.get(node).into_iter().flatten() {
                if path.contains(child) {
                    continue;
                }
                let mut next = path.clone();
                next.push(child.clone());
                stack.push(next);
                extended = true;
            }
            if !extended && path.len() > best.len() {
                best = path;
            }
        }

        if best.is_empty() {
            best.push(root.to_string());
        }
        best
    }

    fn record(&self, id: &str) -> Option<&'g Value> {
        self.tweets
            .and_then(|tweets| self.graph.get(tweets, id))
            .filter(|r| self.graph.entries(r).is_some())
    }

    /// Timestamp from the row when it has one, parsed or not, else from the
    /// tree record. Unparseable values keep their text.
    fn created_at(
        &self,
        row: Option<&TweetRow>,
        record: Option<&Value>,
    ) -> (Option<DateTime<Utc>>, Option<String>) {
        if let Some(row) = row.filter(|r| r.created_at.is_some() || r.created_at_text.is_some()) {
            return (row.created_at, row.created_at_text.clone());
        }
        let Some(value) = record.and_then(|r| self.graph.get(r, "created_at")) else {
            return (None, None);
        };
        match self.graph.timestamp(value) {
            Some(at) => (Some(at), None),
            None => (None, self.graph.text(value).filter(|t| !t.is_empty())),
        }
    }

    fn text(&self, record: Option<&Value>, key: &str) -> String {
        record
            .and_then(|r| self.graph.get(r, key))
            .and_then(|v| self.graph.text(v))
            .unwrap_or_default()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn thread(
        &self,
        root: &str,
        incomplete: bool,
        lookup: &HashMap<&str, &TweetRow>,
    ) -> Option<ThreadEntry> {
        let path = self.longest_path(root);

        let mut tweets = Vec::with_capacity(path.len());
        let mut resolved = 0usize;
        for id in path {
            let row = lookup.get(id.as_str()).copied();
            let record = self.record(&id);
            if row.is_some() || record.is_some() {
                resolved += 1;
            }

            let prefer = |from_row: Option<&String>, key: &str| {
                from_row
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| self.text(record, key))
            };
            let number = |key: &str| {
                record
                    .and_then(|r| self.graph.get(r, key))
                    .and_then(|v| self.graph.number(v))
                    .map(|n| n.as_f64())
                    .filter(|f| f.is_finite())
            };

            let full_text = prefer(row.map(|r| &r.full_text), "full_text");
            let reply_to = prefer(row.map(|r| &r.reply_to_tweet_id), "reply_to_tweet_id");
            let (created_at, created_at_text) = self.created_at(row, record);

            tweets.push(ThreadTweet {
                username: prefer(row.map(|r| &r.username), "username"),
                created_at,
                created_at_text,
                favorite_count: row.map_or_else(
                    || number("favorite_count").map_or(0, |f| f.trunc() as i64),
                    |r| r.favorite_count,
                ),
                cluster_id: prefer(row.map(|r| &r.cluster_id), "cluster"),
                cluster_probability: row.map_or_else(
                    || number("cluster_prob").unwrap_or(0.0),
                    |r| r.cluster_probability,
                ),
                is_reply: !reply_to.is_empty(),
                is_retweet: is_retweet(&full_text),
                full_text,
                id,
            });
        }

        if resolved == 0 {
            return None;
        }

        let first = tweets.first()?;
        Some(ThreadEntry {
            id: root.to_string(),
            cluster_id: tweets
                .iter()
                .map(|t| t.cluster_id.as_str())
                .find(|c| !c.is_empty())
                .unwrap_or_default()
                .to_string(),
            is_incomplete: incomplete,
            root_is_reply: first.is_reply,
            contains_retweet: tweets.iter().any(|t| t.is_retweet),
            total_favorites: tweets.iter().map(|t| t.favorite_count).sum(),
            root_created_at: first.created_at,
            max_cluster_probability: tweets
                .iter()
                .map(|t| t.cluster_probability)
                .fold(0.0, f64::max),
            tweets,
        })
    }
}
