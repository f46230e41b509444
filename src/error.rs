//! Error types for xlens.
//!
//! Follows the archive pipeline's failure taxonomy: a missing artifact is
//! never an error (the gateway returns `None`), a malformed artifact is a
//! [`LensError::Decode`] (or [`LensError::Parquet`] for tables), and
//! anything the store backend reports besides not-found is a
//! [`LensError::Store`].

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Primary error type for xlens operations.
#[derive(Error, Debug)]
pub enum LensError {
    // =========================================================================
    // Artifact Errors
    // =========================================================================
    /// Malformed header or payload in one of the binary decoders.
    #[error("Failed to decode {format} artifact: {reason}")]
    Decode { format: &'static str, reason: String },

    /// A JSON companion file exists but could not be parsed.
    #[error("Failed to parse '{file}': {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// Parquet reader failure.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Transport or backend failure other than not-found.
    #[error("Object store error for '{key}': {reason}")]
    Store { key: String, reason: String },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No artifacts exist for the requested account.
    #[error("No archive found for account '{account}'")]
    AccountNotFound {
        account: String,
        suggestion: Option<String>,
    },

    // =========================================================================
    // IO / Runtime Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A blocking worker panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Error observed through a coalesced (shared) computation.
    #[error(transparent)]
    Shared(Arc<LensError>),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

}

/// Result type alias for xlens operations.
pub type Result<T> = std::result::Result<T, LensError>;

impl LensError {
    /// Create a decode error for the given artifact format.
    pub fn decode(format: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            format,
            reason: reason.into(),
        }
    }

    /// Create a store error.
    pub fn store(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error for a companion file.
    pub fn json(file: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            file: file.into(),
            source,
        }
    }

    /// Create an account-not-found error.
    pub fn account_not_found(account: impl Into<String>, suggestion: Option<String>) -> Self {
        Self::AccountNotFound {
            account: account.into(),
            suggestion,
        }
    }

    /// Unwrap shared errors down to the originating variant.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// True when the artifact itself is broken (as opposed to the transport).
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self.root(), Self::Decode { .. } | Self::Parquet(_))
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self.root() {
            Self::AccountNotFound {
                suggestion: Some(name),
                ..
            } => Some(format_did_you_mean(name)),
            Self::AccountNotFound { .. } => {
                Some("Run 'xlens list' to see the accounts in this store.".to_string())
            }
            Self::Decode { .. } | Self::Parquet(_) => {
                Some("The artifact is corrupt; re-run the analysis job for this account.".to_string())
            }
            Self::Store { .. } | Self::Http(_) => {
                Some("Check the store root or base URL and your network connection.".to_string())
            }
            _ => None,
        }
    }
}

impl From<Arc<Self>> for LensError {
    fn from(shared: Arc<Self>) -> Self {
        Self::Shared(shared)
    }
}

// =============================================================================
// CLI Error Formatting Utilities
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    if !suggestions.is_empty() {
        output.push_str("\n\n   ");
        if suggestions.len() == 1 {
            let _ = write!(output, "{} {}", "Hint:".cyan(), suggestions[0]);
        } else {
            let _ = write!(output, "{}:", "Try".cyan());
            for suggestion in suggestions {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}

/// Calculate the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev_row: Vec<usize> = (0..=b_len).collect();
    let mut curr_row: Vec<usize> = vec![0; b_len + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_len]
}

/// Find the closest candidate to `input` within `max_distance` edits
/// (default 2). Exact matches are not returned.
#[must_use]
pub fn find_closest_match<'a>(
    input: &str,
    candidates: &'a [String],
    max_distance: Option<usize>,
) -> Option<&'a str> {
    let max_dist = max_distance.unwrap_or(2);
    let input_lower = input.to_lowercase();

    candidates
        .iter()
        .map(|candidate| {
            let distance = levenshtein_distance(&input_lower, &candidate.to_lowercase());
            (candidate.as_str(), distance)
        })
        .filter(|(_, distance)| *distance <= max_dist && *distance > 0)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Format a "did you mean?" suggestion.
#[must_use]
pub fn format_did_you_mean(suggestion: &str) -> String {
    format!("Did you mean '{}'?", suggestion.green())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LensError::decode("npy", "bad magic");
        assert!(err.to_string().contains("npy"));
        assert!(err.to_string().contains("bad magic"));
        assert!(err.is_decode());
    }

    #[test]
    fn test_shared_error_unwraps_to_root() {
        let shared = Arc::new(LensError::store("alice/trees.pkl", "connection reset"));
        let err = LensError::from(shared);
        assert!(matches!(err.root(), LensError::Store { .. }));
        assert!(!err.is_decode());
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_json_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = LensError::json("group_results.json", source);
        assert!(!err.is_decode());
        assert!(err.to_string().contains("group_results.json"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LensError = io_err.into();
        assert!(matches!(err, LensError::IoError(_)));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein_distance("hello", "hello"), 0);
        assert_eq!(levenshtein_distance("cat", "cats"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }

    #[test]
    fn find_closest_account() {
        let accounts = vec!["ostaninth".to_string(), "visakanv".to_string()];
        assert_eq!(
            find_closest_match("ostanith", &accounts, None),
            Some("ostaninth")
        );
        assert_eq!(find_closest_match("ostaninth", &accounts, None), None);
        assert_eq!(find_closest_match("zzz", &accounts, None), None);
    }

    #[test]
    fn not_found_suggestion_mentions_candidate() {
        let err = LensError::account_not_found("ostanith", Some("ostaninth".to_string()));
        assert!(err.suggestion().unwrap().contains("ostaninth"));
    }

    #[test]
    fn format_error_multiple_suggestions() {
        let output = format_error("Test Error", "Something went wrong", &["First", "Second"]);
        assert!(output.contains("Test Error"));
        assert!(output.contains("First"));
        assert!(output.contains("Second"));
    }
}
