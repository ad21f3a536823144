use std::cmp::Reverse;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single user review as stored in the shared document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    #[serde(deserialize_with = "lenient_string")]
    pub text: String,
    /// Intended range is 0..=100; not enforced here
    #[serde(deserialize_with = "lenient_rating")]
    pub rating: i64,
    /// ISO-8601 timestamp assigned by the submitting client, kept verbatim
    #[serde(rename = "createdAt", deserialize_with = "lenient_string")]
    pub created_at: String,
}

/// Strings pass through, other scalars are stringified, anything else is empty
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    })
}

/// Any JSON number, rounded to the nearest integer. Numeric strings are
/// parsed; every other value counts as 0.
fn lenient_rating<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let rating = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(round_rating)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(round_rating),
        _ => None,
    };

    Ok(rating.unwrap_or(0))
}

// `as` saturates at the i64 bounds and maps NaN to 0.
fn round_rating(value: f64) -> i64 {
    value.round() as i64
}

impl Review {
    /// Create a review stamped with the current time
    pub fn new(text: impl Into<String>, rating: i64) -> Self {
        Self {
            text: text.into(),
            rating,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Parsed creation time, if the stored string is valid RFC 3339
    pub fn created_at_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// The full contents of the remote review document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAggregate {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reviews: Vec<Review>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Review>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Review>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Count and average rating of an aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewStats {
    pub count: usize,
    pub average: f64,
}

impl ReviewAggregate {
    pub fn new(reviews: Vec<Review>) -> Self {
        Self { reviews }
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    /// Compute count and average. The average of an empty aggregate is 0.
    pub fn stats(&self) -> ReviewStats {
        let count = self.reviews.len();
        if count == 0 {
            return ReviewStats {
                count: 0,
                average: 0.0,
            };
        }

        // Summed as f64: ratings come from the remote document unchecked.
        let total: f64 = self.reviews.iter().map(|r| r.rating as f64).sum();

        ReviewStats {
            count,
            average: total / count as f64,
        }
    }

    /// Reviews ordered newest first, for display only.
    ///
    /// Timestamps that fail to parse sort after all valid ones; ties keep
    /// their stored order. The aggregate itself is left untouched.
    pub fn newest_first(&self) -> Vec<&Review> {
        let mut sorted: Vec<&Review> = self.reviews.iter().collect();
        sorted.sort_by_cached_key(|r| Reverse(r.created_at_time()));
        sorted
    }
}
