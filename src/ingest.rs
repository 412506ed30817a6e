use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::NewPost;
use crate::rss::Item;
use crate::store::{FeedStore, StoreError};

/// `02 Jan 2006 15:04:05 -0700`, the fields after the weekday.
const RFC1123Z_FIELDS: &str = "%d %b %Y %H:%M:%S %z";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("item has no link")]
    MissingLink,

    #[error("invalid publish date '{value}': {reason}")]
    InvalidPubDate { value: String, reason: String },
}

/// What happened to a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Inserted,
    Duplicate,
    /// The item could not be turned into a post.
    Rejected,
    /// The store failed for a reason other than a duplicate url.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl IngestStats {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Inserted => self.inserted += 1,
            ItemOutcome::Duplicate => self.duplicates += 1,
            ItemOutcome::Rejected => self.rejected += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: IngestStats) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.duplicates + self.rejected + self.failed
    }
}

/// Parse an RFC1123Z date such as `Mon, 02 Jan 2006 15:04:05 -0700`.
///
/// Day, minute and second take exactly two digits, the hour one or two, and
/// the offset is `+HHMM` or `-HHMM`. Weekday and month names match in any
/// case. The weekday must be a valid name but is not checked against the
/// date.
pub fn parse_pub_date(value: &str) -> Result<DateTime<Utc>, IngestError> {
    let invalid = |reason: &str| IngestError::InvalidPubDate {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (weekday, rest) = value
        .split_once(',')
        .ok_or_else(|| invalid("missing weekday"))?;
    if name_index(&WEEKDAYS, weekday).is_none() {
        return Err(invalid("unknown weekday"));
    }
    if !rest.starts_with(' ') {
        return Err(invalid("expected a space after the weekday"));
    }

    let fields: Vec<&str> = rest.split_whitespace().collect();
    let [day, month, year, clock, offset] = fields.as_slice() else {
        return Err(invalid("expected day, month, year, time and offset"));
    };

    if !is_digits(day, 2..=2) {
        return Err(invalid("day must have two digits"));
    }
    let month = name_index(&MONTHS, month).ok_or_else(|| invalid("unknown month"))?;
    if !is_digits(year, 4..=4) {
        return Err(invalid("year must have four digits"));
    }

    let clock: Vec<&str> = clock.split(':').collect();
    let [hour, minute, second] = clock.as_slice() else {
        return Err(invalid("time must be HH:MM:SS"));
    };
    if !is_digits(hour, 1..=2) || !is_digits(minute, 2..=2) || !is_digits(second, 2..=2) {
        return Err(invalid("time must be HH:MM:SS"));
    }

    let offset_digits = offset
        .strip_prefix(|c: char| c == '+' || c == '-')
        .ok_or_else(|| invalid("offset must start with + or -"))?;
    if !is_digits(offset_digits, 4..=4) {
        return Err(invalid("offset must be four digits"));
    }

    let normalized = format!(
        "{} {} {} {:0>2}:{}:{} {}",
        day, MONTHS[month], year, hour, minute, second, offset
    );
    DateTime::parse_from_str(&normalized, RFC1123Z_FIELDS)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(&e.to_string()))
}

fn name_index(names: &[&str], value: &str) -> Option<usize> {
    names.iter().position(|name| name.eq_ignore_ascii_case(value))
}

fn is_digits(value: &str, len: RangeInclusive<usize>) -> bool {
    len.contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

/// Build a candidate post for `item`, stamped with `now`.
pub fn post_from_item(
    item: &Item,
    feed_id: Uuid,
    now: DateTime<Utc>,
) -> Result<NewPost, IngestError> {
    let url = item.link.trim();
    if url.is_empty() {
        return Err(IngestError::MissingLink);
    }

    let published_at = parse_pub_date(item.pub_date.trim())?;
    let description = Some(item.description.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Ok(NewPost {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        title: item.title.trim().to_string(),
        url: url.to_string(),
        description,
        published_at,
        feed_id,
    })
}

/// Convert and insert one item. Never fails; the outcome says what happened.
pub async fn ingest_item(store: &dyn FeedStore, feed_id: Uuid, item: &Item) -> ItemOutcome {
    let post = match post_from_item(item, feed_id, Utc::now()) {
        Ok(post) => post,
        Err(e) => {
            warn!("Skipping item '{}' from feed {}: {}", item.title, feed_id, e);
            return ItemOutcome::Rejected;
        }
    };

    match store.create_post(post).await {
        Ok(post) => {
            debug!("Created post: {}", post.title);
            ItemOutcome::Inserted
        }
        Err(StoreError::Conflict) => {
            debug!("Post already exists: {}", item.link);
            ItemOutcome::Duplicate
        }
        Err(e) => {
            warn!("Failed to store post '{}' from feed {}: {}", item.link, feed_id, e);
            ItemOutcome::Failed
        }
    }
}
