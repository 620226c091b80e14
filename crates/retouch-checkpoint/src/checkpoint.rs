use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One commit on the project timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "hash")]
    pub id: String,
    #[serde(rename = "shortHash")]
    pub short_id: String,
    /// Subject line of the commit message.
    pub message: String,
    pub author: String,
    /// Author time with its original offset; serializes as RFC 3339.
    #[serde(rename = "date")]
    pub timestamp: DateTime<FixedOffset>,
}

impl Checkpoint {
    /// `None` for history entries that cannot be represented (non-UTF-8
    /// author or message, out-of-range timestamps).
    pub fn from_commit(commit: &git2::Commit<'_>) -> Option<Self> {
        let author = commit.author();
        let when = author.when();
        let offset = FixedOffset::east_opt(when.offset_minutes() * 60)?;
        let timestamp = DateTime::from_timestamp(when.seconds(), 0)?.with_timezone(&offset);

        let short_id = commit.as_object().short_id().ok()?;

        Some(Self {
            id: commit.id().to_string(),
            short_id: short_id.as_str()?.to_string(),
            message: commit.summary()?.to_string(),
            author: author.name()?.to_string(),
            timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineState {
    /// On the timeline branch, at its newest checkpoint.
    OnTimelineHead,
    /// On the timeline branch, reset to an older checkpoint.
    OnHistoricalCheckpoint,
    /// HEAD is detached or on some other branch. Repaired by the next mutating operation.
    Detached,
}
