//! Scrobble record value types
//!
//! `Track` and `ScrobbleInfo` are plain values: validated on construction,
//! immutable afterwards, no I/O. One `ScrobbleInfo` describes one completed
//! listen and is what the wire codec and durable queue operate on.

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{Error, Result};

/// Track metadata carried by a scrobble
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    title: String,
    album_title: Option<String>,
    duration_millis: Option<i64>,
    artists: Vec<String>,
    album_artists: Vec<String>,
}

impl Track {
    /// Create a track with the given title and no other metadata
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the album title
    #[must_use]
    pub fn with_album(mut self, album_title: impl Into<String>) -> Self {
        self.album_title = Some(album_title.into());
        self
    }

    /// Set the track duration in milliseconds
    #[must_use]
    pub fn with_duration_millis(mut self, millis: i64) -> Self {
        self.duration_millis = Some(millis);
        self
    }

    /// Append an artist. Order is preserved.
    pub fn add_artist(&mut self, name: impl Into<String>) {
        self.artists.push(name.into());
    }

    /// Append an album artist. Order is preserved.
    pub fn add_album_artist(&mut self, name: impl Into<String>) {
        self.album_artists.push(name.into());
    }

    /// Track title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Album title, if known
    #[must_use]
    pub fn album_title(&self) -> Option<&str> {
        self.album_title.as_deref()
    }

    /// Track duration in milliseconds, if known
    #[must_use]
    pub const fn duration_millis(&self) -> Option<i64> {
        self.duration_millis
    }

    /// Artists, in original order
    #[must_use]
    pub fn artists(&self) -> &[String] {
        &self.artists
    }

    /// Album artists, in original order (may be empty)
    #[must_use]
    pub fn album_artists(&self) -> &[String] {
        &self.album_artists
    }

    /// Whether this track carries the fields required for submission
    /// (a non-empty title and at least one artist)
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        !self.title.is_empty() && !self.artists.is_empty()
    }
}

/// One completed listen, ready to be queued and submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobbleInfo {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration_millis: i64,
    track: Track,
}

impl ScrobbleInfo {
    /// Build a scrobble from a completed listen.
    ///
    /// Timestamps are truncated to second precision, matching the wire
    /// format.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRecord`] if `end` precedes `start`,
    /// `duration_millis` is negative, or the track lacks a title or any
    /// artist.
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        duration_millis: i64,
        track: Track,
    ) -> Result<Self> {
        if end < start {
            return Err(Error::invalid_record(format!(
                "scrobble end {end} precedes start {start}"
            )));
        }
        if duration_millis < 0 {
            return Err(Error::invalid_record(format!(
                "negative play duration: {duration_millis} ms"
            )));
        }
        if track.title().is_empty() {
            return Err(Error::invalid_record("track title is empty"));
        }
        if track.artists().is_empty() {
            return Err(Error::invalid_record("track has no artists"));
        }

        Ok(Self {
            start: start.trunc_subsecs(0),
            end: end.trunc_subsecs(0),
            duration_millis,
            track,
        })
    }

    /// When playback of the scrobbled track started (UTC, second precision)
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// When the listen completed (UTC, second precision)
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Milliseconds actually played
    #[must_use]
    pub const fn duration_millis(&self) -> i64 {
        self.duration_millis
    }

    /// The track that was listened to
    #[must_use]
    pub const fn track(&self) -> &Track {
        &self.track
    }
}

/// Check whether a play qualifies for scrobbling.
///
/// A candidate is accepted when the track duration is known and positive and
/// the played share of it reaches `threshold` (a fraction in `[0, 1]`).
/// Producers apply this before handing a record to the client.
#[must_use]
pub fn meets_threshold(played_millis: i64, track_duration_millis: i64, threshold: f64) -> bool {
    if track_duration_millis <= 0 {
        return false;
    }
    played_millis as f64 >= threshold * track_duration_millis as f64
}
