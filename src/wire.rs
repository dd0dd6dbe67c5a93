//! JSON wire codec for scrobble records
//!
//! Encodes a [`ScrobbleInfo`] into the service's scrobble format and parses
//! it back. Key order is fixed by struct field order; optional objects
//! (`album`, `length`) are omitted entirely when unknown. Timestamps are
//! always UTC and always rendered with the literal `+0000` offset.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{ScrobbleInfo, Track};

/// Timestamp (de)serialization as `YYYY-MM-DDTHH:MM:SS+0000`
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&dt.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&value, FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireScrobble {
    #[serde(with = "timestamp")]
    scrobble_start_datetime: chrono::DateTime<chrono::Utc>,
    #[serde(with = "timestamp")]
    scrobble_end_datetime: chrono::DateTime<chrono::Utc>,
    scrobble_duration: WireDuration,
    track: WireTrack,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTrack {
    title: String,
    artists: Vec<WireArtist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<WireAlbum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<WireDuration>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireAlbum {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artists: Option<Vec<WireArtist>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireArtist {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDuration {
    amount: i64,
    unit: String,
}

impl WireDuration {
    fn millis(amount: i64) -> Self {
        Self {
            amount,
            unit: "ms".to_string(),
        }
    }

    /// Normalize to milliseconds. The service historically accepted both
    /// `"ms"` and `"s"` units; anything else is malformed.
    fn as_millis(&self) -> Result<i64> {
        if self.amount < 0 {
            return Err(Error::parse(format!(
                "negative duration amount: {}",
                self.amount
            )));
        }
        match self.unit.as_str() {
            "ms" => Ok(self.amount),
            "s" => self
                .amount
                .checked_mul(1000)
                .ok_or_else(|| Error::parse(format!("duration overflow: {}s", self.amount))),
            other => Err(Error::parse(format!("unknown duration unit: {other:?}"))),
        }
    }
}

fn wire_artists(names: &[String]) -> Vec<WireArtist> {
    names
        .iter()
        .map(|name| WireArtist { name: name.clone() })
        .collect()
}

impl From<&ScrobbleInfo> for WireScrobble {
    fn from(info: &ScrobbleInfo) -> Self {
        let track = info.track();
        // The album object appears when either an album title or album
        // artists are known
        let album = if track.album_title().is_none() && track.album_artists().is_empty() {
            None
        } else {
            Some(WireAlbum {
                title: track.album_title().map(ToString::to_string),
                artists: if track.album_artists().is_empty() {
                    None
                } else {
                    Some(wire_artists(track.album_artists()))
                },
            })
        };

        Self {
            scrobble_start_datetime: info.start(),
            scrobble_end_datetime: info.end(),
            scrobble_duration: WireDuration::millis(info.duration_millis()),
            track: WireTrack {
                title: track.title().to_string(),
                artists: wire_artists(track.artists()),
                album,
                length: track.duration_millis().map(WireDuration::millis),
            },
        }
    }
}

impl TryFrom<WireScrobble> for ScrobbleInfo {
    type Error = Error;

    fn try_from(wire: WireScrobble) -> Result<Self> {
        let mut track = Track::new(wire.track.title);
        if let Some(album) = wire.track.album {
            if let Some(title) = album.title {
                track = track.with_album(title);
            }
            for artist in album.artists.unwrap_or_default() {
                track.add_album_artist(artist.name);
            }
        }
        if let Some(length) = wire.track.length {
            track = track.with_duration_millis(length.as_millis()?);
        }
        for artist in wire.track.artists {
            track.add_artist(artist.name);
        }

        Self::new(
            wire.scrobble_start_datetime,
            wire.scrobble_end_datetime,
            wire.scrobble_duration.as_millis()?,
            track,
        )
        .map_err(|e| Error::parse(e.to_string()))
    }
}

/// Encode a scrobble into its wire representation.
///
/// The returned bytes are exactly what is stored in the durable queue and
/// later POSTed to the service.
///
/// # Errors
/// Returns [`Error::Parse`] if serialization fails (practically unreachable
/// for well-formed records).
pub fn encode(info: &ScrobbleInfo) -> Result<Vec<u8>> {
    serde_json::to_vec(&WireScrobble::from(info)).map_err(|e| Error::parse(e.to_string()))
}

/// Decode a wire payload back into a scrobble.
///
/// # Errors
/// Returns [`Error::Parse`] for syntactically invalid JSON or for payloads
/// missing required fields (title, at least one artist, valid timestamps and
/// durations). Never panics on malformed input.
pub fn decode(bytes: &[u8]) -> Result<ScrobbleInfo> {
    let wire: WireScrobble =
        serde_json::from_slice(bytes).map_err(|e| Error::parse(e.to_string()))?;
    wire.try_into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const REFERENCE: &str = r#"{"scrobble_start_datetime":"2000-01-01T23:12:33+0000","scrobble_end_datetime":"2001-02-03T12:10:04+0000","scrobble_duration":{"amount":1001,"unit":"ms"},"track":{"title":"'39","artists":[{"name":"Queen"}],"album":{"title":"A Night at the Opera"},"length":{"amount":12,"unit":"ms"}}}"#;

    fn reference_scrobble() -> ScrobbleInfo {
        let mut track = Track::new("'39")
            .with_album("A Night at the Opera")
            .with_duration_millis(12);
        track.add_artist("Queen");
        ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 23, 12, 33).unwrap(),
            Utc.with_ymd_and_hms(2001, 2, 3, 12, 10, 4).unwrap(),
            1001,
            track,
        )
        .unwrap()
    }

    #[test]
    fn test_encode_all_fields_exact_bytes() {
        let encoded = encode(&reference_scrobble()).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), REFERENCE);
    }

    #[test]
    fn test_decode_then_reencode_is_byte_identical() {
        let decoded = decode(REFERENCE.as_bytes()).unwrap();
        let reencoded = encode(&decoded).unwrap();
        assert_eq!(String::from_utf8(reencoded).unwrap(), REFERENCE);
    }

    #[test]
    fn test_decode_encode_round_trip_equal() {
        let info = reference_scrobble();
        let round_tripped = decode(&encode(&info).unwrap()).unwrap();
        assert_eq!(round_tripped, info);
    }

    #[test]
    fn test_round_trip_multiple_artists() {
        let mut track = Track::new("Duet").with_duration_millis(207_026);
        track.add_artist("Queen");
        track.add_artist("Scorpions");
        let info = ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2002, 1, 1, 23, 12, 33).unwrap(),
            Utc.with_ymd_and_hms(2003, 2, 3, 12, 10, 4).unwrap(),
            1207,
            track,
        )
        .unwrap();

        let round_tripped = decode(&encode(&info).unwrap()).unwrap();
        assert_eq!(round_tripped.track().artists(), ["Queen", "Scorpions"]);
        assert_eq!(round_tripped, info);
    }

    #[test]
    fn test_encode_omits_album_when_unset() {
        let mut track = Track::new("'39").with_duration_millis(12);
        track.add_artist("Queen");
        let info = ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 3, 0).unwrap(),
            180_000,
            track,
        )
        .unwrap();

        let encoded = String::from_utf8(encode(&info).unwrap()).unwrap();
        assert!(!encoded.contains("\"album\""));
        assert!(encoded.contains("\"length\""));
    }

    #[test]
    fn test_encode_omits_length_when_duration_unknown() {
        let mut track = Track::new("'39");
        track.add_artist("Queen");
        let info = ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 3, 0).unwrap(),
            180_000,
            track,
        )
        .unwrap();

        let encoded = String::from_utf8(encode(&info).unwrap()).unwrap();
        assert!(!encoded.contains("\"length\""));
        let round_tripped = decode(encoded.as_bytes()).unwrap();
        assert_eq!(round_tripped.track().duration_millis(), None);
    }

    /// The service format only demonstrates `album.title`; the `artists`
    /// list inside `album` mirrors the shape of `track.artists` and is an
    /// extension of the observed format.
    #[test]
    fn test_album_artists_extension_shape() {
        let mut track = Track::new("'39").with_album("A Night at the Opera");
        track.add_artist("Queen");
        track.add_album_artist("Queen");
        track.add_album_artist("Smile");
        let info = ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 3, 0).unwrap(),
            180_000,
            track,
        )
        .unwrap();

        let encoded = String::from_utf8(encode(&info).unwrap()).unwrap();
        assert!(encoded
            .contains(r#""album":{"title":"A Night at the Opera","artists":[{"name":"Queen"},{"name":"Smile"}]}"#));

        let round_tripped = decode(encoded.as_bytes()).unwrap();
        assert_eq!(round_tripped.track().album_artists(), ["Queen", "Smile"]);
    }

    #[test]
    fn test_album_artists_without_album_title() {
        let mut track = Track::new("'39");
        track.add_artist("Queen");
        track.add_album_artist("Queen");
        let info = ScrobbleInfo::new(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 3, 0).unwrap(),
            180_000,
            track,
        )
        .unwrap();

        let encoded = String::from_utf8(encode(&info).unwrap()).unwrap();
        assert!(encoded.contains(r#""album":{"artists":[{"name":"Queen"}]}"#));

        let round_tripped = decode(encoded.as_bytes()).unwrap();
        assert_eq!(round_tripped.track().album_title(), None);
        assert_eq!(round_tripped.track().album_artists(), ["Queen"]);
    }

    #[test]
    fn test_decode_accepts_seconds_unit() {
        let input = REFERENCE.replace(
            r#""scrobble_duration":{"amount":1001,"unit":"ms"}"#,
            r#""scrobble_duration":{"amount":2,"unit":"s"}"#,
        );
        let decoded = decode(input.as_bytes()).unwrap();
        assert_eq!(decoded.duration_millis(), 2000);
    }

    #[test]
    fn test_decode_rejects_unknown_unit() {
        let input = REFERENCE.replace(r#""unit":"ms"}"#, r#""unit":"min"}"#);
        assert!(matches!(decode(input.as_bytes()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_decode_malformed_json() {
        // Missing the closing braces
        let truncated = &REFERENCE[..REFERENCE.len() - 3];
        assert!(matches!(decode(truncated.as_bytes()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_decode_missing_title() {
        let input = REFERENCE.replace(r#""title":"'39","#, "");
        assert!(matches!(decode(input.as_bytes()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_decode_empty_artists() {
        let input = REFERENCE.replace(r#"[{"name":"Queen"}]"#, "[]");
        assert!(matches!(decode(input.as_bytes()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_decode_end_before_start() {
        let input = REFERENCE.replace("2001-02-03T12:10:04", "1999-02-03T12:10:04");
        assert!(matches!(decode(input.as_bytes()), Err(Error::Parse(_))));
    }
}
