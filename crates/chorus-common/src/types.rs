//! Presence, voice-room, and chat record types shared by server and client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The public face of an authenticated identity, as shown in rosters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PublicIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Voice rooms
// ---------------------------------------------------------------------------

/// Media flags a client announces when joining a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFlags {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

/// Partial status update. Only `Some` fields are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking: Option<bool>,
}

impl StatusPatch {
    pub fn speaking(speaking: bool) -> Self {
        Self {
            speaking: Some(speaking),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none()
            && self.video.is_none()
            && self.screen.is_none()
            && self.speaking.is_none()
    }
}

/// Per-room, per-identity call state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub speaking: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(identity: &PublicIdentity, media: MediaFlags, joined_at: DateTime<Utc>) -> Self {
        Self {
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            audio_enabled: media.audio,
            video_enabled: media.video,
            screen_sharing: media.screen,
            speaking: false,
            joined_at,
        }
    }

    /// Merge the supplied fields. Returns true if anything changed.
    pub fn apply(&mut self, patch: &StatusPatch) -> bool {
        let before = (
            self.audio_enabled,
            self.video_enabled,
            self.screen_sharing,
            self.speaking,
        );
        if let Some(v) = patch.audio {
            self.audio_enabled = v;
        }
        if let Some(v) = patch.video {
            self.video_enabled = v;
        }
        if let Some(v) = patch.screen {
            self.screen_sharing = v;
        }
        if let Some(v) = patch.speaking {
            self.speaking = v;
        }
        before
            != (
                self.audio_enabled,
                self.video_enabled,
                self.screen_sharing,
                self.speaking,
            )
    }

    pub fn media(&self) -> MediaFlags {
        MediaFlags {
            audio: self.audio_enabled,
            video: self.video_enabled,
            screen: self.screen_sharing,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A message as saved by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub channel_id: String,
    pub author: PublicIdentity,
    pub content: String,
    pub client_temp_id: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PublicIdentity {
        PublicIdentity::new("alice", "Alice")
    }

    #[test]
    fn participant_takes_flags_from_join() {
        let media = MediaFlags {
            audio: true,
            video: false,
            screen: false,
        };
        let p = Participant::new(&alice(), media, Utc::now());
        assert!(p.audio_enabled);
        assert!(!p.video_enabled);
        assert!(!p.speaking);
        assert_eq!(p.media(), media);
    }

    #[test]
    fn patch_merges_only_supplied_fields() {
        let mut p = Participant::new(
            &alice(),
            MediaFlags {
                audio: true,
                ..MediaFlags::default()
            },
            Utc::now(),
        );
        let changed = p.apply(&StatusPatch {
            video: Some(true),
            ..StatusPatch::default()
        });
        assert!(changed);
        assert!(p.audio_enabled);
        assert!(p.video_enabled);
        assert!(!p.screen_sharing);
    }

    #[test]
    fn patch_with_same_values_reports_no_change() {
        let mut p = Participant::new(&alice(), MediaFlags::default(), Utc::now());
        assert!(!p.apply(&StatusPatch::speaking(false)));
        assert!(!p.apply(&StatusPatch::default()));
    }

    #[test]
    fn empty_patch_detection() {
        assert!(StatusPatch::default().is_empty());
        assert!(!StatusPatch::speaking(true).is_empty());
    }

    #[test]
    fn patch_omits_unset_fields_on_the_wire() {
        let json = serde_json::to_string(&StatusPatch::speaking(true)).unwrap();
        assert_eq!(json, r#"{"speaking":true}"#);
        let parsed: StatusPatch = serde_json::from_str(r#"{"video":true}"#).unwrap();
        assert_eq!(parsed.video, Some(true));
        assert_eq!(parsed.audio, None);
    }

    #[test]
    fn media_flags_default_when_fields_missing() {
        let flags: MediaFlags = serde_json::from_str(r#"{"audio":true}"#).unwrap();
        assert!(flags.audio);
        assert!(!flags.video);
        assert!(!flags.screen);
    }
}
