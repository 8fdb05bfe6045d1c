use std::fmt;

use clap::ValueEnum;

use super::TrackInfo;

/// Camera/screen-share selection applied on top of the id filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MediaClass {
    /// Camera and microphone tracks only.
    #[default]
    User,
    /// Screen-share tracks only.
    Display,
    /// Everything.
    Both,
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaClass::User => "user",
            MediaClass::Display => "display",
            MediaClass::Both => "both",
        })
    }
}

fn is_wildcard(selector: &str) -> bool {
    selector.is_empty() || selector == "*"
}

/// Select tracks by user/session/track id. Each selector is either `"*"`
/// (or empty, meaning "all") or an exact match. The hierarchy is strict:
/// a wildcard user id makes the session and track selectors ineffective,
/// and a wildcard session id makes the track selector ineffective.
/// Pure and idempotent.
pub fn filter_tracks(
    tracks: &[TrackInfo],
    user_id: &str,
    session_id: &str,
    track_id: &str,
) -> Vec<TrackInfo> {
    tracks
        .iter()
        .filter(|t| {
            if is_wildcard(user_id) {
                return true;
            }
            if t.user_id != user_id {
                return false;
            }
            if is_wildcard(session_id) {
                return true;
            }
            if t.session_id != session_id {
                return false;
            }
            is_wildcard(track_id) || t.track_id == track_id
        })
        .cloned()
        .collect()
}

pub fn filter_media_class(tracks: &[TrackInfo], class: MediaClass) -> Vec<TrackInfo> {
    tracks
        .iter()
        .filter(|t| match class {
            MediaClass::User => !t.is_screenshare,
            MediaClass::Display => t.is_screenshare,
            MediaClass::Both => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TrackKind;

    fn track(user: &str, session: &str, track: &str, screenshare: bool) -> TrackInfo {
        TrackInfo {
            user_id: user.to_string(),
            session_id: session.to_string(),
            track_id: track.to_string(),
            kind: TrackKind::Audio,
            is_screenshare: screenshare,
            segments: Vec::new(),
            concatenated_path: None,
        }
    }

    fn fixture() -> Vec<TrackInfo> {
        vec![
            track("alice", "s1", "t0", false),
            track("alice", "s1", "t1", true),
            track("alice", "s2", "t0", false),
            track("bob", "s1", "t0", false),
        ]
    }

    #[test]
    fn test_exact_and_wildcard_selection() {
        let tracks = fixture();
        assert_eq!(filter_tracks(&tracks, "*", "ignored", "ignored").len(), 4);
        assert_eq!(filter_tracks(&tracks, "", "", "").len(), 4);
        assert_eq!(filter_tracks(&tracks, "alice", "*", "*").len(), 3);
        assert_eq!(filter_tracks(&tracks, "alice", "s1", "*").len(), 2);
        assert_eq!(filter_tracks(&tracks, "alice", "s1", "t1").len(), 1);
        assert_eq!(filter_tracks(&tracks, "carol", "*", "*").len(), 0);
    }

    #[test]
    fn test_wildcard_user_ignores_lower_selectors() {
        let tracks = fixture();
        // The session/track selectors name nothing that exists, yet a
        // wildcard user still selects everything.
        assert_eq!(filter_tracks(&tracks, "*", "nope", "nope").len(), 4);
        assert_eq!(filter_tracks(&tracks, "alice", "*", "nope").len(), 3);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let tracks = fixture();
        let cases = [
            ("*", "*", "*"),
            ("alice", "*", "*"),
            ("alice", "s1", "*"),
            ("alice", "s1", "t0"),
            ("bob", "s9", "t0"),
        ];
        for (u, s, t) in cases {
            let once = filter_tracks(&tracks, u, s, t);
            let twice = filter_tracks(&once, u, s, t);
            let labels =
                |v: &[TrackInfo]| v.iter().map(|t| t.label()).collect::<Vec<_>>();
            assert_eq!(labels(&once), labels(&twice));
        }
    }

    #[test]
    fn test_media_class_filter() {
        let tracks = fixture();
        assert_eq!(filter_media_class(&tracks, MediaClass::User).len(), 3);
        assert_eq!(filter_media_class(&tracks, MediaClass::Display).len(), 1);
        assert_eq!(filter_media_class(&tracks, MediaClass::Both).len(), 4);
    }
}
