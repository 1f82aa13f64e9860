// Session state: the current user's authenticated session, independent of
// any particular game.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The authenticated session record.
///
/// `token` is `None` if and only if the user is logged out, and while it is
/// `None` every other field is `None` as well. [`SessionState::normalized`]
/// enforces that.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Opaque credential.
    #[serde(default)]
    pub token: Option<String>,
    /// Display name chosen at signup.
    #[serde(default)]
    pub team_name: Option<String>,
    /// Short join code associated with the session.
    #[serde(default)]
    pub player_code: Option<String>,
    /// Credential expiry (ISO-8601 on the wire).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A shallow partial of [`SessionState`]; each `Some` field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub token: Option<String>,
    pub team_name: Option<String>,
    pub player_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// `true` if the session carries an expiry that is at or before `now`.
    /// Sessions without an expiry never expire on their own.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Shallow-merge `patch`, returning the normalized result.
    pub fn merged(&self, patch: SessionPatch) -> SessionState {
        let mut next = self.clone();
        if let Some(token) = patch.token {
            next.token = Some(token);
        }
        if let Some(team_name) = patch.team_name {
            next.team_name = Some(team_name);
        }
        if let Some(player_code) = patch.player_code {
            next.player_code = Some(player_code);
        }
        if let Some(expires_at) = patch.expires_at {
            next.expires_at = Some(expires_at);
        }
        next.normalized()
    }

    /// Drop every field if there is no token.
    pub fn normalized(self) -> SessionState {
        if self.token.is_none() && self != SessionState::default() {
            debug!("session fields set without a token; resetting to logged-out baseline");
            return SessionState::default();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn logged_in() -> SessionState {
        SessionState {
            token: Some("tok-123".to_string()),
            team_name: Some("Speed Demons".to_string()),
            player_code: Some("ABC123".to_string()),
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn default_is_logged_out_baseline() {
        let s = SessionState::default();
        assert!(!s.is_logged_in());
        assert!(s.team_name.is_none());
        assert!(s.player_code.is_none());
        assert!(s.expires_at.is_none());
    }

    #[test]
    fn merge_sets_only_present_fields() {
        let s = logged_in().merged(SessionPatch {
            team_name: Some("Marathon Maniacs".to_string()),
            ..Default::default()
        });
        assert_eq!(s.team_name.as_deref(), Some("Marathon Maniacs"));
        assert_eq!(s.token.as_deref(), Some("tok-123"));
        assert_eq!(s.player_code.as_deref(), Some("ABC123"));
    }

    #[test]
    fn merge_without_token_stays_logged_out() {
        let s = SessionState::default().merged(SessionPatch {
            team_name: Some("Ghost Team".to_string()),
            ..Default::default()
        });
        assert_eq!(s, SessionState::default());
    }

    #[test]
    fn expiry_is_inclusive() {
        let s = logged_in();
        let at = s.expires_at.unwrap();
        assert!(!s.is_expired_at(at - Duration::seconds(1)));
        assert!(s.is_expired_at(at));
        assert!(s.is_expired_at(at + Duration::seconds(1)));
        assert!(!SessionState::default().is_expired_at(at));
    }

    #[test]
    fn serializes_expiry_as_iso8601() {
        let json = serde_json::to_string(&logged_in()).unwrap();
        assert!(json.contains(r#""expiresAt":"2030-01-01T00:00:00Z""#), "{json}");
        assert!(json.contains(r#""teamName":"Speed Demons""#), "{json}");

        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, logged_in());
    }
}
