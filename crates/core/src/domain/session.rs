use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::SenderKey;

/// Organizational unit that owns sessions, inventory and ledger rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FarmId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    OnboardingName,
    OnboardingEmail,
    Ready,
    Unknown,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnboardingName => "onboarding_name",
            Self::OnboardingEmail => "onboarding_email",
            Self::Ready => "ready",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "onboarding_name" => Some(Self::OnboardingName),
            "onboarding_email" => Some(Self::OnboardingEmail),
            "ready" => Some(Self::Ready),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationKind {
    /// Farm worker; signs up with a display name.
    Member,
    /// Farm owner or manager; signs up with a unique email.
    Owner,
}

impl InvitationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Owner => "owner",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "member" => Some(Self::Member),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    pub fn initial_state(&self) -> SessionState {
        match self {
            Self::Member => SessionState::OnboardingName,
            Self::Owner => SessionState::OnboardingEmail,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub sender_key: SenderKey,
    pub farm_id: FarmId,
    pub kind: InvitationKind,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn new(sender_key: SenderKey, farm_id: FarmId, kind: InvitationKind) -> Self {
        Self { sender_key, farm_id, kind, created_at: Utc::now(), consumed_at: None }
    }

    pub fn is_open(&self) -> bool {
        self.consumed_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub sender_key: SenderKey,
    pub state: SessionState,
    pub farm_id: FarmId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn from_invitation(invitation: &Invitation, now: DateTime<Utc>) -> Self {
        Self {
            sender_key: invitation.sender_key.clone(),
            state: invitation.kind.initial_state(),
            farm_id: invitation.farm_id.clone(),
            display_name: None,
            email: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_kind_selects_onboarding_path() {
        let worker = Invitation::new(
            SenderKey::new("+5491100000001"),
            FarmId("farm-1".to_string()),
            InvitationKind::Member,
        );
        let owner = Invitation::new(
            SenderKey::new("+5491100000002"),
            FarmId("farm-1".to_string()),
            InvitationKind::Owner,
        );

        let now = Utc::now();
        assert_eq!(Session::from_invitation(&worker, now).state, SessionState::OnboardingName);
        assert_eq!(Session::from_invitation(&owner, now).state, SessionState::OnboardingEmail);
    }

    #[test]
    fn state_round_trips_through_storage_keys() {
        for state in [
            SessionState::OnboardingName,
            SessionState::OnboardingEmail,
            SessionState::Ready,
            SessionState::Unknown,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("archived"), None);
    }
}
