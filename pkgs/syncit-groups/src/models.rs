//! Group, member and event records
//!
//! A group exclusively owns its members and events; they have no lifecycle of
//! their own and are persisted embedded in the group document. Field names
//! serialize in camelCase, which is also the persisted document shape.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type GroupId = i64;
pub type EventId = i64;
pub type UserId = String;

/// Role of a member within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
}

/// Invitation status of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Pending,
    #[default]
    Accepted,
    Declined,
    Blocked,
}

impl MemberStatus {
    /// `pending → accepted`, `pending → declined`, anything → `blocked`.
    /// Re-applying the current status is allowed.
    pub fn can_transition_to(self, next: MemberStatus) -> bool {
        self == next
            || next == MemberStatus::Blocked
            || (self == MemberStatus::Pending
                && matches!(next, MemberStatus::Accepted | MemberStatus::Declined))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Accepted => "accepted",
            MemberStatus::Declined => "declined",
            MemberStatus::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MemberStatus::Pending),
            "accepted" => Ok(MemberStatus::Accepted),
            "declined" => Ok(MemberStatus::Declined),
            "blocked" => Ok(MemberStatus::Blocked),
            other => Err(format!("unknown member status '{}'", other)),
        }
    }
}

/// Part of the day an event occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Morning,
    Afternoon,
    Evening,
    AllDay,
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(EventType::Morning),
            "afternoon" => Ok(EventType::Afternoon),
            "evening" => Ok(EventType::Evening),
            "all-day" => Ok(EventType::AllDay),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

/// A user's participation record within a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub initials: String,
    pub phone: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub is_online: bool,
    pub status: MemberStatus,
}

impl Default for Member {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            initials: String::new(),
            phone: String::new(),
            role: MemberRole::Member,
            joined_at: Utc::now(),
            is_online: false,
            status: MemberStatus::Accepted,
        }
    }
}

/// A calendar entry owned by a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Creator's display name
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub user_initials: String,
    #[serde(default)]
    pub created_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// `false` once the user acknowledged the event; absent means new
    #[serde(default)]
    pub is_new_for_user: BTreeMap<UserId, bool>,
}

/// A named collection of members coordinating shared events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    /// The owning user. Tracked independently of member roles.
    pub admin: UserId,
    pub members: Vec<Member>,
    pub events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    pub silent_notifications: bool,
    pub creator_blocked: bool,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            admin: String::new(),
            members: Vec::new(),
            events: Vec::new(),
            created_at: Utc::now(),
            silent_notifications: false,
            creator_blocked: false,
        }
    }
}

impl Group {
    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == user_id)
    }

    pub fn member_mut(&mut self, user_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == user_id)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin == user_id
    }

    /// The user's invitation status, if they are in the member list
    pub fn status_of(&self, user_id: &str) -> Option<MemberStatus> {
        self.member(user_id).map(|m| m.status)
    }

    /// Whether the user may open the group: the admin, or an accepted member
    pub fn is_accessible_to(&self, user_id: &str) -> bool {
        self.is_admin(user_id) || self.status_of(user_id) == Some(MemberStatus::Accepted)
    }

    pub fn accepted_member_ids(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.status == MemberStatus::Accepted)
            .map(|m| m.id.as_str())
    }

    pub fn event(&self, event_id: EventId) -> Option<&Event> {
        self.events.iter().find(|e| e.id == event_id)
    }

    pub fn event_mut(&mut self, event_id: EventId) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.id == event_id)
    }

    /// Members whose role disagrees with the group-level `admin` pointer:
    /// role `admin` without holding the pointer, or holding the pointer with
    /// role `member`.
    pub fn admin_divergence(&self) -> Vec<UserId> {
        self.members
            .iter()
            .filter(|m| (m.role == MemberRole::Admin) != (m.id == self.admin))
            .map(|m| m.id.clone())
            .collect()
    }
}

/// Up to two upper-case initials from a display name
pub fn initials_for(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}
