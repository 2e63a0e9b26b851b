use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{patch, snowflake};
use crate::error::CacheError;

/// A user account, shared by every guild the user is a member of.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub bot: bool,
}

impl User {
    pub(crate) fn from_raw(data: &Value) -> Result<Self, CacheError> {
        let mut user = Self {
            id: patch::id(data, "user")?,
            username: String::new(),
            discriminator: String::from("0000"),
            avatar: None,
            bot: false,
        };
        user.patch(data);
        Ok(user)
    }

    pub(crate) fn patch(&mut self, data: &Value) {
        patch::string(&mut self.username, data, "username");
        patch::string(&mut self.discriminator, data, "discriminator");
        patch::optional_string(&mut self.avatar, data, "avatar");
        patch::boolean(&mut self.bot, data, "bot");
    }

    /// `username#discriminator`
    pub fn tag(&self) -> String {
        format!("{}#{}", self.username, self.discriminator)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        snowflake::created_at(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceStatus {
    Online,
    Idle,
    #[default]
    Offline,
    DoNotDisturb,
    Invisible,
}

impl PresenceStatus {
    pub fn from_name(name: &str) -> Self {
        match name {
            "online" => PresenceStatus::Online,
            "idle" => PresenceStatus::Idle,
            "dnd" => PresenceStatus::DoNotDisturb,
            "invisible" => PresenceStatus::Invisible,
            _ => PresenceStatus::Offline,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Offline => "offline",
            PresenceStatus::DoNotDisturb => "dnd",
            PresenceStatus::Invisible => "invisible",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub name: String,
    /// 0 playing, 1 streaming, 2 listening, 3 watching
    pub kind: u64,
    pub url: Option<String>,
}

impl Activity {
    fn from_raw(data: &Value) -> Option<Self> {
        let name = data.get("name")?.as_str()?.to_owned();
        Some(Self {
            name,
            kind: data.get("type").and_then(Value::as_u64).unwrap_or(0),
            url: data.get("url").and_then(Value::as_str).map(str::to_owned),
        })
    }
}

/// Presence of one user. Never patched, every update replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub user_id: String,
    pub status: PresenceStatus,
    pub activity: Option<Activity>,
}

impl Presence {
    pub(crate) fn from_raw(data: &Value) -> Result<Self, CacheError> {
        let user = data.get("user").ok_or(CacheError::MissingField { kind: "presence", field: "user" })?;
        let activity = data.get("game").or_else(|| data.get("activity")).and_then(Activity::from_raw);

        Ok(Self {
            user_id: patch::id(user, "presence")?,
            status: data.get("status").and_then(Value::as_str).map(PresenceStatus::from_name).unwrap_or_default(),
            activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_user_update_keeps_fields() {
        let mut user = User::from_raw(&json!({"id": "1", "username": "Nelly", "discriminator": "1337", "bot": true})).unwrap();
        user.patch(&json!({"id": "1", "avatar": "8342729096ea3675442027381ff50dfe"}));
        assert_eq!(user.tag(), "Nelly#1337");
        assert!(user.bot);
        assert_eq!(user.avatar.as_deref(), Some("8342729096ea3675442027381ff50dfe"));
    }

    #[test]
    fn presence_reads_game() {
        let presence = Presence::from_raw(&json!({
            "user": {"id": "1"},
            "status": "dnd",
            "game": {"name": "chess", "type": 0}
        })).unwrap();
        assert_eq!(presence.status, PresenceStatus::DoNotDisturb);
        assert_eq!(presence.activity.unwrap().name, "chess");
    }

    #[test]
    fn presence_without_user_is_rejected() {
        assert!(Presence::from_raw(&json!({"status": "online"})).is_err());
    }
}
