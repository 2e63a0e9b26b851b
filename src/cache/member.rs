//! Guild scoped entities: members, roles and emojis.

use serde_json::Value;

use super::patch;
use crate::error::CacheError;

/// A user's membership in one guild. Keyed by the user id inside the guild.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub user_id: String,
    pub guild_id: String,
    pub nickname: Option<String>,
    /// Role ids, the guild's default role is implied.
    pub roles: Vec<String>,
    pub joined_at: Option<String>,
    pub deaf: bool,
    pub mute: bool,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub voice_channel_id: Option<String>,
}

impl Member {
    pub(crate) fn from_raw(guild_id: &str, data: &Value) -> Result<Self, CacheError> {
        let user = data.get("user").ok_or(CacheError::MissingField { kind: "member", field: "user" })?;
        let mut member = Self {
            user_id: patch::id(user, "member")?,
            guild_id: guild_id.to_owned(),
            nickname: None,
            roles: Vec::new(),
            joined_at: None,
            deaf: false,
            mute: false,
            self_deaf: false,
            self_mute: false,
            voice_channel_id: None,
        };
        member.patch(data);
        Ok(member)
    }

    pub(crate) fn patch(&mut self, data: &Value) {
        patch::optional_string(&mut self.nickname, data, "nick");
        patch::string_list(&mut self.roles, data, "roles");
        patch::optional_string(&mut self.joined_at, data, "joined_at");
        patch::boolean(&mut self.deaf, data, "deaf");
        patch::boolean(&mut self.mute, data, "mute");
    }

    /// Applies a voice state object.
    pub(crate) fn set_voice_state(&mut self, state: &Value) {
        patch::optional_string(&mut self.voice_channel_id, state, "channel_id");
        patch::boolean(&mut self.deaf, state, "deaf");
        patch::boolean(&mut self.mute, state, "mute");
        patch::boolean(&mut self.self_deaf, state, "self_deaf");
        patch::boolean(&mut self.self_mute, state, "self_mute");
    }

    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles.iter().any(|role| role == role_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub color: u64,
    pub hoist: bool,
    pub position: i64,
    pub permissions: u64,
    pub managed: bool,
    pub mentionable: bool,
}

impl Role {
    pub(crate) fn from_raw(guild_id: &str, data: &Value) -> Result<Self, CacheError> {
        let mut role = Self {
            id: patch::id(data, "role")?,
            guild_id: guild_id.to_owned(),
            name: String::new(),
            color: 0,
            hoist: false,
            position: 0,
            permissions: 0,
            managed: false,
            mentionable: false,
        };
        role.patch(data);
        Ok(role)
    }

    pub(crate) fn patch(&mut self, data: &Value) {
        patch::string(&mut self.name, data, "name");
        patch::unsigned(&mut self.color, data, "color");
        patch::boolean(&mut self.hoist, data, "hoist");
        patch::signed(&mut self.position, data, "position");
        patch::unsigned(&mut self.permissions, data, "permissions");
        patch::boolean(&mut self.managed, data, "managed");
        patch::boolean(&mut self.mentionable, data, "mentionable");
    }

    /// The @everyone role shares its id with the guild.
    pub fn is_default(&self) -> bool {
        self.id == self.guild_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emoji {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub roles: Vec<String>,
    pub animated: bool,
    pub managed: bool,
    pub require_colons: bool,
}

impl Emoji {
    pub(crate) fn from_raw(guild_id: &str, data: &Value) -> Result<Self, CacheError> {
        let mut emoji = Self {
            id: patch::id(data, "emoji")?,
            guild_id: guild_id.to_owned(),
            name: String::new(),
            roles: Vec::new(),
            animated: false,
            managed: false,
            require_colons: true,
        };
        emoji.patch(data);
        Ok(emoji)
    }

    pub(crate) fn patch(&mut self, data: &Value) {
        patch::string(&mut self.name, data, "name");
        patch::string_list(&mut self.roles, data, "roles");
        patch::boolean(&mut self.animated, data, "animated");
        patch::boolean(&mut self.managed, data, "managed");
        patch::boolean(&mut self.require_colons, data, "require_colons");
    }

    /// `name:id`, the form used in reaction endpoints.
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn member_patch_and_voice_state() {
        let mut member = Member::from_raw("10", &json!({
            "user": {"id": "1"},
            "nick": "nelly",
            "roles": ["11", "12"],
            "joined_at": "2015-04-26T06:26:56.936000+00:00"
        })).unwrap();

        member.patch(&json!({"user": {"id": "1"}, "nick": null}));
        assert_eq!(member.nickname, None);
        assert!(member.has_role("12"));

        member.set_voice_state(&json!({"channel_id": "20", "self_mute": true}));
        assert_eq!(member.voice_channel_id.as_deref(), Some("20"));
        assert!(member.self_mute);
    }

    #[test]
    fn default_role_shares_guild_id() {
        let role = Role::from_raw("10", &json!({"id": "10", "name": "@everyone", "permissions": 104324161})).unwrap();
        assert!(role.is_default());
        assert_eq!(role.permissions, 104_324_161);
    }

    #[test]
    fn emoji_identifier() {
        let emoji = Emoji::from_raw("10", &json!({"id": "41771983429993937", "name": "LUL"})).unwrap();
        assert_eq!(emoji.identifier(), "LUL:41771983429993937");
    }
}
