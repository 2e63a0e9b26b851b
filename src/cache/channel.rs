use chrono::{DateTime, Utc};
use serde_json::Value;

use super::message::MessageCollection;
use super::{patch, snowflake};
use crate::error::CacheError;

/// Wire values of the channel `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Text = 0,
    Dm = 1,
    Voice = 2,
    GroupDm = 3,
    Category = 4,
}

impl ChannelType {
    pub fn from_raw(value: u64) -> Option<Self> {
        Some(match value {
            0 => ChannelType::Text,
            1 => ChannelType::Dm,
            2 => ChannelType::Voice,
            3 => ChannelType::GroupDm,
            4 => ChannelType::Category,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelType::Text => "text",
            ChannelType::Dm => "dm",
            ChannelType::Voice => "voice",
            ChannelType::GroupDm => "group",
            ChannelType::Category => "category",
        }
    }

    /// Text, voice and category channels only exist inside a guild.
    pub fn is_guild_channel(self) -> bool {
        matches!(self, ChannelType::Text | ChannelType::Voice | ChannelType::Category)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextChannel {
    pub name: String,
    pub topic: Option<String>,
    pub nsfw: bool,
    pub position: i64,
    pub parent_id: Option<String>,
    pub last_message_id: Option<String>,
    pub messages: MessageCollection,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceChannel {
    pub name: String,
    pub position: i64,
    pub parent_id: Option<String>,
    pub bitrate: u64,
    pub user_limit: u64,
    /// Ids of the members currently connected.
    pub members: Vec<String>,
}

impl VoiceChannel {
    pub fn is_full(&self) -> bool {
        self.user_limit > 0 && self.members.len() as u64 >= self.user_limit
    }
}

#[derive(Debug, Clone, Default)]
pub struct DmChannel {
    pub recipients: Vec<String>,
    pub last_message_id: Option<String>,
    pub messages: MessageCollection,
}

#[derive(Debug, Clone, Default)]
pub struct GroupDmChannel {
    pub name: Option<String>,
    pub recipients: Vec<String>,
    pub owner_id: Option<String>,
    pub icon: Option<String>,
    pub application_id: Option<String>,
    pub last_message_id: Option<String>,
    pub messages: MessageCollection,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryChannel {
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone)]
pub enum ChannelKind {
    Text(TextChannel),
    Dm(DmChannel),
    Voice(VoiceChannel),
    GroupDm(GroupDmChannel),
    Category(CategoryChannel),
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    /// Set for text, voice and category channels.
    pub guild_id: Option<String>,
    pub kind: ChannelKind,
}

impl Channel {
    /// Builds a channel of the payload's type. Guild channels require `guild_id`.
    pub(crate) fn from_raw(data: &Value, guild_id: Option<&str>) -> Result<Self, CacheError> {
        let id = patch::id(data, "channel")?;
        let raw_type = data.get("type").and_then(Value::as_u64)
            .ok_or(CacheError::MissingField { kind: "channel", field: "type" })?;
        let channel_type = ChannelType::from_raw(raw_type).ok_or(CacheError::UnknownChannelType(raw_type))?;

        let guild_id = match (channel_type.is_guild_channel(), guild_id) {
            (true, Some(guild_id)) => Some(guild_id.to_owned()),
            (true, None) => return Err(CacheError::MissingField { kind: "channel", field: "guild_id" }),
            (false, _) => None,
        };

        let kind = match channel_type {
            ChannelType::Text => ChannelKind::Text(TextChannel::default()),
            ChannelType::Dm => ChannelKind::Dm(DmChannel::default()),
            ChannelType::Voice => ChannelKind::Voice(VoiceChannel::default()),
            ChannelType::GroupDm => ChannelKind::GroupDm(GroupDmChannel::default()),
            ChannelType::Category => ChannelKind::Category(CategoryChannel::default()),
        };

        let mut channel = Self { id, guild_id, kind };
        channel.patch(data);
        Ok(channel)
    }

    pub(crate) fn patch(&mut self, data: &Value) {
        match &mut self.kind {
            ChannelKind::Text(text) => {
                patch::string(&mut text.name, data, "name");
                patch::optional_string(&mut text.topic, data, "topic");
                patch::boolean(&mut text.nsfw, data, "nsfw");
                patch::signed(&mut text.position, data, "position");
                patch::optional_string(&mut text.parent_id, data, "parent_id");
                patch::optional_string(&mut text.last_message_id, data, "last_message_id");
            }
            ChannelKind::Voice(voice) => {
                patch::string(&mut voice.name, data, "name");
                patch::signed(&mut voice.position, data, "position");
                patch::optional_string(&mut voice.parent_id, data, "parent_id");
                patch::unsigned(&mut voice.bitrate, data, "bitrate");
                patch::unsigned(&mut voice.user_limit, data, "user_limit");
            }
            ChannelKind::Dm(dm) => {
                patch_recipients(&mut dm.recipients, data);
                patch::optional_string(&mut dm.last_message_id, data, "last_message_id");
            }
            ChannelKind::GroupDm(group) => {
                patch::optional_string(&mut group.name, data, "name");
                patch_recipients(&mut group.recipients, data);
                patch::optional_string(&mut group.owner_id, data, "owner_id");
                patch::optional_string(&mut group.icon, data, "icon");
                patch::optional_string(&mut group.application_id, data, "application_id");
                patch::optional_string(&mut group.last_message_id, data, "last_message_id");
            }
            ChannelKind::Category(category) => {
                patch::string(&mut category.name, data, "name");
                patch::signed(&mut category.position, data, "position");
            }
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        match self.kind {
            ChannelKind::Text(_) => ChannelType::Text,
            ChannelKind::Dm(_) => ChannelType::Dm,
            ChannelKind::Voice(_) => ChannelType::Voice,
            ChannelKind::GroupDm(_) => ChannelType::GroupDm,
            ChannelKind::Category(_) => ChannelType::Category,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ChannelKind::Text(text) => Some(&text.name),
            ChannelKind::Voice(voice) => Some(&voice.name),
            ChannelKind::Category(category) => Some(&category.name),
            ChannelKind::GroupDm(group) => group.name.as_deref(),
            ChannelKind::Dm(_) => None,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        snowflake::created_at(&self.id)
    }

    /// Message history, for channels that carry messages.
    pub fn messages(&self) -> Option<&MessageCollection> {
        match &self.kind {
            ChannelKind::Text(text) => Some(&text.messages),
            ChannelKind::Dm(dm) => Some(&dm.messages),
            ChannelKind::GroupDm(group) => Some(&group.messages),
            ChannelKind::Voice(_) | ChannelKind::Category(_) => None,
        }
    }

    pub fn messages_mut(&mut self) -> Option<&mut MessageCollection> {
        match &mut self.kind {
            ChannelKind::Text(text) => Some(&mut text.messages),
            ChannelKind::Dm(dm) => Some(&mut dm.messages),
            ChannelKind::GroupDm(group) => Some(&mut group.messages),
            ChannelKind::Voice(_) | ChannelKind::Category(_) => None,
        }
    }

    pub(crate) fn set_last_message_id(&mut self, message_id: &str) {
        let last = match &mut self.kind {
            ChannelKind::Text(text) => &mut text.last_message_id,
            ChannelKind::Dm(dm) => &mut dm.last_message_id,
            ChannelKind::GroupDm(group) => &mut group.last_message_id,
            ChannelKind::Voice(_) | ChannelKind::Category(_) => return,
        };
        *last = Some(message_id.to_owned());
    }

    /// Users on the other side of a direct message channel.
    pub fn recipients(&self) -> &[String] {
        match &self.kind {
            ChannelKind::Dm(dm) => &dm.recipients,
            ChannelKind::GroupDm(group) => &group.recipients,
            _ => &[],
        }
    }
}

fn patch_recipients(target: &mut Vec<String>, data: &Value) {
    if let Some(recipients) = data.get("recipients").and_then(Value::as_array) {
        *target = recipients.iter().filter_map(|user| patch::string_field(user, "id")).collect();
    }
}
