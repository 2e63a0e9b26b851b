//! Application level events broadcast by the [`Client`](crate::client::Client).
//!
//! Events carry snapshots of the cached entities taken at the time they were emitted, never the raw
//! gateway payloads.

use std::sync::Arc;

use crate::cache::{Channel, Emoji, Guild, Member, Message, MessageReaction, Presence, Role, User};
use crate::error::GatewayError;
use crate::gateway::Status;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Every guild became available, or the readiness timer expired. Carries the client user.
    Ready(User),
    Resumed,
    /// The connection status changed.
    StatusChange(Status),
    /// Diagnostic message.
    Debug(String),
    /// A handler or the connection failed. Only a following [`Status::Idle`] means the client gave up.
    Error(Arc<GatewayError>),

    GuildCreate(Guild),
    GuildUpdate { old: Guild, new: Guild },
    GuildDelete(Guild),
    /// The guild suffered an outage; it stays cached but unavailable.
    GuildUnavailable(Guild),

    GuildMemberAdd(Member),
    GuildMemberUpdate { old: Member, new: Member },
    GuildMemberRemove(Member),
    GuildMembersChunk { guild_id: String, members: Vec<Member> },

    RoleCreate(Role),
    RoleUpdate { old: Role, new: Role },
    RoleDelete(Role),

    EmojiCreate(Emoji),
    EmojiUpdate { old: Emoji, new: Emoji },
    EmojiDelete(Emoji),

    ChannelCreate(Channel),
    ChannelUpdate { old: Channel, new: Channel },
    ChannelDelete(Channel),

    Message(Message),
    MessageUpdate { old: Message, new: Message },
    MessageDelete(Message),
    /// A message that was not cached got deleted.
    MessageDeleteRaw { channel_id: String, message_id: String },
    /// The cached part of a bulk delete.
    MessageDeleteBulk(Vec<Message>),
    /// The ids of a bulk delete that were not cached.
    MessageDeleteBulkRaw { channel_id: String, ids: Vec<String> },
    MessageReactionAdd { reaction: MessageReaction, message: Message, user: User },
    MessageReactionRemove { reaction: MessageReaction, message: Message, user_id: String },

    PresenceUpdate { old: Option<Presence>, new: Presence },
    TypingStart { channel_id: String, user: User },
    UserUpdate { old: User, new: User },
}

impl ClientEvent {
    /// Whether the gateway connection is over, given up after a fatal error or destroyed.
    pub fn ends_connection(&self) -> bool {
        matches!(self, ClientEvent::StatusChange(Status::Idle | Status::Disconnected))
    }

    /// Name of the event, mostly for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Ready(_) => "ready",
            ClientEvent::Resumed => "resumed",
            ClientEvent::StatusChange(_) => "statusChange",
            ClientEvent::Debug(_) => "debug",
            ClientEvent::Error(_) => "error",
            ClientEvent::GuildCreate(_) => "guildCreate",
            ClientEvent::GuildUpdate { .. } => "guildUpdate",
            ClientEvent::GuildDelete(_) => "guildDelete",
            ClientEvent::GuildUnavailable(_) => "guildUnavailable",
            ClientEvent::GuildMemberAdd(_) => "guildMemberAdd",
            ClientEvent::GuildMemberUpdate { .. } => "guildMemberUpdate",
            ClientEvent::GuildMemberRemove(_) => "guildMemberRemove",
            ClientEvent::GuildMembersChunk { .. } => "guildMembersChunk",
            ClientEvent::RoleCreate(_) => "roleCreate",
            ClientEvent::RoleUpdate { .. } => "roleUpdate",
            ClientEvent::RoleDelete(_) => "roleDelete",
            ClientEvent::EmojiCreate(_) => "emojiCreate",
            ClientEvent::EmojiUpdate { .. } => "emojiUpdate",
            ClientEvent::EmojiDelete(_) => "emojiDelete",
            ClientEvent::ChannelCreate(_) => "channelCreate",
            ClientEvent::ChannelUpdate { .. } => "channelUpdate",
            ClientEvent::ChannelDelete(_) => "channelDelete",
            ClientEvent::Message(_) => "message",
            ClientEvent::MessageUpdate { .. } => "messageUpdate",
            ClientEvent::MessageDelete(_) => "messageDelete",
            ClientEvent::MessageDeleteRaw { .. } => "messageDeleteRaw",
            ClientEvent::MessageDeleteBulk(_) => "messageDeleteBulk",
            ClientEvent::MessageDeleteBulkRaw { .. } => "messageDeleteBulkRaw",
            ClientEvent::MessageReactionAdd { .. } => "messageReactionAdd",
            ClientEvent::MessageReactionRemove { .. } => "messageReactionRemove",
            ClientEvent::PresenceUpdate { .. } => "presenceUpdate",
            ClientEvent::TypingStart { .. } => "typingStart",
            ClientEvent::UserUpdate { .. } => "userUpdate",
        }
    }
}
