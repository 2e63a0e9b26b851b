use chrono::{DateTime, Utc};
use serde_json::Value;

use super::collection::{Collection, Scope};
use super::member::{Member, Role};
use super::{patch, snowflake};
use crate::error::CacheError;

/// Declares an enumerated guild setting with its wire values and labels.
macro_rules! guild_level {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub fn from_raw(value: u64) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }
    };
}

guild_level!(
    /// Requirements a member must meet before sending messages.
    VerificationLevel {
        None = 0 => "NONE",
        Low = 1 => "LOW",
        Medium = 2 => "MEDIUM",
        High = 3 => "HIGH",
        VeryHigh = 4 => "VERY_HIGH",
    }
);

guild_level!(
    ExplicitContentFilter {
        Disabled = 0 => "DISABLED",
        MembersWithoutRoles = 1 => "MEMBERS_WITHOUT_ROLES",
        AllMembers = 2 => "ALL_MEMBERS",
    }
);

guild_level!(
    MfaLevel {
        None = 0 => "NONE",
        Elevated = 1 => "ELEVATED",
    }
);

guild_level!(
    DefaultMessageNotifications {
        Everything = 0 => "EVERYTHING",
        OnlyMentions = 1 => "ONLY_MENTIONS",
    }
);

#[derive(Debug, Clone, Default)]
pub struct Guild {
    pub id: String,
    /// While false only `id` can be trusted.
    pub available: bool,
    pub name: String,
    pub icon: Option<String>,
    pub splash: Option<String>,
    pub owner_id: String,
    pub region: String,
    pub large: bool,
    pub member_count: u64,
    pub verification_level: VerificationLevel,
    pub default_message_notifications: DefaultMessageNotifications,
    pub explicit_content_filter: ExplicitContentFilter,
    pub mfa_level: MfaLevel,
    pub afk_channel_id: Option<String>,
    pub afk_timeout: u64,
    pub system_channel_id: Option<String>,
    pub features: Vec<String>,
    pub application_id: Option<String>,
    pub widget_enabled: bool,
    pub widget_channel_id: Option<String>,
    pub embed_enabled: bool,
    pub embed_channel_id: Option<String>,

    /// Ids into the global channel collection.
    pub channels: Scope,
    /// Ids into the global emoji collection.
    pub emojis: Scope,
    /// Ids into the global presence collection.
    pub presences: Scope,
    pub roles: Collection<Role>,
    /// Keyed by user id.
    pub members: Collection<Member>,
}

impl Guild {
    /// A guild stub; its fields are filled in by [`Guild::patch`] once it is available.
    pub(crate) fn new(data: &Value) -> Result<Self, CacheError> {
        Ok(Self {
            id: patch::id(data, "guild")?,
            available: is_available(data),
            ..Self::default()
        })
    }

    /// Patches the scalar fields. Returns whether the payload was applied, which it is not while
    /// the guild is unavailable.
    pub(crate) fn patch(&mut self, data: &Value) -> bool {
        self.available = is_available(data);
        if !self.available {
            return false;
        }

        patch::string(&mut self.name, data, "name");
        patch::optional_string(&mut self.icon, data, "icon");
        patch::optional_string(&mut self.splash, data, "splash");
        patch::string(&mut self.owner_id, data, "owner_id");
        patch::string(&mut self.region, data, "region");
        patch::boolean(&mut self.large, data, "large");
        patch::unsigned(&mut self.member_count, data, "member_count");
        patch::optional_string(&mut self.afk_channel_id, data, "afk_channel_id");
        patch::unsigned(&mut self.afk_timeout, data, "afk_timeout");
        patch::optional_string(&mut self.system_channel_id, data, "system_channel_id");
        patch::string_list(&mut self.features, data, "features");
        patch::optional_string(&mut self.application_id, data, "application_id");
        patch::boolean(&mut self.widget_enabled, data, "widget_enabled");
        patch::optional_string(&mut self.widget_channel_id, data, "widget_channel_id");
        patch::boolean(&mut self.embed_enabled, data, "embed_enabled");
        patch::optional_string(&mut self.embed_channel_id, data, "embed_channel_id");

        // unknown levels keep the previous label
        let level = |key: &str| data.get(key).and_then(Value::as_u64);
        if let Some(value) = level("verification_level").and_then(VerificationLevel::from_raw) {
            self.verification_level = value;
        }
        if let Some(value) = level("default_message_notifications").and_then(DefaultMessageNotifications::from_raw) {
            self.default_message_notifications = value;
        }
        if let Some(value) = level("explicit_content_filter").and_then(ExplicitContentFilter::from_raw) {
            self.explicit_content_filter = value;
        }
        if let Some(value) = level("mfa_level").and_then(MfaLevel::from_raw) {
            self.mfa_level = value;
        }
        true
    }

    /// First letters of each word, e.g. `Discord API` becomes `DA`.
    pub fn name_acronym(&self) -> String {
        self.name
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }

    pub fn is_verified(&self) -> bool {
        self.has_feature("VERIFIED")
    }

    pub fn has_vanity_url(&self) -> bool {
        self.has_feature("VANITY_URL")
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|known| known == feature)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        snowflake::created_at(&self.id)
    }

    /// The @everyone role.
    pub fn default_role(&self) -> Option<&Role> {
        self.roles.get(&self.id)
    }
}

fn is_available(data: &Value) -> bool {
    !data.get("unavailable").and_then(Value::as_bool).unwrap_or(false)
}
