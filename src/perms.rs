use serde::{Deserialize, Serialize};
use twilight_model::channel::ChannelType;
use twilight_model::guild::Permissions;

/// The per-channel capability view everything downstream works against.
/// Built once from a computed `Permissions` set; nothing outside this module
/// inspects raw permission bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChannelAccess {
    pub view: bool,
    pub history: bool,
    pub send: bool,
    pub invite: bool,
    pub manage_messages: bool,
    pub manage_channels: bool,
    pub embed_links: bool,
    pub attach_files: bool,
    pub bits: u64,
}

impl ChannelAccess {
    pub(crate) fn from_permissions(perms: Permissions) -> Self {
        Self {
            view: perms.contains(Permissions::VIEW_CHANNEL),
            history: perms.contains(Permissions::READ_MESSAGE_HISTORY),
            send: perms.contains(Permissions::SEND_MESSAGES),
            invite: perms.contains(Permissions::CREATE_INVITE),
            manage_messages: perms.contains(Permissions::MANAGE_MESSAGES),
            manage_channels: perms.contains(Permissions::MANAGE_CHANNELS),
            embed_links: perms.contains(Permissions::EMBED_LINKS),
            attach_files: perms.contains(Permissions::ATTACH_FILES),
            bits: perms.bits(),
        }
    }
}

/// Guild-wide capability flags for the bot's member record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct GuildAccess {
    pub administrator: bool,
    pub manage_guild: bool,
    pub manage_roles: bool,
    pub manage_channels: bool,
    pub kick_members: bool,
    pub ban_members: bool,
    pub view_audit_log: bool,
    pub bits: u64,
}

impl GuildAccess {
    pub(crate) fn from_permissions(perms: Permissions) -> Self {
        Self {
            administrator: perms.contains(Permissions::ADMINISTRATOR),
            manage_guild: perms.contains(Permissions::MANAGE_GUILD),
            manage_roles: perms.contains(Permissions::MANAGE_ROLES),
            manage_channels: perms.contains(Permissions::MANAGE_CHANNELS),
            kick_members: perms.contains(Permissions::KICK_MEMBERS),
            ban_members: perms.contains(Permissions::BAN_MEMBERS),
            view_audit_log: perms.contains(Permissions::VIEW_AUDIT_LOG),
            bits: perms.bits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ChannelClass {
    Text,
    Voice,
    Category,
    Stage,
    Forum,
    Other,
}

impl ChannelClass {
    pub(crate) fn classify(kind: ChannelType) -> Self {
        match kind {
            ChannelType::GuildText | ChannelType::GuildAnnouncement => ChannelClass::Text,
            ChannelType::GuildVoice => ChannelClass::Voice,
            ChannelType::GuildCategory => ChannelClass::Category,
            ChannelType::GuildStageVoice => ChannelClass::Stage,
            ChannelType::GuildForum => ChannelClass::Forum,
            _ => ChannelClass::Other,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            ChannelClass::Text => "text",
            ChannelClass::Voice => "voice",
            ChannelClass::Category => "categories",
            ChannelClass::Stage => "stage",
            ChannelClass::Forum => "forum",
            ChannelClass::Other => "other",
        }
    }
}

/// Everything the console needs to know about one channel, captured at the
/// moment of evaluation. Permission state is derived, never stored long-term.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChannelSnapshot {
    pub id: u64,
    pub name: String,
    pub class: ChannelClass,
    pub category: Option<String>,
    pub position: i64,
    pub nsfw: bool,
    pub slowmode_seconds: u16,
    pub topic: Option<String>,
    pub access: ChannelAccess,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct GuildSummary {
    pub text_total: usize,
    pub text_viewable: usize,
    pub text_history: usize,
    pub text_send: usize,
    pub text_invite: usize,
    pub voice_total: usize,
}

/// Capability counts over a guild's channels. When the bot's member record is
/// not cached yet, the capability counts stay at zero; the totals are still
/// reported.
pub(crate) fn summarize(channels: &[ChannelSnapshot], member_known: bool) -> GuildSummary {
    let mut summary = GuildSummary::default();
    for channel in channels {
        match channel.class {
            ChannelClass::Text => summary.text_total += 1,
            ChannelClass::Voice => {
                summary.voice_total += 1;
                continue;
            }
            _ => continue,
        }
        if !member_known {
            continue;
        }
        if channel.access.view {
            summary.text_viewable += 1;
        }
        if channel.access.history {
            summary.text_history += 1;
        }
        if channel.access.send {
            summary.text_send += 1;
        }
        if channel.access.invite {
            summary.text_invite += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn text_channel(name: &str, access: ChannelAccess) -> ChannelSnapshot {
        ChannelSnapshot {
            id: 1,
            name: name.to_string(),
            class: ChannelClass::Text,
            category: None,
            position: 0,
            nsfw: false,
            slowmode_seconds: 0,
            topic: None,
            access,
        }
    }

    #[test]
    fn access_maps_named_bits() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::READ_MESSAGE_HISTORY;
        let access = ChannelAccess::from_permissions(perms);
        assert!(access.view);
        assert!(access.history);
        assert!(!access.send);
        assert!(!access.invite);
        assert_eq!(access.bits, perms.bits());
    }

    #[test]
    fn summary_counts_capability_bits() {
        // Three text channels: view on two, history on one of those.
        let both = ChannelAccess {
            view: true,
            history: true,
            ..ChannelAccess::default()
        };
        let view_only = ChannelAccess {
            view: true,
            ..ChannelAccess::default()
        };
        let channels = vec![
            text_channel("alpha", both),
            text_channel("beta", view_only),
            text_channel("gamma", ChannelAccess::default()),
            ChannelSnapshot {
                class: ChannelClass::Voice,
                ..text_channel("lounge", ChannelAccess::default())
            },
        ];

        let summary = summarize(&channels, true);
        assert_eq!(summary.text_total, 3);
        assert_eq!(summary.text_viewable, 2);
        assert_eq!(summary.text_history, 1);
        assert_eq!(summary.text_send, 0);
        assert_eq!(summary.voice_total, 1);
    }

    #[test]
    fn summary_zeroes_capabilities_without_member() {
        let open = ChannelAccess {
            view: true,
            history: true,
            send: true,
            invite: true,
            ..ChannelAccess::default()
        };
        let channels = vec![text_channel("alpha", open), text_channel("beta", open)];

        let summary = summarize(&channels, false);
        assert_eq!(summary.text_total, 2);
        assert_eq!(summary.text_viewable, 0);
        assert_eq!(summary.text_history, 0);
        assert_eq!(summary.text_send, 0);
        assert_eq!(summary.text_invite, 0);
    }

    #[test]
    fn administrator_does_not_imply_channel_bits_here() {
        // Expansion of ADMINISTRATOR happens in the permission engines that
        // produce the Permissions value, not in the accessor mapping.
        let access = ChannelAccess::from_permissions(Permissions::ADMINISTRATOR);
        assert!(!access.view);
        assert!(!access.send);
    }

    #[test]
    fn guild_access_maps_named_bits() {
        let perms = Permissions::ADMINISTRATOR | Permissions::MANAGE_GUILD;
        let access = GuildAccess::from_permissions(perms);
        assert!(access.administrator);
        assert!(access.manage_guild);
        assert!(!access.ban_members);
        assert_eq!(access.bits, perms.bits());
    }
}
