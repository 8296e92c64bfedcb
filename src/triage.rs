use serde::{Deserialize, Serialize};

use crate::constants::TOPIC_CLIP;
use crate::perms::{
    summarize, ChannelClass, ChannelSnapshot, GuildAccess, GuildSummary,
};
use crate::render::clip;
use crate::token::snowflake_created_ms;

/// Guild-level facts gathered from the session cache, already detached from
/// client library types.
#[derive(Debug, Clone, Default)]
pub(crate) struct GuildMeta {
    pub id: u64,
    pub name: String,
    pub owner_tag: Option<String>,
    pub owner_id: u64,
    pub member_count: Option<u64>,
    pub description: Option<String>,
    pub verification_level: String,
    pub mfa_level: String,
    pub nsfw_level: String,
    pub premium_tier: String,
    pub premium_subscribers: Option<u64>,
    pub afk_timeout_seconds: u16,
    pub system_channel_id: Option<u64>,
    pub features: Vec<String>,
    pub roles_total: usize,
    pub emojis_total: usize,
    pub stickers_total: usize,
}

/// The bot's own member record, when cached.
#[derive(Debug, Clone)]
pub(crate) struct BotMeta {
    pub member_id: u64,
    pub display_name: String,
    pub top_role: String,
    pub guild_access: GuildAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GuildSection {
    pub name: String,
    pub id: u64,
    pub owner: String,
    pub owner_id: u64,
    pub created_utc: String,
    pub member_count: Option<u64>,
    pub description: Option<String>,
    pub verification_level: String,
    pub mfa_level: String,
    pub nsfw_level: String,
    pub premium_tier: String,
    pub premium_subscribers: Option<u64>,
    pub afk_timeout: u16,
    pub system_channel_id: Option<u64>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BotSection {
    pub member_id: Option<u64>,
    pub display_name: String,
    pub top_role: String,
    pub guild_admin: bool,
    pub manage_guild: bool,
    pub manage_roles: bool,
    pub manage_channels: bool,
    pub kick_members: bool,
    pub ban_members: bool,
    pub view_audit_log: bool,
    pub guild_perm_value: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct ChannelTypeCounts {
    pub text: usize,
    pub voice: usize,
    pub categories: usize,
    pub stage: usize,
    pub forum: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChannelRow {
    pub name: String,
    pub id: u64,
    #[serde(rename = "type")]
    pub class: ChannelClass,
    pub category: Option<String>,
    pub position: i64,
    pub nsfw: bool,
    pub slowmode_seconds: u16,
    pub topic: String,
    pub view: bool,
    pub history: bool,
    pub send: bool,
    pub invite: bool,
    pub manage_messages: bool,
    pub manage_channels: bool,
    pub embed_links: bool,
    pub attach_files: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RiskFlags {
    pub text_no_view_count: usize,
    pub view_but_no_history_count: usize,
    pub view_but_no_send_count: usize,
    pub view_but_no_invite_count: usize,
    pub view_but_no_history: Vec<String>,
    pub view_but_no_send: Vec<String>,
    pub view_but_no_invite: Vec<String>,
}

/// Snapshot of a guild's channel topology and the bot's effective
/// permissions. Built on demand, optionally serialized to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TriageReport {
    pub generated_utc: String,
    pub guild: GuildSection,
    pub bot: BotSection,
    pub summary: GuildSummary,
    pub channel_types: ChannelTypeCounts,
    pub roles_total: usize,
    pub emojis_total: usize,
    pub stickers_total: usize,
    pub risk_flags: RiskFlags,
    pub channels: Vec<ChannelRow>,
}

pub(crate) fn build_triage_report(
    generated_utc: String,
    guild: &GuildMeta,
    bot: Option<&BotMeta>,
    channels: &[ChannelSnapshot],
) -> TriageReport {
    let summary = summarize(channels, bot.is_some());

    let mut channel_types = ChannelTypeCounts::default();
    for channel in channels {
        match channel.class {
            ChannelClass::Text => channel_types.text += 1,
            ChannelClass::Voice => channel_types.voice += 1,
            ChannelClass::Category => channel_types.categories += 1,
            ChannelClass::Stage => channel_types.stage += 1,
            ChannelClass::Forum => channel_types.forum += 1,
            ChannelClass::Other => {}
        }
    }

    let mut rows = Vec::new();
    let mut risk = RiskFlags::default();
    for channel in channels.iter().filter(|c| c.class == ChannelClass::Text) {
        let access = channel.access;
        let display = format!("#{}", channel.name);
        rows.push(ChannelRow {
            name: channel.name.clone(),
            id: channel.id,
            class: channel.class,
            category: channel.category.clone(),
            position: channel.position,
            nsfw: channel.nsfw,
            slowmode_seconds: channel.slowmode_seconds,
            topic: channel
                .topic
                .as_deref()
                .map(|t| clip(t, TOPIC_CLIP))
                .unwrap_or_default(),
            view: access.view,
            history: access.history,
            send: access.send,
            invite: access.invite,
            manage_messages: access.manage_messages,
            manage_channels: access.manage_channels,
            embed_links: access.embed_links,
            attach_files: access.attach_files,
        });

        // Membership in each bucket depends only on this channel's own bits;
        // the three view-gated buckets never include unviewable channels.
        if !access.view {
            risk.text_no_view_count += 1;
            continue;
        }
        if !access.history {
            risk.view_but_no_history_count += 1;
            risk.view_but_no_history.push(display.clone());
        }
        if !access.send {
            risk.view_but_no_send_count += 1;
            risk.view_but_no_send.push(display.clone());
        }
        if !access.invite {
            risk.view_but_no_invite_count += 1;
            risk.view_but_no_invite.push(display);
        }
    }

    let owner = match &guild.owner_tag {
        Some(tag) => format!("{} ({})", tag, guild.owner_id),
        None => format!("owner_id={}", guild.owner_id),
    };

    let bot_section = match bot {
        Some(meta) => BotSection {
            member_id: Some(meta.member_id),
            display_name: meta.display_name.clone(),
            top_role: meta.top_role.clone(),
            guild_admin: meta.guild_access.administrator,
            manage_guild: meta.guild_access.manage_guild,
            manage_roles: meta.guild_access.manage_roles,
            manage_channels: meta.guild_access.manage_channels,
            kick_members: meta.guild_access.kick_members,
            ban_members: meta.guild_access.ban_members,
            view_audit_log: meta.guild_access.view_audit_log,
            guild_perm_value: meta.guild_access.bits,
        },
        None => BotSection {
            member_id: None,
            display_name: "?".to_string(),
            top_role: "?".to_string(),
            guild_admin: false,
            manage_guild: false,
            manage_roles: false,
            manage_channels: false,
            kick_members: false,
            ban_members: false,
            view_audit_log: false,
            guild_perm_value: 0,
        },
    };

    let mut features = guild.features.clone();
    features.sort();

    TriageReport {
        generated_utc,
        guild: GuildSection {
            name: guild.name.clone(),
            id: guild.id,
            owner,
            owner_id: guild.owner_id,
            created_utc: crate::render::fmt_ms(Some(snowflake_created_ms(guild.id))),
            member_count: guild.member_count,
            description: guild.description.clone(),
            verification_level: guild.verification_level.clone(),
            mfa_level: guild.mfa_level.clone(),
            nsfw_level: guild.nsfw_level.clone(),
            premium_tier: guild.premium_tier.clone(),
            premium_subscribers: guild.premium_subscribers,
            afk_timeout: guild.afk_timeout_seconds,
            system_channel_id: guild.system_channel_id,
            features,
        },
        bot: bot_section,
        summary,
        channel_types,
        roles_total: guild.roles_total,
        emojis_total: guild.emojis_total,
        stickers_total: guild.stickers_total,
        risk_flags: risk,
        channels: rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perms::ChannelAccess;

    fn snapshot(name: &str, class: ChannelClass, access: ChannelAccess) -> ChannelSnapshot {
        ChannelSnapshot {
            id: name.len() as u64 + 100,
            name: name.to_string(),
            class,
            category: None,
            position: 0,
            nsfw: false,
            slowmode_seconds: 0,
            topic: None,
            access,
        }
    }

    fn meta() -> GuildMeta {
        GuildMeta {
            id: 4_194_304,
            name: "testers".to_string(),
            owner_id: 42,
            ..GuildMeta::default()
        }
    }

    fn bot_meta() -> BotMeta {
        BotMeta {
            member_id: 7,
            display_name: "triage#0001".to_string(),
            top_role: "bots".to_string(),
            guild_access: GuildAccess::default(),
        }
    }

    #[test]
    fn risk_buckets_are_view_gated_and_local() {
        let hidden = ChannelAccess::default();
        let no_history = ChannelAccess {
            view: true,
            send: true,
            invite: true,
            ..ChannelAccess::default()
        };
        let open = ChannelAccess {
            view: true,
            history: true,
            send: true,
            invite: true,
            ..ChannelAccess::default()
        };
        let channels = vec![
            snapshot("hidden", ChannelClass::Text, hidden),
            snapshot("quiet", ChannelClass::Text, no_history),
            snapshot("open", ChannelClass::Text, open),
        ];

        let report =
            build_triage_report("now".to_string(), &meta(), Some(&bot_meta()), &channels);

        assert_eq!(report.risk_flags.text_no_view_count, 1);
        assert_eq!(report.risk_flags.view_but_no_history_count, 1);
        assert_eq!(report.risk_flags.view_but_no_send_count, 0);
        assert_eq!(report.risk_flags.view_but_no_invite_count, 0);
        assert_eq!(report.risk_flags.view_but_no_history, vec!["#quiet"]);
        // The unviewable channel never leaks into the view-gated buckets.
        assert!(!report.risk_flags.view_but_no_history.contains(&"#hidden".to_string()));
        assert!(!report.risk_flags.view_but_no_send.contains(&"#hidden".to_string()));
    }

    #[test]
    fn summary_scenario_two_viewable_one_history() {
        let view_and_history = ChannelAccess {
            view: true,
            history: true,
            ..ChannelAccess::default()
        };
        let view_only = ChannelAccess {
            view: true,
            ..ChannelAccess::default()
        };
        let channels = vec![
            snapshot("a", ChannelClass::Text, view_and_history),
            snapshot("b", ChannelClass::Text, view_only),
            snapshot("c", ChannelClass::Text, ChannelAccess::default()),
        ];

        let report =
            build_triage_report("now".to_string(), &meta(), Some(&bot_meta()), &channels);
        assert_eq!(report.summary.text_viewable, 2);
        assert_eq!(report.summary.text_history, 1);
        assert_eq!(report.risk_flags.view_but_no_history_count, 1);
    }

    #[test]
    fn absent_member_yields_defaults() {
        let channels = vec![snapshot("a", ChannelClass::Text, ChannelAccess::default())];
        let report = build_triage_report("now".to_string(), &meta(), None, &channels);
        assert_eq!(report.bot.member_id, None);
        assert_eq!(report.bot.display_name, "?");
        assert!(!report.bot.guild_admin);
        assert_eq!(report.bot.guild_perm_value, 0);
        assert_eq!(report.summary.text_viewable, 0);
    }

    #[test]
    fn counts_channel_types_and_only_rows_text() {
        let channels = vec![
            snapshot("a", ChannelClass::Text, ChannelAccess::default()),
            snapshot("b", ChannelClass::Voice, ChannelAccess::default()),
            snapshot("c", ChannelClass::Category, ChannelAccess::default()),
            snapshot("d", ChannelClass::Forum, ChannelAccess::default()),
            snapshot("e", ChannelClass::Stage, ChannelAccess::default()),
        ];
        let report = build_triage_report("now".to_string(), &meta(), None, &channels);
        assert_eq!(report.channel_types.text, 1);
        assert_eq!(report.channel_types.voice, 1);
        assert_eq!(report.channel_types.categories, 1);
        assert_eq!(report.channel_types.forum, 1);
        assert_eq!(report.channel_types.stage, 1);
        assert_eq!(report.channels.len(), 1);
    }

    #[test]
    fn export_round_trip_preserves_channel_count() {
        let open = ChannelAccess {
            view: true,
            history: true,
            send: true,
            invite: true,
            ..ChannelAccess::default()
        };
        let channels = vec![
            snapshot("a", ChannelClass::Text, open),
            snapshot("b", ChannelClass::Text, ChannelAccess::default()),
            snapshot("lounge", ChannelClass::Voice, ChannelAccess::default()),
        ];
        let report =
            build_triage_report("now".to_string(), &meta(), Some(&bot_meta()), &channels);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("triage.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&report).expect("serialize"))
            .expect("write");

        let raw = std::fs::read(&path).expect("read");
        let loaded: TriageReport = serde_json::from_slice(&raw).expect("parse");
        assert_eq!(loaded.channels.len(), 2);
        assert_eq!(loaded.channels.len(), report.summary.text_total);
        assert_eq!(loaded.guild.name, "testers");

        // Channel rows keep their wire name for the type discriminator.
        let value: serde_json::Value = serde_json::from_slice(&raw).expect("value");
        assert_eq!(value["channels"][0]["type"], "text");
        assert!(value["risk_flags"]["view_but_no_history_count"].is_u64());
    }

    #[test]
    fn owner_display_falls_back_to_id() {
        let channels = Vec::new();
        let report = build_triage_report("now".to_string(), &meta(), None, &channels);
        assert_eq!(report.guild.owner, "owner_id=42");

        let mut with_tag = meta();
        with_tag.owner_tag = Some("ops#0001".to_string());
        let report = build_triage_report("now".to_string(), &with_tag, None, &channels);
        assert_eq!(report.guild.owner, "ops#0001 (42)");
    }
}
