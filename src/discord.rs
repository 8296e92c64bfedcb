use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use twilight_cache_inmemory::InMemoryCache;
use twilight_gateway::{Event, Shard};
use twilight_http::request::AuditLogReason;
use twilight_http::Client as HttpClient;
use twilight_model::channel::message::Message;
use twilight_model::channel::Channel;
use twilight_model::gateway::payload::incoming::{MessageCreate, Ready};
use twilight_model::guild::Permissions;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, RoleMarker, UserMarker};
use twilight_model::id::Id;
use twilight_util::permission_calculator::PermissionCalculator;

use crate::constants::{DEFAULT_INVITE_MAX_AGE, DEFAULT_INVITE_MAX_USES, WATCH_CLIP};
use crate::errors::{classify, ConsoleError};
use crate::perms::{ChannelAccess, ChannelClass, ChannelSnapshot, GuildAccess};
use crate::render;
use crate::triage::{BotMeta, GuildMeta};

/// Which channel, if any, has its incoming messages echoed to the terminal.
/// Owned by `BotState`; the channel menu writes it, the message callback
/// reads it. Last write wins, one channel at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct WatchState {
    pub channel: Option<Id<ChannelMarker>>,
    pub enabled: bool,
}

impl WatchState {
    pub(crate) fn engage(&mut self, channel: Id<ChannelMarker>) {
        self.channel = Some(channel);
        self.enabled = true;
    }

    pub(crate) fn clear(&mut self) {
        self.channel = None;
        self.enabled = false;
    }

    pub(crate) fn watches(&self, channel: Id<ChannelMarker>) -> bool {
        self.enabled && self.channel == Some(channel)
    }

    /// The message-event filter. Must stay cheap; it runs for every message
    /// the bot can see.
    pub(crate) fn should_echo(
        &self,
        channel: Id<ChannelMarker>,
        author: Id<UserMarker>,
        author_is_bot: bool,
        self_id: Id<UserMarker>,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        if self.channel != Some(channel) {
            return false;
        }
        // Skip our own echoes, not other bots.
        if author_is_bot && author == self_id {
            return false;
        }
        true
    }
}

/// Invite parameters with the console defaults baked in.
#[derive(Builder, Clone, Copy, Debug, PartialEq)]
pub(crate) struct InviteSpec {
    #[builder(default = "DEFAULT_INVITE_MAX_AGE")]
    pub max_age: u32,
    #[builder(default = "DEFAULT_INVITE_MAX_USES")]
    pub max_uses: u16,
    #[builder(default = "false")]
    pub temporary: bool,
    #[builder(default = "true")]
    pub unique: bool,
}

pub(crate) struct BotState {
    pub http: HttpClient,
    pub cache: InMemoryCache,
    pub watch: RwLock<WatchState>,
    pub latency_ms: RwLock<Option<f64>>,
    pub shutdown: Notify,
    console_started: AtomicBool,
}

impl BotState {
    pub(crate) fn new(http: HttpClient, cache: InMemoryCache) -> Self {
        Self {
            http,
            cache,
            watch: RwLock::new(WatchState::default()),
            latency_ms: RwLock::new(None),
            shutdown: Notify::new(),
            console_started: AtomicBool::new(false),
        }
    }
}

/// A row in the guild chooser.
#[derive(Debug, Clone)]
pub(crate) struct GuildOverview {
    pub id: Id<GuildMarker>,
    pub name: String,
    pub member_count: Option<u64>,
}

pub(crate) async fn run_bot(
    state: Arc<BotState>,
    mut shard: Shard,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let event = match shard.next_event().await {
            Ok(event) => event,
            Err(source) => {
                if source.is_fatal() {
                    render::fail("Gateway session ended fatally; check the token and intents.");
                    return Err(Box::new(source));
                }
                warn!("gateway error: {}", source);
                continue;
            }
        };

        state.cache.update(&event);
        *state.latency_ms.write().await =
            shard.latency().average().map(|d| d.as_secs_f64() * 1000.0);
        tokio::spawn(handle_wrapper(event, state.clone()));
    }
}

async fn handle_wrapper(event: Event, state: Arc<BotState>) {
    if let Err(e) = handle_event(event, state).await {
        error!("unhandled event error: {}", e);
    }
}

async fn handle_event(event: Event, state: Arc<BotState>) -> Result<(), ConsoleError> {
    match event {
        Event::Ready(ready) => on_ready(*ready, state),
        Event::MessageCreate(message) => on_message(*message, state).await,
        Event::GatewayHeartbeatAck => {}
        _ => {}
    }
    Ok(())
}

fn on_ready(ready: Ready, state: Arc<BotState>) {
    let tag = user_tag(&ready.user.name, ready.user.discriminator);
    render::panel(
        "Connected",
        &format!(
            "Logged in as {} ({})\nTime: {}",
            tag,
            ready.user.id,
            chrono::Utc::now().to_rfc3339()
        ),
    );

    // Reconnects fire Ready again; the console must only start once.
    if !state.console_started.swap(true, Ordering::SeqCst) {
        tokio::spawn(crate::console::run_console(state));
    }
}

async fn on_message(message: MessageCreate, state: Arc<BotState>) {
    let watch = *state.watch.read().await;
    let self_id = match state.cache.current_user() {
        Some(user) => user.id,
        None => return,
    };
    if !watch.should_echo(
        message.channel_id,
        message.author.id,
        message.author.bot,
        self_id,
    ) {
        return;
    }

    let author = user_tag(&message.author.name, message.author.discriminator);
    println!(
        "{}",
        render::live_line(
            message.timestamp.as_secs() * 1000,
            &author,
            &message.content,
            WATCH_CLIP,
        )
    );
}

pub(crate) fn user_tag(name: &str, discriminator: u16) -> String {
    if discriminator == 0 {
        name.to_string()
    } else {
        format!("{}#{:04}", name, discriminator)
    }
}

/// Guilds currently in the session cache, in stable id order.
pub(crate) fn cached_guilds(state: &BotState) -> Vec<GuildOverview> {
    let mut guilds: Vec<GuildOverview> = state
        .cache
        .iter()
        .guilds()
        .map(|guild| GuildOverview {
            id: guild.id(),
            name: guild.name().to_string(),
            member_count: guild.member_count(),
        })
        .collect();
    guilds.sort_by_key(|g| g.id.get());
    guilds
}

pub(crate) fn guild_name(state: &BotState, guild_id: Id<GuildMarker>) -> String {
    state
        .cache
        .guild(guild_id)
        .map(|g| g.name().to_string())
        .unwrap_or_else(|| guild_id.to_string())
}

pub(crate) fn cached_member_total(state: &BotState) -> u64 {
    state
        .cache
        .iter()
        .guilds()
        .filter_map(|g| g.member_count())
        .sum()
}

pub(crate) fn bot_member_known(state: &BotState, guild_id: Id<GuildMarker>) -> bool {
    match state.cache.current_user() {
        Some(user) => state.cache.member(guild_id, user.id).is_some(),
        None => false,
    }
}

/// Snapshots every cached channel of a guild with the bot's current access,
/// ordered by position then id. Uses the cache's permission view; actions
/// that must not act on stale permissions re-resolve over REST instead.
pub(crate) fn channel_snapshots(
    state: &BotState,
    guild_id: Id<GuildMarker>,
) -> Vec<ChannelSnapshot> {
    let channel_ids: Vec<Id<ChannelMarker>> = state
        .cache
        .guild_channels(guild_id)
        .map(|ids| ids.iter().copied().collect())
        .unwrap_or_default();
    let self_id = state.cache.current_user().map(|u| u.id);

    let mut snapshots = Vec::with_capacity(channel_ids.len());
    for channel_id in channel_ids {
        // Copy fields out before touching the permission engine so no cache
        // reference is held across calls.
        let copied = match state.cache.channel(channel_id) {
            Some(channel) => (
                channel.kind,
                channel.name.clone().unwrap_or_default(),
                channel.parent_id,
                channel.position.map(i64::from).unwrap_or(0),
                channel.nsfw.unwrap_or(false),
                channel.rate_limit_per_user.unwrap_or(0),
                channel.topic.clone(),
            ),
            None => continue,
        };
        let (kind, name, parent_id, position, nsfw, slowmode, topic) = copied;

        let category = parent_id.and_then(|p| state.cache.channel(p).and_then(|c| c.name.clone()));
        let access = self_id
            .and_then(|id| state.cache.permissions().in_channel(id, channel_id).ok())
            .map(ChannelAccess::from_permissions)
            .unwrap_or_default();

        snapshots.push(ChannelSnapshot {
            id: channel_id.get(),
            name,
            class: ChannelClass::classify(kind),
            category,
            position,
            nsfw,
            slowmode_seconds: slowmode,
            topic,
            access,
        });
    }
    snapshots.sort_by_key(|c| (c.position, c.id));
    snapshots
}

/// Re-evaluates one cached channel's access, for the permission table.
pub(crate) fn cached_channel_access(
    state: &BotState,
    channel_id: Id<ChannelMarker>,
) -> ChannelAccess {
    state
        .cache
        .current_user()
        .and_then(|user| {
            state
                .cache
                .permissions()
                .in_channel(user.id, channel_id)
                .ok()
        })
        .map(ChannelAccess::from_permissions)
        .unwrap_or_default()
}

/// Guild facts for the triage report, detached from cache types.
pub(crate) fn guild_meta(state: &BotState, guild_id: Id<GuildMarker>) -> Option<GuildMeta> {
    let copied = {
        let guild = state.cache.guild(guild_id)?;
        let mut features = Vec::new();
        for feature in guild.features() {
            if let Ok(value) = serde_json::to_value(feature) {
                if let Some(name) = value.as_str() {
                    features.push(name.to_string());
                }
            }
        }
        (
            guild.name().to_string(),
            guild.owner_id(),
            guild.member_count(),
            guild.description().map(str::to_string),
            format!("{:?}", guild.verification_level()),
            format!("{:?}", guild.mfa_level()),
            format!("{:?}", guild.nsfw_level()),
            format!("{:?}", guild.premium_tier()),
            guild.premium_subscription_count(),
            guild.afk_timeout().get(),
            guild.system_channel_id().map(|id| id.get()),
            features,
        )
    };
    let (
        name,
        owner_id,
        member_count,
        description,
        verification_level,
        mfa_level,
        nsfw_level,
        premium_tier,
        premium_subscribers,
        afk_timeout_seconds,
        system_channel_id,
        features,
    ) = copied;

    let owner_tag = state
        .cache
        .user(owner_id)
        .map(|user| user_tag(&user.name, user.discriminator));

    Some(GuildMeta {
        id: guild_id.get(),
        name,
        owner_tag,
        owner_id: owner_id.get(),
        member_count,
        description,
        verification_level,
        mfa_level,
        nsfw_level,
        premium_tier,
        premium_subscribers,
        afk_timeout_seconds,
        system_channel_id,
        features,
        roles_total: state
            .cache
            .guild_roles(guild_id)
            .map(|r| r.len())
            .unwrap_or(0),
        emojis_total: state
            .cache
            .guild_emojis(guild_id)
            .map(|e| e.len())
            .unwrap_or(0),
        stickers_total: state
            .cache
            .guild_stickers(guild_id)
            .map(|s| s.len())
            .unwrap_or(0),
    })
}

/// The bot's own member record and guild-wide access, when cached.
pub(crate) fn bot_meta(state: &BotState, guild_id: Id<GuildMarker>) -> Option<BotMeta> {
    let user = state.cache.current_user()?;
    let roles: Vec<Id<RoleMarker>> = {
        let member = state.cache.member(guild_id, user.id)?;
        member.roles().to_vec()
    };

    let top_role = roles
        .iter()
        .filter_map(|role_id| {
            state
                .cache
                .role(*role_id)
                .map(|role| (role.position, role_id.get(), role.name.clone()))
        })
        .max_by_key(|(position, id, _)| (*position, *id))
        .map(|(_, _, name)| name)
        .unwrap_or_else(|| "@everyone".to_string());

    let root = state
        .cache
        .permissions()
        .root(user.id, guild_id)
        .unwrap_or(Permissions::empty());

    Some(BotMeta {
        member_id: user.id.get(),
        display_name: user_tag(&user.name, user.discriminator),
        top_role,
        guild_access: GuildAccess::from_permissions(root),
    })
}

/// Fresh capability check for a channel: re-fetches the member and the
/// channel over REST so the decision reflects live permissions, then runs
/// the calculator against them plus the cached role table.
pub(crate) async fn fresh_channel_access(
    state: &BotState,
    guild_id: Id<GuildMarker>,
    channel_id: Id<ChannelMarker>,
) -> Result<(ChannelAccess, Channel), ConsoleError> {
    let user = state.cache.current_user().ok_or(ConsoleError::State {
        what: "current user",
    })?;

    let member = state
        .http
        .guild_member(guild_id, user.id)
        .await
        .map_err(|e| classify("member lookup", e))?
        .model()
        .await?;
    let channel = state
        .http
        .channel(channel_id)
        .await
        .map_err(|e| classify("channel lookup", e))?
        .model()
        .await?;

    let everyone = state
        .cache
        .role(guild_id.cast())
        .map(|role| role.permissions)
        .unwrap_or(Permissions::empty());
    let member_roles: Vec<(Id<RoleMarker>, Permissions)> = member
        .roles
        .iter()
        .filter_map(|role_id| {
            state
                .cache
                .role(*role_id)
                .map(|role| (*role_id, role.permissions))
        })
        .collect();

    let mut calculator = PermissionCalculator::new(guild_id, user.id, everyone, &member_roles);
    if let Some(owner_id) = state.cache.guild(guild_id).map(|g| g.owner_id()) {
        calculator = calculator.owner_id(owner_id);
    }

    let overwrites = channel.permission_overwrites.clone().unwrap_or_default();
    let permissions = calculator.in_channel(channel.kind, &overwrites);
    Ok((ChannelAccess::from_permissions(permissions), channel))
}

/// Bounded oldest-first batch of a channel's history.
pub(crate) async fn oldest_messages(
    state: &BotState,
    channel_id: Id<ChannelMarker>,
    limit: u16,
) -> Result<Vec<Message>, ConsoleError> {
    let mut messages = state
        .http
        .channel_messages(channel_id)
        .after(Id::new(1))
        .limit(limit)?
        .await
        .map_err(|e| classify("history fetch", e))?
        .models()
        .await?;
    messages.sort_by_key(|m| m.id.get());
    Ok(messages)
}

pub(crate) async fn send_text(
    state: &BotState,
    channel_id: Id<ChannelMarker>,
    text: &str,
) -> Result<Message, ConsoleError> {
    let message = state
        .http
        .create_message(channel_id)
        .content(text)?
        .await
        .map_err(|e| classify("message send", e))?
        .model()
        .await?;
    Ok(message)
}

pub(crate) async fn create_invite(
    state: &BotState,
    channel_id: Id<ChannelMarker>,
    spec: &InviteSpec,
) -> Result<String, ConsoleError> {
    let invite = state
        .http
        .create_invite(channel_id)
        .max_age(spec.max_age)?
        .max_uses(spec.max_uses)?
        .temporary(spec.temporary)
        .unique(spec.unique)
        .reason("created via triage console")?
        .await
        .map_err(|e| classify("invite creation", e))?
        .model()
        .await?;
    Ok(format!("https://discord.gg/{}", invite.code))
}

/// REST re-fetch of a guild; the gateway keeps the cache authoritative, this
/// confirms the guild is still reachable and nudges Discord for counts.
pub(crate) async fn refresh_guild(
    state: &BotState,
    guild_id: Id<GuildMarker>,
) -> Result<String, ConsoleError> {
    let guild = state
        .http
        .guild(guild_id)
        .with_counts(true)
        .await
        .map_err(|e| classify("guild refresh", e))?
        .model()
        .await?;
    Ok(guild.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(n: u64) -> Id<ChannelMarker> {
        Id::new(n)
    }

    fn user(n: u64) -> Id<UserMarker> {
        Id::new(n)
    }

    #[test]
    fn watch_last_write_wins() {
        let mut watch = WatchState::default();
        watch.engage(channel(1));
        watch.engage(channel(2));
        assert!(watch.watches(channel(2)));
        assert!(!watch.watches(channel(1)));
    }

    #[test]
    fn disabled_watch_echoes_nothing() {
        let mut watch = WatchState::default();
        watch.engage(channel(2));
        watch.clear();
        assert!(!watch.should_echo(channel(1), user(5), false, user(9)));
        assert!(!watch.should_echo(channel(2), user(5), false, user(9)));
    }

    #[test]
    fn watch_filters_channel_and_self() {
        let mut watch = WatchState::default();
        watch.engage(channel(2));
        assert!(!watch.should_echo(channel(1), user(5), false, user(9)));
        assert!(watch.should_echo(channel(2), user(5), false, user(9)));
        // Our own echoes are dropped; other bots are still shown.
        assert!(!watch.should_echo(channel(2), user(9), true, user(9)));
        assert!(watch.should_echo(channel(2), user(5), true, user(9)));
    }

    #[test]
    fn invite_spec_defaults() {
        let spec = InviteSpecBuilder::default().build().unwrap();
        assert_eq!(spec.max_age, DEFAULT_INVITE_MAX_AGE);
        assert_eq!(spec.max_uses, DEFAULT_INVITE_MAX_USES);
        assert!(!spec.temporary);
        assert!(spec.unique);
    }

    #[test]
    fn invite_spec_overrides() {
        let spec = InviteSpecBuilder::default()
            .max_age(0)
            .max_uses(0)
            .build()
            .unwrap();
        assert_eq!(spec.max_age, 0);
        assert_eq!(spec.max_uses, 0);
        assert!(spec.unique);
    }

    #[test]
    fn user_tags() {
        assert_eq!(user_tag("legacy", 7), "legacy#0007");
        assert_eq!(user_tag("modern", 0), "modern");
    }
}
