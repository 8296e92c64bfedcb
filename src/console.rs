use std::sync::Arc;

use chrono::Utc;
use rustyline::error::ReadlineError;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};
use twilight_model::id::Id;

use crate::constants::{
    DEFAULT_INVITE_MAX_AGE, DEFAULT_INVITE_MAX_USES, DETAIL_ROWS, HISTORY_CLIP, HISTORY_LONG,
    HISTORY_SHORT, RISK_NAMES_SHOWN,
};
use crate::discord::{self, BotState, GuildOverview, InviteSpecBuilder};
use crate::errors::ConsoleError;
use crate::perms::{summarize, ChannelClass, ChannelSnapshot};
use crate::render::{self, yes_no, Table};
use crate::triage::{self, TriageReport};

/// Line input for the menu loop. Readline blocks, so every prompt is moved
/// off the event loop; gateway dispatch (and the live-watch echo) keeps
/// running while the operator thinks.
pub(crate) struct Prompter {
    editor: rustyline::DefaultEditor,
}

impl Prompter {
    pub(crate) fn new() -> Result<Self, ConsoleError> {
        Ok(Self {
            editor: rustyline::DefaultEditor::new()?,
        })
    }

    /// None means the operator backed out (ctrl-c / ctrl-d at the prompt).
    pub(crate) fn line(&mut self, prompt: &str) -> Result<Option<String>, ConsoleError> {
        match tokio::task::block_in_place(|| self.editor.readline(prompt)) {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(source) => Err(ConsoleError::Prompt { source }),
        }
    }
}

/// Plain y/n confirmation, used before the gateway is started.
pub(crate) fn confirm(prompt: &str, default_yes: bool) -> bool {
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(_) => return default_yes,
    };
    let suffix = if default_yes { "[Y/n]" } else { "[y/N]" };
    match editor.readline(&format!("{} {} ", prompt, suffix)) {
        Ok(line) => {
            let line = line.trim().to_lowercase();
            if line.is_empty() {
                default_yes
            } else {
                line.starts_with('y')
            }
        }
        Err(_) => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Selection {
    Cancel,
    Invalid,
    OutOfRange,
    Index(usize),
}

/// 1-based numeric pick from a numbered table. Blank input is the
/// cancellation sentinel; anything else invalid re-prompts in the caller's
/// loop instead of recursing.
pub(crate) fn parse_selection(raw: &str, len: usize) -> Selection {
    let raw = raw.trim();
    if raw.is_empty() {
        return Selection::Cancel;
    }
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Selection::Index(n - 1),
        Ok(_) => Selection::OutOfRange,
        Err(_) => Selection::Invalid,
    }
}

pub(crate) async fn run_console(state: Arc<BotState>) {
    if let Err(e) = console_loop(&state).await {
        render::fail(&format!("Console error: {}", e));
    }
    state.shutdown.notify_one();
}

async fn console_loop(state: &Arc<BotState>) -> Result<(), ConsoleError> {
    let mut prompter = Prompter::new()?;
    loop {
        print_session_overview(state).await;
        let guild = match choose_guild(state, &mut prompter)? {
            Some(guild) => guild,
            None => return Ok(()),
        };
        guild_menu(state, &mut prompter, guild.id).await?;
    }
}

async fn print_session_overview(state: &BotState) {
    let user = state.cache.current_user();
    let tag = user
        .as_ref()
        .map(|u| discord::user_tag(&u.name, u.discriminator))
        .unwrap_or_else(|| "?".to_string());
    let id = user
        .map(|u| u.id.to_string())
        .unwrap_or_else(|| "?".to_string());
    let latency = state
        .latency_ms
        .read()
        .await
        .map(|ms| format!("{:.1} ms", ms))
        .unwrap_or_else(|| "?".to_string());

    render::panel(
        "Discord Bot Console",
        &format!(
            "User: {} ({})\nGuilds: {}\nMembers (cached): {}\nLatency: {}",
            tag,
            id,
            discord::cached_guilds(state).len(),
            discord::cached_member_total(state),
            latency
        ),
    );
}

fn choose_guild(
    state: &BotState,
    prompter: &mut Prompter,
) -> Result<Option<GuildOverview>, ConsoleError> {
    loop {
        let guilds = discord::cached_guilds(state);
        if guilds.is_empty() {
            render::fail("No guilds available for this bot.");
            return Ok(None);
        }

        let mut table = Table::new("Guilds")
            .column_right("#")
            .column("Guild")
            .column("ID")
            .column_right("Members");
        for (i, guild) in guilds.iter().enumerate() {
            table.row(vec![
                (i + 1).to_string(),
                guild.name.clone(),
                guild.id.to_string(),
                guild
                    .member_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "?".to_string()),
            ]);
        }
        table.print();

        let raw = match prompter.line("Pick guild number (blank to exit): ")? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match parse_selection(&raw, guilds.len()) {
            Selection::Cancel => return Ok(None),
            Selection::Invalid => render::notice("Invalid selection."),
            Selection::OutOfRange => render::notice("Out of range."),
            Selection::Index(i) => return Ok(Some(guilds[i].clone())),
        }
    }
}

fn choose_channel(
    prompter: &mut Prompter,
    snapshots: &[ChannelSnapshot],
    guild_name: &str,
) -> Result<Option<ChannelSnapshot>, ConsoleError> {
    let viewable: Vec<&ChannelSnapshot> = snapshots
        .iter()
        .filter(|c| c.class == ChannelClass::Text && c.access.view)
        .collect();
    if viewable.is_empty() {
        render::notice("No viewable text channels.");
        return Ok(None);
    }

    loop {
        let mut table = Table::new(format!("Text Channels: {}", guild_name))
            .column_right("#")
            .column("Channel")
            .column("View")
            .column("History")
            .column("Send")
            .column("Invite");
        for (i, channel) in viewable.iter().enumerate() {
            table.row(vec![
                (i + 1).to_string(),
                format!("#{}", channel.name),
                yes_no(channel.access.view),
                yes_no(channel.access.history),
                yes_no(channel.access.send),
                yes_no(channel.access.invite),
            ]);
        }
        table.print();

        let raw = match prompter.line("Pick channel number (blank to cancel): ")? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match parse_selection(&raw, viewable.len()) {
            Selection::Cancel => return Ok(None),
            Selection::Invalid => render::notice("Invalid selection."),
            Selection::OutOfRange => render::notice("Out of range."),
            Selection::Index(i) => return Ok(Some(viewable[i].clone())),
        }
    }
}

async fn guild_menu(
    state: &Arc<BotState>,
    prompter: &mut Prompter,
    guild_id: Id<GuildMarker>,
) -> Result<(), ConsoleError> {
    loop {
        let snapshots = discord::channel_snapshots(state, guild_id);
        let member_known = discord::bot_member_known(state, guild_id);
        let summary = summarize(&snapshots, member_known);
        let name = discord::guild_name(state, guild_id);

        render::panel(
            &format!("Guild: {}", name),
            &format!(
                "viewable={}/{}  history={}  send={}",
                summary.text_viewable, summary.text_total, summary.text_history, summary.text_send
            ),
        );
        println!("1) Select channel  2) Guild triage  3) Export triage JSON  4) Refresh  5) Back");

        let choice = match prompter.line("Action: ")? {
            Some(choice) => choice,
            None => return Ok(()),
        };

        let outcome = match choice.as_str() {
            "1" => match choose_channel(prompter, &snapshots, &name)? {
                Some(channel) => channel_menu(state, prompter, guild_id, &channel).await,
                None => Ok(()),
            },
            "2" => show_guild_triage(state, guild_id),
            "3" => export_guild_triage(state, prompter, guild_id).await,
            "4" => {
                match discord::refresh_guild(state, guild_id).await {
                    Ok(fresh_name) => render::ok(&format!("Refreshed guild {}.", fresh_name)),
                    Err(e) => render::notice(&format!("Refresh fallback (cache only): {}", e)),
                }
                Ok(())
            }
            "5" => return Ok(()),
            _ => {
                render::notice("Invalid action.");
                Ok(())
            }
        };

        // Failures stay local to the action that produced them; the menu
        // always resumes.
        if let Err(e) = outcome {
            render::fail(&format!("Action failed: {}", e));
        }
    }
}

async fn channel_menu(
    state: &Arc<BotState>,
    prompter: &mut Prompter,
    guild_id: Id<GuildMarker>,
    channel: &ChannelSnapshot,
) -> Result<(), ConsoleError> {
    let result = channel_menu_inner(state, prompter, guild_id, channel).await;
    // Watch state never outlives the menu that engaged it, on any exit path.
    state.watch.write().await.clear();
    result
}

async fn channel_menu_inner(
    state: &Arc<BotState>,
    prompter: &mut Prompter,
    guild_id: Id<GuildMarker>,
    channel: &ChannelSnapshot,
) -> Result<(), ConsoleError> {
    let channel_id: Id<ChannelMarker> = Id::new(channel.id);
    show_channel_perms(state, channel);

    loop {
        render::panel(
            &format!("Channel Menu: #{}", channel.name),
            "1) Show bot permissions\n2) Read last 25 messages\n3) Read last 100 messages\n4) Toggle LIVE watch\n5) Send message\n6) Create invite\n7) Back",
        );
        let choice = match prompter.line("Action: ")? {
            Some(choice) => choice,
            None => return Ok(()),
        };

        match choice.as_str() {
            "1" => show_channel_perms(state, channel),
            "2" => read_history(state, guild_id, channel, HISTORY_SHORT).await?,
            "3" => read_history(state, guild_id, channel, HISTORY_LONG).await?,
            "4" => {
                let mut watch = state.watch.write().await;
                if !watch.watches(channel_id) {
                    watch.engage(channel_id);
                    drop(watch);
                    render::ok("LIVE watch enabled for this channel.");
                } else {
                    watch.clear();
                    drop(watch);
                    render::notice("LIVE watch disabled.");
                }
            }
            "5" => send_message(state, prompter, channel_id).await?,
            "6" => create_invite(state, prompter, channel_id).await?,
            "7" => return Ok(()),
            _ => render::notice("Invalid action."),
        }
    }
}

fn show_channel_perms(state: &BotState, channel: &ChannelSnapshot) {
    let access = discord::cached_channel_access(state, Id::new(channel.id));
    let mut table = Table::new(format!("Permissions: #{}", channel.name))
        .column("Permission")
        .column("State");
    table.row(vec!["View Channel".to_string(), yes_no(access.view)]);
    table.row(vec!["Read History".to_string(), yes_no(access.history)]);
    table.row(vec!["Send Messages".to_string(), yes_no(access.send)]);
    table.row(vec![
        "Create Instant Invite".to_string(),
        yes_no(access.invite),
    ]);
    table.row(vec![
        "Manage Messages".to_string(),
        yes_no(access.manage_messages),
    ]);
    table.row(vec!["Embed Links".to_string(), yes_no(access.embed_links)]);
    table.row(vec![
        "Attach Files".to_string(),
        yes_no(access.attach_files),
    ]);
    table.row(vec!["Bitfield".to_string(), access.bits.to_string()]);
    table.print();
}

/// Re-resolves the member and channel over REST before touching history, so
/// the check runs against live permissions rather than the cached view used
/// for channel selection.
async fn read_history(
    state: &BotState,
    guild_id: Id<GuildMarker>,
    channel: &ChannelSnapshot,
    limit: u16,
) -> Result<(), ConsoleError> {
    let channel_id = Id::new(channel.id);
    let (access, fresh) = discord::fresh_channel_access(state, guild_id, channel_id).await?;

    if !access.view {
        render::fail("Bot cannot view this channel.");
        return Ok(());
    }
    if !access.history {
        render::fail("Bot cannot read message history in this channel.");
        return Ok(());
    }

    match discord::oldest_messages(state, channel_id, limit).await {
        Ok(messages) if messages.is_empty() => render::notice("No messages returned."),
        Ok(messages) => {
            let name = fresh.name.unwrap_or_else(|| channel.name.clone());
            let mut table = Table::new(format!("Last {} messages in #{}", messages.len(), name))
                .column("Time")
                .column("Author")
                .column("Content");
            for message in &messages {
                table.row(vec![
                    render::fmt_ms(Some(message.timestamp.as_secs() * 1000)),
                    discord::user_tag(&message.author.name, message.author.discriminator),
                    render::clip(&message.content, HISTORY_CLIP),
                ]);
            }
            table.print();
        }
        Err(e) if e.is_forbidden() => {
            render::fail("Discord returned 403 while fetching history.")
        }
        Err(ConsoleError::Http { source }) => {
            render::fail(&format!("HTTP error while fetching history: {}", source))
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn send_message(
    state: &BotState,
    prompter: &mut Prompter,
    channel_id: Id<ChannelMarker>,
) -> Result<(), ConsoleError> {
    let text = match prompter.line("Message text: ")? {
        Some(text) => text,
        None => return Ok(()),
    };
    if text.is_empty() {
        render::notice("Message is empty.");
        return Ok(());
    }

    match discord::send_text(state, channel_id, &text).await {
        Ok(message) => render::ok(&format!("Sent message id={}", message.id)),
        Err(e) if e.is_forbidden() => render::fail("Bot cannot send messages here."),
        Err(ConsoleError::Http { source }) => {
            render::fail(&format!("HTTP error while sending: {}", source))
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn create_invite(
    state: &BotState,
    prompter: &mut Prompter,
    channel_id: Id<ChannelMarker>,
) -> Result<(), ConsoleError> {
    // The invite bit is checkable locally; skip the round trip when absent.
    let access = discord::cached_channel_access(state, channel_id);
    if !access.invite {
        render::fail("Bot lacks Create Instant Invite in this channel.");
        return Ok(());
    }

    let max_age = match prompt_number(
        prompter,
        &format!(
            "Invite max age seconds (0 never expires) [{}]: ",
            DEFAULT_INVITE_MAX_AGE
        ),
        DEFAULT_INVITE_MAX_AGE,
    )? {
        Some(value) => value,
        None => return Ok(()),
    };
    let max_uses = match prompt_number(
        prompter,
        &format!("Invite max uses (0 unlimited) [{}]: ", DEFAULT_INVITE_MAX_USES),
        DEFAULT_INVITE_MAX_USES,
    )? {
        Some(value) => value,
        None => return Ok(()),
    };

    let spec = InviteSpecBuilder::default()
        .max_age(max_age)
        .max_uses(max_uses)
        .build()
        .unwrap();

    match discord::create_invite(state, channel_id, &spec).await {
        Ok(url) => render::ok(&format!("Invite created: {}", url)),
        Err(e) if e.is_forbidden() => {
            render::fail("Server/channel settings blocked invite creation.")
        }
        Err(ConsoleError::Http { source }) => {
            render::fail(&format!("HTTP error creating invite: {}", source))
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn prompt_number<T>(
    prompter: &mut Prompter,
    prompt: &str,
    default: T,
) -> Result<Option<T>, ConsoleError>
where
    T: std::str::FromStr + Copy,
{
    Ok(match prompter.line(prompt)? {
        None => None,
        Some(raw) if raw.is_empty() => Some(default),
        Some(raw) => Some(raw.parse().unwrap_or(default)),
    })
}

fn build_report(
    state: &BotState,
    guild_id: Id<GuildMarker>,
) -> Result<TriageReport, ConsoleError> {
    let meta = discord::guild_meta(state, guild_id).ok_or(ConsoleError::State {
        what: "guild cache",
    })?;
    let bot = discord::bot_meta(state, guild_id);
    let snapshots = discord::channel_snapshots(state, guild_id);
    Ok(triage::build_triage_report(
        Utc::now().to_rfc3339(),
        &meta,
        bot.as_ref(),
        &snapshots,
    ))
}

fn show_guild_triage(state: &BotState, guild_id: Id<GuildMarker>) -> Result<(), ConsoleError> {
    let report = build_report(state, guild_id)?;

    let mut identity = Table::new(format!("Guild Triage: {}", report.guild.name))
        .column("Field")
        .column("Value");
    identity.row(vec![
        "Guild".to_string(),
        format!("{} ({})", report.guild.name, report.guild.id),
    ]);
    identity.row(vec!["Owner".to_string(), report.guild.owner.clone()]);
    identity.row(vec!["Created".to_string(), report.guild.created_utc.clone()]);
    identity.row(vec![
        "Members".to_string(),
        report
            .guild
            .member_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string()),
    ]);
    identity.row(vec![
        "Verification".to_string(),
        report.guild.verification_level.clone(),
    ]);
    identity.row(vec!["MFA Level".to_string(), report.guild.mfa_level.clone()]);
    identity.row(vec![
        "Boost Tier".to_string(),
        report.guild.premium_tier.clone(),
    ]);
    identity.row(vec![
        "Boost Count".to_string(),
        report.guild.premium_subscribers.unwrap_or(0).to_string(),
    ]);
    identity.row(vec!["Roles".to_string(), report.roles_total.to_string()]);
    identity.row(vec![
        "Emojis/Stickers".to_string(),
        format!("{}/{}", report.emojis_total, report.stickers_total),
    ]);
    identity.print();

    let mut capability = Table::new("Bot Capability Summary")
        .column("Metric")
        .column_right("Value");
    capability.row(vec![
        "Text Channels".to_string(),
        report.summary.text_total.to_string(),
    ]);
    capability.row(vec![
        "Viewable".to_string(),
        report.summary.text_viewable.to_string(),
    ]);
    capability.row(vec![
        "Readable History".to_string(),
        report.summary.text_history.to_string(),
    ]);
    capability.row(vec![
        "Send Allowed".to_string(),
        report.summary.text_send.to_string(),
    ]);
    capability.row(vec![
        "Invite Allowed".to_string(),
        report.summary.text_invite.to_string(),
    ]);
    capability.row(vec![
        "Voice Channels".to_string(),
        report.summary.voice_total.to_string(),
    ]);
    capability.row(vec!["Guild Admin".to_string(), yes_no(report.bot.guild_admin)]);
    capability.row(vec![
        "Manage Guild".to_string(),
        yes_no(report.bot.manage_guild),
    ]);
    capability.row(vec![
        "Manage Roles".to_string(),
        yes_no(report.bot.manage_roles),
    ]);
    capability.print();

    let mut types = Table::new("Channel Type Breakdown")
        .column("Type")
        .column_right("Count");
    types.row(vec!["text".to_string(), report.channel_types.text.to_string()]);
    types.row(vec![
        "voice".to_string(),
        report.channel_types.voice.to_string(),
    ]);
    types.row(vec![
        "categories".to_string(),
        report.channel_types.categories.to_string(),
    ]);
    types.row(vec![
        "stage".to_string(),
        report.channel_types.stage.to_string(),
    ]);
    types.row(vec![
        "forum".to_string(),
        report.channel_types.forum.to_string(),
    ]);
    types.print();

    let mut risk = Table::new("Permission Risk Flags")
        .column("Flag")
        .column_right("Count");
    risk.row(vec![
        "No View".to_string(),
        report.risk_flags.text_no_view_count.to_string(),
    ]);
    risk.row(vec![
        "View But No History".to_string(),
        report.risk_flags.view_but_no_history_count.to_string(),
    ]);
    risk.row(vec![
        "View But No Send".to_string(),
        report.risk_flags.view_but_no_send_count.to_string(),
    ]);
    risk.row(vec![
        "View But No Invite".to_string(),
        report.risk_flags.view_but_no_invite_count.to_string(),
    ]);
    risk.print();

    let mut detail = Table::new(format!("Text Channel Detail (first {})", DETAIL_ROWS))
        .column("Channel")
        .column("Category")
        .column("View")
        .column("Hist")
        .column("Send")
        .column("Invite")
        .column("NSFW");
    for row in report.channels.iter().take(DETAIL_ROWS) {
        detail.row(vec![
            format!("#{}", row.name),
            row.category.clone().unwrap_or_else(|| "-".to_string()),
            yes_no(row.view),
            yes_no(row.history),
            yes_no(row.send),
            yes_no(row.invite),
            yes_no(row.nsfw),
        ]);
    }
    detail.print();

    if report.channels.len() > DETAIL_ROWS {
        render::dim(&format!(
            "Showing {}/{} text channels. Use export for full data.",
            DETAIL_ROWS,
            report.channels.len()
        ));
    }

    if !report.risk_flags.view_but_no_history.is_empty() {
        let shown = &report.risk_flags.view_but_no_history;
        let mut names = shown
            .iter()
            .take(RISK_NAMES_SHOWN)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if shown.len() > RISK_NAMES_SHOWN {
            names.push_str(&format!(" (+{} more)", shown.len() - RISK_NAMES_SHOWN));
        }
        render::panel("Viewable But No History", &names);
    }

    Ok(())
}

async fn export_guild_triage(
    state: &BotState,
    prompter: &mut Prompter,
    guild_id: Id<GuildMarker>,
) -> Result<(), ConsoleError> {
    let report = build_report(state, guild_id)?;
    let default_path = format!(
        "triage_{}_{}.json",
        report.guild.id,
        Utc::now().format("%Y%m%d_%H%M%S")
    );

    let path = match prompter.line(&format!("Export path [{}]: ", default_path))? {
        None => return Ok(()),
        Some(raw) if raw.is_empty() => default_path,
        Some(raw) => raw,
    };

    let bytes = serde_json::to_vec_pretty(&report)?;
    tokio::fs::write(&path, bytes).await?;
    render::ok(&format!("Saved triage report to {}", path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_cancels() {
        assert_eq!(parse_selection("", 5), Selection::Cancel);
        assert_eq!(parse_selection("   ", 5), Selection::Cancel);
    }

    #[test]
    fn non_numeric_is_invalid() {
        assert_eq!(parse_selection("abc", 5), Selection::Invalid);
        assert_eq!(parse_selection("1.5", 5), Selection::Invalid);
        assert_eq!(parse_selection("-1", 5), Selection::Invalid);
    }

    #[test]
    fn range_is_checked_one_based() {
        assert_eq!(parse_selection("0", 5), Selection::OutOfRange);
        assert_eq!(parse_selection("6", 5), Selection::OutOfRange);
        assert_eq!(parse_selection("1", 5), Selection::Index(0));
        assert_eq!(parse_selection("5", 5), Selection::Index(4));
    }

    #[test]
    fn selection_from_empty_list_is_never_index() {
        assert_eq!(parse_selection("1", 0), Selection::OutOfRange);
        assert_eq!(parse_selection("", 0), Selection::Cancel);
    }
}
