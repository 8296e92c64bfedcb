use std::error::Error;
use std::sync::Arc;

use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{Intents, Shard, ShardId};
use twilight_http::Client as HttpClient;

use crate::discord::{run_bot, BotState};
use crate::render::Table;

mod console;
mod constants;
mod discord;
mod errors;
mod perms;
mod render;
mod token;
mod triage;

extern crate chrono;

#[macro_use]
extern crate derive_builder;

#[macro_use]
extern crate log;
extern crate env_logger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();
    dotenv::dotenv().ok();

    let bot_token = match token::acquire_token() {
        Some(token) => token,
        None => {
            render::fail("No token provided.");
            return Ok(());
        }
    };

    render_token_triage(&bot_token);
    if !console::confirm("Connect with this token?", true) {
        return Ok(());
    }

    let http = HttpClient::new(bot_token.clone());

    // REST login check before any gateway machinery; a bad token is fatal.
    let current_user = match http.current_user().await {
        Ok(response) => response.model().await?,
        Err(e) => {
            debug!("login check failed: {}", e);
            render::fail("Login failed. Token is invalid or not a bot token.");
            return Ok(());
        }
    };
    info!(
        "authenticated as {} ({})",
        discord::user_tag(&current_user.name, current_user.discriminator),
        current_user.id
    );

    let intents = Intents::GUILDS
        | Intents::GUILD_MEMBERS
        | Intents::GUILD_MESSAGES
        | Intents::MESSAGE_CONTENT;
    let shard = Shard::new(ShardId::ONE, bot_token, intents);

    let cache = InMemoryCache::builder()
        .resource_types(
            ResourceType::GUILD
                | ResourceType::CHANNEL
                | ResourceType::MEMBER
                | ResourceType::ROLE
                | ResourceType::USER
                | ResourceType::USER_CURRENT
                | ResourceType::EMOJI
                | ResourceType::STICKER,
        )
        .build();

    let state = Arc::new(BotState::new(http, cache));
    let gateway = tokio::spawn(run_bot(state.clone(), shard));

    tokio::select! {
        _ = state.shutdown.notified() => {
            info!("operator exited the console");
        }
        result = gateway => {
            if let Ok(Err(e)) = result {
                error!("gateway task ended: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            render::notice("Interrupted by user.");
        }
    }
    Ok(())
}

/// Informational decode of the supplied token; never gates the connection.
fn render_token_triage(bot_token: &str) {
    let meta = token::decode_token_meta(bot_token);
    let mut table = Table::new("Token Triage").column("Field").column("Value");
    table.row(vec!["Length".to_string(), meta.raw_length.to_string()]);
    table.row(vec!["Sections".to_string(), meta.sections.to_string()]);
    table.row(vec![
        "Looks Bot Token".to_string(),
        meta.looks_like_bot_token.to_string(),
    ]);
    table.row(vec![
        "Decoded User ID".to_string(),
        meta.user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string()),
    ]);
    table.row(vec![
        "Decoded Created".to_string(),
        render::fmt_ms(meta.created_ms),
    ]);
    if let Some(note) = &meta.note {
        table.row(vec!["Decode Note".to_string(), note.clone()]);
    }
    table.print();
}
