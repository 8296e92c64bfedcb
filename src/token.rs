use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::constants::{DISCORD_EPOCH_MS, TOKEN_ENV};

/// Informational decode of a bot token. Nothing here gates the connection;
/// a token that fails to decode is still handed to the gateway as-is.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct TokenMeta {
    pub raw_length: usize,
    pub sections: usize,
    pub user_id: Option<u64>,
    pub created_ms: Option<i64>,
    pub looks_like_bot_token: bool,
    pub note: Option<String>,
}

/// Milliseconds since the unix epoch at which a snowflake was minted.
pub(crate) fn snowflake_created_ms(id: u64) -> i64 {
    ((id >> 22) as i64) + DISCORD_EPOCH_MS
}

/// Decodes the first dot-separated token section, which carries the bot's
/// user id as url-safe base64 of its decimal form.
pub(crate) fn decode_token_meta(token: &str) -> TokenMeta {
    let parts: Vec<&str> = token.split('.').collect();
    let mut meta = TokenMeta {
        raw_length: token.len(),
        sections: parts.len(),
        ..TokenMeta::default()
    };

    if parts.len() != 3 {
        meta.note = Some("token does not have 3 dot-separated sections".to_string());
        return meta;
    }

    match decode_user_id(parts[0]) {
        Ok(user_id) => {
            meta.user_id = Some(user_id);
            meta.created_ms = Some(snowflake_created_ms(user_id));
            meta.looks_like_bot_token = true;
        }
        Err(note) => meta.note = Some(note),
    }
    meta
}

fn decode_user_id(section: &str) -> Result<u64, String> {
    let raw = URL_SAFE_NO_PAD
        .decode(section.trim_end_matches('='))
        .map_err(|e| format!("unable to decode token metadata: {}", e))?;
    let text =
        String::from_utf8(raw).map_err(|e| format!("unable to decode token metadata: {}", e))?;
    text.parse::<u64>()
        .map_err(|e| format!("unable to decode token metadata: {}", e))
}

/// Token from the environment when present, masked prompt otherwise.
/// Returns None when the operator supplies nothing.
pub(crate) fn acquire_token() -> Option<String> {
    if let Ok(value) = std::env::var(TOKEN_ENV) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            info!("using token from {}", TOKEN_ENV);
            return Some(value);
        }
        warn!("{} is set but empty; prompting instead", TOKEN_ENV);
    }

    let entered = rpassword::prompt_password("Enter bot token: ").ok()?;
    let entered = entered.trim().to_string();
    if entered.is_empty() {
        None
    } else {
        Some(entered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tokens_without_three_sections() {
        let meta = decode_token_meta("abc");
        assert_eq!(meta.sections, 1);
        assert_eq!(meta.user_id, None);
        assert_eq!(meta.created_ms, None);
        assert!(!meta.looks_like_bot_token);
        assert!(meta.note.is_some());

        let meta = decode_token_meta("a.b.c.d");
        assert_eq!(meta.sections, 4);
        assert!(meta.note.is_some());
    }

    #[test]
    fn decodes_user_id_and_creation_time() {
        // "NDE5NDMwNA" is url-safe base64 of "4194304", i.e. 1 << 22.
        let meta = decode_token_meta("NDE5NDMwNA.x.y");
        assert_eq!(meta.user_id, Some(4_194_304));
        assert_eq!(meta.created_ms, Some(DISCORD_EPOCH_MS + 1));
        assert!(meta.looks_like_bot_token);
        assert_eq!(meta.note, None);
    }

    #[test]
    fn tolerates_padded_first_section() {
        let meta = decode_token_meta("NDE5NDMwNA==.x.y");
        assert_eq!(meta.user_id, Some(4_194_304));
        assert!(meta.looks_like_bot_token);
    }

    #[test]
    fn reports_undecodable_sections_without_failing() {
        let meta = decode_token_meta("!!!!.x.y");
        assert_eq!(meta.user_id, None);
        assert!(!meta.looks_like_bot_token);
        assert!(meta.note.is_some());

        // Valid base64 that does not hold a decimal id.
        let meta = decode_token_meta("Ym90dXNlcg.x.y");
        assert_eq!(meta.user_id, None);
        assert!(meta.note.is_some());
    }

    #[test]
    fn snowflake_epoch_offset() {
        assert_eq!(snowflake_created_ms(0), DISCORD_EPOCH_MS);
        assert_eq!(snowflake_created_ms(1 << 22), DISCORD_EPOCH_MS + 1);
    }
}
