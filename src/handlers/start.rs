use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};

use crate::error::Result;
use crate::services::telegram::{login_keyboard, main_menu_keyboard, AppState};
use crate::utils::format::html_escape;

const WELCOME_TEXT: &str = "👋 <b>Welcome to the Cloudflare Worker deploy bot!</b>\n\n\
I can deploy JavaScript workers straight from this chat:\n\
• 🚀 deploy a GitHub repository\n\
• 📄 upload a .js file or paste code\n\
• 🔍 analyze a repository before deploying\n\
• 📋 list and delete your workers\n\n\
Log in with your Cloudflare credentials to get started.";

const HELP_TEXT: &str = "ℹ️ <b>How this bot works</b>\n\n\
/start opens the main menu.\n\n\
<b>Deploy from GitHub</b>: I clone the repository, find the worker entry \
script (index.js, worker.js, src/index.js, ...), convert it to the modern \
module format if needed, and upload it to your Cloudflare account.\n\n\
<b>Upload JS</b>: send a .js file (up to 1MB) or paste the code as text.\n\n\
<b>Analyze Repo</b>: a dry run that reports the script format and the \
wrangler.toml I would generate, without deploying anything.\n\n\
Your credentials are stored locally and used only for Cloudflare API calls.";

/// /start: the login prompt or the main menu, depending on login state.
pub async fn show_welcome(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    // A fresh /start always abandons whatever flow was in progress
    state.sessions.clear_step(user_id).await?;

    if state.sessions.is_logged_in(user_id).await {
        return show_main_menu(bot, chat_id, None, user_id, state).await;
    }

    bot.send_message(chat_id, WELCOME_TEXT)
        .parse_mode(ParseMode::Html)
        .reply_markup(login_keyboard())
        .await?;
    Ok(())
}

pub async fn show_help(bot: &Bot, chat_id: ChatId) -> Result<()> {
    bot.send_message(chat_id, HELP_TEXT)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// The main menu, edited in place when reached from a callback.
pub async fn show_main_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
) -> Result<()> {
    let record = state.sessions.get(user_id).await;
    if !record.as_ref().map(|u| u.is_logged_in()).unwrap_or(false) {
        return super::edit_or_send(
            bot,
            chat_id,
            message_id,
            "🔒 You need to log in to Cloudflare first.",
            login_keyboard(),
        )
        .await;
    }

    let email = record.and_then(|u| u.email).unwrap_or_default();

    let text = if email.is_empty() {
        "⚙️ <b>Main menu</b>\n\nWhat would you like to do?".to_string()
    } else {
        format!(
            "⚙️ <b>Main menu</b>\n\nLogged in as <b>{}</b>. What would you like to do?",
            html_escape(&email)
        )
    };

    super::edit_or_send(bot, chat_id, message_id, &text, main_menu_keyboard()).await
}

/// Reply to messages that no step or flow claims.
pub async fn show_default_reply(bot: &Bot, chat_id: ChatId, logged_in: bool) -> Result<()> {
    if logged_in {
        bot.send_message(
            chat_id,
            "🤔 I wasn't expecting that. Pick an action from the menu:",
        )
        .reply_markup(main_menu_keyboard())
        .await?;
    } else {
        bot.send_message(
            chat_id,
            "👋 Log in to Cloudflare to start deploying workers.",
        )
        .reply_markup(login_keyboard())
        .await?;
    }
    Ok(())
}
