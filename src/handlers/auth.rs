use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};

use crate::error::{Error, Result};
use crate::services::session::Step;
use crate::services::telegram::{login_keyboard, AppState};
use crate::utils::format::html_escape;

/// Minimum plausible length for tokens and Cloudflare resource ids. A shape
/// check only; the API token is verified for real against the /user endpoint.
const MIN_CREDENTIAL_LEN: usize = 10;

/// Entry point of the three-step login conversation.
pub async fn start_login(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    state
        .sessions
        .update_step(user_id, Step::AwaitingApiToken, None)
        .await?;

    bot.send_message(
        chat_id,
        "🔑 <b>Step 1 of 3</b>\n\n\
         Send me your Cloudflare <b>API token</b>.\n\n\
         Create one at https://dash.cloudflare.com/profile/api-tokens \
         with the \"Edit Cloudflare Workers\" template.",
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

/// One auth step per text message: token, account id, zone id.
pub async fn handle_step(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    step: Step,
    text: &str,
) -> Result<()> {
    match step {
        Step::AwaitingApiToken => handle_api_token(bot, chat_id, user_id, state, text).await,
        Step::AwaitingAccountId => handle_account_id(bot, chat_id, user_id, state, text).await,
        Step::AwaitingZoneId => handle_zone_id(bot, chat_id, user_id, state, text).await,
        _ => Ok(()),
    }
}

async fn handle_api_token(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    token: &str,
) -> Result<()> {
    if token.len() < MIN_CREDENTIAL_LEN {
        return Err(Error::Validation(
            "That doesn't look like a Cloudflare API token. It should be a long string from the dashboard.".to_string(),
        ));
    }

    let checking = bot
        .send_message(chat_id, "🔍 Checking the token with Cloudflare...")
        .await?;

    let info = state.cloudflare.validate_token(token).await.map_err(|e| {
        // An API rejection here means the input was wrong, so the user
        // stays on this step and can paste a corrected token
        Error::Validation(format!("Cloudflare rejected the token: {}", e))
    })?;

    let token = token.to_string();
    let email = info.email.clone();
    state
        .sessions
        .update(user_id, move |u| {
            u.api_token = Some(token);
            u.email = Some(email);
            u.current_step = Some(Step::AwaitingAccountId);
            u.step_data = None;
        })
        .await?;

    super::log_event("✓", user_id, &format!("token validated for {}", info.email));
    bot.edit_message_text(
        chat_id,
        checking.id,
        format!(
            "✅ Token valid for <b>{}</b>.\n\n\
             <b>Step 2 of 3</b>\n\n\
             Now send your <b>Account ID</b>. You can find it on the right \
             side of the Workers overview page in the dashboard.",
            html_escape(&info.email)
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn handle_account_id(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    account_id: &str,
) -> Result<()> {
    if account_id.len() < MIN_CREDENTIAL_LEN {
        return Err(Error::Validation(
            "That doesn't look like an Account ID. It is a 32-character hex string from the dashboard.".to_string(),
        ));
    }

    let account_id = account_id.to_string();
    state
        .sessions
        .update(user_id, move |u| {
            u.account_id = Some(account_id);
            u.current_step = Some(Step::AwaitingZoneId);
        })
        .await?;

    bot.send_message(
        chat_id,
        "✅ Account ID saved.\n\n\
         <b>Step 3 of 3</b>\n\n\
         Finally, send your <b>Zone ID</b> (from the overview page of any \
         domain in your account). It is used for custom route bindings.",
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn handle_zone_id(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    zone_id: &str,
) -> Result<()> {
    if zone_id.len() < MIN_CREDENTIAL_LEN {
        return Err(Error::Validation(
            "That doesn't look like a Zone ID. It is a 32-character hex string from the dashboard.".to_string(),
        ));
    }

    let zone_id = zone_id.to_string();
    state
        .sessions
        .update(user_id, move |u| {
            u.zone_id = Some(zone_id);
            u.current_step = None;
            u.step_data = None;
        })
        .await?;

    super::log_event("✓", user_id, "login complete");
    if let Some(creds) = state.sessions.credentials(user_id).await {
        bot.send_message(
            chat_id,
            format!(
                "🎉 <b>Login complete!</b>\n\n\
                 📧 Email: {}\n\
                 🆔 Account: <code>{}</code>\n\
                 🌐 Zone: <code>{}</code>",
                html_escape(&creds.email),
                html_escape(&creds.account_id),
                html_escape(&creds.zone_id)
            ),
        )
        .parse_mode(ParseMode::Html)
        .await?;
    }
    super::start::show_main_menu(bot, chat_id, None, user_id, state).await
}

/// Wipes credentials and conversation state.
pub async fn logout(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
) -> Result<()> {
    state
        .sessions
        .update(user_id, |u| {
            u.api_token = None;
            u.account_id = None;
            u.zone_id = None;
            u.email = None;
            u.current_step = None;
            u.step_data = None;
            u.temp_data.clear();
        })
        .await?;

    super::log_event("✓", user_id, "logged out");
    super::edit_or_send(
        bot,
        chat_id,
        message_id,
        "👋 Logged out. Your credentials have been removed from this bot.",
        login_keyboard(),
    )
    .await
}
