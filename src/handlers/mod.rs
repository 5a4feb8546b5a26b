pub mod analyze;
pub mod auth;
pub mod deploy;
pub mod start;
pub mod upload;
pub mod workers;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};

use crate::error::Result;
use crate::services::session::Step;
use crate::services::telegram::{callback, AppState, Command, DocumentRoute, TextRoute};

/// Console log line in the `[HH:MM:SS] marker [user] event` shape.
pub(crate) fn log_event(marker: &str, user: u64, event: &str) {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    println!("  [{timestamp}] {marker} [{user}] {event}");
}

/// A "working" message sent immediately and edited as the operation moves
/// through its stages, so the user watches one message instead of a stream.
pub(crate) struct Progress {
    chat_id: ChatId,
    message_id: MessageId,
}

impl Progress {
    pub async fn begin(bot: &Bot, chat_id: ChatId, text: &str) -> Result<Self> {
        let msg = bot.send_message(chat_id, text).await?;
        Ok(Self {
            chat_id,
            message_id: msg.id,
        })
    }

    pub async fn stage(&self, bot: &Bot, text: &str) -> Result<()> {
        bot.edit_message_text(self.chat_id, self.message_id, text)
            .await?;
        Ok(())
    }

    pub async fn finish(
        &self,
        bot: &Bot,
        text: &str,
        keyboard: teloxide::types::InlineKeyboardMarkup,
    ) -> Result<()> {
        bot.edit_message_text(self.chat_id, self.message_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await?;
        Ok(())
    }

    /// Reuses the progress message for an error instead of sending a new one.
    pub async fn fail(&self, bot: &Bot, text: &str) -> Result<()> {
        bot.edit_message_text(self.chat_id, self.message_id, text)
            .await?;
        Ok(())
    }
}

/// /start and /help.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0;
    let lock = state.user_lock(user_id).await;
    let _guard = lock.lock().await;

    let result = match cmd {
        Command::Start => {
            log_event("◀", user_id, "/start");
            start::show_welcome(&bot, msg.chat.id, user_id, &state).await
        }
        Command::Help => {
            log_event("◀", user_id, "/help");
            start::show_help(&bot, msg.chat.id).await
        }
    };

    report_error(&bot, msg.chat.id, user_id, &state, result).await;
    Ok(())
}

/// Non-command messages: text and documents, routed by conversation state.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.0;
    let lock = state.user_lock(user_id).await;
    let _guard = lock.lock().await;

    let result = dispatch_message(&bot, &msg, user_id, &state).await;
    report_error(&bot, msg.chat.id, user_id, &state, result).await;
    Ok(())
}

async fn dispatch_message(bot: &Bot, msg: &Message, user_id: u64, state: &AppState) -> Result<()> {
    let chat_id = msg.chat.id;
    let record = state.sessions.get(user_id).await;

    if let Some(doc) = msg.document() {
        match crate::services::telegram::route_document(record.as_ref()) {
            DocumentRoute::UploadJsFile => {
                log_event("◀", user_id, "document at awaiting_js_file");
                return upload::handle_js_document(bot, chat_id, user_id, state, doc).await;
            }
            DocumentRoute::Ignore { logged_in } => {
                log_event("○", user_id, "document outside upload flow");
                return start::show_default_reply(bot, chat_id, logged_in).await;
            }
        }
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    let text = text.trim();

    match crate::services::telegram::route_text(record.as_ref()) {
        TextRoute::AuthStep(step) => {
            log_event("◀", user_id, &format!("auth input at {:?}", step));
            auth::handle_step(bot, chat_id, user_id, state, step, text).await
        }
        TextRoute::DeployGit(step) => {
            log_event("◀", user_id, &format!("deploy input at {:?}", step));
            deploy::handle_step(bot, chat_id, user_id, state, step, text).await
        }
        TextRoute::UploadJs(step) => {
            log_event("◀", user_id, &format!("upload input at {:?}", step));
            upload::handle_step(bot, chat_id, user_id, state, step, text).await
        }
        TextRoute::UploadJsTextAtFileStep => {
            log_event("◀", user_id, "text at awaiting_js_file, treating as code");
            // Re-step first so a failure mid-handling leaves consistent state
            let data = record.as_ref().and_then(|r| r.step_data.clone());
            state
                .sessions
                .update_step(user_id, Step::AwaitingJsCode, data)
                .await?;
            upload::handle_step(bot, chat_id, user_id, state, Step::AwaitingJsCode, text).await
        }
        TextRoute::AnalyzeRepo(step) => {
            log_event("◀", user_id, &format!("analysis input at {:?}", step));
            analyze::handle_step(bot, chat_id, user_id, state, step, text).await
        }
        TextRoute::Default { logged_in } => {
            log_event("○", user_id, "free text outside any flow");
            start::show_default_reply(bot, chat_id, logged_in).await
        }
    }
}

/// Inline keyboard presses. Callbacks are stateless: they dispatch on their
/// data alone, regardless of any step the user is in.
pub async fn handle_callback(bot: Bot, query: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = query.from.id.0;
    let lock = state.user_lock(user_id).await;
    let _guard = lock.lock().await;

    bot.answer_callback_query(&query.id).await?;

    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    let Some(chat_id) = query.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    let message_id = query.message.as_ref().map(|m| m.id());

    log_event("◀", user_id, &format!("callback: {data}"));
    let result = dispatch_callback(&bot, chat_id, message_id, user_id, &state, &data).await;
    report_error(&bot, chat_id, user_id, &state, result).await;
    Ok(())
}

async fn dispatch_callback(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
    data: &str,
) -> Result<()> {
    match data {
        callback::LOGIN => auth::start_login(bot, chat_id, user_id, state).await,
        callback::LOGOUT => auth::logout(bot, chat_id, message_id, user_id, state).await,
        callback::BACK_TO_MENU => start::show_main_menu(bot, chat_id, message_id, user_id, state).await,
        callback::DEPLOY_GITHUB => deploy::start_flow(bot, chat_id, user_id, state).await,
        callback::UPLOAD_JS => upload::start_flow(bot, chat_id, user_id, state).await,
        callback::ANALYSIS_REPO => analyze::start_flow(bot, chat_id, user_id, state).await,
        callback::LIST_WORKERS => workers::list(bot, chat_id, message_id, user_id, state).await,
        callback::DELETE_WORKER_MENU => workers::delete_menu(bot, chat_id, message_id, user_id, state).await,
        callback::DEPLOY_ANALYZED => analyze::deploy_cached(bot, chat_id, user_id, state).await,
        callback::SHOW_CONFIG => analyze::show_cached_config(bot, chat_id, user_id, state).await,
        callback::BACK_TO_ANALYSIS => analyze::show_cached_report(bot, chat_id, user_id, state).await,
        _ => {
            if let Some(name) = data.strip_prefix(callback::DELETE_WORKER_PREFIX) {
                return workers::confirm_delete(bot, chat_id, message_id, name).await;
            }
            if let Some(name) = data.strip_prefix(callback::CONFIRM_DELETE_PREFIX) {
                return workers::delete(bot, chat_id, message_id, user_id, state, name).await;
            }
            log_event("⚠", user_id, &format!("unknown callback data: {data}"));
            bot.send_message(chat_id, "🤔 Unknown action. Use /start to open the menu.")
                .await?;
            Ok(())
        }
    }
}

/// Text shown to the user when a flow aborts. Infrastructure errors are not
/// echoed; the user gets a generic apology while the log keeps the detail.
pub(crate) fn user_error_text(err: &crate::error::Error) -> String {
    if err.user_facing() {
        format!("❌ {}\n\nUse /start to return to the menu.", err)
    } else {
        "❌ Something went wrong on our side. Use /start to return to the menu.".to_string()
    }
}

/// Error boundary shared by all update kinds. Validation errors keep the
/// current step so the user can retry the same input; any other error aborts
/// the active flow before the reason is shown.
async fn report_error(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState, result: Result<()>) {
    let Err(err) = result else {
        return;
    };

    if err.keeps_step() {
        log_event("⚠", user_id, &format!("rejected input: {err}"));
        let _ = bot
            .send_message(chat_id, format!("⚠️ {}\n\nPlease try again.", err))
            .await;
        return;
    }

    log_event("✗", user_id, &format!("flow aborted: {err}"));
    if let Err(e) = state.sessions.clear_step(user_id).await {
        log_event("✗", user_id, &format!("failed to clear step: {e}"));
    }
    let _ = bot.send_message(chat_id, user_error_text(&err)).await;
}

/// Requires completed credentials, prompting for login otherwise.
pub(crate) async fn require_credentials(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
) -> Result<Option<crate::services::session::Credentials>> {
    match state.sessions.credentials(user_id).await {
        Some(creds) => Ok(Some(creds)),
        None => {
            bot.send_message(chat_id, "🔒 You need to log in to Cloudflare first.")
                .reply_markup(crate::services::telegram::login_keyboard())
                .await?;
            Ok(None)
        }
    }
}

/// Edits the callback's source message when possible, otherwise sends fresh.
pub(crate) async fn edit_or_send(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    text: &str,
    keyboard: teloxide::types::InlineKeyboardMarkup,
) -> Result<()> {
    match message_id {
        Some(id) => {
            bot.edit_message_text(chat_id, id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(chat_id, text)
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboard)
                .await?;
        }
    }
    Ok(())
}
