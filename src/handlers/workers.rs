use teloxide::prelude::*;
use teloxide::types::MessageId;

use crate::error::Result;
use crate::services::telegram::{
    back_to_menu_keyboard, confirm_delete_keyboard, main_menu_keyboard,
    worker_delete_list_keyboard, AppState,
};
use crate::utils::format::{format_api_date, html_escape};

/// Lists deployed workers with their public URLs and last-modified dates.
pub async fn list(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
) -> Result<()> {
    let Some(creds) = super::require_credentials(bot, chat_id, user_id, state).await? else {
        return Ok(());
    };

    let workers = state
        .cloudflare
        .list_workers(&creds.api_token, &creds.account_id)
        .await?;

    if workers.is_empty() {
        return super::edit_or_send(
            bot,
            chat_id,
            message_id,
            "📋 You have no deployed workers yet.",
            back_to_menu_keyboard(),
        )
        .await;
    }

    let mut lines = vec![format!("📋 <b>Your workers</b> ({})", workers.len()), String::new()];
    for worker in &workers {
        let modified = worker
            .modified_on
            .as_deref()
            .map(format_api_date)
            .unwrap_or_else(|| "Unknown".to_string());
        lines.push(format!(
            "• <b>{}</b>\n  {}\n  Last modified: {}",
            html_escape(&worker.id),
            state.cloudflare.worker_url(&worker.id, &creds.account_id),
            modified
        ));
    }

    super::edit_or_send(bot, chat_id, message_id, &lines.join("\n"), back_to_menu_keyboard()).await
}

/// Shows a button per worker; pressing one asks for confirmation.
pub async fn delete_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
) -> Result<()> {
    let Some(creds) = super::require_credentials(bot, chat_id, user_id, state).await? else {
        return Ok(());
    };

    let workers = state
        .cloudflare
        .list_workers(&creds.api_token, &creds.account_id)
        .await?;

    if workers.is_empty() {
        return super::edit_or_send(
            bot,
            chat_id,
            message_id,
            "📋 You have no workers to delete.",
            back_to_menu_keyboard(),
        )
        .await;
    }

    super::edit_or_send(
        bot,
        chat_id,
        message_id,
        "🗑 <b>Delete a worker</b>\n\nPick the worker to remove:",
        worker_delete_list_keyboard(&workers),
    )
    .await
}

pub async fn confirm_delete(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    worker_name: &str,
) -> Result<()> {
    super::edit_or_send(
        bot,
        chat_id,
        message_id,
        &format!(
            "⚠️ Delete worker <b>{}</b>?\n\nThis removes the deployed script and cannot be undone.",
            html_escape(worker_name)
        ),
        confirm_delete_keyboard(worker_name),
    )
    .await
}

pub async fn delete(
    bot: &Bot,
    chat_id: ChatId,
    message_id: Option<MessageId>,
    user_id: u64,
    state: &AppState,
    worker_name: &str,
) -> Result<()> {
    let Some(creds) = super::require_credentials(bot, chat_id, user_id, state).await? else {
        return Ok(());
    };

    state
        .cloudflare
        .delete_worker(&creds.api_token, &creds.account_id, worker_name)
        .await?;

    super::log_event("✓", user_id, &format!("deleted worker {}", worker_name));
    super::edit_or_send(
        bot,
        chat_id,
        message_id,
        &format!("✅ Worker <b>{}</b> deleted.", html_escape(worker_name)),
        main_menu_keyboard(),
    )
    .await
}
