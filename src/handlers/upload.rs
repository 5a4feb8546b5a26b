use teloxide::prelude::*;
use teloxide::types::{Document, ParseMode};

use super::Progress;
use crate::error::{Error, Result};
use crate::services::normalizer;
use crate::services::session::{FlowAction, Step, StepData};
use crate::services::telegram::{download_text_document, main_menu_keyboard, AppState};
use crate::utils::validate;

/// Starts the direct-upload conversation.
pub async fn start_flow(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    if super::require_credentials(bot, chat_id, user_id, state).await?.is_none() {
        return Ok(());
    }

    state
        .sessions
        .update_step(
            user_id,
            Step::AwaitingWorkerName,
            Some(StepData::new(FlowAction::UploadJs)),
        )
        .await?;

    bot.send_message(
        chat_id,
        "📄 <b>Upload a worker script</b>\n\n\
         First, send a <b>name</b> for your worker.\n\
         Lowercase letters, digits and hyphens, up to 63 characters.",
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

pub async fn handle_step(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    step: Step,
    text: &str,
) -> Result<()> {
    match step {
        Step::AwaitingWorkerName => handle_worker_name(bot, chat_id, user_id, state, text).await,
        Step::AwaitingJsCode => handle_js_code(bot, chat_id, user_id, state, text).await,
        _ => Ok(()),
    }
}

async fn handle_worker_name(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    name: &str,
) -> Result<()> {
    if !validate::is_valid_worker_name(name) {
        return Err(Error::Validation(
            "Invalid worker name. Use lowercase letters, digits and hyphens (not at the edges), up to 63 characters.".to_string(),
        ));
    }

    state
        .sessions
        .update_step(
            user_id,
            Step::AwaitingJsFile,
            Some(StepData::with_worker_name(FlowAction::UploadJs, name)),
        )
        .await?;

    bot.send_message(
        chat_id,
        format!(
            "✅ Worker name: <b>{}</b>\n\n\
             Now send your script as a <b>.js file</b> (up to 1MB), or paste \
             the code directly as a text message.",
            name
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

/// Pasted code at awaiting_js_code (also reached when text arrives at
/// awaiting_js_file, after the dispatcher re-steps).
async fn handle_js_code(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    code: &str,
) -> Result<()> {
    if !validate::looks_like_worker_script(code) {
        return Err(Error::Validation(
            "That doesn't look like worker code. It should define a fetch handler (or a function) with balanced braces.".to_string(),
        ));
    }

    deploy_script(bot, chat_id, user_id, state, code).await
}

/// A .js document at awaiting_js_file.
pub async fn handle_js_document(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    doc: &Document,
) -> Result<()> {
    let file_name = doc.file_name.clone().unwrap_or_default();
    if let Err(reason) = validate::check_upload_document(&file_name, doc.file.size) {
        return Err(Error::Validation(reason));
    }

    let file = bot.get_file(&doc.file.id).await?;
    let code = download_text_document(bot, &file.path).await?;

    if !validate::looks_like_worker_script(&code) {
        return Err(Error::Validation(
            "The file doesn't look like worker code. It should define a fetch handler (or a function) with balanced braces.".to_string(),
        ));
    }

    deploy_script(bot, chat_id, user_id, state, &code).await
}

/// Normalizes and uploads a script under the worker name captured earlier
/// in the flow.
async fn deploy_script(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    code: &str,
) -> Result<()> {
    let Some(creds) = super::require_credentials(bot, chat_id, user_id, state).await? else {
        return Ok(());
    };

    let worker_name = state
        .sessions
        .get(user_id)
        .await
        .and_then(|u| u.step_data)
        .and_then(|d| d.worker_name)
        .ok_or_else(|| Error::Store("upload flow has no worker name".to_string()))?;

    let progress = Progress::begin(bot, chat_id, "🔧 Processing worker script...").await?;
    let script = normalizer::normalize_script(code);

    progress.stage(bot, "☁️ Deploying to Cloudflare...").await?;
    let outcome = state
        .cloudflare
        .deploy_worker(&creds.api_token, &creds.account_id, &worker_name, script)
        .await;

    match outcome {
        Ok(deployed) => {
            state.sessions.clear_step(user_id).await?;
            super::log_event("✓", user_id, &format!("uploaded worker {}", worker_name));
            progress
                .finish(
                    bot,
                    &format!(
                        "✅ <b>Deployed!</b>\n\n\
                         🌍 Your worker is live at:\n{}\n\n\
                         The first request can take a few seconds while the worker warms up.",
                        deployed.url
                    ),
                    main_menu_keyboard(),
                )
                .await
        }
        Err(err) => {
            state.sessions.clear_step(user_id).await?;
            super::log_event("✗", user_id, &format!("upload deploy failed: {err}"));
            progress.fail(bot, &super::user_error_text(&err)).await
        }
    }
}
