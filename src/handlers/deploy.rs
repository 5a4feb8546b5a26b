use teloxide::prelude::*;
use teloxide::types::ParseMode;

use super::Progress;
use crate::error::{Error, Result};
use crate::services::normalizer;
use crate::services::session::{FlowAction, Step, StepData};
use crate::services::telegram::{main_menu_keyboard, AppState};
use crate::utils::validate;

/// Starts the git-deploy conversation: worker name first, repository second.
pub async fn start_flow(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    if super::require_credentials(bot, chat_id, user_id, state).await?.is_none() {
        return Ok(());
    }

    state
        .sessions
        .update_step(
            user_id,
            Step::AwaitingWorkerName,
            Some(StepData::new(FlowAction::DeployGit)),
        )
        .await?;

    bot.send_message(
        chat_id,
        "🚀 <b>Deploy from GitHub</b>\n\n\
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
        Step::AwaitingRepoUrl => handle_repo_url(bot, chat_id, user_id, state, text).await,
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
            Step::AwaitingRepoUrl,
            Some(StepData::with_worker_name(FlowAction::DeployGit, name)),
        )
        .await?;

    bot.send_message(
        chat_id,
        format!(
            "✅ Worker name: <b>{}</b>\n\n\
             Now send the <b>GitHub repository URL</b>, for example:\n\
             https://github.com/user/my-worker",
            name
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

async fn handle_repo_url(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    url: &str,
) -> Result<()> {
    if !validate::is_valid_github_url(url) {
        return Err(Error::Validation(
            "That is not a GitHub repository URL. It must look like https://github.com/user/repo".to_string(),
        ));
    }

    let worker_name = state
        .sessions
        .get(user_id)
        .await
        .and_then(|u| u.step_data)
        .and_then(|d| d.worker_name)
        .unwrap_or_else(|| normalizer::worker_name_from_repo(url));

    deploy_repository(bot, chat_id, user_id, state, url, &worker_name).await
}

/// Clone, normalize, deploy. One progress message is edited through the
/// stages; any failure after the clone starts is reported on that message
/// and aborts the flow. The working tree is removed on every path.
pub async fn deploy_repository(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    state: &AppState,
    repo_url: &str,
    worker_name: &str,
) -> Result<()> {
    let Some(creds) = super::require_credentials(bot, chat_id, user_id, state).await? else {
        return Ok(());
    };

    let progress = Progress::begin(bot, chat_id, "⏳ Cloning repository...").await?;

    let outcome = run_pipeline(state, &progress, bot, user_id, repo_url, worker_name, &creds).await;
    match outcome {
        Ok(url) => {
            state.sessions.clear_step(user_id).await?;
            super::log_event("✓", user_id, &format!("deployed {} from {}", worker_name, repo_url));
            progress
                .finish(
                    bot,
                    &format!(
                        "✅ <b>Deployed!</b>\n\n\
                         🌍 Your worker is live at:\n{}\n\n\
                         The first request can take a few seconds while the worker warms up.",
                        url
                    ),
                    main_menu_keyboard(),
                )
                .await
        }
        Err(err) => {
            state.sessions.clear_step(user_id).await?;
            super::log_event("✗", user_id, &format!("deploy failed: {err}"));
            progress.fail(bot, &super::user_error_text(&err)).await
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    progress: &Progress,
    bot: &Bot,
    user_id: u64,
    repo_url: &str,
    worker_name: &str,
    creds: &crate::services::session::Credentials,
) -> Result<String> {
    let tree = state.git.clone_repository(repo_url, user_id).await?;

    progress.stage(bot, "🔧 Processing worker script...").await?;
    let entry = normalizer::find_entry(tree.path())?;
    let script = normalizer::normalize_script(&entry.content);
    normalizer::ensure_manifest(tree.path(), worker_name, &entry.relative_path)?;

    progress.stage(bot, "☁️ Deploying to Cloudflare...").await?;
    let deployed = state
        .cloudflare
        .deploy_worker(&creds.api_token, &creds.account_id, worker_name, script)
        .await?;

    tree.remove();
    Ok(deployed.url)
}
