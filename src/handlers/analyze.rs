use teloxide::prelude::*;
use teloxide::types::ParseMode;

use super::Progress;
use crate::error::{Error, Result};
use crate::services::normalizer::{self, RepoAnalysis};
use crate::services::session::{FlowAction, Step, StepData};
use crate::services::telegram::{analysis_keyboard, back_to_menu_keyboard, config_keyboard, AppState};
use crate::utils::format::html_escape;
use crate::utils::validate;

/// Scratch key the latest analysis is cached under (1-hour expiry).
const LAST_ANALYSIS_KEY: &str = "last_analysis";

pub async fn start_flow(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    if super::require_credentials(bot, chat_id, user_id, state).await?.is_none() {
        return Ok(());
    }

    state
        .sessions
        .update_step(
            user_id,
            Step::AwaitingRepoAnalysis,
            Some(StepData::new(FlowAction::AnalyzeRepo)),
        )
        .await?;

    bot.send_message(
        chat_id,
        "🔍 <b>Analyze a repository</b>\n\n\
         Send the <b>GitHub repository URL</b> and I'll report the worker \
         script format and the wrangler.toml I would generate. Nothing is \
         deployed.",
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
    if step != Step::AwaitingRepoAnalysis {
        return Ok(());
    }

    if !validate::is_valid_analysis_url(text) {
        return Err(Error::Validation(
            "That is not a GitHub repository URL. It must look like https://github.com/user/repo".to_string(),
        ));
    }

    let progress = Progress::begin(bot, chat_id, "⏳ Cloning repository...").await?;

    let outcome = analyze(bot, state, user_id, &progress, text).await;
    match outcome {
        Ok(analysis) => {
            state
                .sessions
                .store_temp(user_id, LAST_ANALYSIS_KEY, serde_json::to_value(&analysis)?)
                .await?;
            state.sessions.clear_step(user_id).await?;
            super::log_event("✓", user_id, &format!("analyzed {}", text));
            progress
                .finish(bot, &render_report(&analysis), analysis_keyboard())
                .await
        }
        Err(err) => {
            state.sessions.clear_step(user_id).await?;
            super::log_event("✗", user_id, &format!("analysis failed: {err}"));
            progress.fail(bot, &super::user_error_text(&err)).await
        }
    }
}

async fn analyze(
    bot: &Bot,
    state: &AppState,
    user_id: u64,
    progress: &Progress,
    repo_url: &str,
) -> Result<RepoAnalysis> {
    let tree = state.git.clone_repository(repo_url, user_id).await?;
    progress.stage(bot, "🔍 Analyzing repository...").await?;
    let analysis = normalizer::analyze_tree(tree.path(), repo_url)?;
    tree.remove();
    Ok(analysis)
}

fn render_report(analysis: &RepoAnalysis) -> String {
    let mut lines = vec![
        format!("🔍 <b>Analysis of {}</b>", html_escape(&analysis.repo_url)),
        String::new(),
        format!("📦 Worker name: <b>{}</b>", analysis.worker_name),
        format!("📄 Entry script: <code>{}</code>", html_escape(&analysis.main_file)),
        format!("🧩 Format: {}", analysis.format),
        format!(
            "🟢 Node compatibility: {}",
            if analysis.needs_node_compat { "required (nodejs_compat_v2)" } else { "not needed" }
        ),
        format!(
            "📋 wrangler.toml: {}",
            if analysis.has_wrangler_toml { "present, will be patched if incomplete" } else { "missing, will be generated" }
        ),
        String::new(),
        "Scripts found:".to_string(),
    ];

    for file in &analysis.worker_files {
        let mut tags = vec![file.signals.format.to_string()];
        if file.signals.needs_node_compat {
            tags.push("node".to_string());
        }
        lines.push(format!("• <code>{}</code> ({})", html_escape(&file.path), tags.join(", ")));
    }

    lines.push(String::new());
    lines.push("This report is kept for one hour.".to_string());
    lines.join("\n")
}

/// Deploys the worker described by the cached analysis, re-cloning the
/// repository.
pub async fn deploy_cached(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    let Some(analysis) = cached_analysis(state, user_id).await? else {
        return expired(bot, chat_id).await;
    };

    super::deploy::deploy_repository(
        bot,
        chat_id,
        user_id,
        state,
        &analysis.repo_url,
        &analysis.worker_name,
    )
    .await
}

/// Shows the wrangler.toml synthesized during the cached analysis.
pub async fn show_cached_config(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    let Some(analysis) = cached_analysis(state, user_id).await? else {
        return expired(bot, chat_id).await;
    };

    bot.send_message(
        chat_id,
        format!(
            "📄 <b>wrangler.toml for {}</b>\n\n<pre>{}</pre>",
            analysis.worker_name,
            html_escape(&analysis.generated_config)
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(config_keyboard())
    .await?;
    Ok(())
}

/// Re-renders the cached analysis report (the "back" action from the
/// config view).
pub async fn show_cached_report(bot: &Bot, chat_id: ChatId, user_id: u64, state: &AppState) -> Result<()> {
    let Some(analysis) = cached_analysis(state, user_id).await? else {
        return expired(bot, chat_id).await;
    };

    bot.send_message(chat_id, render_report(&analysis))
        .parse_mode(ParseMode::Html)
        .reply_markup(analysis_keyboard())
        .await?;
    Ok(())
}

async fn cached_analysis(state: &AppState, user_id: u64) -> Result<Option<RepoAnalysis>> {
    let Some(value) = state.sessions.get_temp(user_id, LAST_ANALYSIS_KEY).await? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(value)?))
}

async fn expired(bot: &Bot, chat_id: ChatId) -> Result<()> {
    bot.send_message(
        chat_id,
        "⚠️ The analysis has expired (reports are kept for one hour). Please run it again.",
    )
    .reply_markup(back_to_menu_keyboard())
    .await?;
    Ok(())
}
