use std::collections::HashMap;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::command::BotCommands;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::services::cloudflare::{CloudflareApi, WorkerSummary};
use crate::services::git::GitService;
use crate::services::session::{FlowAction, SessionStore, Step, UserRecord};

/// Commands the bot registers with Telegram.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "open the main menu")]
    Start,
    #[command(description = "show what this bot can do")]
    Help,
}

/// Shared application state handed to every handler through dptree.
pub struct AppState {
    pub sessions: SessionStore,
    pub cloudflare: CloudflareApi,
    pub git: GitService,
    user_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(sessions: SessionStore, cloudflare: CloudflareApi, git: GitService) -> Self {
        Self {
            sessions,
            cloudflare,
            git,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the serialization lock for one user. Handlers hold it for the
    /// whole update so a user's messages are processed strictly in order,
    /// while different users proceed in parallel.
    pub async fn user_lock(&self, user_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }
}

/// Where a text message should be handled, decided purely from the user's
/// persisted record.
#[derive(Debug, PartialEq, Eq)]
pub enum TextRoute {
    AuthStep(Step),
    DeployGit(Step),
    UploadJs(Step),
    /// Text arrived while a .js document was expected: switch the step to
    /// awaiting_js_code and treat the text as the script.
    UploadJsTextAtFileStep,
    AnalyzeRepo(Step),
    Default { logged_in: bool },
}

/// Routing for plain text. Auth steps outrank flow steps, flows outrank the
/// default reply.
pub fn route_text(user: Option<&UserRecord>) -> TextRoute {
    let Some(user) = user else {
        return TextRoute::Default { logged_in: false };
    };

    if let Some(step) = user.current_step {
        if step.is_auth() {
            return TextRoute::AuthStep(step);
        }
        if let Some(data) = &user.step_data {
            match data.action {
                FlowAction::DeployGit => return TextRoute::DeployGit(step),
                FlowAction::UploadJs => {
                    if step == Step::AwaitingJsFile {
                        return TextRoute::UploadJsTextAtFileStep;
                    }
                    return TextRoute::UploadJs(step);
                }
                FlowAction::AnalyzeRepo => return TextRoute::AnalyzeRepo(step),
            }
        }
    }

    TextRoute::Default {
        logged_in: user.is_logged_in(),
    }
}

/// Where a document upload should be handled.
#[derive(Debug, PartialEq, Eq)]
pub enum DocumentRoute {
    /// The upload flow is waiting for a .js file from this user.
    UploadJsFile,
    Ignore { logged_in: bool },
}

pub fn route_document(user: Option<&UserRecord>) -> DocumentRoute {
    if let Some(user) = user {
        let in_upload = user
            .step_data
            .as_ref()
            .map(|d| d.action == FlowAction::UploadJs)
            .unwrap_or(false);
        if user.current_step == Some(Step::AwaitingJsFile) && in_upload {
            return DocumentRoute::UploadJsFile;
        }
    }
    DocumentRoute::Ignore {
        logged_in: user.map(|u| u.is_logged_in()).unwrap_or(false),
    }
}

/// Callback data values used by the inline keyboards.
pub mod callback {
    pub const LOGIN: &str = "login";
    pub const LOGOUT: &str = "logout";
    pub const DEPLOY_GITHUB: &str = "deploy_github";
    pub const UPLOAD_JS: &str = "upload_js";
    pub const ANALYSIS_REPO: &str = "analysis_repo";
    pub const LIST_WORKERS: &str = "list_workers";
    pub const DELETE_WORKER_MENU: &str = "delete_worker_menu";
    pub const DELETE_WORKER_PREFIX: &str = "delete_worker:";
    pub const CONFIRM_DELETE_PREFIX: &str = "confirm_delete:";
    pub const BACK_TO_MENU: &str = "back_to_menu";
    pub const DEPLOY_ANALYZED: &str = "deploy_analyzed";
    pub const SHOW_CONFIG: &str = "show_config";
    pub const BACK_TO_ANALYSIS: &str = "back_to_analysis";
}

pub fn login_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🔑 Login to Cloudflare",
        callback::LOGIN,
    )]])
}

pub fn main_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("🚀 Deploy from GitHub", callback::DEPLOY_GITHUB),
            InlineKeyboardButton::callback("📄 Upload JS", callback::UPLOAD_JS),
        ],
        vec![
            InlineKeyboardButton::callback("🔍 Analyze Repo", callback::ANALYSIS_REPO),
            InlineKeyboardButton::callback("📋 My Workers", callback::LIST_WORKERS),
        ],
        vec![InlineKeyboardButton::callback(
            "🗑 Delete Worker",
            callback::DELETE_WORKER_MENU,
        )],
        vec![InlineKeyboardButton::callback("🚪 Logout", callback::LOGOUT)],
    ])
}

pub fn back_to_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "« Back to menu",
        callback::BACK_TO_MENU,
    )]])
}

pub fn confirm_delete_keyboard(worker_name: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            "✅ Yes, delete",
            format!("{}{}", callback::CONFIRM_DELETE_PREFIX, worker_name),
        ),
        InlineKeyboardButton::callback("❌ Cancel", callback::BACK_TO_MENU),
    ]])
}

/// One button per deployed worker, plus a back row.
pub fn worker_delete_list_keyboard(workers: &[WorkerSummary]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = workers
        .iter()
        .map(|w| {
            vec![InlineKeyboardButton::callback(
                format!("🗑 {}", w.id),
                format!("{}{}", callback::DELETE_WORKER_PREFIX, w.id),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "« Back to menu",
        callback::BACK_TO_MENU,
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn analysis_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "🚀 Deploy this worker",
            callback::DEPLOY_ANALYZED,
        )],
        vec![InlineKeyboardButton::callback(
            "📄 Show wrangler.toml",
            callback::SHOW_CONFIG,
        )],
        vec![InlineKeyboardButton::callback(
            "« Back to menu",
            callback::BACK_TO_MENU,
        )],
    ])
}

/// Shown under the generated wrangler.toml.
pub fn config_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "« Back to analysis",
            callback::BACK_TO_ANALYSIS,
        )],
        vec![InlineKeyboardButton::callback(
            "« Back to menu",
            callback::BACK_TO_MENU,
        )],
    ])
}

/// Downloads a Telegram-hosted file (already resolved via get_file) as text.
pub async fn download_text_document(bot: &Bot, file_path: &str) -> Result<String> {
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file_path
    );
    let resp = reqwest::get(&url).await?;
    if !resp.status().is_success() {
        return Err(Error::Remote(format!(
            "Failed to download file: HTTP {}",
            resp.status()
        )));
    }
    Ok(resp.text().await?)
}

/// Builds the update dispatcher and runs it until shutdown.
pub async fn run(bot: Bot, state: Arc<AppState>) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(crate::handlers::handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(crate::handlers::handle_callback))
        .branch(Update::filter_message().endpoint(crate::handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session::StepData;

    fn user_with(step: Option<Step>, data: Option<StepData>, logged_in: bool) -> UserRecord {
        let mut user = UserRecord::default();
        if logged_in {
            user.api_token = Some("token-0123456789".into());
            user.account_id = Some("acct-0123456789".into());
            user.zone_id = Some("zone-0123456789".into());
        }
        user.current_step = step;
        user.step_data = data;
        user
    }

    #[test]
    fn test_unknown_user_routes_to_logged_out_default() {
        assert_eq!(route_text(None), TextRoute::Default { logged_in: false });
        assert_eq!(
            route_document(None),
            DocumentRoute::Ignore { logged_in: false }
        );
    }

    #[test]
    fn test_auth_steps_outrank_everything() {
        // A stale step_data must not shadow an auth step
        let user = user_with(
            Some(Step::AwaitingApiToken),
            Some(StepData::new(FlowAction::DeployGit)),
            false,
        );
        assert_eq!(route_text(Some(&user)), TextRoute::AuthStep(Step::AwaitingApiToken));
    }

    #[test]
    fn test_flow_steps_route_by_action() {
        let user = user_with(
            Some(Step::AwaitingWorkerName),
            Some(StepData::new(FlowAction::DeployGit)),
            true,
        );
        assert_eq!(
            route_text(Some(&user)),
            TextRoute::DeployGit(Step::AwaitingWorkerName)
        );

        let user = user_with(
            Some(Step::AwaitingWorkerName),
            Some(StepData::new(FlowAction::UploadJs)),
            true,
        );
        assert_eq!(
            route_text(Some(&user)),
            TextRoute::UploadJs(Step::AwaitingWorkerName)
        );

        let user = user_with(
            Some(Step::AwaitingRepoAnalysis),
            Some(StepData::new(FlowAction::AnalyzeRepo)),
            true,
        );
        assert_eq!(
            route_text(Some(&user)),
            TextRoute::AnalyzeRepo(Step::AwaitingRepoAnalysis)
        );
    }

    #[test]
    fn test_text_at_file_step_resteps_to_code() {
        let user = user_with(
            Some(Step::AwaitingJsFile),
            Some(StepData::with_worker_name(FlowAction::UploadJs, "demo")),
            true,
        );
        assert_eq!(route_text(Some(&user)), TextRoute::UploadJsTextAtFileStep);
    }

    #[test]
    fn test_document_only_accepted_at_file_step() {
        let waiting = user_with(
            Some(Step::AwaitingJsFile),
            Some(StepData::with_worker_name(FlowAction::UploadJs, "demo")),
            true,
        );
        assert_eq!(route_document(Some(&waiting)), DocumentRoute::UploadJsFile);

        // Same step without the upload action does not accept documents
        let wrong_action = user_with(
            Some(Step::AwaitingJsFile),
            Some(StepData::new(FlowAction::DeployGit)),
            true,
        );
        assert_eq!(
            route_document(Some(&wrong_action)),
            DocumentRoute::Ignore { logged_in: true }
        );

        let idle = user_with(None, None, true);
        assert_eq!(
            route_document(Some(&idle)),
            DocumentRoute::Ignore { logged_in: true }
        );
    }

    #[test]
    fn test_step_without_data_falls_through_to_default() {
        let user = user_with(Some(Step::AwaitingWorkerName), None, true);
        assert_eq!(route_text(Some(&user)), TextRoute::Default { logged_in: true });
    }

    #[test]
    fn test_delete_callback_data_roundtrip() {
        let data = format!("{}{}", callback::CONFIRM_DELETE_PREFIX, "my-worker");
        let name = data.strip_prefix(callback::CONFIRM_DELETE_PREFIX).unwrap();
        assert_eq!(name, "my-worker");
    }
}
