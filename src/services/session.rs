use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// How long a temporary data entry stays readable.
const TEMP_DATA_TTL_SECS: i64 = 3600;

/// Position of a user's multi-turn conversation within a flow.
///
/// A step value alone is ambiguous: `awaiting_worker_name` is shared by the
/// git-deploy and upload flows. Always read it together with
/// [`StepData::action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AwaitingApiToken,
    AwaitingAccountId,
    AwaitingZoneId,
    AwaitingWorkerName,
    AwaitingRepoUrl,
    AwaitingJsCode,
    AwaitingJsFile,
    AwaitingRepoAnalysis,
}

impl Step {
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            Step::AwaitingApiToken | Step::AwaitingAccountId | Step::AwaitingZoneId
        )
    }
}

/// Which multi-step flow the current step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    DeployGit,
    UploadJs,
    AnalyzeRepo,
}

/// Payload scoped to the active step. Assigning a new flow's step data
/// replaces the old one wholesale; only one flow is active per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepData {
    pub action: FlowAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

impl StepData {
    pub fn new(action: FlowAction) -> Self {
        Self { action, worker_name: None }
    }

    pub fn with_worker_name(action: FlowAction, worker_name: &str) -> Self {
        Self {
            action,
            worker_name: Some(worker_name.to_string()),
        }
    }
}

/// Timestamped scratch entry with a 1-hour expiry, evicted lazily on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempEntry {
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Completed Cloudflare credentials for one user.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_token: String,
    pub account_id: String,
    pub zone_id: String,
    pub email: String,
}

/// Persisted per-user record: credentials plus conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_data: Option<StepData>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub temp_data: HashMap<String, TempEntry>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            api_token: None,
            account_id: None,
            zone_id: None,
            email: None,
            current_step: None,
            step_data: None,
            temp_data: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl UserRecord {
    /// Authentication is complete once all three credential fields are set.
    pub fn is_logged_in(&self) -> bool {
        self.api_token.is_some() && self.account_id.is_some() && self.zone_id.is_some()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            api_token: self.api_token.clone()?,
            account_id: self.account_id.clone()?,
            zone_id: self.zone_id.clone()?,
            email: self.email.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: HashMap<String, UserRecord>,
}

/// Keyed per-user session store backed by a single JSON file.
///
/// Every mutation updates `last_updated` and persists via an atomic
/// tmp-then-rename write. Callers see only get/update semantics keyed by
/// user id.
pub struct SessionStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl SessionStore {
    /// Opens (or creates) the store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::Store(format!("invalid session file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub async fn get(&self, user_id: u64) -> Option<UserRecord> {
        let data = self.data.lock().await;
        data.users.get(&user_id.to_string()).cloned()
    }

    pub async fn is_logged_in(&self, user_id: u64) -> bool {
        self.get(user_id).await.map(|u| u.is_logged_in()).unwrap_or(false)
    }

    pub async fn credentials(&self, user_id: u64) -> Option<Credentials> {
        self.get(user_id).await.and_then(|u| u.credentials())
    }

    /// Applies an arbitrary mutation to the user's record (creating a blank
    /// record first if needed), refreshes `last_updated`, and persists.
    pub async fn update<F>(&self, user_id: u64, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut data = self.data.lock().await;
        let record = data.users.entry(user_id.to_string()).or_default();
        mutate(record);
        record.last_updated = Utc::now();
        self.persist(&data)
    }

    /// Sets the current step and its payload in one mutation. Starting a new
    /// flow this way implicitly discards any previous incomplete flow.
    pub async fn update_step(&self, user_id: u64, step: Step, step_data: Option<StepData>) -> Result<()> {
        self.update(user_id, |u| {
            u.current_step = Some(step);
            u.step_data = step_data;
        })
        .await
    }

    /// Clears the in-progress step, returning the user to a known-good state.
    pub async fn clear_step(&self, user_id: u64) -> Result<()> {
        self.update(user_id, |u| {
            u.current_step = None;
            u.step_data = None;
        })
        .await
    }

    /// Stores a named scratch entry, stamped now.
    pub async fn store_temp(&self, user_id: u64, key: &str, value: serde_json::Value) -> Result<()> {
        self.update(user_id, |u| {
            u.temp_data.insert(
                key.to_string(),
                TempEntry {
                    data: value,
                    timestamp: Utc::now(),
                },
            );
        })
        .await
    }

    /// Reads a scratch entry, lazily evicting it if older than one hour.
    pub async fn get_temp(&self, user_id: u64, key: &str) -> Result<Option<serde_json::Value>> {
        self.get_temp_at(user_id, key, Utc::now()).await
    }

    /// Expiry check against an explicit clock; `get_temp` passes `Utc::now()`.
    pub async fn get_temp_at(
        &self,
        user_id: u64,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<serde_json::Value>> {
        let mut data = self.data.lock().await;
        let Some(record) = data.users.get_mut(&user_id.to_string()) else {
            return Ok(None);
        };
        let Some(entry) = record.temp_data.get(key) else {
            return Ok(None);
        };

        if now - entry.timestamp > Duration::seconds(TEMP_DATA_TTL_SECS) {
            record.temp_data.remove(key);
            record.last_updated = Utc::now();
            self.persist(&data)?;
            return Ok(None);
        }

        Ok(Some(record.temp_data[key].data.clone()))
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.json")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_step_roundtrip_and_clear() {
        let (_dir, store) = open_store();

        store
            .update_step(7, Step::AwaitingWorkerName, Some(StepData::new(FlowAction::DeployGit)))
            .await
            .unwrap();

        let user = store.get(7).await.unwrap();
        assert_eq!(user.current_step, Some(Step::AwaitingWorkerName));
        assert_eq!(user.step_data.unwrap().action, FlowAction::DeployGit);

        store.clear_step(7).await.unwrap();
        let user = store.get(7).await.unwrap();
        assert!(user.current_step.is_none());
        assert!(user.step_data.is_none());
    }

    #[tokio::test]
    async fn test_new_flow_replaces_previous_flow() {
        let (_dir, store) = open_store();

        store
            .update_step(
                7,
                Step::AwaitingRepoUrl,
                Some(StepData::with_worker_name(FlowAction::DeployGit, "old-worker")),
            )
            .await
            .unwrap();

        // Starting the upload flow mid-deploy discards the deploy state
        store
            .update_step(7, Step::AwaitingWorkerName, Some(StepData::new(FlowAction::UploadJs)))
            .await
            .unwrap();

        let user = store.get(7).await.unwrap();
        assert_eq!(user.current_step, Some(Step::AwaitingWorkerName));
        let step_data = user.step_data.unwrap();
        assert_eq!(step_data.action, FlowAction::UploadJs);
        assert!(step_data.worker_name.is_none());
    }

    #[tokio::test]
    async fn test_login_requires_all_three_credentials() {
        let (_dir, store) = open_store();

        store
            .update(7, |u| {
                u.api_token = Some("token".into());
                u.email = Some("a@b.c".into());
            })
            .await
            .unwrap();
        assert!(!store.is_logged_in(7).await);

        store
            .update(7, |u| {
                u.account_id = Some("acct-0123456789".into());
                u.zone_id = Some("zone-0123456789".into());
            })
            .await
            .unwrap();
        assert!(store.is_logged_in(7).await);

        let creds = store.credentials(7).await.unwrap();
        assert_eq!(creds.email, "a@b.c");
        assert_eq!(creds.account_id, "acct-0123456789");
    }

    #[tokio::test]
    async fn test_temp_data_expires_after_one_hour() {
        let (_dir, store) = open_store();

        store
            .store_temp(7, "last_analysis", serde_json::json!({"worker_name": "demo"}))
            .await
            .unwrap();

        let stored_at = store.get(7).await.unwrap().temp_data["last_analysis"].timestamp;

        let just_before = stored_at + Duration::seconds(3599);
        let value = store.get_temp_at(7, "last_analysis", just_before).await.unwrap();
        assert_eq!(value.unwrap()["worker_name"], "demo");

        let just_after = stored_at + Duration::seconds(3601);
        let value = store.get_temp_at(7, "last_analysis", just_after).await.unwrap();
        assert!(value.is_none());

        // Entry was evicted, not just hidden
        assert!(store.get(7).await.unwrap().temp_data.is_empty());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");

        {
            let store = SessionStore::open(path.clone()).unwrap();
            store
                .update_step(42, Step::AwaitingApiToken, None)
                .await
                .unwrap();
        }

        let store = SessionStore::open(path).unwrap();
        let user = store.get(42).await.unwrap();
        assert_eq!(user.current_step, Some(Step::AwaitingApiToken));
    }

    #[test]
    fn test_step_serde_tags() {
        let json = serde_json::to_string(&Step::AwaitingApiToken).unwrap();
        assert_eq!(json, "\"awaiting_api_token\"");
        let json = serde_json::to_string(&FlowAction::DeployGit).unwrap();
        assert_eq!(json, "\"deploy_git\"");
    }
}
