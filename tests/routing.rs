//! Integration tests for message routing against a real session store:
//! the dispatch decisions a user's messages get as their conversation
//! state moves through the login, deploy, and upload flows.

use tempfile::TempDir;

use cfworkerbot::error::Error;
use cfworkerbot::services::session::{FlowAction, SessionStore, Step, StepData};
use cfworkerbot::services::telegram::{route_document, route_text, DocumentRoute, TextRoute};

const USER: u64 = 4242;

fn open_store() -> (TempDir, SessionStore) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = SessionStore::open(dir.path().join("sessions.json")).unwrap();
    (dir, store)
}

async fn login(store: &SessionStore, user: u64) {
    store
        .update(user, |u| {
            u.api_token = Some("token-0123456789".into());
            u.account_id = Some("acct-0123456789".into());
            u.zone_id = Some("zone-0123456789".into());
            u.email = Some("dev@example.com".into());
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fresh_user_gets_logged_out_default() {
    let (_dir, store) = open_store();
    let record = store.get(USER).await;
    assert_eq!(route_text(record.as_ref()), TextRoute::Default { logged_in: false });
    assert_eq!(
        route_document(record.as_ref()),
        DocumentRoute::Ignore { logged_in: false }
    );
}

#[tokio::test]
async fn test_login_flow_claims_text_until_completed() {
    let (_dir, store) = open_store();

    store
        .update_step(USER, Step::AwaitingApiToken, None)
        .await
        .unwrap();
    let record = store.get(USER).await;
    assert_eq!(route_text(record.as_ref()), TextRoute::AuthStep(Step::AwaitingApiToken));

    // Credentials complete, step cleared: back to the default reply
    login(&store, USER).await;
    store.clear_step(USER).await.unwrap();
    let record = store.get(USER).await;
    assert_eq!(route_text(record.as_ref()), TextRoute::Default { logged_in: true });
}

#[tokio::test]
async fn test_deploy_flow_routes_both_steps() {
    let (_dir, store) = open_store();
    login(&store, USER).await;

    store
        .update_step(
            USER,
            Step::AwaitingWorkerName,
            Some(StepData::new(FlowAction::DeployGit)),
        )
        .await
        .unwrap();
    let record = store.get(USER).await;
    assert_eq!(
        route_text(record.as_ref()),
        TextRoute::DeployGit(Step::AwaitingWorkerName)
    );

    store
        .update_step(
            USER,
            Step::AwaitingRepoUrl,
            Some(StepData::with_worker_name(FlowAction::DeployGit, "demo")),
        )
        .await
        .unwrap();
    let record = store.get(USER).await;
    assert_eq!(route_text(record.as_ref()), TextRoute::DeployGit(Step::AwaitingRepoUrl));

    // A document mid-deploy is not an upload
    assert_eq!(
        route_document(record.as_ref()),
        DocumentRoute::Ignore { logged_in: true }
    );
}

#[tokio::test]
async fn test_upload_flow_accepts_file_or_pasted_text() {
    let (_dir, store) = open_store();
    login(&store, USER).await;

    store
        .update_step(
            USER,
            Step::AwaitingJsFile,
            Some(StepData::with_worker_name(FlowAction::UploadJs, "demo")),
        )
        .await
        .unwrap();

    let record = store.get(USER).await;
    assert_eq!(route_document(record.as_ref()), DocumentRoute::UploadJsFile);
    // Text at the file step re-routes into the pasted-code path
    assert_eq!(route_text(record.as_ref()), TextRoute::UploadJsTextAtFileStep);

    // After the re-step the text routes as code
    store
        .update_step(
            USER,
            Step::AwaitingJsCode,
            Some(StepData::with_worker_name(FlowAction::UploadJs, "demo")),
        )
        .await
        .unwrap();
    let record = store.get(USER).await;
    assert_eq!(route_text(record.as_ref()), TextRoute::UploadJs(Step::AwaitingJsCode));
}

#[tokio::test]
async fn test_starting_a_new_flow_reroutes_away_from_the_old_one() {
    let (_dir, store) = open_store();
    login(&store, USER).await;

    store
        .update_step(
            USER,
            Step::AwaitingRepoUrl,
            Some(StepData::with_worker_name(FlowAction::DeployGit, "demo")),
        )
        .await
        .unwrap();

    // User opens the analysis action instead of finishing the deploy
    store
        .update_step(
            USER,
            Step::AwaitingRepoAnalysis,
            Some(StepData::new(FlowAction::AnalyzeRepo)),
        )
        .await
        .unwrap();

    let record = store.get(USER).await;
    assert_eq!(
        route_text(record.as_ref()),
        TextRoute::AnalyzeRepo(Step::AwaitingRepoAnalysis)
    );
}

#[tokio::test]
async fn test_users_are_routed_independently() {
    let (_dir, store) = open_store();
    login(&store, USER).await;

    store
        .update_step(
            USER,
            Step::AwaitingWorkerName,
            Some(StepData::new(FlowAction::UploadJs)),
        )
        .await
        .unwrap();

    let other = store.get(USER + 1).await;
    assert_eq!(route_text(other.as_ref()), TextRoute::Default { logged_in: false });

    let record = store.get(USER).await;
    assert_eq!(
        route_text(record.as_ref()),
        TextRoute::UploadJs(Step::AwaitingWorkerName)
    );
}

#[test]
fn test_only_validation_errors_keep_the_step() {
    assert!(Error::Validation("bad name".into()).keeps_step());
    assert!(!Error::Remote("api said no".into()).keeps_step());
    assert!(!Error::CloneFailed("repository not found".into()).keeps_step());
    assert!(!Error::EntryPointNotFound.keeps_step());
    assert!(!Error::Store("corrupt".into()).keeps_step());
}
