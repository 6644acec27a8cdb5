use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use services::{
    AppServices, CollectingNotifier, ControllerSettings, SaveOutcome, ServiceOptions,
    StepStatus, WorkflowError,
};
use storage::repository::{MinisterProfileRepository, ProgressRepository, Storage};
use trust_core::model::{CourseConfig, CourseId, MinisterStatus, StepKey, StepNumber, UserId};
use trust_core::time::{fixed_clock, fixed_now};

async fn setup(name: &str) -> (AppServices, Storage, CollectingNotifier) {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let storage = Storage::sqlite(&url).await.expect("connect sqlite");
    let notifier = CollectingNotifier::new();
    let options = ServiceOptions {
        clock: fixed_clock(),
        settings: ControllerSettings {
            debounce: Duration::from_millis(20),
            ..ControllerSettings::default()
        },
        courses: vec![CourseConfig::trust_formation()],
        minister_rpc: None,
    };
    let services = AppServices::new(storage.clone(), options, Arc::new(notifier.clone()))
        .expect("build services");
    (services, storage, notifier)
}

fn course() -> CourseId {
    CourseId::new("trust-formation").unwrap()
}

fn step(n: u32) -> StepNumber {
    StepNumber::new(n).unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct IdentityForm {
    full_name: String,
}

#[tokio::test]
async fn first_visit_starts_at_step_one_without_writing() {
    let (services, storage, notifier) = setup("memdb_flow_first_visit").await;
    let user = UserId::random();
    let ctl = services.controller(user, &course()).expect("controller");

    let snapshot = ctl.load_progress().await.expect("load");
    assert_eq!(snapshot.progress.current_step(), StepNumber::FIRST);
    assert!(snapshot.progress.completed_steps().is_empty());
    assert!(snapshot.progress.step_data().is_empty());
    assert!(!snapshot.progress.is_complete());
    assert_eq!(snapshot.minister, MinisterStatus::unverified());
    assert_eq!(ctl.completion_percentage(), Some(0));

    assert!(storage.progress.get_progress(user, &course()).await.unwrap().is_none());
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn completing_identity_persists_and_repopulates_on_reload() {
    let (services, storage, _notifier) = setup("memdb_flow_identity").await;
    let user = UserId::random();
    let workflow = services.workflow(&course()).expect("workflow");

    let ctl = services.controller(user, &course()).expect("controller");
    ctl.load_progress().await.expect("load");
    let handle = workflow.open(&ctl, StepNumber::FIRST).expect("open step 1");
    assert_eq!(handle.key().as_str(), "identity");
    assert_eq!(handle.data(), None);

    let outcome = handle.next(json!({ "fullName": "Jane" })).await.expect("next");
    assert!(matches!(outcome, SaveOutcome::Persisted { .. }));

    let stored = storage
        .progress
        .get_progress(user, &course())
        .await
        .unwrap()
        .expect("row written");
    assert_eq!(stored.completed_steps().iter().copied().collect::<Vec<_>>(), vec![step(1)]);
    assert_eq!(stored.current_step(), step(2));
    assert_eq!(stored.updated_at(), Some(fixed_now()));
    drop(ctl);

    // a later session sees the saved form
    let reloaded = services.controller(user, &course()).expect("controller");
    reloaded.load_progress().await.expect("reload");
    assert_eq!(
        workflow.current(&reloaded.progress().unwrap()).unwrap().key.as_str(),
        "trust-configuration"
    );
    let handle = workflow.open(&reloaded, StepNumber::FIRST).expect("revisit step 1");
    assert_eq!(
        handle.data_as::<IdentityForm>().expect("decode"),
        Some(IdentityForm {
            full_name: "Jane".into()
        })
    );
    assert_eq!(reloaded.completion_percentage(), Some(20));
}

#[tokio::test]
async fn navigation_is_durable_and_gated() {
    let (services, storage, _notifier) = setup("memdb_flow_navigation").await;
    let user = UserId::random();
    let workflow = services.workflow(&course()).expect("workflow");
    let ctl = services.controller(user, &course()).expect("controller");
    ctl.load_progress().await.expect("load");

    let locked = workflow.navigate(&ctl, step(3)).await.unwrap_err();
    assert!(matches!(locked, WorkflowError::StepLocked(s) if s == step(3)));
    let out_of_range = workflow.navigate(&ctl, step(9)).await.unwrap_err();
    assert!(matches!(out_of_range, WorkflowError::OutOfRange { total: 5, .. }));

    ctl.complete_step(None).await.expect("complete 1");
    ctl.complete_step(None).await.expect("complete 2");
    workflow.navigate(&ctl, step(1)).await.expect("back to 1");

    let statuses: Vec<StepStatus> = workflow
        .overview(&ctl.progress().unwrap())
        .into_iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Current,
            StepStatus::Completed,
            StepStatus::Available,
            StepStatus::Locked,
            StepStatus::Locked,
        ]
    );

    // a reload right after navigation reflects it
    let fresh = services.controller(user, &course()).expect("controller");
    let snapshot = fresh.load_progress().await.expect("load");
    assert_eq!(snapshot.progress.current_step(), step(1));

    fresh.previous_step().await.expect("back below 1");
    let stored = storage.progress.get_progress(user, &course()).await.unwrap().unwrap();
    assert_eq!(stored.current_step(), StepNumber::FIRST);
}

#[tokio::test]
async fn debounced_autosave_lands_after_the_quiet_period() {
    let (services, storage, notifier) = setup("memdb_flow_autosave").await;
    let user = UserId::random();
    let ctl = services.controller(user, &course()).expect("controller");
    ctl.load_progress().await.expect("load");

    let key = StepKey::new("trust-configuration").unwrap();
    let handle = ctl.step(step(2), key.clone());
    handle.autosave(json!({ "trustName": "Doe" })).await.expect("autosave");
    handle
        .autosave(json!({ "trustName": "Doe Family Trust" }))
        .await
        .expect("autosave");
    assert!(storage.progress.get_progress(user, &course()).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stored = storage.progress.get_progress(user, &course()).await.unwrap().unwrap();
    assert_eq!(stored.version(), 1);
    assert_eq!(
        stored.step_data().get(&key),
        Some(&json!({ "trustName": "Doe Family Trust" }))
    );
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn two_sessions_last_writer_wins_replaces_the_whole_row() {
    let (services, storage, _notifier) = setup("memdb_flow_two_tabs").await;
    let user = UserId::random();
    let tab_a = services.controller(user, &course()).expect("controller");
    let tab_b = services.controller(user, &course()).expect("controller");
    tab_a.load_progress().await.expect("load a");
    tab_b.load_progress().await.expect("load b");

    tab_a.save_step_data(StepKey::new("x").unwrap(), json!(1)).await.unwrap();
    tab_a.flush().await.expect("flush a");
    tab_b.save_step_data(StepKey::new("y").unwrap(), json!(2)).await.unwrap();
    tab_b.flush().await.expect("flush b");

    let stored = storage.progress.get_progress(user, &course()).await.unwrap().unwrap();
    assert_eq!(stored.step_data().get(&StepKey::new("x").unwrap()), None);
    assert_eq!(stored.step_data().get(&StepKey::new("y").unwrap()), Some(&json!(2)));
}

#[tokio::test]
async fn course_completion_and_minister_projection() {
    let (services, storage, _notifier) = setup("memdb_flow_finish").await;
    let user = UserId::random();
    let status = MinisterStatus::verified(
        "Rev. Jane Doe",
        Some("https://certs.example/jane.pdf".parse().unwrap()),
    );
    services
        .minister_profiles()
        .save_minister_status(user, &status)
        .await
        .expect("save profile");

    let ctl = services.controller(user, &course()).expect("controller");
    let snapshot = ctl.load_progress().await.expect("load");
    assert_eq!(snapshot.minister, status);
    assert_eq!(ctl.minister_status(), status);

    for _ in 0..5 {
        ctl.complete_step(None).await.expect("complete");
    }
    ctl.mark_course_complete().await.expect("finish");
    assert_eq!(ctl.completion_percentage(), Some(100));

    let stored = storage.progress.get_progress(user, &course()).await.unwrap().unwrap();
    assert!(stored.is_complete());
    assert_eq!(stored.completed_steps().len(), 5);
    assert_eq!(stored.current_step(), step(6));
}

#[tokio::test]
async fn unknown_course_is_rejected() {
    let (services, _storage, _notifier) = setup("memdb_flow_unknown_course").await;
    let other = CourseId::new("estate-plan").unwrap();
    assert!(services.controller(UserId::random(), &other).is_err());
    assert!(services.workflow(&other).is_err());
}
