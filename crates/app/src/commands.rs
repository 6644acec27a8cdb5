//! Command handlers. Each one loads the user's progress, applies one change and
//! waits for it to be written before returning.

use eyre::{Context, Result, bail};
use serde_json::Value;
use services::{AppServices, ProgressController, SaveOutcome, StepStatus, WorkflowEngine};
use storage::repository::MinisterProfileRepository;
use trust_core::model::{MinisterStatus, UserId};

use crate::cli::{Command, MinisterCommand, Target};

pub async fn run(services: &AppServices, command: Command) -> Result<()> {
    match command {
        Command::Status { target, json } => status(services, &target, json).await,
        Command::SaveStep { target, key, data } => {
            let (_, ctl) = open(services, &target).await?;
            let value = parse_json(&data)?;
            ctl.save_step_data(key.clone(), value).await?;
            let outcome = ctl.flush().await?;
            report(outcome, &format!("saved data for `{key}`"));
            Ok(())
        }
        Command::Complete { target, step, data } => {
            let (workflow, ctl) = open(services, &target).await?;
            let step = match step.or_else(|| ctl.current_step()) {
                Some(step) => step,
                None => bail!("progress is not loaded"),
            };
            let handle = workflow.open(&ctl, step)?;
            let outcome = match data {
                Some(data) => handle.next(parse_json(&data)?).await?,
                None => ctl.complete_step(Some(step)).await?,
            };
            report(Some(outcome), &format!("completed step {step}"));
            Ok(())
        }
        Command::Goto { target, step } => {
            let (workflow, ctl) = open(services, &target).await?;
            let outcome = workflow.navigate(&ctl, step).await?;
            report(Some(outcome), &format!("moved to step {step}"));
            Ok(())
        }
        Command::Back { target } => {
            let (_, ctl) = open(services, &target).await?;
            let outcome = ctl.previous_step().await?;
            let current = ctl.current_step().map_or_else(String::new, |s| s.to_string());
            report(Some(outcome), &format!("moved back to step {current}"));
            Ok(())
        }
        Command::Finish { target } => {
            let (_, ctl) = open(services, &target).await?;
            let outcome = ctl.mark_course_complete().await?;
            report(Some(outcome), "course marked complete");
            Ok(())
        }
        Command::Minister { command } => minister(services, command).await,
    }
}

async fn open(services: &AppServices, target: &Target) -> Result<(WorkflowEngine, ProgressController)> {
    let workflow = services.workflow(&target.course)?;
    let ctl = services.controller(target.user, &target.course)?;
    ctl.load_progress()
        .await
        .context(format!("Failed to load progress for {}", target.user))?;
    Ok((workflow, ctl))
}

async fn status(services: &AppServices, target: &Target, json: bool) -> Result<()> {
    let (workflow, ctl) = open(services, target).await?;
    let Some(progress) = ctl.progress() else {
        bail!("progress is not loaded");
    };

    if json {
        let out = serde_json::json!({
            "progress": progress,
            "minister": ctl.minister_status(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let course = workflow.course();
    println!("{} ({})", course.title(), course.id());
    for step in workflow.overview(&progress) {
        let marker = match step.status {
            StepStatus::Current => ">",
            StepStatus::Completed => "x",
            StepStatus::Available => " ",
            StepStatus::Locked => "-",
        };
        println!("  [{marker}] {}. {}", step.number, step.definition.title);
    }
    println!(
        "completion: {}%{}",
        ctl.completion_percentage().unwrap_or(0),
        if progress.is_complete() { " (finished)" } else { "" }
    );
    match ctl.minister_status() {
        MinisterStatus {
            is_minister: true,
            minister_name,
            ..
        } => println!("minister: {}", minister_name.unwrap_or_default()),
        _ => println!("minister: not verified"),
    }
    Ok(())
}

async fn minister(services: &AppServices, command: MinisterCommand) -> Result<()> {
    match command {
        MinisterCommand::Set {
            user,
            name,
            certificate_url,
            revoke,
        } => {
            let status = match (revoke, name) {
                (true, _) => MinisterStatus::unverified(),
                (false, Some(name)) => MinisterStatus::verified(name, certificate_url),
                (false, None) => bail!("--name is required unless --revoke is given"),
            };
            services
                .minister_profiles()
                .save_minister_status(user, &status)
                .await?;
            services.ministers().invalidate(user);
            println!("minister record saved for {user}");
            Ok(())
        }
        MinisterCommand::Show { user } => {
            print_minister(user, &services.ministers().status(user).await);
            Ok(())
        }
    }
}

fn print_minister(user: UserId, status: &MinisterStatus) {
    if !status.is_minister {
        println!("{user}: not verified");
        return;
    }
    println!(
        "{user}: {}",
        status.minister_name.as_deref().unwrap_or("(unnamed)")
    );
    if let Some(url) = &status.certificate_url {
        println!("certificate: {url}");
    }
}

fn parse_json(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("step data must be valid JSON")?;
    if !value.is_object() {
        bail!("step data must be a JSON object");
    }
    Ok(value)
}

fn report(outcome: Option<SaveOutcome>, done: &str) {
    match outcome {
        Some(SaveOutcome::Persisted { version }) => println!("{done} (version {version})"),
        Some(SaveOutcome::Dropped) => println!("{done}; not written, another save was in progress"),
        Some(SaveOutcome::Scheduled) | None => println!("{done}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use services::{CollectingNotifier, ServiceOptions};
    use storage::repository::{ProgressRepository, Storage};
    use trust_core::model::{CourseConfig, CourseId, StepKey, StepNumber};

    fn app_services(storage: &Storage) -> AppServices {
        let options = ServiceOptions {
            courses: vec![CourseConfig::trust_formation()],
            ..ServiceOptions::default()
        };
        AppServices::new(storage.clone(), options, Arc::new(CollectingNotifier::new())).unwrap()
    }

    fn target(user: UserId) -> Target {
        Target {
            user,
            course: CourseId::new("trust-formation").unwrap(),
        }
    }

    #[test]
    fn parse_json_requires_object() {
        assert!(parse_json(r#"{"fullName":"Jane"}"#).is_ok());
        assert!(parse_json("[1,2]").is_err());
        assert!(parse_json("{").is_err());
    }

    #[tokio::test]
    async fn complete_with_data_then_goto_and_finish() {
        let storage = Storage::in_memory();
        let services = app_services(&storage);
        let user = UserId::random();

        run(
            &services,
            Command::Complete {
                target: target(user),
                step: None,
                data: Some(r#"{"fullName":"Jane"}"#.into()),
            },
        )
        .await
        .unwrap();

        let locked = run(
            &services,
            Command::Goto {
                target: target(user),
                step: StepNumber::new(4).unwrap(),
            },
        )
        .await;
        assert!(locked.is_err());

        run(&services, Command::Back { target: target(user) }).await.unwrap();
        run(&services, Command::Finish { target: target(user) }).await.unwrap();

        let course = CourseId::new("trust-formation").unwrap();
        let stored = storage.progress.get_progress(user, &course).await.unwrap().unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.current_step(), StepNumber::FIRST);
        assert_eq!(
            stored.step_data().get(&StepKey::new("identity").unwrap()).unwrap()["fullName"],
            "Jane"
        );
    }

    #[tokio::test]
    async fn save_step_is_written_before_returning() {
        let storage = Storage::in_memory();
        let services = app_services(&storage);
        let user = UserId::random();

        run(
            &services,
            Command::SaveStep {
                target: target(user),
                key: StepKey::new("identity").unwrap(),
                data: r#"{"fullName":"Ja"}"#.into(),
            },
        )
        .await
        .unwrap();

        let course = CourseId::new("trust-formation").unwrap();
        let stored = storage.progress.get_progress(user, &course).await.unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert!(stored.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn minister_set_is_visible_to_show() {
        let storage = Storage::in_memory();
        let services = app_services(&storage);
        let user = UserId::random();

        run(
            &services,
            Command::Minister {
                command: MinisterCommand::Set {
                    user,
                    name: Some("Rev. Jane Doe".into()),
                    certificate_url: None,
                    revoke: false,
                },
            },
        )
        .await
        .unwrap();
        assert!(services.ministers().status(user).await.is_minister);

        run(
            &services,
            Command::Minister {
                command: MinisterCommand::Set {
                    user,
                    name: None,
                    certificate_url: None,
                    revoke: true,
                },
            },
        )
        .await
        .unwrap();
        assert!(!services.ministers().status(user).await.is_minister);
    }
}
