//! Integration tests for `delete` against the in-memory store.

mod common;

use std::path::PathBuf;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use common::{harness, harness_with, lineage_labels, now, record, FakeRunner, Harness};
use testrun::commands::{run_delete, DeleteOptions, DeleteOutcome};
use testrun::error::Error;
use testrun::watch::JobOutcome;
use testrun::Settings;

const TEST_URL: &str = "https://github.com/myorg/env-bdd.git";

fn test_record(name: &str, extra_labels: &[(&str, &str)], remove_script: Option<&str>) -> DynamicObject {
    let mut labels = lineage_labels(7, "ctx");
    for (key, value) in extra_labels {
        labels.insert(*key, *value);
    }
    let mut obj = record(name, &labels, 1, now());
    obj.data["spec"] = serde_json::json!({
        "testSource": { "url": TEST_URL },
        "env": [{ "name": "TF_VAR_project", "value": "bdd" }],
    });
    if let Some(script) = remove_script {
        obj.data["spec"]["removeScript"] = serde_json::json!(script);
    }
    obj
}

fn options() -> DeleteOptions {
    DeleteOptions {
        test_url: Some(TEST_URL.to_string()),
        ..DeleteOptions::default()
    }
}

async fn delete(h: &Harness, options: &DeleteOptions) -> testrun::Result<DeleteOutcome> {
    run_delete(&h.clients, &Settings::default(), options, &CancellationToken::new()).await
}

#[tokio::test]
async fn clones_runs_the_script_and_marks_the_record() {
    let h = harness();
    h.store.insert_resource(test_record("tf-a", &[], None));
    h.store.insert_resource(record("tf-other", &lineage_labels(8, "ctx"), 1, now()));

    let outcome = delete(&h, &options()).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Marked("tf-a".to_string()));
    let commands = h.runner.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].name, "git");
    assert_eq!(&commands[0].args[..4], ["clone", "--depth", "1", TEST_URL]);
    let clone_dir = PathBuf::from(&commands[0].args[4]);
    assert_eq!(
        PathBuf::from(&commands[1].name),
        clone_dir.join("bin/destroy.sh")
    );
    assert_eq!(commands[1].dir.as_deref(), Some(clone_dir.as_path()));
    assert_eq!(commands[1].env["TF_VAR_project"], "bdd");

    let marked = h.store.resource("tf-a").unwrap();
    assert_eq!(marked.labels()["delete"], "true");
    assert_eq!(h.store.journal(), vec!["update tf-a"]);
}

#[tokio::test]
async fn existing_checkout_and_record_script_are_used() {
    let h = harness();
    h.store
        .insert_resource(test_record("tf-a", &[], Some("bin/cleanup.sh")));
    let opts = DeleteOptions {
        dir: Some(PathBuf::from("/work")),
        ..options()
    };

    delete(&h, &opts).await.unwrap();

    let commands = h.runner.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name, "/work/bin/cleanup.sh");

    let h = harness();
    h.store
        .insert_resource(test_record("tf-a", &[], Some("bin/cleanup.sh")));
    let opts = DeleteOptions {
        dir: Some(PathBuf::from("/work")),
        script: Some("scripts/teardown.sh".to_string()),
        ..options()
    };
    delete(&h, &opts).await.unwrap();
    assert_eq!(h.runner.commands()[0].name, "/work/scripts/teardown.sh");
}

#[tokio::test]
async fn kept_or_already_marked_records_are_left_alone() {
    let h = harness();
    h.store.insert_resource(test_record("tf-a", &[("keep", "yes")], None));
    assert_eq!(
        delete(&h, &options()).await.unwrap(),
        DeleteOutcome::Kept("tf-a".to_string())
    );
    assert!(h.runner.commands().is_empty());

    let h = harness();
    h.store.insert_resource(test_record("tf-a", &[("delete", "true")], None));
    assert_eq!(
        delete(&h, &options()).await.unwrap(),
        DeleteOutcome::AlreadyMarked("tf-a".to_string())
    );
    assert!(h.runner.commands().is_empty());
    assert!(h.store.journal().is_empty());
}

#[tokio::test]
async fn failing_script_leaves_the_record_unmarked() {
    let h = harness_with(FakeRunner::failing_on("destroy.sh"), JobOutcome::Succeeded);
    h.store.insert_resource(test_record("tf-a", &[], None));

    let err = delete(&h, &options()).await.unwrap_err();

    assert!(err.to_string().contains("failed to run bin/destroy.sh for tf-a"), "{err}");
    assert!(!h.store.resource("tf-a").unwrap().labels().contains_key("delete"));
}

#[tokio::test]
async fn unknown_or_missing_test_url_is_an_error() {
    let h = harness();
    h.store.insert_resource(test_record("tf-a", &[], None));

    let opts = DeleteOptions {
        test_url: Some("https://github.com/myorg/other.git".to_string()),
        ..DeleteOptions::default()
    };
    assert!(matches!(delete(&h, &opts).await, Err(Error::NotFound(_))));
    assert!(matches!(
        delete(&h, &DeleteOptions::default()).await,
        Err(Error::MissingOption("test-url"))
    ));
}

#[test]
fn test_url_is_checked_without_a_cluster() {
    assert!(matches!(
        DeleteOptions::default().validate(),
        Err(Error::MissingOption("test-url"))
    ));
    assert_eq!(options().validate().unwrap(), TEST_URL);
}
