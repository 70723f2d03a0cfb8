//! Lifecycle commands and configuration changes on provisioned servers.

mod common;

use badger_core::{
    channel_key, ConfigUpdateOutcome, ProvisionError, ServerStatus, SubscriptionId,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::Harness;
use serde_json::{json, Value};

async fn provisioned(h: &Harness) -> SubscriptionId {
    h.store.add_host("10.0.0.7", 16, 0).await;
    let plan = h.valheim_plan(4).await;
    let (_, outcome) = h.trial("viking@example.com", &plan).await;
    outcome.subscription_id().expect("subscription created")
}

fn form(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_lifecycle_commands_update_status_and_dispatch() {
    let h = Harness::new();
    let sub = provisioned(&h).await;
    let actions = h.actions();
    let channel = channel_key("10.0.0.7");

    actions.restart(sub).await.unwrap();
    assert_eq!(h.store.servers().await[0].status, ServerStatus::Restarting);

    actions.stop(sub).await.unwrap();
    assert_eq!(h.store.servers().await[0].status, ServerStatus::Stopping);

    actions.backup(sub).await.unwrap();
    assert_eq!(h.store.servers().await[0].status, ServerStatus::Running);

    let commands = h.dispatch.snapshot(&channel);
    assert_eq!(
        &commands[1..],
        &[
            format!("python3 setup_server.py -u {sub} -g valheim restart"),
            format!("python3 setup_server.py -u {sub} -g valheim stop"),
            format!("python3 setup_server.py -u {sub} -g valheim backup"),
        ]
    );
}

#[tokio::test]
async fn test_lifecycle_on_missing_server_touches_nothing() {
    let h = Harness::new();
    let err = h.actions().restart(SubscriptionId(404)).await.unwrap_err();

    assert!(matches!(err, ProvisionError::NotFound { kind: "server", .. }));
    assert!(h.dispatch.channel_names().is_empty());
}

#[tokio::test]
async fn test_save_config_persists_and_dispatches_update() {
    let h = Harness::new();
    let sub = provisioned(&h).await;

    let outcome = h
        .actions()
        .save_config(
            sub,
            &form(&[
                ("name", "Odin's Hall"),
                ("world", "Midgard"),
                ("saveinterval", "900"),
                ("modifiers[Combat]", "hard"),
                ("nomap", "on"),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ConfigUpdateOutcome::Dispatched);

    let saved: Value = serde_json::from_str(&h.store.servers().await[0].config).unwrap();
    assert_eq!(saved["saveinterval"], json!(900));
    assert_eq!(saved["modifiers"]["Combat"], json!("hard"));
    assert_eq!(saved["nomap"], json!(true));
    assert_eq!(saved["crossplay"], json!(false));

    let commands = h.dispatch.snapshot(&channel_key("10.0.0.7"));
    let update = commands.last().unwrap();
    let prefix = format!("python setup_server.py -u {sub} -g valheim --cfg-json ");
    let encoded = update
        .strip_prefix(&prefix)
        .and_then(|rest| rest.strip_suffix(" updateConfig"))
        .expect("update command shape");
    let decoded: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
    assert_eq!(decoded, saved);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_without_writes() {
    let h = Harness::new();
    let sub = provisioned(&h).await;
    let before = h.store.servers().await[0].config.clone();
    let queued_before = h.dispatch.snapshot(&channel_key("10.0.0.7")).len();

    let outcome = h
        .actions()
        .save_config(sub, &form(&[("name", ""), ("world", "Midgard")]))
        .await
        .unwrap();

    assert_eq!(outcome, ConfigUpdateOutcome::Rejected);
    assert_eq!(h.store.servers().await[0].config, before);
    assert_eq!(
        h.dispatch.snapshot(&channel_key("10.0.0.7")).len(),
        queued_before
    );
}

#[tokio::test]
async fn test_config_view_merges_saved_values() {
    let h = Harness::new();
    let sub = provisioned(&h).await;
    let actions = h.actions();

    let view = actions.config_view(sub).await.unwrap();
    assert_eq!(view["properties"]["name"]["value"], json!("My server"));
    assert_eq!(view["properties"]["modifiers"]["Combat"], json!("easy"));

    actions
        .save_config(
            sub,
            &form(&[
                ("name", "Odin's Hall"),
                ("world", "Midgard"),
                ("modifiers[Combat]", "veryhard"),
            ]),
        )
        .await
        .unwrap();
    let view = actions.config_view(sub).await.unwrap();
    assert_eq!(view["properties"]["name"]["value"], json!("Odin's Hall"));
    assert_eq!(view["properties"]["modifiers"]["Combat"], json!("veryhard"));
    assert_eq!(view["properties"]["modifiers"]["Raids"], json!("less"));
}
