//! Pending-order processing: ordering, discards and retries.

mod common;

use badger_core::{channel_key, InternalStatus, PendingQueue, Store};
use common::Harness;
use orchestrator::{CycleReport, OrderOutcome, PendingScheduler, StopReason};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_empty_queue_is_a_quiet_cycle() {
    let h = Harness::new();
    let report = h.processor().run_cycle().await;
    assert_eq!(report, CycleReport::default());
}

#[tokio::test]
async fn test_head_of_line_blocks_smaller_orders() {
    let h = Harness::new();
    let big = h.valheim_plan(8).await;
    let small = h.valheim_plan(2).await;
    let (_, a) = h.trial("a@example.com", &big).await;
    let (_, b) = h.trial("b@example.com", &small).await;
    assert!(matches!(a, OrderOutcome::Queued { .. }));
    assert!(matches!(b, OrderOutcome::Queued { .. }));

    h.store.add_host("10.0.0.1", 4, 0).await;
    let report = h.processor().run_cycle().await;

    assert_eq!(report.provisioned, 0);
    assert_eq!(report.stopped, Some(StopReason::NoCapacity));
    let a_id = a.subscription_id().unwrap().get();
    let b_id = b.subscription_id().unwrap().get();
    assert_eq!(h.queued_subscription_ids().await, vec![a_id, b_id]);
    assert!(h.store.servers().await.is_empty());
}

#[tokio::test]
async fn test_malformed_head_is_discarded_and_next_is_placed() {
    let h = Harness::new();
    h.pending
        .append(json!({ "subscription_id": 77, "game_name": "valheim", "ram_needed": 2 }))
        .await
        .unwrap();
    let plan = h.valheim_plan(2).await;
    let (_, queued) = h.trial("viking@example.com", &plan).await;
    assert!(matches!(queued, OrderOutcome::Queued { .. }));

    h.store.add_host("10.0.0.1", 8, 0).await;
    let report = h.processor().run_cycle().await;

    assert_eq!(report.examined, 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.provisioned, 1);
    assert_eq!(report.stopped, None);
    assert_eq!(h.pending.len().await.unwrap(), 0);

    let subscription = h.subscription(&queued).await;
    assert_eq!(subscription.internal_status, InternalStatus::On);
    assert_eq!(
        h.dispatch.snapshot(&channel_key("10.0.0.1")),
        vec![format!(
            "python3 setup_server.py -u {} -g valheim -m 2g -c 2 start",
            subscription.id
        )]
    );
}

#[tokio::test]
async fn test_orders_drain_in_submission_order() {
    let h = Harness::new();
    let plan = h.valheim_plan(2).await;
    let (_, first) = h.trial("a@example.com", &plan).await;
    let (_, second) = h.trial("b@example.com", &plan).await;

    h.store.add_host("10.0.0.1", 8, 0).await;
    let report = h.processor().run_cycle().await;

    assert_eq!(report.provisioned, 2);
    let commands = h.dispatch.snapshot(&channel_key("10.0.0.1"));
    assert_eq!(commands.len(), 2);
    assert!(commands[0].contains(&format!("-u {} ", first.subscription_id().unwrap())));
    assert!(commands[1].contains(&format!("-u {} ", second.subscription_id().unwrap())));
    assert_eq!(h.store.hosts().await[0].capacity_used, 4);
}

#[tokio::test]
async fn test_cycle_stops_when_capacity_runs_out_mid_pass() {
    let h = Harness::new();
    let plan = h.valheim_plan(3).await;
    h.trial("a@example.com", &plan).await;
    let (_, second) = h.trial("b@example.com", &plan).await;

    h.store.add_host("10.0.0.1", 4, 0).await;
    let report = h.processor().run_cycle().await;

    assert_eq!(report.provisioned, 1);
    assert_eq!(report.stopped, Some(StopReason::NoCapacity));
    assert_eq!(
        h.queued_subscription_ids().await,
        vec![second.subscription_id().unwrap().get()]
    );
}

#[tokio::test]
async fn test_unknown_plan_is_discarded() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 8, 0).await;
    h.pending
        .append(json!({
            "subscription_id": 5,
            "plan_id": 404,
            "game_name": "valheim",
            "ram_needed": 2,
        }))
        .await
        .unwrap();

    let report = h.processor().run_cycle().await;

    assert_eq!(report.discarded, 1);
    assert_eq!(h.pending.len().await.unwrap(), 0);
    assert_eq!(h.ctx.allocator.reserved_on(h.store.hosts().await[0].id), 0);
}

#[tokio::test]
async fn test_order_for_settled_subscription_is_discarded() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 8, 0).await;
    let plan = h.valheim_plan(2).await;
    let waiting = h.waiting_subscription(&plan, "valheim").await;
    h.store
        .update_subscription_internal_status(waiting.id, InternalStatus::Failed)
        .await
        .unwrap();

    let report = h.processor().run_cycle().await;

    assert_eq!(report.discarded, 1);
    assert!(h.store.servers().await.is_empty());
}

#[tokio::test]
async fn test_missing_provisioner_keeps_order_for_later() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 8, 0).await;
    let plan = h.plan_for("factorio", Some(2), 1).await;
    let waiting = h.waiting_subscription(&plan, "factorio").await;

    let report = h.processor().run_cycle().await;

    assert_eq!(
        report.stopped,
        Some(StopReason::NoProvisioner("factorio".to_string()))
    );
    assert_eq!(h.queued_subscription_ids().await, vec![waiting.id.get()]);
}

#[tokio::test]
async fn test_order_without_ram_blocks_the_queue() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 8, 0).await;
    h.pending
        .append(json!({
            "subscription_id": 5,
            "plan_id": 1,
            "game_name": "valheim",
            "ram_needed": "unknown",
        }))
        .await
        .unwrap();

    let report = h.processor().run_cycle().await;

    assert_eq!(report.stopped, Some(StopReason::NoCapacity));
    assert_eq!(h.pending.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_backend_failure_leaves_order_at_head_and_retries() {
    let h = Harness::new();
    let plan = h.valheim_plan(2).await;
    let (_, queued) = h.trial("viking@example.com", &plan).await;
    h.store.add_host("10.0.0.1", 8, 0).await;
    let processor = h.processor();

    h.dispatch.set_offline(true);
    let report = processor.run_cycle().await;
    assert!(matches!(report.stopped, Some(StopReason::Backend(_))));
    assert_eq!(h.pending.len().await.unwrap(), 1);
    assert_eq!(h.store.servers().await.len(), 1);

    h.dispatch.set_offline(false);
    let report = processor.run_cycle().await;
    assert_eq!(report.provisioned, 1);
    assert_eq!(h.pending.len().await.unwrap(), 0);

    // The retry reuses the recorded server instead of booking the host twice.
    assert_eq!(h.store.servers().await.len(), 1);
    assert_eq!(h.store.hosts().await[0].capacity_used, 2);
    assert_eq!(h.dispatch.snapshot(&channel_key("10.0.0.1")).len(), 1);
    assert_eq!(
        h.subscription(&queued).await.internal_status,
        InternalStatus::On
    );
}

#[tokio::test]
async fn test_retry_on_full_host_resends_start_without_new_capacity() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 2, 0).await;
    let plan = h.valheim_plan(2).await;
    let waiting = h.waiting_subscription(&plan, "valheim").await;
    let processor = h.processor();

    h.dispatch.set_offline(true);
    let report = processor.run_cycle().await;
    assert!(matches!(report.stopped, Some(StopReason::Backend(_))));
    // The server row holds the whole host now.
    assert_eq!(h.store.hosts().await[0].capacity_used, 2);

    h.dispatch.set_offline(false);
    let report = processor.run_cycle().await;

    assert_eq!(report.provisioned, 1);
    assert_eq!(report.stopped, None);
    assert_eq!(h.pending.len().await.unwrap(), 0);
    assert_eq!(h.store.hosts().await[0].capacity_used, 2);
    assert_eq!(
        h.dispatch.snapshot(&channel_key("10.0.0.1")),
        vec![format!(
            "python3 setup_server.py -u {} -g valheim -m 2g -c 2 start",
            waiting.id
        )]
    );
    let subscription = h
        .store
        .select_subscription_by_id(waiting.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.internal_status, InternalStatus::On);
}

#[tokio::test]
async fn test_uncommitted_server_waits_for_room_on_its_own_host() {
    let (h, faults) = Harness::with_capacity_faults();
    h.store.add_host("10.0.0.1", 4, 0).await;
    h.store.add_host("10.0.0.2", 16, 0).await;
    let plan = h.valheim_plan(4).await;
    let waiting = h.waiting_subscription(&plan, "valheim").await;

    faults.fail_commits(true);
    let report = h.processor().run_cycle().await;
    assert!(matches!(report.stopped, Some(StopReason::Backend(_))));
    assert_eq!(h.store.servers().await[0].ip_address, "10.0.0.1");

    // Someone else fills the first host in the meantime.
    faults.fail_commits(false);
    let (_, other) = h.trial("other@example.com", &plan).await;
    assert!(matches!(
        other,
        OrderOutcome::Provisioned { ref host_ip, .. } if host_ip == "10.0.0.1"
    ));

    let report = h.processor().run_cycle().await;
    assert_eq!(report.stopped, Some(StopReason::NoCapacity));
    assert_eq!(h.queued_subscription_ids().await, vec![waiting.id.get()]);
    let hosts = h.store.hosts().await;
    assert_eq!((hosts[0].capacity_used, hosts[1].capacity_used), (4, 0));
}

#[tokio::test]
async fn test_unreadable_queue_reports_backend_stop() {
    let h = Harness::new();
    h.pending.set_offline(true);
    let report = h.processor().run_cycle().await;
    assert!(matches!(report.stopped, Some(StopReason::Backend(_))));
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn test_entry_with_quoted_numbers_is_placed() {
    let h = Harness::new();
    h.store.add_host("10.0.0.1", 8, 0).await;
    let plan = h.valheim_plan(2).await;
    let waiting = h.waiting_subscription(&plan, "valheim").await;
    // Replace the typed entry with one written by a client that quotes numbers.
    h.pending.pop(0).await.unwrap();
    h.pending
        .append(json!({
            "subscription_id": waiting.id.get().to_string(),
            "plan_id": plan.id.get().to_string(),
            "game_name": "valheim",
            "ram_needed": "2",
        }))
        .await
        .unwrap();

    let report = h.processor().run_cycle().await;
    assert_eq!(report.provisioned, 1);
    assert_eq!(h.store.servers().await[0].subscription_id, waiting.id);
}

#[tokio::test]
async fn test_scheduler_drains_queue_and_stops_on_shutdown() {
    let h = Harness::new();
    let plan = h.valheim_plan(2).await;
    h.trial("viking@example.com", &plan).await;
    h.store.add_host("10.0.0.1", 8, 0).await;

    let handle = PendingScheduler::new(h.ctx.clone(), Duration::from_millis(20)).spawn();

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while h.pending.len().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "scheduler never drained the queue");

    h.ctx.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler stops after shutdown")
        .unwrap();
}
