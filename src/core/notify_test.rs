use std::time::Duration;

use super::*;
use crate::test_utils::as_conn;
use crate::test_utils::test_object;
use crate::test_utils::TestConn;
use crate::WatchEvent;

fn completion_of(conn: &TestConn) -> (Vec<(WatcherId, Vec<u8>)>, Vec<WatcherId>, bool) {
    let completions = conn.completions();
    assert_eq!(completions.len(), 1, "expected exactly one completion");
    match &completions[0] {
        WatchEvent::NotifyComplete {
            replies,
            missed,
            timed_out,
            ..
        } => (replies.clone(), missed.clone(), *timed_out),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn zero_watchers_completes_during_init() {
    let (_host, timer, object) = test_object();
    let notifier_conn = TestConn::new("notifier");

    object
        .notify_broadcast(as_conn(&notifier_conn), 7, 42, b"ping".to_vec(), 0)
        .unwrap();

    let (replies, missed, timed_out) = completion_of(&notifier_conn);
    assert!(replies.is_empty());
    assert!(missed.is_empty());
    assert!(!timed_out);
    // completed broadcasts leave the in-flight table and retire their timer
    assert_eq!(object.in_flight_count(), 0);
    assert_eq!(timer.pending_count(), 0);
}

#[tokio::test]
async fn single_watcher_ack_completes_immediately() {
    let (_host, _timer, object) = test_object();
    let watcher_conn = TestConn::new("watcher");
    let notifier_conn = TestConn::new("notifier");

    let watch = object.watch_register(as_conn(&watcher_conn), 1, 100, 30, false).unwrap();
    let notify_id = object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"event".to_vec(), 0)
        .unwrap();

    // delivered to the sole watcher right away
    assert!(watcher_conn.events().iter().any(
        |e| matches!(e, WatchEvent::Notify { notify_id: n, payload, .. } if *n == notify_id && payload == b"event")
    ));

    object.notify_ack(watch.id(), notify_id, b"ok".to_vec()).unwrap();

    let (replies, missed, timed_out) = completion_of(&notifier_conn);
    assert_eq!(replies, vec![(WatcherId::new(1, 100), b"ok".to_vec())]);
    assert!(missed.is_empty());
    assert!(!timed_out);
    assert_eq!(object.in_flight_count(), 0);
}

#[tokio::test]
async fn timeout_partitions_replied_and_missed() {
    let (_host, timer, object) = test_object();
    let conn1 = TestConn::new("w1");
    let conn2 = TestConn::new("w2");
    let notifier_conn = TestConn::new("notifier");

    let w1 = object.watch_register(as_conn(&conn1), 1, 100, 30, false).unwrap();
    let w2 = object.watch_register(as_conn(&conn2), 2, 200, 30, false).unwrap();
    let notify_id = object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"x".to_vec(), 5)
        .unwrap();

    object.notify_ack(w1.id(), notify_id, b"first".to_vec()).unwrap();
    assert!(notifier_conn.completions().is_empty());

    timer.fire_elapsed(Duration::from_secs(5));

    let (replies, missed, timed_out) = completion_of(&notifier_conn);
    assert_eq!(replies, vec![(WatcherId::new(1, 100), b"first".to_vec())]);
    assert_eq!(missed, vec![WatcherId::new(2, 200)]);
    assert!(timed_out);

    // the missed watcher was told to drop the notify; its ack changes nothing
    object.notify_ack(w2.id(), notify_id, b"too-late".to_vec()).unwrap();
    assert_eq!(notifier_conn.completions().len(), 1);
}

#[tokio::test]
async fn completion_happens_exactly_once_under_timer_race() {
    let (_host, timer, object) = test_object();
    let watcher_conn = TestConn::new("watcher");
    let notifier_conn = TestConn::new("notifier");

    let watch = object.watch_register(as_conn(&watcher_conn), 1, 100, 30, false).unwrap();
    let notify_id = object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"x".to_vec(), 5)
        .unwrap();

    object.notify_ack(watch.id(), notify_id, b"ok".to_vec()).unwrap();
    // the deadline callback lost the cancellation race and fires anyway
    timer.fire_all_ignoring_cancel();

    let (replies, missed, timed_out) = completion_of(&notifier_conn);
    assert_eq!(replies.len(), 1);
    assert!(missed.is_empty());
    assert!(!timed_out);
}

#[tokio::test]
async fn schedule_failure_degrades_to_ack_only_completion() {
    let (_host, timer, object) = test_object();
    let watcher_conn = TestConn::new("watcher");
    let notifier_conn = TestConn::new("notifier");

    let watch = object.watch_register(as_conn(&watcher_conn), 1, 100, 30, false).unwrap();
    timer.fail_next_schedule();
    let notify_id = object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"x".to_vec(), 5)
        .unwrap();

    // no deadline was armed, the broadcast waits for acknowledgements
    assert_eq!(timer.pending_count(), 0);
    assert!(notifier_conn.completions().is_empty());

    object.notify_ack(watch.id(), notify_id, b"ok".to_vec()).unwrap();
    let (replies, missed, timed_out) = completion_of(&notifier_conn);
    assert_eq!(replies.len(), 1);
    assert!(missed.is_empty());
    assert!(!timed_out);
}

#[tokio::test]
async fn discarded_broadcast_sends_no_reply() {
    let (_host, timer, object) = test_object();
    let watcher_conn = TestConn::new("watcher");
    let notifier_conn = TestConn::new("notifier");

    object.watch_register(as_conn(&watcher_conn), 1, 100, 30, false).unwrap();
    object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"x".to_vec(), 5)
        .unwrap();

    object.discard_all();

    assert!(notifier_conn.completions().is_empty());
    assert_eq!(object.watcher_count(), 0);
    assert_eq!(object.in_flight_count(), 0);
    assert_eq!(timer.pending_count(), 0);

    // a deadline callback that limps in after teardown is a no-op
    timer.fire_all_ignoring_cancel();
    assert!(notifier_conn.completions().is_empty());
}

#[tokio::test]
async fn broadcast_carries_object_version() {
    let (_host, _timer, object) = test_object();
    let watcher_conn = TestConn::new("watcher");
    let notifier_conn = TestConn::new("notifier");

    object.update_version(17);
    object.watch_register(as_conn(&watcher_conn), 1, 100, 30, false).unwrap();
    let notify_id = object
        .notify_broadcast(as_conn(&notifier_conn), 7, 0, b"x".to_vec(), 0)
        .unwrap();

    assert!(watcher_conn.events().iter().any(
        |e| matches!(e, WatchEvent::Notify { notify_id: n, version: 17, .. } if *n == notify_id)
    ));
}
