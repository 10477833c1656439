//! Alert delivery policy, deferral, and escalation end to end.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use vigil::clock::ManualClock;
use vigil::config::{EscalationConfig, NotificationConfig};
use vigil::events::{EventBus, Subscription, VigilEvent};
use vigil::notifications::{
    Alert, AlertLog, ContextSnapshot, Decision, DeliveryState, DeviceContext, Importance,
    NotificationCenter, NotificationPolicyEngine, RecordingSink,
};

struct Harness {
    device: Arc<DeviceContext>,
    sink: Arc<RecordingSink>,
    center: Arc<NotificationCenter>,
    events: Subscription,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 12, 14, 30, 0).unwrap(),
    ));
    let log = Arc::new(AlertLog::new());
    let device = Arc::new(DeviceContext::new(clock.clone(), log.clone()));
    let sink = Arc::new(RecordingSink::new());
    let bus = EventBus::new();
    let events = bus.subscribe();
    let center = NotificationCenter::new(
        NotificationConfig::default(),
        EscalationConfig::default(),
        device.clone(),
        log,
        sink.clone(),
        clock,
        bus,
    )
    .unwrap();
    Harness {
        device,
        sink,
        center,
        events,
    }
}

fn alert(title: &str, importance: Importance) -> Alert {
    Alert {
        title: title.to_owned(),
        message: String::new(),
        importance,
    }
}

async fn settle(secs: u64) {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    tokio::time::advance(Duration::from_secs(secs)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut Subscription) -> Vec<VigilEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.receiver.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn normal_alert_waits_out_a_call() {
    let mut h = harness();
    h.device.set_in_call(true);
    let id = h.center.submit(alert("Package arrived", Importance::Normal));

    let events = drain(&mut h.events);
    assert!(matches!(
        events.as_slice(),
        [VigilEvent::NotificationDelayed { delay, .. }] if *delay == Duration::from_secs(300)
    ));

    h.device.set_in_call(false);
    settle(300).await;
    assert_eq!(h.sink.deliveries_for(id), 1);
    assert_eq!(h.center.get(id).unwrap().state, DeliveryState::Delivered);
    assert!(matches!(
        drain(&mut h.events).as_slice(),
        [VigilEvent::NotificationDelivered { importance: Importance::Normal, .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn acknowledgment_just_before_due_prevents_escalation() {
    let mut h = harness();
    let id = h.center.submit(alert("Smoke alarm", Importance::Urgent));
    assert_eq!(h.sink.deliveries_for(id), 1);
    assert!(h.center.escalation_pending(id));

    settle(29).await;
    assert!(h.center.mark_interacted(id));
    settle(300).await;

    assert!(h.sink.escalations_for(id).is_empty());
    assert_eq!(h.center.get(id).unwrap().escalation_count, 0);
    assert!(
        !drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, VigilEvent::NotificationEscalated { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn urgent_escalates_until_acknowledged() {
    let h = harness();
    let id = h.center.submit(alert("Medication", Importance::Urgent));
    for _ in 0..3 {
        settle(30).await;
    }
    let steps = h.sink.escalations_for(id);
    assert_eq!(steps.len(), 3);
    assert_eq!(
        steps.iter().map(|s| s.volume_percent).collect::<Vec<_>>(),
        vec![Some(100), Some(100), Some(100)]
    );

    h.center.mark_interacted(id);
    settle(120).await;
    assert_eq!(h.sink.escalations_for(id).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn busy_hour_batches_low_alerts() {
    let mut h = harness();
    for n in 0..6 {
        h.center.submit(alert(&format!("update {n}"), Importance::Normal));
    }
    drain(&mut h.events);

    h.device.set_in_call(true);
    h.center.submit(alert("newsletter", Importance::Low));
    assert!(matches!(
        drain(&mut h.events).as_slice(),
        [VigilEvent::NotificationDelayed { delay, .. }] if *delay == Duration::from_secs(3600)
    ));
}

#[test]
fn urgent_always_delivers_now() {
    let policy = NotificationPolicyEngine::new(NotificationConfig::default());
    for in_call in [false, true] {
        for do_not_disturb in [false, true] {
            for local_hour in 0..24 {
                let ctx = ContextSnapshot {
                    in_call,
                    do_not_disturb,
                    local_hour,
                    recent_alert_count: 50,
                };
                assert_eq!(policy.decide(Importance::Urgent, &ctx), Decision::DeliverNow);
            }
        }
    }
}
