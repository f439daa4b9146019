//! End-to-end tests for the subscription path: on-change routing with
//! area filtering, continuous polling at per-area rates, unsubscribe and
//! death teardown, and the invalid-options table.

use std::time::Duration;

use tokio::time::sleep;
use vhal_core::{
    PropertyError, PropertyValue, SetValueRequest, SetValueRequests, SetValueResult, StatusCode,
    SubscribeOptions,
};
use vhal_tests::{
    area_continuous_prop, area_on_change_prop, global_continuous_prop, global_on_change_prop,
    int32_vec_prop, TestContext, INVALID_PROP_ID, ROW_1_LEFT, ROW_1_RIGHT,
};

const EVENT_WAIT: Duration = Duration::from_millis(500);

/// Write one value through the engine so the mock driver reflects it back
/// as a change event.
fn set_value(ctx: &TestContext, request_id: i64, value: PropertyValue) {
    ctx.hardware.add_set_value_responses(vec![SetValueResult {
        request_id,
        status: StatusCode::Ok,
    }]);
    let requests = SetValueRequests::inline(vec![SetValueRequest { request_id, value }]);
    ctx.vehicle.set_values(&ctx.client, requests).unwrap();
    ctx.callback
        .next_set_value_results()
        .expect("set must deliver its results");
}

fn subscribe_one(ctx: &TestContext, prop_id: i32, area_ids: Vec<i32>, sample_rate: f32) {
    ctx.vehicle
        .subscribe(
            &ctx.client,
            &[SubscribeOptions {
                prop_id,
                area_ids,
                sample_rate,
            }],
            0,
        )
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_unsubscribe() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, global_on_change_prop(), vec![], 0.0);
    ctx.vehicle
        .unsubscribe(&ctx.client, &[global_on_change_prop()])
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_global_on_change() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, global_on_change_prop(), vec![], 0.0);

    let test_value = PropertyValue::new(global_on_change_prop()).with_int32_values(vec![0]);
    set_value(&ctx, 0, test_value.clone());

    let (events, file_count) = ctx
        .callback
        .wait_for_property_event(EVENT_WAIT)
        .await
        .expect("no property event in callback");
    assert_eq!(events.payloads, vec![test_value]);
    assert_eq!(file_count, 0, "small event batches travel inline");
    assert!(
        ctx.callback.next_property_event().is_none(),
        "more events than expected"
    );
    // One set record plus one subscription record.
    assert_eq!(ctx.vehicle.client_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_global_on_change_unrelated_event_ignored() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, global_on_change_prop(), vec![], 0.0);

    // A change on a property nobody subscribed to is dropped silently.
    set_value(
        &ctx,
        0,
        PropertyValue::new(global_continuous_prop()).with_int32_values(vec![0]),
    );

    sleep(Duration::from_millis(100)).await;
    assert!(
        ctx.callback.next_property_event().is_none(),
        "must receive no event for an unsubscribed property"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_area_on_change() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, area_on_change_prop(), vec![ROW_1_LEFT], 0.0);

    let left_value = PropertyValue::new(area_on_change_prop())
        .with_area(ROW_1_LEFT)
        .with_int32_values(vec![0]);
    let right_value = PropertyValue::new(area_on_change_prop())
        .with_area(ROW_1_RIGHT)
        .with_int32_values(vec![0]);

    set_value(&ctx, 0, left_value.clone());
    set_value(&ctx, 1, right_value);

    let (events, _) = ctx
        .callback
        .wait_for_property_event(EVENT_WAIT)
        .await
        .expect("no property event in callback");
    assert_eq!(
        events.payloads,
        vec![left_value],
        "only the subscribed area may be delivered"
    );

    sleep(Duration::from_millis(100)).await;
    assert!(
        ctx.callback.next_property_event().is_none(),
        "the ROW_1_RIGHT change must not be delivered"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_area_on_change_all_areas() {
    let ctx = TestContext::new();
    // No area ids means subscribing to every configured area.
    subscribe_one(&ctx, area_on_change_prop(), vec![], 0.0);

    let left_value = PropertyValue::new(area_on_change_prop())
        .with_area(ROW_1_LEFT)
        .with_int32_values(vec![0]);
    let right_value = PropertyValue::new(area_on_change_prop())
        .with_area(ROW_1_RIGHT)
        .with_int32_values(vec![0]);

    // Both areas change in one hardware event batch: one batched delivery.
    ctx.hardware
        .trigger_property_change(vec![left_value.clone(), right_value.clone()]);

    let (events, _) = ctx
        .callback
        .wait_for_property_event(EVENT_WAIT)
        .await
        .expect("no property event in callback");
    let mut payloads = events.payloads;
    payloads.sort_by_key(|v| v.area_id);
    assert_eq!(payloads, vec![left_value, right_value]);
    assert!(
        ctx.callback.next_property_event().is_none(),
        "both areas must arrive in one delivery"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_global_continuous() {
    let ctx = TestContext::new();
    ctx.install_echo_responder();

    subscribe_one(&ctx, global_continuous_prop(), vec![], 20.0);

    // ~20 events in one second; accept generous scheduler jitter.
    sleep(Duration::from_secs(1)).await;
    let events = ctx.callback.drain_property_events();
    assert!(
        events.len() >= 15,
        "expected at least 15 events at 20 Hz, got {}",
        events.len()
    );
    let expected = PropertyValue::new(global_continuous_prop()).with_int32_values(vec![0]);
    for (batch, _) in &events {
        assert_eq!(batch.payloads, vec![expected.clone()]);
    }
    assert_eq!(ctx.vehicle.client_count(), 1);

    ctx.vehicle
        .unsubscribe(&ctx.client, &[global_continuous_prop()])
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_area_continuous_two_rates() {
    let ctx = TestContext::new();
    ctx.install_echo_responder();

    ctx.vehicle
        .subscribe(
            &ctx.client,
            &[
                SubscribeOptions {
                    prop_id: area_continuous_prop(),
                    area_ids: vec![ROW_1_LEFT],
                    sample_rate: 20.0,
                },
                SubscribeOptions {
                    prop_id: area_continuous_prop(),
                    area_ids: vec![ROW_1_RIGHT],
                    sample_rate: 10.0,
                },
            ],
            0,
        )
        .unwrap();

    sleep(Duration::from_secs(1)).await;
    ctx.vehicle
        .unsubscribe(&ctx.client, &[area_continuous_prop()])
        .unwrap();

    let mut left_count = 0usize;
    let mut right_count = 0usize;
    for (batch, _) in ctx.callback.drain_property_events() {
        for value in &batch.payloads {
            assert_eq!(value.prop, area_continuous_prop());
            match value.area_id {
                ROW_1_LEFT => left_count += 1,
                ROW_1_RIGHT => right_count += 1,
                other => panic!("event routed to unexpected area {other}"),
            }
        }
    }
    assert!(left_count >= 15, "expected at least 15 LEFT events, got {left_count}");
    assert!(right_count >= 5, "expected at least 5 RIGHT events, got {right_count}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe_stops_on_change_delivery() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, global_on_change_prop(), vec![], 0.0);
    ctx.vehicle
        .unsubscribe(&ctx.client, &[global_on_change_prop()])
        .unwrap();

    set_value(
        &ctx,
        0,
        PropertyValue::new(global_on_change_prop()).with_int32_values(vec![0]),
    );

    sleep(Duration::from_millis(100)).await;
    assert!(
        ctx.callback.next_property_event().is_none(),
        "no event may be generated after unsubscription"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe_stops_continuous_delivery() {
    let ctx = TestContext::new();
    ctx.install_echo_responder();

    subscribe_one(&ctx, global_continuous_prop(), vec![], 20.0);
    ctx.vehicle
        .unsubscribe(&ctx.client, &[global_continuous_prop()])
        .unwrap();

    // Let in-flight deliveries land, then drain them.
    sleep(Duration::from_millis(50)).await;
    ctx.callback.drain_property_events();

    sleep(Duration::from_millis(150)).await;
    assert!(
        ctx.callback.next_property_event().is_none(),
        "no event may be generated after unsubscription"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscribe_invalid_options() {
    let ctx = TestContext::new();
    let cases = [
        // Unknown property.
        SubscribeOptions {
            prop_id: INVALID_PROP_ID,
            area_ids: vec![],
            sample_rate: 0.0,
        },
        // The global area does not address an area-scoped property.
        SubscribeOptions {
            prop_id: area_on_change_prop(),
            area_ids: vec![0],
            sample_rate: 0.0,
        },
        // Continuous needs a strictly positive rate.
        SubscribeOptions {
            prop_id: global_continuous_prop(),
            area_ids: vec![],
            sample_rate: 0.0,
        },
        // Above the configured band of [0, 100].
        SubscribeOptions {
            prop_id: global_continuous_prop(),
            area_ids: vec![],
            sample_rate: 1000.0,
        },
        // Static properties are not subscribable.
        SubscribeOptions {
            prop_id: int32_vec_prop(0),
            area_ids: vec![],
            sample_rate: 0.0,
        },
    ];
    for option in cases {
        let error = ctx
            .vehicle
            .subscribe(&ctx.client, std::slice::from_ref(&option), 0)
            .unwrap_err();
        assert_eq!(
            error.status_code(),
            StatusCode::InvalidArg,
            "expected INVALID_ARG for {option:?}"
        );
    }
    assert_eq!(ctx.vehicle.client_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsubscribe_without_subscription_fails() {
    let ctx = TestContext::new();
    let error = ctx
        .vehicle
        .unsubscribe(&ctx.client, &[global_on_change_prop()])
        .unwrap_err();
    assert_eq!(error.status_code(), StatusCode::InvalidArg);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_property_set_error_routed_to_subscriber() {
    let ctx = TestContext::new();
    subscribe_one(&ctx, global_on_change_prop(), vec![], 0.0);

    ctx.hardware.trigger_property_set_error(vec![PropertyError {
        prop_id: global_on_change_prop(),
        area_id: 0,
        status: StatusCode::InternalError,
    }]);

    sleep(Duration::from_millis(100)).await;
    let errors = ctx
        .callback
        .next_property_set_errors()
        .expect("set error must reach the subscriber");
    assert_eq!(errors.payloads.len(), 1);
    assert_eq!(errors.payloads[0].status, StatusCode::InternalError);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_death_stops_subscriptions() {
    let ctx = TestContext::new();
    ctx.install_echo_responder();

    subscribe_one(&ctx, global_continuous_prop(), vec![], 20.0);
    sleep(Duration::from_millis(200)).await;
    assert!(!ctx.callback.drain_property_events().is_empty());

    ctx.vehicle.on_client_died(ctx.client_id());
    assert_eq!(ctx.vehicle.client_count(), 0);

    sleep(Duration::from_millis(50)).await;
    ctx.callback.drain_property_events();
    sleep(Duration::from_millis(150)).await;
    assert!(
        ctx.callback.next_property_event().is_none(),
        "a dead client may not receive events"
    );

    // The identity is free again; a fresh subscribe starts clean.
    subscribe_one(&ctx, global_continuous_prop(), vec![], 20.0);
    assert_eq!(ctx.vehicle.client_count(), 1);
    ctx.vehicle
        .unsubscribe(&ctx.client, &[global_continuous_prop()])
        .unwrap();
}
