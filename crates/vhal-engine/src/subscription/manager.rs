//! Subscription manager
//!
//! Tracks which client wants which (property, area) in which mode, owns
//! the poll jobs that drive continuous subscriptions, and fans hardware
//! change events out to matching on-change subscribers.
//!
//! Continuous delivery is driven by polling: one task per (property,
//! area) issues a driver read at the maximum rate across that area's
//! subscribers and distributes the reply. That keeps rate control and
//! cancellation in the engine; hardware-originated change events feed
//! on-change subscriptions only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};
use vhal_core::{
    Batch, ChangeMode, ClientId, GetValueRequest, GetValuesCallback, PropertyError, PropertyValue,
    PropertyValues, StatusCode, SubscribeOptions, VehicleCallback, VehicleError, VehicleHardware,
    VehicleResult,
};

use crate::config_store::PropertyConfigStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscribeMode {
    OnChange,
    Continuous,
}

/// One client's interest in a single (property, area) pair. Re-subscribing
/// the same pair replaces the previous entry in one step.
#[derive(Debug, Clone, Copy)]
struct Subscription {
    mode: SubscribeMode,
    sample_rate: f32,
}

/// A connected subscription client: the delivery channel plus its spill
/// budget from the subscribe call.
struct ClientRecord {
    callback: Arc<dyn VehicleCallback>,
    max_shared_memory_file_count: i32,
}

struct PollJob {
    sample_rate: f32,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SubState {
    /// (prop, area) -> subscriber set.
    subscribers: HashMap<(i32, i32), HashMap<ClientId, Subscription>>,
    /// Strong callback refs, one per client with at least one subscription.
    clients: HashMap<ClientId, ClientRecord>,
    poll_jobs: HashMap<(i32, i32), PollJob>,
}

pub struct SubscriptionManager {
    hardware: Arc<dyn VehicleHardware>,
    configs: Arc<PropertyConfigStore>,
    rt: Handle,
    /// Weak self-handle for the callbacks handed to poll tasks and the
    /// driver, so they never keep a dropped engine alive.
    self_ref: Weak<SubscriptionManager>,
    state: Mutex<SubState>,
    /// Synthetic ids for the reads issued by poll jobs.
    poll_request_id: AtomicI64,
}

impl SubscriptionManager {
    /// Must be called from within a tokio runtime; poll jobs and fan-out
    /// deliveries run on the runtime captured here.
    pub fn new(hardware: Arc<dyn VehicleHardware>, configs: Arc<PropertyConfigStore>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| SubscriptionManager {
            hardware,
            configs,
            rt: Handle::current(),
            self_ref: self_ref.clone(),
            state: Mutex::new(SubState::default()),
            poll_request_id: AtomicI64::new(0),
        })
    }

    /// Install or replace subscriptions for every option in the call.
    /// Validation covers the whole call before any state changes: one bad
    /// option rejects everything.
    pub fn subscribe(
        &self,
        callback: &Arc<dyn VehicleCallback>,
        options: &[SubscribeOptions],
        max_shared_memory_file_count: i32,
    ) -> VehicleResult<()> {
        let mut parsed: Vec<(i32, Vec<i32>, Subscription)> = Vec::with_capacity(options.len());
        for option in options {
            let config = self.configs.lookup(option.prop_id).ok_or_else(|| {
                VehicleError::InvalidArg(format!("unknown property {:#x}", option.prop_id))
            })?;
            let mode = match config.change_mode {
                ChangeMode::Static => {
                    return Err(VehicleError::InvalidArg(format!(
                        "static property {:#x} is not subscribable",
                        option.prop_id
                    )));
                }
                ChangeMode::OnChange => SubscribeMode::OnChange,
                ChangeMode::Continuous => {
                    if option.sample_rate <= 0.0 {
                        return Err(VehicleError::InvalidArg(format!(
                            "sample rate {} must be positive for continuous property {:#x}",
                            option.sample_rate, option.prop_id
                        )));
                    }
                    if option.sample_rate < config.min_sample_rate
                        || option.sample_rate > config.max_sample_rate
                    {
                        return Err(VehicleError::InvalidArg(format!(
                            "sample rate {} outside [{}, {}] for property {:#x}",
                            option.sample_rate,
                            config.min_sample_rate,
                            config.max_sample_rate,
                            option.prop_id
                        )));
                    }
                    SubscribeMode::Continuous
                }
            };
            let area_ids = if option.area_ids.is_empty() {
                config.area_ids()
            } else {
                for area_id in &option.area_ids {
                    config.check_area(*area_id)?;
                }
                option.area_ids.clone()
            };
            parsed.push((
                option.prop_id,
                area_ids,
                Subscription {
                    mode,
                    sample_rate: option.sample_rate,
                },
            ));
        }

        let client = ClientId::of(callback);
        let mut state = self.state.lock();
        state.clients.entry(client).or_insert_with(|| ClientRecord {
            callback: callback.clone(),
            max_shared_memory_file_count,
        });
        for (prop, area_ids, subscription) in parsed {
            for area_id in area_ids {
                let key = (prop, area_id);
                state
                    .subscribers
                    .entry(key)
                    .or_default()
                    .insert(client, subscription);
                if subscription.mode == SubscribeMode::Continuous {
                    self.recompute_poll_job(&mut state, key);
                }
            }
        }
        Ok(())
    }

    /// Drop this client's subscriptions on the listed properties. The
    /// whole call fails if any requested property has no subscription for
    /// the client; the others are left untouched in that case.
    pub fn unsubscribe(&self, client: ClientId, prop_ids: &[i32]) -> VehicleResult<()> {
        let mut state = self.state.lock();
        for prop in prop_ids {
            let subscribed = state
                .subscribers
                .iter()
                .any(|((p, _), subs)| p == prop && subs.contains_key(&client));
            if !subscribed {
                return Err(VehicleError::InvalidArg(format!(
                    "client has no subscription on property {prop:#x}"
                )));
            }
        }
        for prop in prop_ids {
            self.remove_prop_subscriptions(&mut state, client, *prop);
        }
        Self::release_client_if_idle(&mut state, client);
        Ok(())
    }

    /// Silent teardown for a dead client: all subscriptions gone, poll
    /// jobs whose last subscriber left are stopped.
    pub fn drop_client(&self, client: ClientId) {
        let mut state = self.state.lock();
        let props: Vec<i32> = state
            .subscribers
            .iter()
            .filter(|(_, subs)| subs.contains_key(&client))
            .map(|((prop, _), _)| *prop)
            .collect();
        for prop in props {
            self.remove_prop_subscriptions(&mut state, client, prop);
        }
        Self::release_client_if_idle(&mut state, client);
    }

    /// Hardware-originated change events. Values for unsubscribed
    /// (property, area) pairs are dropped silently; continuous
    /// subscribers are not interested in change events.
    pub fn on_property_change(&self, values: Vec<PropertyValue>) {
        self.fan_out(values, SubscribeMode::OnChange);
    }

    /// Asynchronous set failures, routed to every subscriber of the
    /// failing (property, area) regardless of mode.
    pub fn on_property_set_error(&self, errors: Vec<PropertyError>) {
        if errors.is_empty() {
            return;
        }
        let mut per_client: HashMap<ClientId, (Arc<dyn VehicleCallback>, Vec<PropertyError>)> =
            HashMap::new();
        {
            let state = self.state.lock();
            for error in errors {
                let Some(subs) = state.subscribers.get(&(error.prop_id, error.area_id)) else {
                    continue;
                };
                for client in subs.keys() {
                    let Some(record) = state.clients.get(client) else {
                        continue;
                    };
                    per_client
                        .entry(*client)
                        .or_insert_with(|| (record.callback.clone(), Vec::new()))
                        .1
                        .push(error.clone());
                }
            }
        }
        for (_, (callback, errors)) in per_client {
            self.rt.spawn(async move {
                callback.on_property_set_error(Batch::inline(errors));
            });
        }
    }

    /// Number of clients with at least one live subscription.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Deliver `values` to every subscriber in `mode` whose (property,
    /// area) matches, one batched delivery per client, on a worker
    /// distinct from the caller's thread.
    fn fan_out(&self, values: Vec<PropertyValue>, mode: SubscribeMode) {
        if values.is_empty() {
            return;
        }
        let mut per_client: HashMap<ClientId, (Arc<dyn VehicleCallback>, i32, Vec<PropertyValue>)> =
            HashMap::new();
        {
            let state = self.state.lock();
            for value in values {
                let Some(subs) = state.subscribers.get(&(value.prop, value.area_id)) else {
                    continue;
                };
                for (client, subscription) in subs {
                    if subscription.mode != mode {
                        continue;
                    }
                    let Some(record) = state.clients.get(client) else {
                        continue;
                    };
                    per_client
                        .entry(*client)
                        .or_insert_with(|| {
                            (
                                record.callback.clone(),
                                record.max_shared_memory_file_count,
                                Vec::new(),
                            )
                        })
                        .2
                        .push(value.clone());
                }
            }
        }
        for (client, (callback, spill_budget, values)) in per_client {
            self.rt.spawn(async move {
                let batch = if spill_budget > 0 {
                    match PropertyValues::from_payloads(values) {
                        Ok(batch) => batch,
                        Err(error) => {
                            warn!(?client, %error, "failed to encode property event batch");
                            return;
                        }
                    }
                } else {
                    Batch::inline(values)
                };
                let file_count = if batch.is_spilled() { 1 } else { 0 };
                callback.on_property_event(batch, file_count);
            });
        }
    }

    /// One poll tick: read (prop, area) from the driver and distribute
    /// the reply to that area's continuous subscribers.
    fn poll_once(&self, (prop, area_id): (i32, i32)) {
        let request = GetValueRequest {
            request_id: self.poll_request_id.fetch_add(1, Ordering::Relaxed),
            prop: PropertyValue::new(prop).with_area(area_id),
        };
        let manager = self.self_ref.clone();
        let callback: GetValuesCallback = Arc::new(move |results| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let values: Vec<PropertyValue> = results
                .into_iter()
                .filter(|result| result.status == StatusCode::Ok)
                .filter_map(|result| result.prop)
                .collect();
            manager.fan_out(values, SubscribeMode::Continuous);
        });
        let status = self.hardware.get_values(callback, &[request]);
        if status != StatusCode::Ok {
            debug!(
                prop = format_args!("{prop:#x}"),
                area_id,
                ?status,
                "poll read rejected by driver"
            );
        }
    }

    /// Bring the poll job for `key` in line with its current subscriber
    /// set: stopped when the last continuous subscriber left, otherwise
    /// running at the maximum requested rate.
    fn recompute_poll_job(&self, state: &mut SubState, key: (i32, i32)) {
        let max_rate = state
            .subscribers
            .get(&key)
            .into_iter()
            .flat_map(|subs| subs.values())
            .filter(|s| s.mode == SubscribeMode::Continuous)
            .map(|s| s.sample_rate)
            .fold(None, |max: Option<f32>, rate| {
                Some(max.map_or(rate, |m| m.max(rate)))
            });

        match max_rate {
            None => {
                if let Some(job) = state.poll_jobs.remove(&key) {
                    debug!(key = ?key, "stopping poll job, last subscriber left");
                    job.handle.abort();
                }
            }
            Some(rate) => {
                if let Some(job) = state.poll_jobs.get(&key) {
                    if job.sample_rate == rate {
                        return;
                    }
                    debug!(key = ?key, rate, "poll rate changed, restarting job");
                }
                if let Some(job) = state.poll_jobs.remove(&key) {
                    job.handle.abort();
                }
                let handle = self.spawn_poll_job(key, rate);
                state.poll_jobs.insert(
                    key,
                    PollJob {
                        sample_rate: rate,
                        handle,
                    },
                );
            }
        }
    }

    fn spawn_poll_job(&self, key: (i32, i32), rate: f32) -> JoinHandle<()> {
        let manager = self.self_ref.clone();
        self.rt.spawn(async move {
            let mut interval = time::interval(Duration::from_secs_f32(1.0 / rate));
            // Missed ticks are dropped, not coalesced into a burst.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.poll_once(key);
            }
        })
    }

    fn remove_prop_subscriptions(&self, state: &mut SubState, client: ClientId, prop: i32) {
        let keys: Vec<(i32, i32)> = state
            .subscribers
            .keys()
            .filter(|(p, _)| *p == prop)
            .copied()
            .collect();
        for key in keys {
            let emptied = {
                let Some(subs) = state.subscribers.get_mut(&key) else {
                    continue;
                };
                subs.remove(&client);
                subs.is_empty()
            };
            if emptied {
                state.subscribers.remove(&key);
            }
            self.recompute_poll_job(state, key);
        }
    }

    /// Drop the strong callback ref once the client's last subscription
    /// is gone.
    fn release_client_if_idle(state: &mut SubState, client: ClientId) {
        let still_subscribed = state
            .subscribers
            .values()
            .any(|subs| subs.contains_key(&client));
        if !still_subscribed {
            state.clients.remove(&client);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for job in self.state.lock().poll_jobs.values() {
            job.handle.abort();
        }
    }
}
