//! vhald - Vehicle HAL service daemon
//!
//! Mediates between client applications and the vehicle hardware driver:
//! typed property gets/sets with per-request deadlines, on-change and
//! continuous subscriptions, shared-memory transport for large batches.
//!
//! Usage:
//!   vhald [config.toml]
//!
//! If no config file is provided, the daemon runs against the mock driver
//! with a small demo property set and a logging subscriber, which is
//! handy for poking at the engine without real hardware.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vhal_core::{
    AreaConfig, ChangeMode, GetValueResult, GetValueResults, PropertyConfig, PropertyErrors,
    PropertyType, PropertyValues, SetValueResults, StatusCode, SubscribeOptions, VehicleCallback,
};
use vhal_engine::{EngineConfig, MockVehicleHardware, Vehicle};

const SYSTEM: i32 = 0x1000_0000;
const GLOBAL: i32 = 0x0100_0000;

fn demo_speed_prop() -> i32 {
    0x0207 + SYSTEM + GLOBAL + PropertyType::Float.raw()
}

fn demo_ignition_prop() -> i32 {
    0x0401 + SYSTEM + GLOBAL + PropertyType::Int32.raw()
}

/// Daemon configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonConfig {
    engine: EngineConfig,
}

struct Args {
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let mut result = Args { config_path: None };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                result.config_path = Some(arg.to_string());
            }
            _ => {
                tracing::warn!("Unknown argument: {arg}");
            }
        }
    }
    result
}

fn print_help() {
    eprintln!(
        r#"vhald - Vehicle HAL service daemon

Usage: vhald [config.toml]

Options:
  -h, --help    Print this help message

Examples:
  # Run against the mock driver with demo properties
  vhald

  # Run with a config file
  vhald config.toml
"#
    );
}

/// Demo subscriber that logs every delivery it receives.
struct LoggingCallback;

impl VehicleCallback for LoggingCallback {
    fn on_get_values(&self, results: GetValueResults) {
        tracing::info!(count = results.payloads.len(), "get results");
    }

    fn on_set_values(&self, results: SetValueResults) {
        tracing::info!(count = results.payloads.len(), "set results");
    }

    fn on_property_event(&self, values: PropertyValues, _shared_memory_file_count: i32) {
        for value in &values.payloads {
            tracing::info!(
                prop = format_args!("{:#x}", value.prop),
                area_id = value.area_id,
                values = ?value.value.int32_values,
                floats = ?value.value.float_values,
                "property event"
            );
        }
    }

    fn on_property_set_error(&self, errors: PropertyErrors) {
        for error in &errors.payloads {
            tracing::warn!(
                prop = format_args!("{:#x}", error.prop_id),
                area_id = error.area_id,
                status = ?error.status,
                "property set error"
            );
        }
    }
}

fn demo_property_configs() -> Vec<PropertyConfig> {
    vec![
        PropertyConfig::new(demo_speed_prop())
            .with_change_mode(ChangeMode::Continuous)
            .with_sample_rate_band(0.1, 10.0)
            .with_area(AreaConfig::new(0).with_float_range(0.0, 300.0)),
        PropertyConfig::new(demo_ignition_prop()).with_change_mode(ChangeMode::OnChange),
    ]
}

fn demo_hardware() -> Arc<MockVehicleHardware> {
    let hardware = Arc::new(MockVehicleHardware::new());
    hardware.set_property_configs(demo_property_configs());

    // Answer poll reads with a slowly changing speed value.
    let tick = AtomicI32::new(0);
    hardware.set_get_value_responder(Box::new(move |requests| {
        let tick = tick.fetch_add(1, Ordering::Relaxed);
        requests
            .iter()
            .map(|request| {
                let mut prop = request.prop.clone();
                prop.value.float_values = vec![(tick % 120) as f32];
                GetValueResult {
                    request_id: request.request_id,
                    status: StatusCode::Ok,
                    prop: Some(prop),
                }
            })
            .collect()
    }));
    hardware
}

fn load_config(args: &Args) -> anyhow::Result<DaemonConfig> {
    let Some(ref path) = args.config_path else {
        return Ok(DaemonConfig::default());
    };
    tracing::info!("Loading config from: {path}");
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vhald=info,vhal_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vhald (Vehicle HAL daemon)");

    let args = parse_args();
    let config = load_config(&args)?;

    if args.config_path.is_none() {
        tracing::info!("No config file provided, using mock driver with demo properties");
    }

    let hardware = demo_hardware();
    let vehicle = Vehicle::with_config(hardware, config.engine);

    // Attach the demo subscriber so events show up in the log.
    let callback: Arc<dyn VehicleCallback> = Arc::new(LoggingCallback);
    vehicle
        .subscribe(
            &callback,
            &[
                SubscribeOptions {
                    prop_id: demo_speed_prop(),
                    area_ids: vec![],
                    sample_rate: 1.0,
                },
                SubscribeOptions {
                    prop_id: demo_ignition_prop(),
                    area_ids: vec![],
                    sample_rate: 0.0,
                },
            ],
            0,
        )
        .map_err(|e| anyhow::anyhow!("demo subscription failed: {e}"))?;

    tracing::info!(
        properties = demo_property_configs().len(),
        "serving; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
