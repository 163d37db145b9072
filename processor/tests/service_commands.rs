//! Service setup and control-plane command handlers, exercised offline:
//! handlers run exactly as the bus dispatcher would invoke them, mutating
//! the same registry and model pointer the pipeline reads.

use std::path::Path;

use serde_json::json;

use cupertino_processor::config::{
    ModelConfig, MqttConfig, ProcessorConfig, SimTargetConfig, SimulationConfig, ZoneConfig,
};
use cupertino_processor::control::CommandError;
use cupertino_processor::service::StreamProcessorService;
use cupertino_processor::sim::simulation_runtime;

fn test_config(models_dir: &Path) -> ProcessorConfig {
    ProcessorConfig {
        service_id: "cam_test".to_string(),
        source_url: "synthetic://walker".to_string(),
        source_id: 0,
        max_fps: 25,
        frame_resolution_wh: (640, 480),
        models_dir: models_dir.to_path_buf(),
        model: ModelConfig::default(),
        zones: vec![
            ZoneConfig {
                zone_id: "entrance".to_string(),
                zone_type: "polygon".to_string(),
                coordinates: vec![(100, 100), (300, 100), (300, 300), (100, 300)],
                enabled: true,
            },
            ZoneConfig {
                zone_id: "doorway".to_string(),
                zone_type: "line".to_string(),
                coordinates: vec![(0, 240), (640, 240)],
                enabled: false,
            },
        ],
        mqtt: MqttConfig {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            qos: 0,
            detection_topic: "cupertino/data/detections/{service_id}".to_string(),
            zone_event_topic: "cupertino/data/zones/{service_id}".to_string(),
        },
        simulation: Some(SimulationConfig {
            enabled: true,
            frame_count: Some(1),
            targets: vec![SimTargetConfig {
                class_id: 0,
                class_name: Some("person".to_string()),
                speed: 1.0,
                size: (40.0, 80.0),
                path: vec![(320.0, 240.0)],
            }],
        }),
    }
}

fn service_with_models(models: &[&str]) -> (StreamProcessorService, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for name in models {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let config = test_config(dir.path());
    let runtime = simulation_runtime(&config).expect("simulation enabled");
    let mut service = StreamProcessorService::new(config, runtime);
    service.setup().unwrap();
    (service, dir)
}

#[tokio::test]
async fn setup_loads_zones_model_and_commands() {
    let (service, _dir) = service_with_models(&["yolo12n-640.onnx"]);

    let zones = service.registry().list();
    assert_eq!(zones.len(), 2);
    assert_eq!(zones.get("entrance"), Some(&true));
    assert_eq!(zones.get("doorway"), Some(&false));

    let commands = service.control().command_registry();
    for name in [
        "add_zone",
        "remove_zone",
        "enable_zone",
        "disable_zone",
        "list_zones",
        "set_model",
        "get_model",
        "pause",
        "resume",
        "status",
        "health",
    ] {
        assert!(commands.has(name), "command '{name}' not registered");
    }

    let info = service.current_model_info().unwrap();
    assert_eq!(info.variant, "n");
    assert_eq!(info.input_size, 640);
}

#[tokio::test]
async fn zone_commands_mutate_the_registry() {
    let (service, _dir) = service_with_models(&["yolo12n-640.onnx"]);
    let commands = service.control().command_registry();

    commands
        .execute(
            "add_zone",
            &json!({
                "command": "add_zone",
                "zone_id": "dock",
                "zone_type": "polygon",
                "coordinates": [[0, 0], [50, 0], [50, 50], [0, 50]],
            }),
        )
        .unwrap();
    assert_eq!(service.registry().count(), 3);

    commands
        .execute("disable_zone", &json!({ "zone_id": "dock" }))
        .unwrap();
    assert_eq!(service.registry().list().get("dock"), Some(&false));

    commands
        .execute("enable_zone", &json!({ "zone_id": "dock" }))
        .unwrap();
    assert_eq!(service.registry().list().get("dock"), Some(&true));

    commands
        .execute("remove_zone", &json!({ "zone_id": "dock" }))
        .unwrap();
    assert_eq!(service.registry().count(), 2);

    // Duplicate add surfaces as a handler failure, not a crash.
    let err = commands
        .execute(
            "add_zone",
            &json!({
                "command": "add_zone",
                "zone_id": "entrance",
                "zone_type": "polygon",
                "coordinates": [[0, 0], [50, 0], [50, 50]],
            }),
        )
        .unwrap_err();
    assert!(matches!(err, CommandError::Failed { .. }));
}

#[tokio::test]
async fn set_model_hot_swaps_the_current_pointer() {
    let (service, _dir) =
        service_with_models(&["yolo12n-640.onnx", "yolo12s-640.onnx"]);
    let commands = service.control().command_registry();
    assert_eq!(service.current_model_info().unwrap().variant, "n");

    commands
        .execute(
            "set_model",
            &json!({ "command": "set_model", "variant": "s", "input_size": 640 }),
        )
        .unwrap();
    assert_eq!(service.current_model_info().unwrap().variant, "s");

    // A missing catalog file fails the command and leaves the pointer as-is.
    let err = commands
        .execute("set_model", &json!({ "variant": "x" }))
        .unwrap_err();
    match err {
        CommandError::Failed { source, .. } => {
            assert!(source.to_string().contains("not found"));
        }
        other => panic!("expected Failed, got {other}"),
    }
    assert_eq!(service.current_model_info().unwrap().variant, "s");
}

#[tokio::test]
async fn unknown_command_changes_nothing() {
    let (service, _dir) = service_with_models(&["yolo12n-640.onnx"]);
    let commands = service.control().command_registry();
    let before = service.registry().list();

    let err = commands
        .execute("noop", &json!({ "command": "noop" }))
        .unwrap_err();
    match err {
        CommandError::Unknown { available, .. } => {
            assert!(available.contains(&"pause".to_string()));
            assert!(available.contains(&"set_model".to_string()));
        }
        other => panic!("expected Unknown, got {other}"),
    }
    assert_eq!(service.registry().list(), before);
    assert_eq!(service.current_model_info().unwrap().variant, "n");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (mut service, _dir) = service_with_models(&["yolo12n-640.onnx"]);
    // Never started: both calls are no-ops with the same observable state.
    service.stop().await;
    service.stop().await;
    assert_eq!(service.registry().count(), 2);
}

#[tokio::test]
async fn pause_and_resume_toggle_publishing() {
    let (service, _dir) = service_with_models(&["yolo12n-640.onnx"]);
    let commands = service.control().command_registry();

    assert!(!service.is_paused());
    commands.execute("pause", &json!({})).unwrap();
    assert!(service.is_paused());
    commands.execute("resume", &json!({})).unwrap();
    assert!(!service.is_paused());

    // Status-style commands run without side effects.
    commands.execute("status", &json!({})).unwrap();
    commands.execute("health", &json!({})).unwrap();
    commands.execute("list_zones", &json!({})).unwrap();
    commands.execute("get_model", &json!({})).unwrap();
}
