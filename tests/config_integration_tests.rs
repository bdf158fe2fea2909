//! Configuration files feeding a `Dispatcher`.

use dispatch_core::{
    ConfigLoader, Context, DispatchError, Dispatcher, HandlerUnit, OutcomeMatcher, Verdict,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_loaded_step_limit_applies_to_runs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dispatch.toml");
    fs::write(&path, "max_machine_steps = 3\n").unwrap();

    let config = ConfigLoader::load_file(&path).unwrap();
    let dispatcher = Dispatcher::with_config(config).unwrap();
    dispatcher.register_handler(
        HandlerUnit::always("again", |_: &mut Context| Ok(Verdict::Handled)).into_ref(),
    );
    dispatcher
        .build_state_machine(
            "loop",
            &[("Spin", "again")],
            &[("Spin", OutcomeMatcher::Handled, "Spin")],
            None,
        )
        .unwrap();

    assert!(matches!(
        dispatcher.run("loop", Context::new()).unwrap_err(),
        DispatchError::StepLimitExceeded { limit: 3, .. }
    ));
}

#[test]
fn test_panic_capture_can_be_configured_off() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dispatch.yaml");
    fs::write(&path, "catch_panics: false\nlogging:\n  json: true\n").unwrap();

    let config = ConfigLoader::load_file(&path).unwrap();
    assert!(!config.catch_panics);
    assert!(config.logging.json);

    let dispatcher = Dispatcher::with_config(config).unwrap();
    dispatcher.register_handler(
        HandlerUnit::always("boom", |_: &mut Context| -> Result<Verdict, dispatch_core::HandlerFault> {
            panic!("unguarded")
        })
        .into_ref(),
    );
    dispatcher.build_chain("unguarded", &["boom"]).unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        dispatcher.run("unguarded", Context::new())
    }));
    assert!(result.is_err());
}

#[test]
fn test_invalid_file_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dispatch.toml");
    fs::write(&path, "default_deadline_ms = 0\n").unwrap();

    let err = ConfigLoader::load_file(&path).unwrap_err();
    assert!(err.is_definition_error());
    assert!(matches!(err, DispatchError::Configuration(_)));
}

#[test]
fn test_directory_loader_layers_environment_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("dispatch.toml"), "max_machine_steps = 100\n").unwrap();
    fs::write(dir.path().join("dispatch.staging.toml"), "max_machine_steps = 7\n").unwrap();

    let loader = ConfigLoader::with_environment(dir.path(), "staging");
    assert_eq!(loader.environment(), "staging");
    let config = loader.load().unwrap();
    assert_eq!(config.max_machine_steps, 7);
}
