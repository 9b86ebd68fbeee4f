//! Builtin and zone-registered native module resolution.

use serde_json::Value;

use enclave::{ExecuteRequest, NativeModule, ResponseCode};

use crate::fixtures::{bare_zone, ensure_builtins};

#[test]
fn test_builtin_module_call() {
    ensure_builtins();
    let zone = bare_zone("builtin-call", 2);

    let response = zone.execute_sync(
        ExecuteRequest::function("add")
            .in_module("math")
            .with_arguments(["2", "3"]),
    );
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(response.return_value.as_deref(), Some("5"));
}

#[test]
fn test_builtin_available_from_every_worker() {
    ensure_builtins();
    let zone = bare_zone("builtin-workers", 3);

    for i in 0..6 {
        let response = zone.execute_sync(
            ExecuteRequest::function("max")
                .in_module("math")
                .with_arguments([i.to_string(), "3".to_string()]),
        );
        let expected = std::cmp::max(i, 3).to_string();
        assert_eq!(response.return_value.as_deref(), Some(expected.as_str()));
    }
}

#[test]
fn test_unknown_module_not_found() {
    ensure_builtins();
    let zone = bare_zone("module-missing", 1);

    let response = zone.execute_sync(ExecuteRequest::function("f").in_module("ghost"));
    assert_eq!(response.code, ResponseCode::ModuleNotFound);
    assert!(response.error_message.unwrap().contains("ghost"));
}

#[test]
fn test_known_module_missing_function() {
    ensure_builtins();
    let zone = bare_zone("module-no-fn", 1);

    let response = zone.execute_sync(
        ExecuteRequest::function("no_such_fn").in_module("math"),
    );
    assert_eq!(response.code, ResponseCode::ExecutionError);
    assert!(response.error_message.unwrap().contains("no_such_fn"));
}

#[test]
fn test_zone_registered_module() {
    let zone = bare_zone("zone-module", 2);
    zone.register_module(NativeModule::new("echo").with_function("first", |args| {
        args.first().cloned().ok_or_else(|| "no argument".to_string())
    }));

    let response = zone.execute_sync(
        ExecuteRequest::function("first")
            .in_module("echo")
            .with_arguments(["\"payload\""]),
    );
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(response.return_value.as_deref(), Some("\"payload\""));
}

#[test]
fn test_zone_modules_are_zone_local() {
    let with_module = bare_zone("module-here", 1);
    let without_module = bare_zone("module-elsewhere", 1);

    with_module.register_module(
        NativeModule::new("local").with_function("ping", |_| Ok(Value::String("pong".into()))),
    );

    assert!(with_module
        .execute_sync(ExecuteRequest::function("ping").in_module("local"))
        .is_success());
    assert_eq!(
        without_module
            .execute_sync(ExecuteRequest::function("ping").in_module("local"))
            .code,
        ResponseCode::ModuleNotFound
    );
}

#[test]
fn test_reregistration_shadows_previous_module() {
    let zone = bare_zone("module-shadow", 2);
    zone.register_module(
        NativeModule::new("ver").with_function("get", |_| Ok(Value::from(1))),
    );
    zone.register_module(
        NativeModule::new("ver").with_function("get", |_| Ok(Value::from(2))),
    );

    for _ in 0..4 {
        let response = zone.execute_sync(ExecuteRequest::function("get").in_module("ver"));
        assert_eq!(response.return_value.as_deref(), Some("2"));
    }
}

#[test]
fn test_native_error_is_execution_error() {
    let zone = bare_zone("module-err", 1);
    zone.register_module(
        NativeModule::new("fail").with_function("always", |_| Err("deliberate failure".to_string())),
    );

    let response = zone.execute_sync(ExecuteRequest::function("always").in_module("fail"));
    assert_eq!(response.code, ResponseCode::ExecutionError);
    assert!(response.error_message.unwrap().contains("deliberate failure"));
}

#[test]
fn test_script_function_preferred_over_module_syntax() {
    // Unqualified calls hit script functions; qualified ones hit modules.
    ensure_builtins();
    let zone = bare_zone("mixed", 1);
    assert_eq!(
        zone.broadcast_sync("function add(a, b) { return 100; }"),
        ResponseCode::Success
    );

    let script = zone.execute_sync(ExecuteRequest::function("add").with_arguments(["2", "3"]));
    assert_eq!(script.return_value.as_deref(), Some("100"));

    let module = zone.execute_sync(
        ExecuteRequest::function("add")
            .in_module("math")
            .with_arguments(["2", "3"]),
    );
    assert_eq!(module.return_value.as_deref(), Some("5"));
}
