//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building zones with a known worker count
//! - Writing temporary bootstrap files
//! - Installing the shared builtin modules once per test binary

use std::fs;
use std::path::PathBuf;
use std::sync::Once;

use serde_json::Value;
use tempfile::TempDir;

use enclave::{install_builtins, NativeModule, Zone, ZoneSettings};

/// Standard bootstrap used across tests: mirrors a real host priming every
/// worker with shared functions before serving calls.
pub const BOOTSTRAP: &str = r#"
function add(a, b) { return Number(a) + Number(b); }
function greet(name) { return 'hello ' + name; }
function spin() { while (true) { } }
"#;

/// A bootstrap script persisted to a temp file, for `--bootstrapFile`.
pub struct BootstrapFile {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl BootstrapFile {
    pub fn new(script: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("bootstrap.js");
        fs::write(&path, script).expect("Failed to write bootstrap script");
        Self { temp_dir, path }
    }

    pub fn settings(&self, workers: usize) -> String {
        format!(
            "--bootstrapFile {} --workers {}",
            self.path.display(),
            workers
        )
    }
}

/// A zone with the standard bootstrap applied via broadcast.
pub fn primed_zone(name: &str, workers: usize) -> Zone {
    let zone = Zone::new(name, &format!("--workers {}", workers)).expect("Failed to create zone");
    let code = zone.broadcast_sync(BOOTSTRAP);
    assert_eq!(code, enclave::ResponseCode::Success, "bootstrap broadcast failed");
    zone
}

/// An empty zone with no functions defined.
pub fn bare_zone(name: &str, workers: usize) -> Zone {
    Zone::new(name, &format!("--workers {}", workers)).expect("Failed to create zone")
}

static INSTALL: Once = Once::new();

/// Install the process-wide builtin modules. Installation happens once per
/// test binary; every caller sees the same registry.
pub fn ensure_builtins() {
    INSTALL.call_once(|| {
        install_builtins(vec![
            NativeModule::new("math")
                .with_function("add", |args| {
                    let (a, b) = two_numbers(args)?;
                    Ok(json_number(a + b))
                })
                .with_function("max", |args| {
                    let (a, b) = two_numbers(args)?;
                    Ok(json_number(if a > b { a } else { b }))
                }),
            NativeModule::new("text").with_function("upper", |args| match args.first() {
                Some(Value::String(s)) => Ok(Value::String(s.to_uppercase())),
                _ => Err("upper expects a string".to_string()),
            }),
        ])
        .expect("builtin installation failed");
    });
}

fn two_numbers(args: &[Value]) -> Result<(f64, f64), String> {
    let get = |i: usize| -> Result<f64, String> {
        match args.get(i) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| "bad number".to_string()),
            Some(Value::String(s)) => s.parse().map_err(|_| format!("not a number: {}", s)),
            _ => Err("expected two numeric arguments".to_string()),
        }
    };
    Ok((get(0)?, get(1)?))
}

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Sanity check the fixtures themselves.
#[test]
fn test_fixture_settings_parse() {
    let bootstrap = BootstrapFile::new(BOOTSTRAP);
    let settings = ZoneSettings::parse(&bootstrap.settings(3)).unwrap();
    assert_eq!(settings.workers, 3);
    assert_eq!(settings.bootstrap_file, Some(bootstrap.path.clone()));
}
