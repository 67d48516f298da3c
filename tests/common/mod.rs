#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_ndh-telemetry") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "ndh-telemetry.exe"
    } else {
        "ndh-telemetry"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ndh-telemetry binary path for integration test"),
    }
}

/// Write a config whose every path lives under `dir`.
pub fn write_config(dir: &Path) -> PathBuf {
    let config_path = dir.join("config.toml");
    let contents = format!(
        r#"[server]
bind_addr = "127.0.0.1:0"

[store]
document_path = "{doc}"

[logging]
activity_log = "{log}"

[export]
database_path = "{db}"
"#,
        doc = dir.join("telemetry.json").display(),
        log = dir.join("activity.jsonl").display(),
        db = dir.join("export.sqlite3").display(),
    );
    fs::write(&config_path, contents).expect("write test config");
    config_path
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_stdin(case_name, args, None)
}

pub fn run_cli_case_with_stdin(case_name: &str, args: &[&str], stdin: Option<&[u8]>) -> CmdResult {
    let root = std::env::temp_dir().join("ndh-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut child = Command::new(&bin_path)
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("NDH_TELEMETRY_OUTPUT_FORMAT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn ndh-telemetry command");

    {
        let mut pipe = child.stdin.take().expect("child stdin");
        if let Some(input) = stdin {
            pipe.write_all(input).expect("write child stdin");
        }
    }

    let output = child.wait_with_output().expect("execute ndh-telemetry command");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
