//! Phase Executor: runs one phase as an isolated child process, streams its
//! merged stdout/stderr, classifies lines against a keyword set, and
//! enforces a per-phase timeout. One phase = one child; the parent never
//! inherits its locals.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::PhaseConfig;
use crate::types::PhaseResult;
use crate::{log_debug, log_warn};

pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Grace period between SIGTERM and SIGKILL for a timed-out or
/// shutdown-interrupted phase.
const SIGTERM_GRACE_PERIOD_SECONDS: u64 = 5;
const KILL_POLL_INTERVAL_MS: u64 = 100;

/// Environment variables passed through to every phase child unmodified.
const ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "LANG", "LC_ALL", "LC_CTYPE", "TMPDIR", "TEMP", "TMP",
    "SSL_CERT_FILE", "SSL_CERT_DIR", "REQUESTS_CA_BUNDLE", "CURL_CA_BUNDLE",
];

/// API-key environment variables a phase may need to reach external
/// collaborators, passed through only if set.
const API_KEY_ALLOWLIST: &[&str] = &["ANTHROPIC_API_KEY", "EDISON_API_KEY", "OPENAI_API_KEY"];

/// Builds the minimal environment a phase child receives: the allow-listed
/// variables present in `parent_env`, plus flags that prevent user-site
/// package pollution and bytecode caching.
pub fn build_child_env(parent_env: &[(String, String)]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = parent_env
        .iter()
        .filter(|(k, _)| ENV_ALLOWLIST.contains(&k.as_str()) || API_KEY_ALLOWLIST.contains(&k.as_str()))
        .cloned()
        .collect();
    env.push(("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()));
    env.push(("PYTHONNOUSERSITE".to_string(), "1".to_string()));
    env
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Error,
    Warning,
    Critical,
    Degradation(String),
}

/// Classifies one line of phase output against the keyword set
/// `{ERROR, WARNING, CRITICAL, DEGRADATION|DEGRADED}`. Degradation lines
/// carry an extracted reason code.
pub fn classify_line(line: &str) -> Option<LineClass> {
    let upper = line.to_uppercase();
    if upper.contains("DEGRADATION") || upper.contains("DEGRADED") {
        return Some(LineClass::Degradation(extract_reason_code(line)));
    }
    if upper.contains("CRITICAL") {
        return Some(LineClass::Critical);
    }
    if upper.contains("ERROR") {
        return Some(LineClass::Error);
    }
    if upper.contains("WARNING") {
        return Some(LineClass::Warning);
    }
    None
}

fn reason_code_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"(?i)reason_code[=:]\s*"?([^"\n]+?)"?\s*$"#).unwrap(),
            Regex::new(r"(?i)degradation.*?:\s*(.+?)\.").unwrap(),
            Regex::new(r"(?i)degraded.*?(?:due to|because|reason):\s*(.+?)\.").unwrap(),
        ]
    })
}

/// Extracts a human-readable reason from a degradation line, trying each
/// pattern in turn and falling back to the first 100 characters of the line.
pub fn extract_reason_code(line: &str) -> String {
    for pattern in reason_code_patterns() {
        if let Some(caps) = pattern.captures(line) {
            if let Some(m) = caps.get(1) {
                return m.as_str().trim().to_string();
            }
        }
    }
    line.chars().take(100).collect()
}

fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Installs SIGTERM/SIGINT handlers that set the shutdown flag. Call once
/// at startup; later calls simply re-register.
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("failed to register SIGINT handler: {}", e))?;
    Ok(())
}

fn process_registry() -> &'static Arc<std::sync::Mutex<HashSet<Pid>>> {
    static REGISTRY: OnceLock<Arc<std::sync::Mutex<HashSet<Pid>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(std::sync::Mutex::new(HashSet::new())))
}

fn register_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.insert(pgid);
    }
}

fn unregister_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.remove(&pgid);
    }
}

/// Sends SIGTERM to every registered phase child's process group, waits the
/// grace period, then SIGKILLs survivors. Called from the CLI's shutdown path.
pub fn kill_all_children() {
    use nix::sys::signal::{killpg, Signal};

    let pgids: Vec<Pid> = {
        let Ok(registry) = process_registry().lock() else { return };
        registry.iter().copied().collect()
    };
    if pgids.is_empty() {
        return;
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGTERM);
    }

    let deadline = Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
    while Instant::now() < deadline {
        let all_gone = pgids.iter().all(|&pgid| matches!(killpg(pgid, None), Err(nix::errno::Errno::ESRCH)));
        if all_gone {
            break;
        }
        std::thread::sleep(Duration::from_millis(KILL_POLL_INTERVAL_MS));
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    if let Ok(mut registry) = process_registry().lock() {
        registry.clear();
    }
}

async fn kill_process_group(pid: i32) {
    tokio::task::spawn_blocking(move || {
        use nix::sys::signal::{killpg, Signal};
        let pgid = Pid::from_raw(pid);
        if let Err(nix::errno::Errno::ESRCH) = killpg(pgid, Signal::SIGTERM) {
            return;
        }
        let deadline = Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
        while Instant::now() < deadline {
            match killpg(pgid, None) {
                Err(nix::errno::Errno::ESRCH) => return,
                _ => std::thread::sleep(Duration::from_millis(KILL_POLL_INTERVAL_MS)),
            }
        }
        let _ = killpg(pgid, Signal::SIGKILL);
    })
    .await
    .unwrap_or_else(|e| log_warn!("kill_process_group task panicked: {}", e));
}

/// Counts accumulated while streaming one phase's output.
#[derive(Debug, Default, Clone)]
struct LineCounts {
    error_count: u32,
    warning_count: u32,
    critical_count: u32,
    degradation_reasons: Vec<String>,
}

fn fold_line(counts: &mut LineCounts, line: &str) {
    match classify_line(line) {
        Some(LineClass::Error) => counts.error_count += 1,
        Some(LineClass::Warning) => counts.warning_count += 1,
        Some(LineClass::Critical) => counts.critical_count += 1,
        Some(LineClass::Degradation(reason)) => counts.degradation_reasons.push(reason),
        None => {}
    }
}

/// Runs one phase to completion against `project_folder`. Spawns the phase's
/// entry point in its own process group with the environment allow-list,
/// streams merged stdout/stderr line by line, and enforces `timeout`.
pub async fn execute_phase(
    phase: &PhaseConfig,
    project_folder: &Path,
    timeout: Duration,
) -> PhaseResult {
    let started = Instant::now();
    let entry_path = project_folder.join(&phase.entry);

    let mut cmd = tokio::process::Command::new(&entry_path);
    cmd.arg(project_folder);
    cmd.env_clear();
    for (key, value) in build_child_env(&std::env::vars().collect::<Vec<_>>()) {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: pre_exec runs between fork() and exec(); setpgid is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                .map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    log_debug!("[executor] spawning phase '{}' at {}", phase.id, entry_path.display());
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return failed_result(phase, started, format!("failed to spawn phase entry: {}", e));
        }
    };

    let pid = child.id().unwrap_or(0) as i32;
    let pgid = Pid::from_raw(pid);
    register_child(pgid);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let counts = Arc::new(tokio::sync::Mutex::new(LineCounts::default()));

    let stdout_task = stdout.map(|stdout| {
        let counts = Arc::clone(&counts);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log_info_line(&line);
                fold_line(&mut *counts.lock().await, &line);
            }
        })
    });
    let stderr_task = stderr.map(|stderr| {
        let counts = Arc::clone(&counts);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log_info_line(&line);
                fold_line(&mut *counts.lock().await, &line);
            }
        })
    });

    let wait_result = tokio::time::timeout(timeout, child.wait()).await;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let exit_status = match wait_result {
        Err(_) => {
            kill_process_group(pid).await;
            let _ = child.wait().await;
            unregister_child(pgid);
            return failed_result(
                phase,
                started,
                format!("phase timed out after {}s", timeout.as_secs()),
            );
        }
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            unregister_child(pgid);
            return failed_result(phase, started, format!("error waiting for phase child: {}", e));
        }
    };

    unregister_child(pgid);

    if is_shutdown_requested() {
        kill_process_group(pid).await;
        let _ = child.wait().await;
        return failed_result(phase, started, "shutdown requested".to_string());
    }

    let counts = Arc::try_unwrap(counts).map(|m| m.into_inner()).unwrap_or_default();
    let exit_code = exit_status.code().unwrap_or(-1);
    let success = exit_status.success();
    let degraded = !counts.degradation_reasons.is_empty() || (!success && counts.error_count > 0);

    PhaseResult {
        phase_id: phase.id.clone(),
        phase_name: phase.name.clone(),
        success,
        exit_code,
        execution_time: started.elapsed().as_secs_f64(),
        degraded,
        degradation_reasons: counts.degradation_reasons,
        error_count: counts.error_count,
        warning_count: counts.warning_count,
        critical_count: counts.critical_count,
    }
}

fn log_info_line(line: &str) {
    crate::log_info!("{}", line);
}

fn failed_result(phase: &PhaseConfig, started: Instant, reason: String) -> PhaseResult {
    log_warn!("[executor] phase '{}' failed: {}", phase.id, reason);
    PhaseResult {
        phase_id: phase.id.clone(),
        phase_name: phase.name.clone(),
        success: false,
        exit_code: -1,
        execution_time: started.elapsed().as_secs_f64(),
        degraded: false,
        degradation_reasons: vec![],
        error_count: 0,
        warning_count: 0,
        critical_count: 0,
    }
}
