//! Agent command-line construction.
//!
//! Builds the `tokio::process::Command` for one execution with:
//! - `kill_on_drop(true)` so a dropped runner never leaks a process.
//! - A fresh process group on Unix, which the runner signals as a whole.
//! - The caller's environment overrides layered over either the full
//!   inherited environment or, with `inherit_env = false`, a safe allowlist.
//! - The prompt delivered on stdin or as a launch argument.

use std::process::Stdio;

use tokio::process::Command;

use super::ExecOptions;
use crate::config::{AgentConfig, PromptMode};

/// Environment variables kept when `inherit_env` is disabled.
///
/// Every other variable from the server's environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Build the command for one agent invocation.
#[must_use]
pub fn build_command(agent: &AgentConfig, prompt: &str, options: &ExecOptions) -> Command {
    let mut cmd = Command::new(&agent.command);
    cmd.args(&agent.args);

    if agent.prompt_mode == PromptMode::Argument {
        if !agent.prompt_flag.is_empty() {
            cmd.arg(&agent.prompt_flag);
        }
        cmd.arg(prompt);
    }

    if let (Some(flag), Some(dir)) = (&agent.include_directories_flag, &options.working_directory)
    {
        cmd.arg(flag).arg(dir);
    }

    if !agent.auto_approve_flag.is_empty() {
        cmd.arg(&agent.auto_approve_flag);
    }

    if !agent.inherit_env {
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&options.environment);

    if let Some(dir) = &options.working_directory {
        cmd.current_dir(dir);
    }

    let stdin = match agent.prompt_mode {
        PromptMode::Stdin => Stdio::piped(),
        PromptMode::Argument => Stdio::null(),
    };

    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so timeouts and cancellation reach grandchildren.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}
