// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for driving `dsem` processes

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Kills the child when dropped so a failed test leaves nothing behind
pub struct ProcessGuard {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl ProcessGuard {
    pub fn spawn(args: &[&str]) -> Self {
        let mut child = Command::new(assert_cmd::cargo::cargo_bin("dsem"))
            .args(args)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("failed to spawn dsem");
        let stdout = child.stdout.take().map(BufReader::new);
        Self {
            child: Some(child),
            stdout,
        }
    }

    /// Read the `READY <addr>` line and return the address
    pub fn ready_addr(&mut self) -> String {
        let stdout = self.stdout.as_mut().expect("stdout taken");
        let mut line = String::new();
        stdout.read_line(&mut line).expect("failed to read stdout");
        line.trim()
            .strip_prefix("READY ")
            .unwrap_or_else(|| panic!("expected READY line, got {line:?}"))
            .to_string()
    }

    /// Wait for exit within `timeout`, returning status and remaining stdout
    pub fn finish(mut self, timeout: Duration) -> (ExitStatus, String) {
        let mut child = self.child.take().expect("already finished");
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().expect("failed to poll child") {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                panic!("dsem did not exit within {timeout:?}");
            }
            std::thread::sleep(Duration::from_millis(20));
        };
        let mut output = String::new();
        if let Some(mut stdout) = self.stdout.take() {
            stdout
                .read_to_string(&mut output)
                .expect("failed to read stdout");
        }
        (status, output)
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// One critical section reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub node: u32,
    pub round: u64,
    pub enter_us: u128,
    pub exit_us: u128,
}

/// Parse `node=<id> round=<r> enter_us=<t0> exit_us=<t1>` lines
pub fn parse_sections(output: &str) -> Vec<Section> {
    output
        .lines()
        .filter(|line| line.starts_with("node="))
        .map(|line| {
            let field = |name: &str| -> &str {
                line.split_whitespace()
                    .find_map(|kv| kv.strip_prefix(name)?.strip_prefix('='))
                    .unwrap_or_else(|| panic!("missing {name} in {line:?}"))
            };
            Section {
                node: field("node").parse().unwrap(),
                round: field("round").parse().unwrap(),
                enter_us: field("enter_us").parse().unwrap(),
                exit_us: field("exit_us").parse().unwrap(),
            }
        })
        .collect()
}
