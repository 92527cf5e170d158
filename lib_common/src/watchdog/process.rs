//! # Producer Process Control
//!
//! The supervisor's policy only ever talks to a [`ProcessHandle`]. The OS
//! implementation, [`ScriptProcess`], identifies the producer by a tag that
//! appears in its command line, the same way one would with `pgrep -f`.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use sysinfo::{Pid, Process, ProcessStatus, System};
use tracing::{debug, info, warn};

/// Liveness query, forced stop and launch of the supervised producer.
pub trait ProcessHandle {
    /// `true` if at least one producer process is running.
    fn is_alive(&mut self) -> bool;

    /// Force-kills the producer and its helpers; returns how many processes
    /// were signalled.
    fn terminate(&mut self) -> usize;

    /// Launches a new producer detached from the supervisor.
    fn spawn(&mut self) -> io::Result<()>;
}

/// How to find, stop and start the producer.
#[derive(Debug, Clone)]
pub struct ProducerSpec {
    /// Substring identifying the producer's command line.
    pub tag: String,
    /// Executable to launch.
    pub command: PathBuf,
    /// Arguments passed to `command`.
    pub args: Vec<String>,
    /// File receiving the producer's stdout and stderr (appended).
    pub log_path: PathBuf,
    /// Extra command-line substrings killed on terminate (leftover helpers).
    pub aux_kill_tags: Vec<String>,
}

/// [`ProcessHandle`] over the real process table.
pub struct ScriptProcess {
    spec: ProducerSpec,
    system: System,
    own_pid: Option<Pid>,
    child: Option<Child>,
}

impl ScriptProcess {
    /// Creates a handle; nothing is inspected until the first call.
    pub fn new(spec: ProducerSpec) -> Self {
        Self {
            spec,
            system: System::new(),
            own_pid: sysinfo::get_current_pid().ok(),
            child: None,
        }
    }

    /// The producer description.
    pub fn spec(&self) -> &ProducerSpec {
        &self.spec
    }

    fn reap_child(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "launched producer exited");
                    self.child = None;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to poll launched producer"),
            }
        }
    }

    fn is_candidate(&self, pid: &Pid, process: &Process) -> bool {
        Some(*pid) != self.own_pid
            && !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    }

    fn producer_pids(&mut self) -> HashSet<Pid> {
        self.reap_child();
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .filter(|(pid, p)| self.is_candidate(pid, p) && cmdline_contains(p, &self.spec.tag))
            .map(|(pid, _)| *pid)
            .collect()
    }
}

fn cmdline_contains(process: &Process, tag: &str) -> bool {
    !tag.is_empty() && process.cmd().join(" ").contains(tag)
}

impl ProcessHandle for ScriptProcess {
    fn is_alive(&mut self) -> bool {
        !self.producer_pids().is_empty()
    }

    fn terminate(&mut self) -> usize {
        let producers = self.producer_pids();

        // Producers, their direct children, and anything matching an aux tag.
        let mut targets = producers.clone();
        for (pid, process) in self.system.processes() {
            if !self.is_candidate(pid, process) {
                continue;
            }
            let child_of_producer = process.parent().is_some_and(|ppid| producers.contains(&ppid));
            let aux = self.spec.aux_kill_tags.iter().any(|t| cmdline_contains(process, t));
            if child_of_producer || aux {
                targets.insert(*pid);
            }
        }

        let mut killed = 0;
        for pid in &targets {
            if let Some(process) = self.system.process(*pid) {
                if process.kill() {
                    killed += 1;
                } else {
                    warn!(pid = pid.as_u32(), "failed to kill process");
                }
            }
        }

        // Collect our own child so it does not linger as a zombie.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        info!(killed, tag = %self.spec.tag, "producer terminated");
        killed
    }

    fn spawn(&mut self) -> io::Result<()> {
        if let Some(dir) = self.spec.log_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let log = OpenOptions::new().create(true).append(true).open(&self.spec.log_path)?;

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);

        // Own process group so signals aimed at the supervisor do not reach it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!(
            pid = child.id(),
            command = %self.spec.command.display(),
            log = %self.spec.log_path.display(),
            "producer launched"
        );
        self.child = Some(child);
        Ok(())
    }
}
