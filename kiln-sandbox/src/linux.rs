//! Linux namespace + OverlayFS hermetic executor.
//!
//! Isolation is built from three namespaces (mount, PID, and optionally
//! network) plus an OverlayFS merge of declared input roots into a single
//! read-only view, with a private upper directory capturing everything the
//! action writes. After the child exits, the upper directory is diffed
//! against the spec's declared outputs to detect hermeticity violations.

use nix::mount::{mount, umount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, fork, ForkResult, Pid};
use std::ffi::CString;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::spec::{NetworkPolicy, SandboxSpec};
use crate::violation::{SandboxViolation, ViolationType};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create namespace: {0}")]
    Namespace(String),
    #[error("failed to mount: {0}")]
    Mount(String),
    #[error("failed to execute command: {0}")]
    Execution(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
    #[error("overlayfs is not available on this host")]
    NoOverlaySupport,
}

/// The outcome of one hermetic execution.
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub violations: Vec<SandboxViolation>,
}

/// Executes one action inside Linux namespaces with an OverlayFS-merged
/// read-only input view and a private writable upper directory.
pub struct HermeticExecutor {
    spec: SandboxSpec,
    sandbox_root: PathBuf,
    input_roots: Vec<PathBuf>,
}

impl HermeticExecutor {
    pub fn new(spec: SandboxSpec, sandbox_root: PathBuf, input_roots: Vec<PathBuf>) -> Result<Self, SandboxError> {
        if !Self::overlay_supported()? {
            return Err(SandboxError::NoOverlaySupport);
        }
        Ok(Self { spec, sandbox_root, input_roots })
    }

    fn overlay_supported() -> Result<bool, SandboxError> {
        let filesystems = fs::read_to_string("/proc/filesystems")?;
        Ok(filesystems.contains("overlay"))
    }

    fn merged_dir(&self) -> PathBuf {
        self.sandbox_root.join("merged")
    }

    fn upper_dir(&self) -> PathBuf {
        self.sandbox_root.join("upper")
    }

    fn work_dir(&self) -> PathBuf {
        self.sandbox_root.join("overlay-work")
    }

    fn setup_dirs(&self) -> Result<(), SandboxError> {
        fs::create_dir_all(self.merged_dir())?;
        fs::create_dir_all(self.upper_dir())?;
        fs::create_dir_all(self.work_dir())?;
        Ok(())
    }

    /// Run `command` and return its outcome, including any hermeticity
    /// violations discovered by diffing the upper directory against the
    /// spec's declared outputs.
    pub fn execute(&self, command: &[String]) -> Result<ExecutionOutcome, SandboxError> {
        self.setup_dirs()?;

        match unsafe { fork() }? {
            ForkResult::Parent { child } => self.wait_for_child(child),
            ForkResult::Child => match self.execute_in_namespace(command) {
                Ok(status) => std::process::exit(if status.success() { 0 } else { 1 }),
                Err(e) => {
                    eprintln!("sandbox execution failed: {e}");
                    std::process::exit(1);
                }
            },
        }
    }

    fn execute_in_namespace(&self, command: &[String]) -> Result<std::process::ExitStatus, SandboxError> {
        let mut flags = CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID;
        if self.spec.network == NetworkPolicy::Isolated {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        unshare(flags).map_err(|e| SandboxError::Namespace(e.to_string()))?;

        mount(None::<&str>, "/", None::<&str>, MsFlags::MS_PRIVATE | MsFlags::MS_REC, None::<&str>)?;

        if !self.input_roots.is_empty() {
            self.mount_overlay()?;
        }

        chdir(&self.spec.working_directory)?;

        let stdout_path = self.sandbox_root.join("stdout.log");
        let stderr_path = self.sandbox_root.join("stderr.log");
        let stdout_file = fs::File::create(&stdout_path)?;
        let stderr_file = fs::File::create(&stderr_path)?;

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..])
            .current_dir(&self.spec.working_directory)
            .env_clear()
            .stdout(stdout_file)
            .stderr(stderr_file);
        for (key, value) in self.spec.filter_env(&std::env::vars().collect::<Vec<_>>(), None) {
            cmd.env(key, value);
        }

        cmd.status().map_err(|e| SandboxError::Execution(e.to_string()))
    }

    fn mount_overlay(&self) -> Result<(), SandboxError> {
        let lowerdir = self
            .input_roots
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()).to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":");

        let opts = format!(
            "lowerdir={},upperdir={},workdir={}",
            lowerdir,
            self.upper_dir().display(),
            self.work_dir().display()
        );
        let opts_c = CString::new(opts.as_str()).map_err(|e| SandboxError::Mount(e.to_string()))?;

        mount(Some("overlay"), &self.merged_dir(), Some("overlay"), MsFlags::empty(), Some(opts_c.as_ref()))
            .map_err(|e| SandboxError::Mount(format!("overlay mount at {}: {e}", self.merged_dir().display())))?;

        tracing::info!(layers = self.input_roots.len(), path = %self.merged_dir().display(), "mounted input overlay");
        Ok(())
    }

    fn wait_for_child(&self, child: Pid) -> Result<ExecutionOutcome, SandboxError> {
        match waitpid(child, None)? {
            WaitStatus::Exited(_pid, code) => {
                let stdout = fs::read(self.sandbox_root.join("stdout.log")).unwrap_or_default();
                let stderr = fs::read(self.sandbox_root.join("stderr.log")).unwrap_or_default();
                let violations = self.check_hermeticity()?;
                Ok(ExecutionOutcome { exit_code: code, stdout, stderr, violations })
            }
            status => Err(SandboxError::Execution(format!("child ended unexpectedly: {status:?}"))),
        }
    }

    /// Diff the upper directory against declared outputs: anything written
    /// that was not declared is a `FilesystemWrite` violation; anything
    /// declared but absent is a `MissingDeclaredOutput` violation.
    fn check_hermeticity(&self) -> Result<Vec<SandboxViolation>, SandboxError> {
        let mut violations = Vec::new();
        let mut written = std::collections::BTreeSet::new();
        collect_files(&self.upper_dir(), &self.upper_dir(), &mut written)?;

        for path in &written {
            if !self.spec.outputs.contains(path) {
                violations.push(SandboxViolation {
                    violation_type: ViolationType::FilesystemWrite,
                    attempted_path: Some(path.clone()),
                    command: String::new(),
                    pid: None,
                    message: format!("wrote undeclared output {}", path.display()),
                });
            }
        }
        for declared in &self.spec.outputs {
            if !written.contains(declared) {
                violations.push(SandboxViolation {
                    violation_type: ViolationType::MissingDeclaredOutput,
                    attempted_path: Some(declared.clone()),
                    command: String::new(),
                    pid: None,
                    message: format!("declared output {} was not produced", declared.display()),
                });
            }
        }
        Ok(violations)
    }

    pub fn cleanup(&self) -> Result<(), SandboxError> {
        let _ = umount(&self.merged_dir());
        let _ = fs::remove_dir_all(&self.sandbox_root);
        Ok(())
    }
}

fn collect_files(root: &Path, base: &Path, out: &mut std::collections::BTreeSet<PathBuf>) -> Result<(), SandboxError> {
    if !root.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, base, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            out.insert(relative.to_path_buf());
        }
    }
    Ok(())
}
