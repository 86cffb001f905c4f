//! Shard dispatcher: launches one worker process per prompt-set slice.
//!
//! Slices are grouped into waves of at most `ceiling` processes and a single
//! invocation launches one wave. Launch is fire-and-forget; the returned
//! [`DispatchHandle`] can optionally be awaited to observe each worker's exit
//! status.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use futures::future::join_all;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;

use super::partition::{partition, select_wave, wave_count, ShardSlice};

/// Settings shared by every worker of a dispatch.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Executable that runs the `worker` subcommand.
    pub program: PathBuf,
    pub model: String,
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    /// Prompt file name, relative to `input_folder`.
    pub prompt_file: String,
    pub file_prefix: String,
    pub parallelism: usize,
    /// Wave launched by this invocation.
    pub wave: usize,
    /// Most worker processes allowed to run at once.
    pub ceiling: usize,
    pub logs_dir: PathBuf,
    pub dry_run: bool,
    pub debug: bool,
}

impl DispatchConfig {
    /// `<logs>/commands_<prefix>.txt`
    pub fn commands_path(&self) -> PathBuf {
        self.logs_dir.join(format!("commands_{}.txt", self.file_prefix))
    }

    /// `<logs>/run_<index>_<prefix>.log`
    pub fn log_path(&self, index: usize) -> PathBuf {
        self.logs_dir
            .join(format!("run_{}_{}.log", index, self.file_prefix))
    }
}

/// A fully constructed worker launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub slice: ShardSlice,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub log_path: PathBuf,
}

impl WorkerInvocation {
    fn new(config: &DispatchConfig, slice: ShardSlice) -> Self {
        let mut args = vec![
            "worker".to_string(),
            "--model".to_string(),
            config.model.clone(),
            "--input-folder".to_string(),
            config.input_folder.to_string_lossy().into_owned(),
            "--output-folder".to_string(),
            config.output_folder.to_string_lossy().into_owned(),
            "--prompt-file".to_string(),
            config.prompt_file.clone(),
            "--file-prefix".to_string(),
            config.file_prefix.clone(),
            "--start-idx".to_string(),
            slice.start.to_string(),
            "--num-prompts".to_string(),
            slice.len.as_arg().to_string(),
            "--shard-index".to_string(),
            slice.index.to_string(),
        ];
        if config.debug {
            args.push("--debug".to_string());
        }

        Self {
            slice,
            program: config.program.clone(),
            args,
            log_path: config.log_path(slice.index),
        }
    }

    fn command(&self, log: File) -> Result<Command, DispatchError> {
        let stderr = log.try_clone()?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr));
        Ok(cmd)
    }
}

impl fmt::Display for WorkerInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Exit of one launched worker.
#[derive(Debug)]
pub struct ShardOutcome {
    pub index: usize,
    pub log_path: PathBuf,
    pub status: Result<ExitStatus, String>,
}

impl ShardOutcome {
    pub fn success(&self) -> bool {
        matches!(&self.status, Ok(status) if status.success())
    }
}

struct LaunchedShard {
    index: usize,
    log_path: PathBuf,
    handle: JoinHandle<std::io::Result<ExitStatus>>,
}

/// Handles of the processes launched by one dispatch.
pub struct DispatchHandle {
    invocations: Vec<WorkerInvocation>,
    launched: Vec<LaunchedShard>,
}

impl DispatchHandle {
    /// Every invocation of the wave, launched or (dry-run) not.
    pub fn invocations(&self) -> &[WorkerInvocation] {
        &self.invocations
    }

    pub fn launched(&self) -> usize {
        self.launched.len()
    }

    /// Wait for every launched worker to exit.
    pub async fn wait(self) -> Vec<ShardOutcome> {
        let futures = self.launched.into_iter().map(|shard| async move {
            let status = match shard.handle.await {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match &status {
                Ok(s) if s.success() => info!(shard = shard.index, "Worker finished"),
                Ok(s) => warn!(shard = shard.index, status = %s, log = %shard.log_path.display(), "Worker exited with failure"),
                Err(e) => error!(shard = shard.index, error = %e, "Lost track of worker"),
            }
            ShardOutcome {
                index: shard.index,
                log_path: shard.log_path,
                status,
            }
        });
        join_all(futures).await
    }
}

/// Splits a prompt set into shards and launches one wave of workers.
pub struct ShardDispatcher {
    config: DispatchConfig,
}

impl ShardDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The invocations of the configured wave for a set of `total_prompts`.
    pub fn plan(&self, total_prompts: usize) -> Result<Vec<WorkerInvocation>, DispatchError> {
        let slices = partition(total_prompts, self.config.parallelism)?;
        let wave = select_wave(&slices, self.config.ceiling, self.config.wave)?;

        if self.config.parallelism > self.config.ceiling {
            warn!(
                parallelism = self.config.parallelism,
                ceiling = self.config.ceiling,
                waves = wave_count(slices.len(), self.config.ceiling),
                wave = self.config.wave,
                "Parallelism exceeds the concurrency ceiling; launching one wave"
            );
        }

        Ok(wave
            .into_iter()
            .map(|slice| WorkerInvocation::new(&self.config, slice))
            .collect())
    }

    /// Record and, unless dry-run, launch the configured wave.
    ///
    /// Must be called within a tokio runtime.
    pub fn dispatch(&self, total_prompts: usize) -> Result<DispatchHandle, DispatchError> {
        let invocations = self.plan(total_prompts)?;
        std::fs::create_dir_all(&self.config.logs_dir)?;

        let mut side_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.commands_path())?;

        let mut launched = Vec::new();
        for invocation in &invocations {
            writeln!(side_file, "{}", invocation)?;
            info!(
                shard = invocation.slice.index,
                start = invocation.slice.start,
                num_prompts = invocation.slice.len.as_arg(),
                log = %invocation.log_path.display(),
                "Running {}", invocation
            );

            if self.config.dry_run {
                continue;
            }

            let log = File::create(&invocation.log_path)?;
            let mut child = invocation
                .command(log)?
                .spawn()
                .map_err(|source| DispatchError::Spawn {
                    index: invocation.slice.index,
                    source,
                })?;
            debug!(shard = invocation.slice.index, pid = ?child.id(), "Worker launched");

            launched.push(LaunchedShard {
                index: invocation.slice.index,
                log_path: invocation.log_path.clone(),
                handle: tokio::spawn(async move { child.wait().await }),
            });
        }

        Ok(DispatchHandle {
            invocations,
            launched,
        })
    }
}

/// Path of the running executable, used as the default worker program.
pub fn current_program() -> Result<PathBuf, DispatchError> {
    Ok(std::env::current_exe()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::partition::SliceLen;
    use std::path::Path;

    fn config(logs: &Path) -> DispatchConfig {
        DispatchConfig {
            program: PathBuf::from("mm-forge"),
            model: "gpt-4o".to_string(),
            input_folder: PathBuf::from("/data/in"),
            output_folder: PathBuf::from("/data/out"),
            prompt_file: "prompts.json".to_string(),
            file_prefix: "birds".to_string(),
            parallelism: 3,
            wave: 0,
            ceiling: 12,
            logs_dir: logs.to_path_buf(),
            dry_run: true,
            debug: false,
        }
    }

    #[test]
    fn test_plan_builds_worker_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = ShardDispatcher::new(config(dir.path()));
        let plan = dispatcher.plan(10).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].slice.len, SliceLen::ToEnd);
        assert_eq!(
            plan[1].to_string(),
            "mm-forge worker --model gpt-4o --input-folder /data/in --output-folder /data/out \
             --prompt-file prompts.json --file-prefix birds --start-idx 3 --num-prompts 3 \
             --shard-index 1"
        );
        assert!(plan[2].to_string().contains("--start-idx 6 --num-prompts -1"));
        assert_eq!(plan[0].log_path, dir.path().join("run_0_birds.log"));
    }

    #[test]
    fn test_plan_selects_wave() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.parallelism = 5;
        cfg.ceiling = 2;
        cfg.wave = 2;
        cfg.debug = true;
        let plan = ShardDispatcher::new(cfg.clone()).plan(50).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].slice.index, 4);
        assert_eq!(plan[0].args.last().unwrap(), "--debug");

        cfg.wave = 3;
        assert!(matches!(
            ShardDispatcher::new(cfg).plan(50),
            Err(DispatchError::EmptyWave { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_records_commands_only() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let dispatcher = ShardDispatcher::new(config(&logs));

        let handle = dispatcher.dispatch(9).unwrap();
        assert_eq!(handle.invocations().len(), 3);
        assert_eq!(handle.launched(), 0);
        assert!(handle.wait().await.is_empty());

        // a second dry run appends
        dispatcher.dispatch(9).unwrap();
        let side = std::fs::read_to_string(logs.join("commands_birds.txt")).unwrap();
        assert_eq!(side.lines().count(), 6);
        assert!(side.lines().next().unwrap().starts_with("mm-forge worker"));
        assert!(!logs.join("run_0_birds.log").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dispatch_launches_and_waits() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.program = PathBuf::from("true");
        cfg.dry_run = false;
        cfg.parallelism = 2;

        let handle = ShardDispatcher::new(cfg).dispatch(4).unwrap();
        assert_eq!(handle.launched(), 2);

        let outcomes = handle.wait().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(ShardOutcome::success));
        assert!(dir.path().join("run_0_birds.log").exists());
        assert!(dir.path().join("run_1_birds.log").exists());
    }

    #[test]
    fn test_spawn_failure_names_shard() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.program = dir.path().join("no-such-program");
        cfg.dry_run = false;
        cfg.parallelism = 1;

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime.block_on(async { ShardDispatcher::new(cfg).dispatch(3).map(|_| ()) });
        assert!(matches!(result, Err(DispatchError::Spawn { index: 0, .. })));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain/path.json"), "plain/path.json");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
