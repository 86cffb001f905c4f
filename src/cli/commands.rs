//! CLI command definitions for mm-forge.
//!
//! The pipeline runs as separate invocations: `task-file` and `prompts` build
//! the prompt set, `dispatch` launches one `worker` process per shard, and
//! `merge` joins the shard manifests of a run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};

use crate::diversity::{
    collect_candidates, HashingEmbedder, SourceDataset, TaskFileBuilder, ZeroShotClassifier,
    DEFAULT_BATCH_SIZE,
};
use crate::error::GenerationError;
use crate::export::ShardMerger;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{GenerationConfig, GenerationMode, GenerationWorker, WorkerSettings};
use crate::prompts::{prompt_file_path, PromptFile, PromptSetBuilder, TaskDescription};
use crate::scheduler::{current_program, DispatchConfig, ShardDispatcher, SliceLen};

/// Default model to use for generation.
const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Multimodal synthetic training-data generator.
#[derive(Parser)]
#[command(name = "mm-forge")]
#[command(about = "Generate multimodal question-answer datasets with sharded LLM workers")]
#[command(version)]
#[command(
    long_about = "mm-forge turns a small set of reference image-question-answer samples into a large synthetic dataset.\n\nExample usage:\n  mm-forge prompts --task-desc task.json --file-prefix birds --mode vqa\n  mm-forge dispatch --prompt-file generated_prompts/birds_prompts_20240101_000000.json --file-prefix birds --num-parallel 8\n  mm-forge merge --folder-path out/generated_data --run-id birds --output-folder out"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable debug logging (overrides --log-level).
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Launch one wave of generation workers over a prompt file.
    Dispatch(DispatchArgs),

    /// Generate records for one slice of a prompt file.
    Worker(WorkerArgs),

    /// Merge the shard manifests of a run into one manifest.
    Merge(MergeArgs),

    /// Build a prompt file from a task description.
    Prompts(PromptsArgs),

    /// Build a task description by classifying samples and candidates by keyword.
    #[command(name = "task-file")]
    TaskFile(TaskFileArgs),
}

/// Arguments for `mm-forge dispatch`.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    /// Model passed to every worker.
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Folder the prompt file and item references are relative to.
    #[arg(long, default_value = ".")]
    pub input_folder: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_folder: PathBuf,

    /// Prompt file, relative to --input-folder.
    #[arg(long)]
    pub prompt_file: String,

    /// Prefix of shard manifests and log files; also the run id for `merge`.
    #[arg(long)]
    pub file_prefix: String,

    /// Number of shards.
    #[arg(long, default_value = "1")]
    pub num_parallel: usize,

    /// Wave to launch when --num-parallel exceeds the concurrency ceiling.
    #[arg(long, default_value = "0")]
    pub batch_num: usize,

    /// Concurrency ceiling (default: MMFORGE_MAX_CONCURRENT_JOBS or 12).
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Log directory (default: MMFORGE_LOGS_DIR or ./logs).
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,

    /// Worker executable (default: this binary).
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Record and print the launch commands without starting workers.
    #[arg(long)]
    pub dry_run: bool,

    /// Wait for the launched workers and report their exit status.
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for `mm-forge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(short = 'm', long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY or LITELLM_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = ".")]
    pub input_folder: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_folder: PathBuf,

    /// Prompt file, relative to --input-folder.
    #[arg(long)]
    pub prompt_file: String,

    #[arg(long)]
    pub file_prefix: String,

    /// Index of the first prompt of the slice.
    #[arg(long, default_value = "0")]
    pub start_idx: usize,

    /// Number of prompts in the slice; -1 runs to the end of the prompt file.
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    pub num_prompts: i64,

    /// Shard index embedded in the manifest file name.
    #[arg(long, default_value = "0")]
    pub shard_index: usize,

    /// Repair calls allowed per item (default: MMFORGE_MAX_REPAIR_ATTEMPTS or 3).
    #[arg(long)]
    pub max_repair_attempts: Option<usize>,
}

/// Arguments for `mm-forge merge`.
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Folder containing the shard manifests.
    #[arg(long)]
    pub folder_path: PathBuf,

    /// Run id: shard manifests are named `<run_id>_<shard>_<timestamp>.json`.
    #[arg(long)]
    pub run_id: String,

    #[arg(long)]
    pub output_folder: PathBuf,

    /// Leading prefix removed from the merged image folder.
    #[arg(long)]
    pub strip_prefix: Option<String>,

    /// Renumber example ids across the whole run.
    #[arg(long)]
    pub renumber_ids: bool,
}

/// Arguments for `mm-forge prompts`.
#[derive(Parser, Debug)]
pub struct PromptsArgs {
    /// Task description JSON, relative to --input-folder.
    #[arg(long)]
    pub task_desc: String,

    #[arg(long, default_value = ".")]
    pub input_folder: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_folder: PathBuf,

    #[arg(long)]
    pub file_prefix: String,

    /// Generation mode (vqa, vqa_nr, tqa, descript, generic, vqa_task_desc, descript_task_desc).
    #[arg(long, default_value = "vqa")]
    pub mode: GenerationMode,

    /// In-context examples per prompt (at most 10).
    #[arg(long, default_value = "3")]
    pub num_icl_samples: usize,

    /// Records requested per candidate item.
    #[arg(long, default_value = "5")]
    pub min_gen_per_candidate: usize,

    /// Total records targeted over all subgroups.
    #[arg(long, default_value = "100")]
    pub total_gen: usize,

    /// Random seed for reproducible sampling.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for `mm-forge task-file`.
#[derive(Parser, Debug)]
pub struct TaskFileArgs {
    /// Source dataset JSON with `image_folder`, `skill` and `samples`.
    #[arg(long)]
    pub data_file: PathBuf,

    /// Keywords defining the subgroups.
    #[arg(long, num_args = 1.., required = true)]
    pub keywords: Vec<String>,

    #[arg(long, default_value = ".")]
    pub input_folder: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_folder: PathBuf,

    #[arg(long)]
    pub output_prefix: String,

    /// Folder of candidate items to distribute over the subgroups.
    #[arg(long)]
    pub candidate_folder: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Dispatch(args) => run_dispatch_command(args, cli.debug).await,
        Commands::Worker(args) => run_worker_command(args).await,
        Commands::Merge(args) => run_merge_command(args),
        Commands::Prompts(args) => run_prompts_command(args),
        Commands::TaskFile(args) => run_task_file_command(args),
    }
}

async fn run_dispatch_command(args: DispatchArgs, debug: bool) -> anyhow::Result<()> {
    let config = GenerationConfig::from_env()?;
    let prompt_path = args.input_folder.join(&args.prompt_file);
    let prompt_file = PromptFile::load(&prompt_path)?;

    let program = match args.program {
        Some(program) => program,
        None => current_program()?,
    };

    let dispatcher = ShardDispatcher::new(DispatchConfig {
        program,
        model: args.model,
        input_folder: args.input_folder,
        output_folder: args.output_folder,
        prompt_file: args.prompt_file,
        file_prefix: args.file_prefix,
        parallelism: args.num_parallel,
        wave: args.batch_num,
        ceiling: args.max_concurrent_jobs.unwrap_or(config.max_concurrent_jobs),
        logs_dir: args.logs_dir.unwrap_or(config.logs_dir),
        dry_run: args.dry_run,
        debug,
    });

    info!(
        prompts = prompt_file.len(),
        shards = args.num_parallel,
        wave = args.batch_num,
        "Dispatching workers"
    );
    let handle = dispatcher.dispatch(prompt_file.len())?;
    info!(
        planned = handle.invocations().len(),
        launched = handle.launched(),
        commands = %dispatcher.config().commands_path().display(),
        "Dispatch complete"
    );

    if args.wait {
        let outcomes = handle.wait().await;
        let failed: Vec<usize> = outcomes
            .iter()
            .filter(|o| !o.success())
            .map(|o| o.index)
            .collect();
        if !failed.is_empty() {
            anyhow::bail!("Workers for shards {:?} did not finish successfully", failed);
        }
        info!(workers = outcomes.len(), "All workers finished");
    }
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> anyhow::Result<()> {
    let mut config = GenerationConfig::from_env()?;
    if let Some(attempts) = args.max_repair_attempts {
        config = config.with_max_repair_attempts(attempts);
    }

    let prompt_path = args.input_folder.join(&args.prompt_file);
    let prompt_file = PromptFile::load(&prompt_path)?;

    let len = SliceLen::from_arg(args.num_prompts).ok_or_else(|| {
        GenerationError::InvalidSlice(format!(
            "--num-prompts must be -1 or non-negative, got {}",
            args.num_prompts
        ))
    })?;
    if args.start_idx > prompt_file.len() {
        return Err(GenerationError::InvalidSlice(format!(
            "--start-idx {} is past the end of {} prompts",
            args.start_idx,
            prompt_file.len()
        ))
        .into());
    }
    let slice = prompt_file.slice(args.start_idx, len);

    let provider = build_llm_client(args.api_key, args.model.clone())?;
    let settings = WorkerSettings {
        input_folder: args.input_folder,
        output_dir: args.output_folder.join(&config.output_subdir),
        file_prefix: args.file_prefix,
        shard_index: args.shard_index,
    };

    let worker = GenerationWorker::with_provider(settings, provider, &args.model, &slice, &config);
    let listener = worker.listen_for_interrupt();
    let report = worker.run(slice).await;
    listener.abort();
    let report = report?;

    if let Some(reason) = &report.aborted {
        warn!(
            end_idx = report.end_idx,
            reason = %reason,
            "Slice stopped early; partial output saved"
        );
    }
    info!(
        processed = report.processed,
        skipped = report.skipped,
        records = report.records,
        examples = report.examples,
        manifest = %report.manifest_path.display(),
        "Worker finished"
    );
    Ok(())
}

fn run_merge_command(args: MergeArgs) -> anyhow::Result<()> {
    let merged = ShardMerger::new(&args.folder_path, &args.run_id, &args.output_folder)
        .with_strip_prefix(args.strip_prefix)
        .with_renumber_ids(args.renumber_ids)
        .merge()?;
    info!(
        shards = merged.shard_files.len(),
        samples = merged.manifest.len_samples,
        output = %merged.output_path.display(),
        "Merge complete"
    );
    Ok(())
}

fn run_prompts_command(args: PromptsArgs) -> anyhow::Result<()> {
    let task_path = args.input_folder.join(&args.task_desc);
    let task = TaskDescription::load(&task_path)
        .with_context(|| format!("Failed to load task description {}", task_path.display()))?;

    let prompt_file = PromptSetBuilder::new(task, task_path.to_string_lossy(), args.mode)
        .with_num_icl_samples(args.num_icl_samples)
        .with_min_gen_per_candidate(args.min_gen_per_candidate)
        .with_total_gen(args.total_gen)
        .with_seed(args.seed)
        .build()?;

    let output_path = prompt_file_path(&args.output_folder, &args.file_prefix);
    prompt_file.save(&output_path)?;
    info!(
        prompts = prompt_file.len(),
        mode = %prompt_file.mode,
        path = %output_path.display(),
        "Prompt file written"
    );
    Ok(())
}

fn run_task_file_command(args: TaskFileArgs) -> anyhow::Result<()> {
    let dataset = SourceDataset::load(&args.data_file)
        .with_context(|| format!("Failed to load data file {}", args.data_file.display()))?;

    let classifier = ZeroShotClassifier::new(HashingEmbedder::default()).with_batch_size(args.batch_size);
    let builder = TaskFileBuilder::new(classifier);
    let mut task = builder.build(dataset, &args.keywords, &args.input_folder)?;

    if let Some(dir) = &args.candidate_folder {
        let candidates = collect_candidates(dir)?;
        info!(candidates = candidates.len(), folder = %dir.display(), "Partitioning candidate items");
        builder.assign_candidates(&mut task, &candidates)?;
    }

    let output_path = args.output_folder.join(format!(
        "{}_{}.json",
        args.output_prefix,
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    task.save(&output_path)?;
    info!(
        subgroups = task.subgroups.len(),
        path = %output_path.display(),
        "Task file generated"
    );
    Ok(())
}

fn build_llm_client(api_key: Option<String>, model: String) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let resolved_api_key = api_key
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
        .or_else(|| std::env::var("LITELLM_API_KEY").ok());

    if let Some(key) = resolved_api_key {
        info!(model = %model, "Using OpenRouter with specified API key");
        Ok(Arc::new(LiteLlmClient::openrouter(key, model)))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY/LITELLM_API_KEY env var.",
                e
            )
        })?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::formatter::ConversationTurn;
    use crate::prompts::{Subgroup, TaskSample};
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_defaults() {
        let cli = Cli::try_parse_from([
            "mm-forge",
            "worker",
            "--prompt-file",
            "p.json",
            "--file-prefix",
            "birds",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.model, DEFAULT_MODEL);
                assert_eq!(args.start_idx, 0);
                assert_eq!(args.num_prompts, -1);
                assert_eq!(args.shard_index, 0);
                assert!(args.max_repair_attempts.is_none());
            }
            _ => panic!("Expected Worker command"),
        }
        assert_eq!(cli.log_level, "info");
        assert!(!cli.debug);
    }

    #[test]
    fn test_dispatch_with_all_options() {
        let cli = Cli::try_parse_from([
            "mm-forge",
            "dispatch",
            "-m",
            "gpt-4o-mini",
            "--input-folder",
            "/in",
            "--output-folder",
            "/out",
            "--prompt-file",
            "p.json",
            "--file-prefix",
            "birds",
            "--num-parallel",
            "30",
            "--batch-num",
            "2",
            "--max-concurrent-jobs",
            "8",
            "--dry-run",
            "--wait",
            "--debug",
        ])
        .expect("should parse");

        assert!(cli.debug);
        match cli.command {
            Commands::Dispatch(args) => {
                assert_eq!(args.model, "gpt-4o-mini");
                assert_eq!(args.input_folder, PathBuf::from("/in"));
                assert_eq!(args.num_parallel, 30);
                assert_eq!(args.batch_num, 2);
                assert_eq!(args.max_concurrent_jobs, Some(8));
                assert!(args.dry_run);
                assert!(args.wait);
            }
            _ => panic!("Expected Dispatch command"),
        }
    }

    #[test]
    fn test_required_arguments() {
        assert!(Cli::try_parse_from(["mm-forge", "dispatch", "--file-prefix", "x"]).is_err());
        assert!(Cli::try_parse_from(["mm-forge", "merge", "--run-id", "x"]).is_err());
        assert!(Cli::try_parse_from(["mm-forge", "task-file", "--data-file", "d.json", "--output-prefix", "t"]).is_err());
    }

    #[test]
    fn test_prompts_mode_parsing() {
        let parse = |mode: &str| {
            Cli::try_parse_from([
                "mm-forge",
                "prompts",
                "--task-desc",
                "t.json",
                "--file-prefix",
                "p",
                "--mode",
                mode,
            ])
        };
        match parse("tqa").expect("should parse").command {
            Commands::Prompts(args) => {
                assert_eq!(args.mode, GenerationMode::TextQa);
                assert_eq!(args.num_icl_samples, 3);
                assert!(args.seed.is_none());
            }
            _ => panic!("Expected Prompts command"),
        }
        assert!(parse("poetry").is_err());
    }

    fn sample(image: &str) -> TaskSample {
        TaskSample {
            image_1: image.to_string(),
            conversations: vec![ConversationTurn::human("<image> Which?"), ConversationTurn::gpt("This")],
        }
    }

    #[tokio::test]
    async fn test_prompts_then_dry_run_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let task = TaskDescription {
            image_folder: "refs".to_string(),
            dataset_description: "birds".to_string(),
            subgroups: vec![Subgroup {
                keyword: "owl".to_string(),
                reference_sample_idx: vec![0, 1],
                candidate_image_paths: vec!["cands/o.png".to_string()],
            }],
            samples: vec![sample("a.png"), sample("b.png")],
        };
        task.save(&dir.path().join("task.json")).unwrap();

        let cli = Cli::try_parse_from([
            "mm-forge",
            "prompts",
            "--task-desc",
            "task.json",
            "--input-folder",
            dir.path().to_str().unwrap(),
            "--output-folder",
            dir.path().to_str().unwrap(),
            "--file-prefix",
            "birds",
            "--total-gen",
            "10",
            "--min-gen-per-candidate",
            "2",
            "--seed",
            "4",
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let prompt_dir = dir.path().join("generated_prompts");
        let entry = std::fs::read_dir(&prompt_dir).unwrap().next().unwrap().unwrap();
        let prompt_file = PromptFile::load(&entry.path()).unwrap();
        assert_eq!(prompt_file.len(), 5);

        let logs = dir.path().join("logs");
        let cli = Cli::try_parse_from([
            "mm-forge",
            "dispatch",
            "--input-folder",
            dir.path().to_str().unwrap(),
            "--prompt-file",
            &format!("generated_prompts/{}", entry.file_name().to_string_lossy()),
            "--file-prefix",
            "birds",
            "--num-parallel",
            "2",
            "--logs-dir",
            logs.to_str().unwrap(),
            "--program",
            "mm-forge",
            "--dry-run",
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let side = std::fs::read_to_string(logs.join("commands_birds.txt")).unwrap();
        assert_eq!(side.lines().count(), 2);
        assert!(side.contains("--start-idx 2 --num-prompts -1 --shard-index 1"));
    }

    #[tokio::test]
    async fn test_merge_without_shards_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "mm-forge",
            "merge",
            "--folder-path",
            dir.path().to_str().unwrap(),
            "--run-id",
            "nothing",
            "--output-folder",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let err = run_with_cli(cli).await.unwrap_err();
        assert!(err.to_string().contains("nothing"));
    }

    #[tokio::test]
    async fn test_task_file_command() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.json");
        std::fs::write(
            &data,
            r#"{"image_folder": "refs", "skill": "pets",
                "samples": [{"image_1": "tabby_cat.png", "conversations": []}]}"#,
        )
        .unwrap();
        let cands = dir.path().join("cands");
        std::fs::create_dir(&cands).unwrap();
        std::fs::write(cands.join("tabby_cat_2.png"), b"x").unwrap();

        let cli = Cli::try_parse_from([
            "mm-forge",
            "task-file",
            "--data-file",
            data.to_str().unwrap(),
            "--keywords",
            "tabby cat",
            "--output-folder",
            dir.path().to_str().unwrap(),
            "--output-prefix",
            "pets_task",
            "--candidate-folder",
            cands.to_str().unwrap(),
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let written = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .find(|e| e.file_name().to_string_lossy().starts_with("pets_task_"))
            .unwrap();
        let task = TaskDescription::load(&written.path()).unwrap();
        assert_eq!(task.dataset_description, "pets");
        assert_eq!(task.subgroups[0].reference_sample_idx, vec![0]);
        assert_eq!(task.subgroups[0].candidate_image_paths.len(), 1);
    }
}
