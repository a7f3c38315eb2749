use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::{DiffConfig, LargePatchPolicy};
use crate::position::Side;

/// Command line interface definition for hunkwise.
#[derive(Parser, Debug)]
#[command(name = "hunkwise")]
#[command(about = "Extend, reformat and budget unified diffs for prompts")]
#[command(version)]
pub struct Cli {
    /// Increase log output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,

    /// JSON config file
    #[arg(long, global = true, env = "HUNKWISE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings that take precedence over the config file and environment.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Context lines added before each hunk (capped at 10)
    #[arg(long, global = true)]
    pub extra_lines_before: Option<usize>,

    /// Context lines added after each hunk (capped at 10)
    #[arg(long, global = true)]
    pub extra_lines_after: Option<usize>,

    /// Global cap on the model budget (0 disables the cap)
    #[arg(long, global = true)]
    pub max_model_tokens: Option<usize>,

    /// Budget for models missing from the limit table
    #[arg(long, global = true)]
    pub custom_model_max_tokens: Option<usize>,

    /// Maximum number of documents for large changes
    #[arg(long, global = true)]
    pub max_ai_calls: Option<usize>,

    /// What to do with a single file too large for any document: skip, clip
    #[arg(long, global = true)]
    pub large_patch_policy: Option<LargePatchPolicy>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: DiffConfig) -> DiffConfig {
        config
            .with_overrides(
                self.extra_lines_before,
                self.extra_lines_after,
                self.max_model_tokens,
                self.max_ai_calls,
                self.large_patch_policy,
            )
            .with_custom_model_max_tokens(self.custom_model_max_tokens)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Produce the diff for a single model call
    Diff(DiffArgs),
    /// Split the change set into several diffs
    Chunks(ChunksArgs),
    /// Find a line of a changed file within its patch
    Locate(LocateArgs),
    /// Extend a single patch with context from the original file
    Extend(ExtendArgs),
    /// Extract the hunks covering a line range
    Hunk(HunkArgs),
}

/// Where the changed files come from.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Git revision range (base..head, or a single base compared with HEAD)
    #[arg(long, conflicts_with = "manifest", required_unless_present = "manifest")]
    pub range: Option<String>,

    /// JSON manifest listing the changed files
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Repository to read when using --range
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct BudgetArgs {
    /// Model whose token budget applies
    #[arg(short, long)]
    pub model: String,

    /// Tokens already taken by the surrounding prompt
    #[arg(long, default_value_t = 0)]
    pub prompt_tokens: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DiffArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub budget: BudgetArgs,

    /// Render hunks with absolute line numbers
    #[arg(long)]
    pub line_numbers: bool,

    /// Do not extend hunks with extra context
    #[arg(long)]
    pub no_extra_lines: bool,

    /// Return every document when the change set needs several
    #[arg(long)]
    pub large_pr: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ChunksArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub budget: BudgetArgs,

    /// Maximum number of diffs (default: max_ai_calls from config)
    #[arg(long)]
    pub max_calls: Option<usize>,

    /// Render hunks with absolute line numbers
    #[arg(long)]
    pub line_numbers: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Changed file to search
    #[arg(long)]
    pub file: String,

    /// Text of the line to find
    #[arg(long, required_unless_present = "position")]
    pub line: Option<String>,

    /// Line number in the new file
    #[arg(long, conflicts_with = "line")]
    pub position: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ExtendArgs {
    /// Patch file to extend
    #[arg(value_name = "PATCH")]
    pub patch: PathBuf,

    /// File content before the change
    #[arg(long)]
    pub original: Option<PathBuf>,

    /// File content after the change
    #[arg(long)]
    pub new: Option<PathBuf>,

    /// Name used for the file header and skip-extension matching
    /// (default: the --new or --original path)
    #[arg(long)]
    pub filename: Option<String>,

    /// Render hunks with absolute line numbers
    #[arg(long)]
    pub line_numbers: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HunkArgs {
    /// Patch file to read
    #[arg(value_name = "PATCH")]
    pub patch: PathBuf,

    /// Name used for the file header
    #[arg(long)]
    pub file: String,

    /// First line of the range
    #[arg(long)]
    pub start: usize,

    /// Last line of the range (default: --start)
    #[arg(long)]
    pub end: Option<usize>,

    /// Side of the diff the range refers to
    #[arg(long, value_enum, default_value = "right")]
    pub side: SideArg,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SideArg {
    /// The old file
    Left,
    /// The new file
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_diff_command() {
        let cli = Cli::parse_from([
            "hunkwise",
            "-vv",
            "diff",
            "--range",
            "main..HEAD",
            "--model",
            "gpt-4",
            "--line-numbers",
            "--max-ai-calls",
            "2",
            "--large-patch-policy",
            "skip",
        ]);
        assert_eq!(cli.verbosity, 2);
        assert_eq!(cli.overrides.max_ai_calls, Some(2));
        assert_eq!(cli.overrides.large_patch_policy, Some(LargePatchPolicy::Skip));
        let Command::Diff(args) = cli.command else {
            panic!("expected diff command");
        };
        assert_eq!(args.source.range.as_deref(), Some("main..HEAD"));
        assert_eq!(args.budget.model, "gpt-4");
        assert!(args.line_numbers);
        assert_eq!(args.format, OutputFormat::Text);
    }

    #[test]
    fn test_source_is_required() {
        assert!(Cli::try_parse_from(["hunkwise", "diff", "--model", "m"]).is_err());
        assert!(Cli::try_parse_from([
            "hunkwise", "diff", "--model", "m", "--range", "a..b", "--manifest", "m.json"
        ])
        .is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let overrides = ConfigOverrides {
            extra_lines_before: Some(2),
            custom_model_max_tokens: Some(9000),
            ..ConfigOverrides::default()
        };
        let config = overrides.apply(DiffConfig::default());
        assert_eq!(config.patch_extra_lines_before, 2);
        assert_eq!(config.custom_model_max_tokens, Some(9000));
        assert_eq!(config.max_ai_calls, 4);
    }
}
