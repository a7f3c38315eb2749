use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde_json::json;

use crate::cli::{
    BudgetArgs, ChunksArgs, Command, DiffArgs, ExtendArgs, HunkArgs, LocateArgs, OutputFormat,
    SourceArgs,
};
use crate::config::DiffConfig;
use crate::dual_view::convert_to_dual_view;
use crate::extend::extend_patch;
use crate::models::{EditKind, FileChange, FileContent};
use crate::pipeline::{DiffOutcome, DiffPipeline, DiffRequest, PipelineError};
use crate::position::{extract_hunk_lines_from_patch, find_line_number_of_relevant_line_in_file};
use crate::sources::{DiffProvider, GitSource, ManifestSource, ProviderError};
use crate::tokens::{TiktokenCounter, TokenHandler};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    User(String),
}

/// The provider selected on the command line.
pub enum Source {
    Git(GitSource),
    Manifest(ManifestSource),
}

impl Source {
    pub fn from_args(args: &SourceArgs) -> Result<Self, AppError> {
        match (&args.range, &args.manifest) {
            (_, Some(manifest)) => Ok(Self::Manifest(ManifestSource::from_file(manifest)?)),
            (Some(range), None) => Ok(Self::Git(
                GitSource::from_range(range).with_work_dir(&args.repo),
            )),
            (None, None) => Err(AppError::User(
                "Either --range or --manifest is required".to_string(),
            )),
        }
    }
}

impl DiffProvider for Source {
    fn get_diff_files(&self) -> Result<Vec<FileChange>, ProviderError> {
        match self {
            Self::Git(source) => source.get_diff_files(),
            Self::Manifest(source) => source.get_diff_files(),
        }
    }

    fn get_languages(&self) -> Result<HashMap<String, u64>, ProviderError> {
        match self {
            Self::Git(source) => source.get_languages(),
            Self::Manifest(source) => source.get_languages(),
        }
    }
}

/// Runs CLI commands and renders their output.
pub struct App {
    config: DiffConfig,
}

impl App {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, command: Command) -> Result<String, AppError> {
        match command {
            Command::Diff(args) => self.handle_diff(args),
            Command::Chunks(args) => self.handle_chunks(args),
            Command::Locate(args) => self.handle_locate(args),
            Command::Extend(args) => self.handle_extend(args),
            Command::Hunk(args) => self.handle_hunk(args),
        }
    }

    fn handler(budget: &BudgetArgs) -> Result<TokenHandler, AppError> {
        let counter = TiktokenCounter::for_model(&budget.model).map_err(PipelineError::from)?;
        Ok(TokenHandler::new(Box::new(counter), budget.prompt_tokens))
    }

    fn handle_diff(&self, args: DiffArgs) -> Result<String, AppError> {
        let source = Source::from_args(&args.source)?;
        let handler = Self::handler(&args.budget)?;
        let pipeline = DiffPipeline::new(&source, &handler, &self.config);
        let request = DiffRequest::new(args.budget.model.as_str())
            .with_line_numbers(args.line_numbers)
            .without_extra_lines(args.no_extra_lines)
            .with_large_pr_handling(args.large_pr);

        let outcome = pipeline.pr_diff(&request)?;
        if args.format == OutputFormat::Json {
            return Ok(serde_json::to_string_pretty(&outcome)?);
        }
        match outcome {
            DiffOutcome::Extended { diff, .. } => Ok(diff),
            DiffOutcome::Compressed {
                diff,
                remaining_files,
            } => {
                if !remaining_files.is_empty() {
                    info!("Files left out of the diff: {}", remaining_files.join(", "));
                }
                Ok(diff)
            }
            DiffOutcome::Chunked(plan) => {
                info!("Change set split into {} documents", plan.documents.len());
                let documents: Vec<String> =
                    plan.documents.iter().map(|document| document.render()).collect();
                Ok(documents.join("\n\n"))
            }
        }
    }

    fn handle_chunks(&self, args: ChunksArgs) -> Result<String, AppError> {
        let source = Source::from_args(&args.source)?;
        let handler = Self::handler(&args.budget)?;
        let pipeline = DiffPipeline::new(&source, &handler, &self.config);
        let max_calls = args.max_calls.unwrap_or(self.config.max_ai_calls);

        let diffs = pipeline.multi_diffs(&args.budget.model, max_calls, args.line_numbers)?;
        info!("Produced {} diffs", diffs.len());
        match args.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&diffs)?),
            OutputFormat::Text => Ok(diffs.join("\n\n")),
        }
    }

    fn handle_locate(&self, args: LocateArgs) -> Result<String, AppError> {
        let source = Source::from_args(&args.source)?;
        let files = source.get_diff_files()?;
        let position = find_line_number_of_relevant_line_in_file(
            &files,
            &args.file,
            args.line.as_deref().unwrap_or_default(),
            args.position,
        );

        match args.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
                "patch_index": position.patch_index,
                "absolute_line": position.absolute_line,
            }))?),
            OutputFormat::Text => Ok(format!(
                "{} {}",
                display_or_missing(position.patch_index),
                display_or_missing(position.absolute_line)
            )),
        }
    }

    fn handle_extend(&self, args: ExtendArgs) -> Result<String, AppError> {
        let patch = FileContent::Bytes(read_file(&args.patch)?).decode().into_owned();
        let original = args.original.as_deref().map(read_file).transpose()?;
        let new = args.new.as_deref().map(read_file).transpose()?;
        let filename = args
            .filename
            .clone()
            .or_else(|| args.new.as_ref().map(|path| path.display().to_string()))
            .or_else(|| args.original.as_ref().map(|path| path.display().to_string()))
            .unwrap_or_default();

        let options = self
            .config
            .extend_options(self.config.context_lines(false));
        let original = original.map(FileContent::Bytes);
        let new = new.map(FileContent::Bytes);
        let extended = extend_patch(original.as_ref(), &patch, new.as_ref(), &filename, &options);

        if args.line_numbers {
            let file = FileChange::new(filename, EditKind::Modified);
            return Ok(convert_to_dual_view(&extended, Some(&file)));
        }
        Ok(extended)
    }

    fn handle_hunk(&self, args: HunkArgs) -> Result<String, AppError> {
        let patch = FileContent::Bytes(read_file(&args.patch)?).decode().into_owned();
        let (hunks, selected) = extract_hunk_lines_from_patch(
            &patch,
            &args.file,
            args.start,
            args.end.unwrap_or(args.start),
            args.side.into(),
            true,
        );

        match args.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
                "hunks": hunks,
                "selected_lines": selected,
            }))?),
            OutputFormat::Text => Ok(format!("{}\n\n{}", hunks.trim_start(), selected)),
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, AppError> {
    fs::read(path).map_err(|source| AppError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn display_or_missing(value: Option<usize>) -> String {
    value.map_or_else(|| "-1".to_string(), |value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{SideArg, SourceArgs};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn manifest_source(dir: &TempDir) -> SourceArgs {
        write(dir, "base.rs", "a\nb\nc\n");
        write(dir, "head.rs", "a\nB\nc\n");
        write(dir, "lib.patch", "@@ -2,1 +2,1 @@\n-b\n+B\n");
        let manifest = write(
            dir,
            "manifest.json",
            r#"{"files": [{"filename": "src/lib.rs", "edit_kind": "modified",
                "base": "base.rs", "head": "head.rs", "patch": "lib.patch"}]}"#,
        );
        SourceArgs {
            range: None,
            manifest: Some(manifest),
            repo: PathBuf::from("."),
        }
    }

    fn app() -> App {
        App::new(
            DiffConfig::default()
                .with_model_limit("small", 8000)
                .with_extra_lines(1, 1)
                .with_dynamic_context(false),
        )
    }

    #[test]
    fn test_diff_command_from_manifest() {
        let dir = TempDir::new().unwrap();
        let output = app()
            .run(Command::Diff(DiffArgs {
                source: manifest_source(&dir),
                budget: BudgetArgs {
                    model: "small".to_string(),
                    prompt_tokens: 0,
                },
                line_numbers: true,
                no_extra_lines: false,
                large_pr: false,
                format: OutputFormat::Text,
            }))
            .unwrap();
        assert!(output.starts_with("\n\n## File: 'src/lib.rs'\n"));
        assert!(output.contains("__new hunk__\n1  a\n2 +B\n3  c"));
        assert!(output.contains("__old hunk__\n a\n-b\n c"));
    }

    #[test]
    fn test_locate_command() {
        let dir = TempDir::new().unwrap();
        let output = app()
            .run(Command::Locate(LocateArgs {
                source: manifest_source(&dir),
                file: "src/lib.rs".to_string(),
                line: Some("B".to_string()),
                position: None,
                format: OutputFormat::Text,
            }))
            .unwrap();
        assert_eq!(output, "2 2");
    }

    #[test]
    fn test_extend_command() {
        let dir = TempDir::new().unwrap();
        let patch = write(&dir, "p.patch", "@@ -2,1 +2,1 @@\n-b\n+B");
        let original = write(&dir, "old.rs", "a\nb\nc\n");
        let output = app()
            .run(Command::Extend(ExtendArgs {
                patch,
                original: Some(original),
                new: None,
                filename: Some("x.rs".to_string()),
                line_numbers: false,
            }))
            .unwrap();
        assert_eq!(output, "\n@@ -1,3 +1,3 @@ \n a\n-b\n+B\n c");
    }

    #[test]
    fn test_hunk_command_json() {
        let dir = TempDir::new().unwrap();
        let patch = write(&dir, "p.patch", "@@ -1,2 +1,2 @@\n a\n-b\n+B\n");
        let output = app()
            .run(Command::Hunk(HunkArgs {
                patch,
                file: "x.rs".to_string(),
                start: 2,
                end: None,
                side: SideArg::Right,
                format: OutputFormat::Json,
            }))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["selected_lines"], "-b\n+B");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = app()
            .run(Command::Hunk(HunkArgs {
                patch: PathBuf::from("/nonexistent/p.patch"),
                file: "x.rs".to_string(),
                start: 1,
                end: None,
                side: SideArg::Left,
                format: OutputFormat::Text,
            }))
            .unwrap_err();
        assert!(matches!(err, AppError::Read { .. }));
    }
}
