//! Entry points that turn a provider's changed files into prompt-ready diffs.

use log::{error, info};
use serde::Serialize;

use crate::chunker::{
    append_unprocessed_file_lists, generate_compressed_diff, generate_extended_diff,
    generate_multi_diffs, ChunkPlan, CompressOptions, MultiDiffOptions,
    OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD,
};
use crate::config::DiffConfig;
use crate::language::{sort_files_by_main_languages, LanguageGroup};
use crate::sources::{DiffProvider, ProviderError};
use crate::tokens::{get_max_tokens, BudgetError, TokenHandler};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Parameters of a single diff request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRequest {
    pub model: String,
    /// Render hunks in the dual view with absolute line numbers.
    pub add_line_numbers_to_hunks: bool,
    /// Do not extend hunks with extra context.
    pub disable_extra_lines: bool,
    /// Split an oversized change set into several documents.
    pub large_pr_handling: bool,
}

impl DiffRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_line_numbers(mut self, enabled: bool) -> Self {
        self.add_line_numbers_to_hunks = enabled;
        self
    }

    pub fn without_extra_lines(mut self, disabled: bool) -> Self {
        self.disable_extra_lines = disabled;
        self
    }

    pub fn with_large_pr_handling(mut self, enabled: bool) -> Self {
        self.large_pr_handling = enabled;
        self
    }
}

/// What [`DiffPipeline::pr_diff`] produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiffOutcome {
    /// Every file with extended context fit the budget.
    Extended { diff: String, total_tokens: usize },
    /// The diff was compressed; some files may be listed by name only.
    Compressed {
        diff: String,
        remaining_files: Vec<String>,
    },
    /// The change set needs several documents.
    Chunked(ChunkPlan),
}

impl DiffOutcome {
    /// The single diff text, if the outcome has one.
    pub fn diff(&self) -> Option<&str> {
        match self {
            Self::Extended { diff, .. } | Self::Compressed { diff, .. } => Some(diff),
            Self::Chunked(_) => None,
        }
    }
}

/// Builds diffs for one change set.
pub struct DiffPipeline<'a, P: DiffProvider> {
    provider: &'a P,
    handler: &'a TokenHandler,
    config: &'a DiffConfig,
}

impl<'a, P: DiffProvider> DiffPipeline<'a, P> {
    pub fn new(provider: &'a P, handler: &'a TokenHandler, config: &'a DiffConfig) -> Self {
        Self {
            provider,
            handler,
            config,
        }
    }

    /// The diff for a single model call.
    ///
    /// Returns the extended diff when it fits the model. Otherwise compresses
    /// it; with large PR handling a compression that needs several documents
    /// is returned whole.
    pub fn pr_diff(&self, request: &DiffRequest) -> Result<DiffOutcome, PipelineError> {
        let lines = self.config.context_lines(request.disable_extra_lines);
        let mut groups = self.load_groups()?;

        let extended = generate_extended_diff(
            &mut groups,
            self.handler,
            request.add_line_numbers_to_hunks,
            &self.config.extend_options(lines),
            self.config.enable_ai_metadata,
        );

        let max_tokens = self.max_tokens(&request.model)?;
        if extended.total_tokens + OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD < max_tokens {
            info!(
                "Tokens: {}, total tokens under limit: {}, returning full diff.",
                extended.total_tokens, max_tokens
            );
            return Ok(DiffOutcome::Extended {
                diff: extended.render(),
                total_tokens: extended.total_tokens,
            });
        }

        info!(
            "Tokens: {}, total tokens over limit: {}, pruning diff.",
            extended.total_tokens, max_tokens
        );
        let plan = generate_compressed_diff(
            &groups,
            self.handler,
            max_tokens,
            &CompressOptions {
                convert_to_line_numbers: request.add_line_numbers_to_hunks,
                large_pr_handling: request.large_pr_handling,
                max_ai_calls: self.config.max_ai_calls,
            },
        );

        if request.large_pr_handling && plan.documents.len() > 1 {
            info!(
                "Large PR handling mode, and found {} patches with original diff.",
                plan.documents.len()
            );
            return Ok(DiffOutcome::Chunked(plan));
        }

        let diff = append_unprocessed_file_lists(&plan, self.handler, max_tokens);
        Ok(DiffOutcome::Compressed {
            diff,
            remaining_files: plan.remaining_filenames,
        })
    }

    /// The compressed plan with large PR handling, without trying the
    /// extended diff first.
    pub fn multiple_patches(&self, request: &DiffRequest) -> Result<ChunkPlan, PipelineError> {
        let groups = self.load_groups()?;
        let max_tokens = self.max_tokens(&request.model)?;
        Ok(generate_compressed_diff(
            &groups,
            self.handler,
            max_tokens,
            &CompressOptions {
                convert_to_line_numbers: request.add_line_numbers_to_hunks,
                large_pr_handling: true,
                max_ai_calls: self.config.max_ai_calls,
            },
        ))
    }

    /// Up to `max_calls` diffs that together cover as much of the change set
    /// as the budget allows.
    pub fn multi_diffs(
        &self,
        model: &str,
        max_calls: usize,
        add_line_numbers: bool,
    ) -> Result<Vec<String>, PipelineError> {
        let lines = self.config.context_lines(false);
        let mut groups = self.load_groups()?;

        let extended = generate_extended_diff(
            &mut groups,
            self.handler,
            add_line_numbers,
            &self.config.extend_options(lines),
            self.config.enable_ai_metadata,
        );

        let max_tokens = self.max_tokens(model)?;
        if extended.total_tokens + OUTPUT_BUFFER_TOKENS_SOFT_THRESHOLD < max_tokens {
            if extended.patches.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![extended.render()]);
        }

        Ok(generate_multi_diffs(
            &groups,
            self.handler,
            max_tokens,
            &MultiDiffOptions {
                max_calls,
                add_line_numbers,
                large_patch_policy: self.config.large_patch_policy,
                enable_ai_metadata: self.config.enable_ai_metadata,
            },
        ))
    }

    fn load_groups(&self) -> Result<Vec<LanguageGroup>, PipelineError> {
        let files = self.provider.get_diff_files().map_err(|err| {
            if let ProviderError::RateLimitExceeded(message) = &err {
                error!(
                    "Rate limit exceeded for diff provider. original message {}",
                    message
                );
            }
            err
        })?;
        let languages = self.provider.get_languages()?;

        let groups = sort_files_by_main_languages(&languages, files);
        if let Some(main) = groups.first() {
            info!("Main language: {}", main.language);
        }
        Ok(groups)
    }

    fn max_tokens(&self, model: &str) -> Result<usize, BudgetError> {
        get_max_tokens(model, &self.config.model_token_limits, self.config)
    }
}
