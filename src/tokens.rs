//! Token counting and budget limits.

use std::collections::{BTreeMap, HashMap};

use log::{debug, error};
use tiktoken_rs::{cl100k_base, get_bpe_from_model, o200k_base, CoreBPE};

use crate::config::DiffConfig;

/// Counts tokens the way the downstream model does.
pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

/// Byte pair encoding counter backed by `tiktoken-rs`.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Encoder for a model or encoding name; unknown models use `cl100k_base`.
    pub fn for_model(model: &str) -> Result<Self, BudgetError> {
        let lower = model.to_ascii_lowercase();
        let bpe = match get_bpe_from_model(&lower) {
            Ok(bpe) => bpe,
            Err(_) => match lower.as_str() {
                "o200k_base" => o200k_base(),
                _ => {
                    debug!("No tokenizer known for {}, using cl100k_base", model);
                    cl100k_base()
                }
            }
            .map_err(|e| BudgetError::Tokenizer(e.to_string()))?,
        };
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// A counter together with the fixed cost of the prompt the diff is embedded in.
pub struct TokenHandler {
    counter: Box<dyn TokenCounter>,
    /// Tokens taken by the prompt before any diff text is added.
    pub prompt_tokens: usize,
}

impl TokenHandler {
    pub fn new(counter: Box<dyn TokenCounter>, prompt_tokens: usize) -> Self {
        Self {
            counter,
            prompt_tokens,
        }
    }

    /// Handler whose prompt overhead is the size of the given prompt texts.
    pub fn for_prompt(counter: Box<dyn TokenCounter>, system: &str, user: &str) -> Self {
        let prompt_tokens = counter.count_tokens(system) + counter.count_tokens(user);
        Self::new(counter, prompt_tokens)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count_tokens(text)
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }
}

impl std::fmt::Debug for TokenHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenHandler")
            .field("prompt_tokens", &self.prompt_tokens)
            .finish_non_exhaustive()
    }
}

/// Options for [`clip_tokens`].
#[derive(Debug, Clone, Copy)]
pub struct ClipOptions {
    /// Append `\n...(truncated)` to clipped text.
    pub add_three_dots: bool,
    /// Pre-computed token count of the input, if known.
    pub num_input_tokens: Option<usize>,
    /// Drop the last, probably partial, line of clipped text.
    pub delete_last_line: bool,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            add_three_dots: true,
            num_input_tokens: None,
            delete_last_line: false,
        }
    }
}

const CLIP_SAFETY_FACTOR: f64 = 0.9;
const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// Shorten `text` to roughly `max_tokens` tokens.
///
/// Text that already fits is returned as is. A negative budget yields an
/// empty string. Otherwise the text is cut at a character count estimated
/// from its average characters per token, with a safety margin.
pub fn clip_tokens(
    text: &str,
    max_tokens: i64,
    counter: &dyn TokenCounter,
    options: ClipOptions,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    let num_input_tokens = options
        .num_input_tokens
        .unwrap_or_else(|| counter.count_tokens(text));
    if (num_input_tokens as i64) <= max_tokens {
        return text.to_string();
    }
    if max_tokens < 0 {
        return String::new();
    }

    let num_chars = text.chars().count();
    let chars_per_token = num_chars as f64 / num_input_tokens as f64;
    let num_output_chars = (CLIP_SAFETY_FACTOR * chars_per_token * max_tokens as f64) as usize;
    if num_output_chars == 0 {
        return String::new();
    }

    let mut clipped: String = text.chars().take(num_output_chars).collect();
    if options.delete_last_line {
        if let Some(pos) = clipped.rfind('\n') {
            clipped.truncate(pos);
        }
    }
    if options.add_three_dots {
        clipped.push_str(TRUNCATION_MARKER);
    }
    clipped
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error(
        "Model {0} is not defined in the token limit table. Add it to model_token_limits \
         or set custom_model_max_tokens"
    )]
    UnknownModel(String),
    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),
}

/// Lookup of a model's context window.
pub trait ModelLimits {
    fn max_tokens(&self, model: &str) -> Option<usize>;
}

impl ModelLimits for BTreeMap<String, usize> {
    fn max_tokens(&self, model: &str) -> Option<usize> {
        self.get(model).copied()
    }
}

impl ModelLimits for HashMap<String, usize> {
    fn max_tokens(&self, model: &str) -> Option<usize> {
        self.get(model).copied()
    }
}

/// Token budget for `model`.
///
/// The limit table wins; a positive `custom_model_max_tokens` covers unknown
/// models. A non-zero `max_model_tokens` caps the result.
pub fn get_max_tokens(
    model: &str,
    limits: &dyn ModelLimits,
    config: &DiffConfig,
) -> Result<usize, BudgetError> {
    let max_tokens = limits
        .max_tokens(model)
        .or(config.custom_model_max_tokens.filter(|&tokens| tokens > 0))
        .ok_or_else(|| {
            error!("Model {} is not defined in the token limit table", model);
            BudgetError::UnknownModel(model.to_string())
        })?;

    if config.max_model_tokens > 0 {
        Ok(max_tokens.min(config.max_model_tokens))
    } else {
        Ok(max_tokens)
    }
}
