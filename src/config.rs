use std::env;

use eyre::{Result, WrapErr, bail, eyre};

use crate::cli::chat::tutor::ItemDecodePolicy;
use crate::graph::DEFAULT_STEP_LIMIT;

pub const API_KEY_VAR: &str = "SAMBANOVA_CLOUD_API_KEY";
pub const BASE_URL_VAR: &str = "TUTOR_BASE_URL";
pub const CHAT_MODEL_VAR: &str = "TUTOR_CHAT_MODEL";
pub const FINALIZE_MODEL_VAR: &str = "TUTOR_FINALIZE_MODEL";
pub const STEP_LIMIT_VAR: &str = "TUTOR_STEP_LIMIT";

pub const DEFAULT_BASE_URL: &str = "https://api.sambanova.ai/v1/";
pub const DEFAULT_CHAT_MODEL: &str = "Meta-Llama-3.2-3B-Instruct";
pub const DEFAULT_FINALIZE_MODEL: &str = "Meta-Llama-3.1-405B-Instruct";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct TutorConfig {
    pub provider: ProviderConfig,
    /// Model used for chatting, classifying, planning and drafting.
    pub chat_model: String,
    /// Model used to turn each drafted problem into a question/answer pair.
    pub finalize_model: String,
    pub step_limit: usize,
    pub item_policy: ItemDecodePolicy,
}

impl TutorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup(API_KEY_VAR)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| eyre!("{} environment variable not set", API_KEY_VAR))?;

        let step_limit = match lookup(STEP_LIMIT_VAR) {
            Some(raw) => {
                let limit: usize = raw
                    .trim()
                    .parse()
                    .wrap_err_with(|| format!("{} must be a positive integer, got {:?}", STEP_LIMIT_VAR, raw))?;
                if limit == 0 {
                    bail!("{} must be a positive integer, got 0", STEP_LIMIT_VAR);
                }
                limit
            }
            None => DEFAULT_STEP_LIMIT,
        };

        Ok(Self {
            provider: ProviderConfig {
                api_key,
                base_url: lookup(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            },
            chat_model: lookup(CHAT_MODEL_VAR).unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            finalize_model: lookup(FINALIZE_MODEL_VAR).unwrap_or_else(|| DEFAULT_FINALIZE_MODEL.to_string()),
            step_limit,
            item_policy: ItemDecodePolicy::default(),
        })
    }
}
