//! System prompt rendering

use crate::core::config::JobConfig;

/// Default translation instruction
pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are a professional translator. \
Translate the user's text from {source_lang} into {target_lang}. \
Preserve paragraph breaks, names, numbers and formatting. \
Reply with the translation only, without commentary.";

/// Stricter instruction used for the single corrective re-request
const CORRECTIVE_PROMPT_TEMPLATE: &str = "IMPORTANT: your previous answer was not written in {target_lang}. \
Translate the user's text from {source_lang} into {target_lang}. \
Every sentence of your reply MUST be in {target_lang}. \
Do not leave any {source_lang} words untranslated except proper names. \
Reply with the {target_lang} translation only.";

/// Placeholder for an unspecified source language
const AUTO_SOURCE: &str = "the source language";

/// Rendered prompt configuration for one job
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    /// Rendered system message
    pub system_prompt: String,
    /// Sampling temperature
    pub temperature: f32,
}

impl PromptConfig {
    /// Normal prompt built from the job's template
    pub fn for_job(config: &JobConfig) -> Self {
        Self {
            system_prompt: render(&config.prompt_template, config),
            temperature: config.temperature,
        }
    }

    /// Directive variant naming the configured language pair
    pub fn corrective(config: &JobConfig) -> Self {
        Self {
            system_prompt: render(CORRECTIVE_PROMPT_TEMPLATE, config),
            temperature: 0.0,
        }
    }
}

fn render(template: &str, config: &JobConfig) -> String {
    let source = config
        .source_lang
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "auto")
        .unwrap_or(AUTO_SOURCE);

    template
        .replace("{source_lang}", source)
        .replace("{target_lang}", &config.target_lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let config = JobConfig::new("gpt-4o-mini", "English").with_source_lang("Portuguese");
        let prompt = PromptConfig::for_job(&config);

        assert!(prompt.system_prompt.contains("from Portuguese into English"));
        assert!(!prompt.system_prompt.contains('{'));
    }

    #[test]
    fn test_auto_source() {
        let config = JobConfig::new("gpt-4o-mini", "German").with_source_lang("auto");
        let prompt = PromptConfig::for_job(&config);

        assert!(prompt.system_prompt.contains("from the source language into German"));
    }

    #[test]
    fn test_corrective_is_stricter() {
        let config = JobConfig::new("gpt-4o-mini", "English").with_source_lang("pt");
        let corrective = PromptConfig::corrective(&config);

        assert!(corrective.system_prompt.contains("MUST be in English"));
        assert_eq!(corrective.temperature, 0.0);
    }
}
