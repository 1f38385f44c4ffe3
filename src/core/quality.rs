//! Heuristic check that a translation is written in the target language
//!
//! The guard counts hits from short lists of very frequent function words for
//! the source and the target language. It is advisory: a `Suspect` verdict
//! triggers at most one corrective re-request and never blocks a chunk.

use serde::{Deserialize, Serialize};

/// Verdict of the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Assessment {
    /// The text looks like the target language
    Accept,
    /// The text still reads like the source language
    Suspect {
        /// Source-language indicator words found
        source_hits: usize,
        /// Target-language indicator words found
        target_hits: usize,
    },
}

impl Assessment {
    /// True for [`Assessment::Suspect`]
    pub fn is_suspect(&self) -> bool {
        matches!(self, Assessment::Suspect { .. })
    }
}

const ENGLISH: &[&str] = &[
    "the", "and", "of", "to", "is", "that", "with", "for", "this", "are", "was", "not", "have",
    "which", "from", "they", "but", "there",
];

const PORTUGUESE: &[&str] = &[
    "não", "uma", "com", "para", "que", "dos", "das", "são", "também", "está", "isso", "pelo",
    "pela", "mais", "muito", "quando", "ele", "ela",
];

const SPANISH: &[&str] = &[
    "el", "los", "las", "una", "con", "para", "que", "del", "está", "también", "pero", "muy",
    "cuando", "porque", "sus", "esta", "hay", "ellos",
];

const FRENCH: &[&str] = &[
    "le", "les", "des", "une", "est", "avec", "pour", "dans", "qui", "pas", "sur", "mais", "très",
    "aussi", "nous", "vous", "cette", "été",
];

const GERMAN: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "auch", "für", "auf", "dem",
    "sich", "wird", "wurde", "oder", "sind",
];

const ITALIAN: &[&str] = &[
    "il", "gli", "della", "che", "non", "una", "con", "per", "sono", "anche", "questo", "molto",
    "quando", "perché", "nel", "alla", "loro",
];

/// Indicator words for a language given by ISO code or English name
pub fn indicator_words(lang: &str) -> Option<&'static [&'static str]> {
    let lang = lang.trim().to_lowercase();
    let code = lang.split(['-', '_']).next().unwrap_or_default();
    let words = match code {
        "en" | "eng" | "english" => ENGLISH,
        "pt" | "por" | "portuguese" | "português" => PORTUGUESE,
        "es" | "spa" | "spanish" | "español" => SPANISH,
        "fr" | "fra" | "fre" | "french" | "français" => FRENCH,
        "de" | "deu" | "ger" | "german" | "deutsch" => GERMAN,
        "it" | "ita" | "italian" | "italiano" => ITALIAN,
        _ => return None,
    };
    Some(words)
}

/// Word-list language guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGuard {
    /// Source hits must exceed target hits by more than this
    margin: usize,
}

impl Default for QualityGuard {
    fn default() -> Self {
        Self { margin: 2 }
    }
}

impl QualityGuard {
    /// Guard with the given margin
    pub fn new(margin: usize) -> Self {
        Self { margin }
    }

    /// Judge whether `translated` looks like it is still in `source_lang`
    ///
    /// Unknown or unspecified languages, and identical pairs, are always accepted.
    pub fn assess(&self, translated: &str, source_lang: Option<&str>, target_lang: &str) -> Assessment {
        let Some(source_lang) = source_lang.filter(|s| !s.is_empty() && *s != "auto") else {
            return Assessment::Accept;
        };

        let (Some(source_words), Some(target_words)) =
            (indicator_words(source_lang), indicator_words(target_lang))
        else {
            return Assessment::Accept;
        };

        if std::ptr::eq(source_words, target_words) {
            return Assessment::Accept;
        }

        let mut source_hits = 0;
        let mut target_hits = 0;
        for word in translated
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let word = word.as_str();
            let in_source = source_words.contains(&word);
            let in_target = target_words.contains(&word);
            // Words shared by both lists say nothing about the language.
            if in_source && !in_target {
                source_hits += 1;
            } else if in_target && !in_source {
                target_hits += 1;
            }
        }

        if source_hits > target_hits + self.margin {
            Assessment::Suspect {
                source_hits,
                target_hits,
            }
        } else {
            Assessment::Accept
        }
    }
}
