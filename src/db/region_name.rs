use std::collections::HashMap;

/// Maps a raw region name to the form used for storage and key comparison.
pub trait RegionNormalizer: Send + Sync {
    /// Storage form: trimmed, corrected and title-cased.
    fn normalize(&self, raw: &str) -> String;

    /// Comparison key. Two names address the same region iff their keys are equal.
    fn key(&self, raw: &str) -> String {
        self.normalize(raw).to_lowercase()
    }
}

/// Fixed table of known misspellings, keyed by the lowercased raw name.
pub struct CorrectionTable {
    corrections: HashMap<String, String>,
}

impl CorrectionTable {
    pub fn new<I, K, V>(corrections: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            corrections: corrections
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into()))
                .collect(),
        }
    }
}

impl Default for CorrectionTable {
    fn default() -> Self {
        Self::new([
            ("хмельничена", "хмельниччина"),
            ("хмельниченна", "хмельниччина"),
            ("khmelnychena", "khmelnychchyna"),
            ("khmelnychenna", "khmelnychchyna"),
        ])
    }
}

impl RegionNormalizer for CorrectionTable {
    fn normalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self.corrections.get(&trimmed.to_lowercase()) {
            Some(corrected) => title_case(corrected),
            None => title_case(trimmed),
        }
    }
}

/// Upper-cases the first letter of every word; apostrophes do not start a new word.
pub fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                result.extend(ch.to_uppercase());
            } else {
                result.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            result.push(ch);
            at_word_start = !matches!(ch, '\'' | '’' | 'ʼ');
        }
    }

    result
}
