//! Stop-word profile language detection.
//!
//! Counts how many words of the text hit each language's most frequent
//! function words and picks the best profile. Texts shorter than
//! [`MIN_DETECT_CHARS`] or without a clear winner are [`Language::Unknown`].

use crate::types::Language;

pub const MIN_DETECT_CHARS: usize = 20;

/// Minimum share of words that must be profile hits for a confident answer.
const MIN_HIT_RATIO: f32 = 0.08;

const PROFILES: &[(Language, &[&str])] = &[
    (Language::English, &["the", "and", "of", "to", "is", "in", "that", "it", "was", "for", "on", "with", "as", "are", "this", "be", "at", "by", "from", "have"]),
    (Language::Spanish, &["el", "la", "de", "que", "y", "en", "los", "se", "del", "las", "un", "por", "con", "una", "para", "es", "al", "lo", "como", "pero"]),
    (Language::French, &["le", "la", "de", "et", "les", "des", "est", "un", "une", "du", "que", "en", "dans", "qui", "pour", "pas", "au", "sur", "avec", "ce"]),
    (Language::German, &["der", "die", "und", "das", "ist", "nicht", "den", "von", "zu", "mit", "sich", "des", "auf", "ein", "eine", "dem", "im", "auch", "es", "wird"]),
    (Language::Italian, &["il", "di", "che", "e", "la", "per", "un", "non", "sono", "una", "del", "della", "gli", "le", "con", "si", "da", "anche", "questo", "nel"]),
    (Language::Portuguese, &["o", "de", "que", "e", "do", "da", "em", "um", "para", "com", "uma", "os", "no", "na", "por", "mais", "as", "dos", "não", "ao"]),
    (Language::Dutch, &["de", "het", "een", "en", "van", "ik", "te", "dat", "die", "in", "is", "niet", "op", "zijn", "met", "voor", "ook", "aan", "er", "maar"]),
];

pub fn detect(text: &str) -> Language {
    if text.trim().chars().count() < MIN_DETECT_CHARS {
        return Language::Unknown;
    }
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        return Language::Unknown;
    }
    let mut best = (Language::Unknown, 0usize);
    for (lang, stop_words) in PROFILES {
        let hits = words.iter().filter(|w| stop_words.contains(&w.as_str())).count();
        // strict > keeps the earlier profile on ties
        if hits > best.1 {
            best = (*lang, hits);
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = best.1 as f32 / words.len() as f32;
    if ratio >= MIN_HIT_RATIO { best.0 } else { Language::Unknown }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_languages() {
        assert_eq!(detect("The quick brown fox jumps over the lazy dog and it was happy in the sun."), Language::English);
        assert_eq!(detect("El perro de la casa es muy grande y los niños juegan con el en el parque."), Language::Spanish);
        assert_eq!(detect("Le chat est sur la table et les enfants jouent dans le jardin avec une balle."), Language::French);
        assert_eq!(detect("Der Hund ist nicht im Haus und die Kinder spielen mit dem Ball auf der Straße."), Language::German);
    }

    #[test]
    fn short_or_symbolic_text_is_unknown() {
        assert_eq!(detect("hi there"), Language::Unknown);
        assert_eq!(detect("1234 5678 9012 3456 7890 ++--"), Language::Unknown);
        assert_eq!(detect("zxcv qwer asdf uiop hjkl bnm"), Language::Unknown);
    }
}
