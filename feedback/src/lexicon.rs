use scoring::model::{KeywordCategory, NewKeyword};

use KeywordCategory::*;

// (keyword, category, severity, language, optional detection pattern)
const SEED: &[(&str, KeywordCategory, u8, &str, Option<&str>)] = &[
    // English
    ("scam", Threats, 8, "en", Some(r"\bscam(s|mer|mers|med)?\b")),
    ("fraud", Threats, 7, "en", Some(r"\bfraud(ulent|sters?)?\b")),
    ("sue you", Threats, 9, "en", Some(r"\b(sue|suing)\s+(you|them|this place)\b")),
    ("burn it down", Threats, 10, "en", None),
    ("report you", Threats, 5, "en", None),
    ("damn", Profanity, 3, "en", None),
    ("crap", Profanity, 4, "en", None),
    ("shit", Profanity, 6, "en", Some(r"\bsh[i1!\*]t+\b")),
    ("fuck", Profanity, 8, "en", Some(r"\bf[u\*@]c?k+(ing|ed|er)?\b")),
    ("asdf", Nonsensical, 5, "en", Some(r"\b(asdf|qwer|zxcv)\w*\b")),
    ("lorem ipsum", Nonsensical, 6, "en", None),
    ("test test", Nonsensical, 4, "en", None),
    ("teleported", Impossible, 7, "en", Some(r"\btele-?port(ed|ing)?\b")),
    ("a thousand bowls", Impossible, 6, "en", Some(r"\b(thousand|million)\s+(bowls|plates|cups)\b")),
    ("came back from the dead", Impossible, 8, "en", None),
    // Vietnamese
    ("lừa đảo", Threats, 8, "vi", Some(r"lừa\s+đảo")),
    ("kiện", Threats, 6, "vi", None),
    ("đồ ngu", Profanity, 6, "vi", None),
    ("vãi", Profanity, 3, "vi", None),
    ("dịch chuyển tức thời", Impossible, 7, "vi", None),
];

/// Curated starting lexicon for a fresh deployment.
pub fn seed_keywords() -> Vec<NewKeyword> {
    SEED.iter()
        .map(|(keyword, category, severity, language, pattern)| {
            let entry = NewKeyword::new(keyword, *category, *severity, language);
            match pattern {
                Some(p) => entry.with_pattern(p),
                None => entry,
            }
        })
        .collect()
}
