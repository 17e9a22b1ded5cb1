use serde::Serialize;

/// Captions are always English, the fixed source side of every
/// translation call.
pub const SOURCE_LANG: &str = "en";

/// Code used when a language name falls outside the supported set.
pub const FALLBACK_CODE: &str = "hi";

/// Display names a front end may offer in its selection widget.
pub const SUPPORTED_LANGUAGES: [&str; 6] = [
    "English",
    "Hindi",
    "Tamil",
    "Telugu",
    "Malayalam",
    "Kannada",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedLanguage {
    pub code: &'static str,
    /// True when the requested name was not recognized and the code
    /// is the fallback rather than an explicit choice.
    pub fallback: bool,
}

/// Map a display name to the translation model's language code.
///
/// Total: unknown names degrade to [`FALLBACK_CODE`] instead of
/// failing, so a bad selection can never abort a pipeline run.
pub fn resolve(name: &str) -> ResolvedLanguage {
    let code = match name {
        "English" => Some("en"),
        "Hindi" => Some("hi"),
        "Tamil" => Some("ta"),
        "Telugu" => Some("te"),
        "Malayalam" => Some("ml"),
        "Kannada" => Some("kn"),
        _ => None,
    };

    match code {
        Some(code) => ResolvedLanguage {
            code,
            fallback: false,
        },
        None => ResolvedLanguage {
            code: FALLBACK_CODE,
            fallback: true,
        },
    }
}
