//! Target languages offered by the web form.

/// Known target-language codes and their display names, in form order.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("fr", "French"),
    ("es", "Spanish"),
    ("hi", "Hindi"),
    ("de", "German"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh-Hans", "Chinese (Simplified)"),
    ("ru", "Russian"),
    ("ar", "Arabic"),
];

/// Languages accepted by the interactive command-line mode.
pub const CLI_LANGUAGES: &[&str] = &["fr", "es", "hi"];

/// Target used when a form submission omits the language field.
pub const DEFAULT_TARGET: &str = "fr";

/// Returns the display name for `code`, or the code itself when unknown.
pub fn display_name(code: &str) -> &str {
    LANGUAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, name)| *name)
        .unwrap_or(code)
}
