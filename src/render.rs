//! Page rendering for the upload form and translation results.

use std::fmt::Write;

use crate::languages::{DEFAULT_TARGET, LANGUAGES};
use crate::workflow::TranslationOutcome;

/// Renders the form, followed by `result` when a submission was processed.
pub fn render_page(selected: Option<&str>, result: Option<&TranslationOutcome>) -> String {
    let selected = selected.unwrap_or(DEFAULT_TARGET);
    let mut html = String::with_capacity(2048);

    html.push_str(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Speech Translator</title>\n</head>\n<body>\n<h1>Speech Translator</h1>\n\
         <form method=\"post\" enctype=\"multipart/form-data\">\n\
         <label for=\"audio\">WAV file</label>\n\
         <input type=\"file\" id=\"audio\" name=\"audio\" accept=\".wav,audio/wav\">\n\
         <label for=\"language\">Translate to</label>\n\
         <select id=\"language\" name=\"language\">\n",
    );
    for (code, name) in LANGUAGES {
        let marker = if *code == selected { " selected" } else { "" };
        let _ = writeln!(
            html,
            "<option value=\"{}\"{marker}>{}</option>",
            escape_html(code),
            escape_html(name)
        );
    }
    html.push_str(
        "</select>\n<button type=\"submit\">Translate</button>\n</form>\n\
         <p><a href=\"/default-audio\">Default recording</a></p>\n",
    );

    if let Some(result) = result {
        html.push_str("<section id=\"result\">\n");
        let _ = writeln!(
            html,
            "<h2>Result ({})</h2>",
            escape_html(&result.language)
        );
        if let Some(url) = result.audio_url.as_deref() {
            let _ = writeln!(
                html,
                "<audio controls src=\"{}\"></audio>",
                escape_html(url)
            );
        }
        let _ = writeln!(
            html,
            "<h3>Recognized</h3>\n<p id=\"recognized\">{}</p>",
            escape_html(&result.recognized)
        );
        let _ = writeln!(
            html,
            "<h3>Translated</h3>\n<p id=\"translated\">{}</p>",
            escape_html(&result.translated)
        );
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Escapes text for use in element content and quoted attributes.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
