//! Command-line entry points and the interactive translation mode.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::error;

use crate::backend::{CancellationReason, RecognitionEvent, SpeechTranslator};
use crate::error::AppError;
use crate::languages::CLI_LANGUAGES;

#[derive(Debug, Parser)]
#[command(name = "speech-translate-web", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the web server (default).
    Serve,
    /// Repeatedly translate one recording into a language read from stdin.
    Interactive {
        /// Recording to translate; defaults to DEFAULT_AUDIO.
        #[arg(long, env = "TRANSLATE_FILE")]
        file: Option<PathBuf>,
    },
}

const PROMPT: &str =
    "\nEnter a target language\n fr = French\n es = Spanish\n hi = Hindi\n Enter anything else to stop\n";

/// Prompts for target languages until the input is not a supported one.
pub async fn run_interactive(
    translator: &dyn SpeechTranslator,
    file: &Path,
    deadline: Duration,
) -> Result<(), AppError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = tokio::io::stdout();

    loop {
        write_out(&mut out, PROMPT).await?;
        let line = lines
            .next_line()
            .await
            .map_err(|err| AppError::internal(format!("failed to read stdin: {err}")))?;
        let Some(target) = line.map(|l| l.trim().to_lowercase()) else {
            break;
        };
        if !CLI_LANGUAGES.contains(&target.as_str()) {
            break;
        }

        write_out(&mut out, &format!("Translating into {target}...\n")).await?;
        if let Err(err) = print_session(translator, file, &target, deadline, &mut out).await {
            error!(error = %err, "interactive translation failed");
            write_out(&mut out, &format!("Translation error: {err}\n")).await?;
        }
    }

    write_out(&mut out, "Exiting...\n").await
}

/// Streams one session's events to `out` as readable lines.
async fn print_session<W: AsyncWrite + Unpin>(
    translator: &dyn SpeechTranslator,
    file: &Path,
    target: &str,
    deadline: Duration,
    out: &mut W,
) -> Result<(), AppError> {
    let mut session = translator.open_session(file, target).await?;
    tokio::time::timeout(deadline, async {
        while let Some(event) = session.recv().await {
            let done = matches!(
                event,
                RecognitionEvent::SessionStopped | RecognitionEvent::Canceled { .. }
            );
            if let Some(text) = describe_event(&event) {
                write_out(out, &text).await?;
            }
            if done {
                break;
            }
        }
        Ok::<(), AppError>(())
    })
    .await
    .map_err(|_| {
        AppError::translation(format!(
            "translation timed out after {}s",
            deadline.as_secs()
        ))
    })?
}

fn describe_event(event: &RecognitionEvent) -> Option<String> {
    match event {
        RecognitionEvent::Recognized {
            text,
            translation: Some(translated),
        } if !translated.is_empty() => Some(format!(
            "Recognized: {text}\nTranslated: {translated}\n"
        )),
        RecognitionEvent::Recognized { text, .. } => {
            Some(format!("Recognized (but no translation): {text}\n"))
        }
        RecognitionEvent::NoMatch => Some("No speech could be recognized.\n".to_string()),
        RecognitionEvent::Canceled {
            reason: CancellationReason::Error,
            details,
        } => Some(format!("Canceled: Error\nError details: {details}\n")),
        RecognitionEvent::Canceled {
            reason: CancellationReason::EndOfStream,
            ..
        } => Some("Canceled: EndOfStream\n".to_string()),
        RecognitionEvent::SessionStopped => None,
    }
}

async fn write_out<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<(), AppError> {
    let to_err = |err: std::io::Error| AppError::internal(format!("failed to write to stdout: {err}"));
    out.write_all(text.as_bytes()).await.map_err(to_err)?;
    out.flush().await.map_err(to_err)
}
