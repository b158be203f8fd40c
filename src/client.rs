//! Streaming chat client.
//!
//! [`ChatClient`] posts a question to `POST /api/chat` and feeds the
//! response body into a [`Transcript`] chunk by chunk. The body is read
//! whatever the status code, so a plain-text error such as
//! `Server Error` shows up as the bot's reply.
//!
//! [`run_chat`] wraps this in a line-oriented terminal UI for `aibot chat`.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::transcript::{Action, PendingRequest, Theme, Transcript, Utf8ChunkDecoder};

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `request.question` and stream the answer into `transcript`.
    ///
    /// `on_text` sees each decoded piece as it is applied. On failure the
    /// transcript keeps whatever text arrived and stops responding.
    pub async fn send(
        &self,
        transcript: &mut Transcript,
        request: &PendingRequest,
        mut on_text: impl FnMut(&str),
    ) -> Result<(), reqwest::Error> {
        let id = request.bot_id.clone();

        let response = match self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "question": request.question }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                transcript.apply(Action::Failed {
                    id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "chat endpoint returned an error status");
        }

        let mut decoder = Utf8ChunkDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    debug!(bytes = bytes.len(), "received chunk");
                    let text = decoder.decode(&bytes);
                    if !text.is_empty() {
                        on_text(&text);
                        transcript.apply(Action::Chunk {
                            id: id.clone(),
                            text,
                        });
                    }
                }
                Err(e) => {
                    transcript.apply(Action::Failed {
                        id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            on_text(&tail);
            transcript.apply(Action::Chunk {
                id: id.clone(),
                text: tail,
            });
        }
        transcript.apply(Action::Finished { id });
        Ok(())
    }
}

/// CLI entry point for `aibot chat`.
///
/// Enter sends the line. A line ending in `\` continues the message on the
/// next line. `/theme` toggles the theme and `/quit` exits.
pub async fn run_chat(base_url: &str) -> Result<()> {
    let client = ChatClient::new(base_url);
    let mut transcript = Transcript::new();
    let interactive = atty::is(atty::Stream::Stdin);
    let mut stdout = std::io::stdout();

    debug!(endpoint = client.endpoint(), "starting chat");
    for message in transcript.messages() {
        println!("bot> {}", message.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            let prompt = if transcript.input().is_empty() {
                "you> "
            } else {
                "...> "
            };
            write!(stdout, "{}", prompt)?;
            stdout.flush()?;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };

        if transcript.input().is_empty() {
            match line.trim() {
                "/quit" => break,
                "/theme" => {
                    transcript.apply(Action::ToggleTheme);
                    let name = match transcript.theme() {
                        Theme::Light => "light",
                        Theme::Dark => "dark",
                    };
                    println!("(theme: {})", name);
                    continue;
                }
                _ => {}
            }
        }

        let text = format!("{}{}", transcript.input(), line.strip_suffix('\\').unwrap_or(&line));
        transcript.apply(Action::Input(text));

        let continued = line.ends_with('\\');
        let Some(request) = transcript.apply(Action::Enter { shift: continued }) else {
            if !continued {
                transcript.apply(Action::Input(String::new()));
            }
            continue;
        };

        write!(stdout, "bot> ")?;
        stdout.flush()?;
        let result = client
            .send(&mut transcript, &request, |text| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();

        if let Err(e) = result {
            warn!(error = %e, "chat request failed");
        }
    }

    Ok(())
}
