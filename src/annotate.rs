use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

use rater_core::errors::Recovery;
use rater_core::ids::EssayId;
use rater_core::rubric::Rubric;
use rater_core::services::{AnnotationStore, EssayStore};
use rater_engine::{AnnotationSession, EngineError, EssaySequence, NextStep};

use crate::cli::{EditorCommand, EDITOR_HELP};
use crate::render;

/// Line-oriented prompt over any reader/writer pair.
pub struct Console<R, W> {
    lines: Lines<R>,
    out: W,
}

impl<R: AsyncBufRead + Unpin, W: Write> Console<R, W> {
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: reader.lines(),
            out,
        }
    }

    pub fn say(&mut self, text: impl AsRef<str>) -> std::io::Result<()> {
        let text = text.as_ref();
        self.out.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()
    }

    /// `None` once input is exhausted.
    pub async fn ask(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        self.out.write_all(prompt.as_bytes())?;
        self.out.flush()?;
        Ok(self.lines.next_line().await?.map(|l| l.trim().to_string()))
    }

    pub async fn confirm(&mut self, question: &str, default_yes: bool) -> std::io::Result<bool> {
        let hint = if default_yes { "[Y/n]" } else { "[y/N]" };
        let answer = self.ask(&format!("{question} {hint} ")).await?;
        Ok(match answer.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => false,
            Some("") => default_yes,
            Some(a) => a.starts_with('y'),
        })
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }
}

/// Collaborators the editor talks to.
#[derive(Clone)]
pub struct Services {
    pub essays: Arc<dyn EssayStore>,
    pub annotations: Arc<dyn AnnotationStore>,
}

/// Edit essays starting at `first` until the rater quits or the sequence
/// runs out. Errors that leave the editor (expired login, missing essay)
/// are returned; everything else is printed and editing continues.
pub async fn run_editor<R: AsyncBufRead + Unpin, W: Write>(
    console: &mut Console<R, W>,
    services: &Services,
    sequence: &mut EssaySequence,
    first: EssayId,
    rubric: Rubric,
) -> Result<()> {
    let mut current = first;
    loop {
        let mut session = AnnotationSession::open(
            current,
            services.essays.as_ref(),
            services.annotations.clone(),
            rubric.clone(),
        )
        .await?;
        let title = sequence
            .display_title(current)
            .unwrap_or_else(|| session.essay().title.clone());
        console.say(render::essay(&session, &title))?;
        console.say("type `help` for commands")?;

        match edit_one(console, &mut session, sequence, &title).await? {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
}

/// Returns the next essay to open, or `None` to leave the editor.
async fn edit_one<R: AsyncBufRead + Unpin, W: Write>(
    console: &mut Console<R, W>,
    session: &mut AnnotationSession,
    sequence: &mut EssaySequence,
    title: &str,
) -> Result<Option<EssayId>> {
    let saved = session.board().clone();
    loop {
        let prompt = format!("{title} [{}]> ", session.active());
        let Some(line) = console.ask(&prompt).await? else {
            return Ok(None);
        };
        if line.is_empty() {
            continue;
        }
        let command = match line.parse::<EditorCommand>() {
            Ok(c) => c,
            Err(msg) => {
                console.say(msg)?;
                continue;
            }
        };
        debug!(?command, "editor command");

        let result = match command {
            EditorCommand::Activate(t) => session.activate(t).map(|_| render::essay(session, title)),
            EditorCommand::Score(t, score) => {
                let t = t.unwrap_or_else(|| session.active());
                session.set_score(t, score).map(|_| render::status(&session.status()))
            }
            EditorCommand::Clear(t) => {
                let t = t.unwrap_or_else(|| session.active());
                session.clear_score(t).map(|_| render::status(&session.status()))
            }
            EditorCommand::Toggle(indices) => toggle_all(session, &indices),
            EditorCommand::Next => Ok(if session.advance() {
                render::essay(session, title)
            } else {
                "already on the last trait".to_string()
            }),
            EditorCommand::Prev => Ok(if session.retreat() {
                render::essay(session, title)
            } else {
                "already on the first trait".to_string()
            }),
            EditorCommand::Show => Ok(render::essay(session, title)),
            EditorCommand::Status => Ok(render::status(&session.status())),
            EditorCommand::Evidence => Ok(render::evidence(&session.evidence())),
            EditorCommand::Help => Ok(EDITOR_HELP.to_string()),
            EditorCommand::Quit => {
                if session.board() != &saved
                    && !console.confirm("Discard unsaved changes?", false).await?
                {
                    continue;
                }
                return Ok(None);
            }
            EditorCommand::Save => {
                let status = session.status();
                if !status.is_complete() {
                    console.say(render::status(&status))?;
                    if !console.confirm("Some traits are incomplete. Save anyway?", false).await? {
                        continue;
                    }
                }
                match session.save(sequence).await {
                    Ok(outcome) => {
                        console.say(format!("Saved {title}."))?;
                        return match outcome.next {
                            NextStep::Offer(entry) => {
                                let question = format!("Continue to Item #{}?", entry.display_order);
                                if console.confirm(&question, true).await? {
                                    Ok(Some(entry.essay_id))
                                } else {
                                    Ok(None)
                                }
                            }
                            NextStep::Dashboard => {
                                console.say("Every assigned essay is annotated.")?;
                                Ok(None)
                            }
                        };
                    }
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(text) => console.say(text)?,
            Err(e) if e.recovery() == Recovery::Inline => console.say(format!("! {e}"))?,
            Err(e) => return Err(e.into()),
        }
    }
}

fn toggle_all(session: &mut AnnotationSession, indices: &[usize]) -> Result<String, EngineError> {
    // range-check the whole batch so a bad number toggles nothing
    let total = session.total_sentences();
    if let Some(&index) = indices.iter().find(|&&i| i >= total) {
        return Err(EngineError::SentenceOutOfRange { index, total });
    }
    for &i in indices {
        session.toggle_sentence(i)?;
    }
    Ok(render::status(&session.status()))
}
