use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::Level;

use rater_core::rubric::{Rubric, RubricTrait, Score};

/// Essay rubric annotation client.
#[derive(Parser, Debug)]
#[command(name = "rater", about = "Score essays on rubric traits and flag evidence sentences")]
pub struct Cli {
    /// Backend base URL (overrides RATER_API_URL).
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Where the login is remembered.
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Default log level.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Do not persist warnings to the local log database.
    #[arg(long, global = true)]
    pub no_log_db: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show warnings recorded in the local log database, newest first.
    Logs {
        /// Only entries for this essay id.
        #[arg(long)]
        essay: Option<rater_core::ids::EssayId>,
        /// Only entries for this blind id.
        #[arg(long)]
        blind: Option<rater_core::ids::BlindId>,
        /// Only entries at this level (WARN or ERROR).
        #[arg(long)]
        level: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    #[command(flatten)]
    Backend(BackendCommand),
}

/// Commands that talk to the annotation backend.
#[derive(Subcommand, Debug)]
pub enum BackendCommand {
    /// Sign in and remember the session.
    Login {
        #[arg(long, short)]
        username: String,
        /// Prompted for (without echo) when omitted.
        #[arg(long, short)]
        password: Option<String>,
    },
    /// Forget the remembered session.
    Logout,
    /// Show who is signed in.
    Whoami,
    /// Show the dashboard: assigned essays and progress.
    List,
    /// Open the annotation editor.
    Annotate {
        /// Essay id or blind id. Defaults to the first essay not yet rated.
        target: Option<EssayRef>,
        /// `standard`, `legacy`, or a comma-separated trait list.
        #[arg(long, default_value = "standard")]
        rubric: Rubric,
    },
    /// Print an essay's paper summary.
    Summary {
        /// Essay id or blind id.
        target: EssayRef,
    },
    /// Lock in every saved annotation.
    SubmitAll,
}

/// An essay named on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EssayRef {
    Id(rater_core::ids::EssayId),
    Blind(rater_core::ids::BlindId),
}

impl FromStr for EssayRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Blind(rater_core::ids::BlindId::from_raw(s)),
        })
    }
}

/// One line typed into the annotation editor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorCommand {
    Activate(RubricTrait),
    Score(Option<RubricTrait>, Score),
    Clear(Option<RubricTrait>),
    /// 0-based sentence indices.
    Toggle(Vec<usize>),
    Next,
    Prev,
    Show,
    Status,
    Evidence,
    Save,
    Help,
    Quit,
}

pub const EDITOR_HELP: &str = "\
commands:
  trait <name>          switch to content | organization | language | ai_feedback
  score [trait] <1-5>   score the active (or named) trait
  clear [trait]         unset a score
  toggle <n> [n...]     flip sentence numbers for the active trait
  next | prev           move through the rubric
  show                  print the essay with the active trait's selection
  status                per-trait progress
  evidence              source passages the essay should draw on
  save                  store the annotation
  help | quit";

impl FromStr for EditorCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err("empty command".into());
        };
        let rest: Vec<&str> = words.collect();

        match (head.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("trait" | "t", [name]) => Ok(Self::Activate(name.parse()?)),
            ("score" | "s", [value]) => Ok(Self::Score(None, parse_score(value)?)),
            ("score" | "s", [name, value]) => Ok(Self::Score(Some(name.parse()?), parse_score(value)?)),
            ("clear", []) => Ok(Self::Clear(None)),
            ("clear", [name]) => Ok(Self::Clear(Some(name.parse()?))),
            ("toggle" | "x", nums) if !nums.is_empty() => nums
                .iter()
                .map(|n| parse_sentence_number(n))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Toggle),
            ("next" | "n", []) => Ok(Self::Next),
            ("prev" | "p", []) => Ok(Self::Prev),
            ("show", []) => Ok(Self::Show),
            ("status" | "st", []) => Ok(Self::Status),
            ("evidence" | "ev", []) => Ok(Self::Evidence),
            ("save" | "w", []) => Ok(Self::Save),
            ("help" | "h" | "?", []) => Ok(Self::Help),
            ("quit" | "q" | "exit", []) => Ok(Self::Quit),
            (other, _) => Err(format!("cannot parse {other:?}; type `help`")),
        }
    }
}

fn parse_score(s: &str) -> Result<Score, String> {
    s.parse::<Score>().map_err(|e| e.to_string())
}

/// Sentences are numbered from 1 on screen.
fn parse_sentence_number(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("sentence numbers start at 1, got {s:?}")),
        Ok(n) => Ok(n - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_annotate_with_rubric() {
        let cli = Cli::parse_from(["rater", "annotate", "b-12", "--rubric", "legacy", "--json-logs"]);
        assert!(cli.json_logs);
        match cli.command {
            Command::Backend(BackendCommand::Annotate { target, rubric }) => {
                assert_eq!(target, Some(EssayRef::Blind(rater_core::ids::BlindId::from_raw("b-12"))));
                assert_eq!(rubric, Rubric::legacy());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_logs_filters() {
        let cli = Cli::parse_from(["rater", "logs", "--essay", "12", "--blind", "b-3", "--level", "error"]);
        match cli.command {
            Command::Logs { essay, blind, level, limit } => {
                assert_eq!(essay, Some(rater_core::ids::EssayId::new(12)));
                assert_eq!(blind, Some(rater_core::ids::BlindId::from_raw("b-3")));
                assert_eq!(level.as_deref(), Some("error"));
                assert_eq!(limit, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backend_commands_sit_at_the_top_level() {
        let cli = Cli::parse_from(["rater", "login", "-u", "annotator1", "-p", "pw"]);
        assert!(matches!(
            cli.command,
            Command::Backend(BackendCommand::Login { ref username, .. }) if username == "annotator1"
        ));
        let cli = Cli::parse_from(["rater", "submit-all"]);
        assert!(matches!(cli.command, Command::Backend(BackendCommand::SubmitAll)));
    }

    #[test]
    fn essay_ref_prefers_numeric_ids() {
        assert_eq!(
            "42".parse::<EssayRef>().unwrap(),
            EssayRef::Id(rater_core::ids::EssayId::new(42))
        );
        assert!(matches!("b-42".parse::<EssayRef>().unwrap(), EssayRef::Blind(_)));
    }

    #[test]
    fn editor_commands() {
        let score = |v| Score::new(v).unwrap();
        assert_eq!("t language".parse::<EditorCommand>(), Ok(EditorCommand::Activate(RubricTrait::Language)));
        assert_eq!("score 2".parse::<EditorCommand>(), Ok(EditorCommand::Score(None, score(2))));
        assert_eq!(
            "s ai_feedback 5".parse::<EditorCommand>(),
            Ok(EditorCommand::Score(Some(RubricTrait::AiFeedback), score(5)))
        );
        assert_eq!("x 1 3 10".parse::<EditorCommand>(), Ok(EditorCommand::Toggle(vec![0, 2, 9])));
        assert_eq!("Q".parse::<EditorCommand>(), Ok(EditorCommand::Quit));
    }

    #[test]
    fn editor_rejects_bad_input() {
        assert!("score 6".parse::<EditorCommand>().is_err());
        assert_eq!(
            "score high".parse::<EditorCommand>(),
            Err("score must be a number from 1 to 5, got \"high\"".to_string())
        );
        assert!("toggle 0".parse::<EditorCommand>().is_err());
        assert!("toggle".parse::<EditorCommand>().is_err());
        assert!("trait style".parse::<EditorCommand>().is_err());
        assert!("".parse::<EditorCommand>().is_err());
    }
}
