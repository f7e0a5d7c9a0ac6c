//! Text commands typed at the codai prompt
//!
//! A line is parsed once into a [`Command`]; dispatch never looks at the raw
//! text again. Arguments are whitespace separated, so paths containing spaces
//! are not supported.

use std::path::PathBuf;

/// Help shown for the `help` command
pub const HELP: &str = "\
Commands:
  exit                                          leave the session
  help                                          show this help
  context files                                 list files held in the context cache
  list files [path]                             list folders and files
  read <path>                                   show a file and add it to context
  read folder [path] [subfolders]               read every file in a folder into context
  create file <path> [content...]               write a file
  create folder <path>                          create a folder
  project structure [path] [include-ignored] [shallow] [exclude=a,b]
                    [output=file.json|file.yaml]
                                                show the directory tree
  project study [path] [include-ignored] [shallow] [output=file.json|file.yaml]
                                                summarise the project
  context [budget] [paths...]                   assemble context for the next turn
  metrics                                       show cache metrics
  metrics reset                                 reset cache metrics
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    ContextFiles,
    ListFiles {
        path: PathBuf,
    },
    Read {
        path: PathBuf,
    },
    ReadFolder {
        path: PathBuf,
        recurse: bool,
    },
    CreateFile {
        path: PathBuf,
        content: String,
    },
    CreateFolder {
        path: PathBuf,
    },
    ProjectStructure {
        path: PathBuf,
        include_ignored: bool,
        recurse: bool,
        exclude: Option<String>,
        output: Option<PathBuf>,
    },
    ProjectStudy {
        path: PathBuf,
        include_ignored: bool,
        recurse: bool,
        output: Option<PathBuf>,
    },
    /// Without paths, everything currently cached is offered
    Context {
        budget: Option<u64>,
        paths: Vec<PathBuf>,
    },
    Metrics,
    MetricsReset,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}'. Type 'help' for the list of commands")]
    Unknown(String),

    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("Unexpected argument '{argument}' for '{command}'")]
    UnexpectedArgument {
        command: &'static str,
        argument: String,
    },
}

fn path_or_root(arg: Option<&str>) -> PathBuf {
    PathBuf::from(arg.unwrap_or("."))
}

/// Text after the first `n` whitespace separated words, leading space removed
fn rest_after(line: &str, n: usize) -> &str {
    let mut rest = line.trim_start();
    for _ in 0..n {
        rest = rest
            .find(char::is_whitespace)
            .map_or("", |at| rest[at..].trim_start());
    }
    rest
}

impl std::str::FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = words.first() else {
            return Err(ParseError::Empty);
        };
        let keyword = first.to_lowercase();
        let second = words.get(1).map(|w| w.to_lowercase());

        match (keyword.as_str(), second.as_deref()) {
            ("exit" | "quit", None) => Ok(Self::Exit),
            ("help", None) => Ok(Self::Help),
            ("metrics", None) => Ok(Self::Metrics),
            ("metrics", Some("reset")) => Ok(Self::MetricsReset),
            ("context", Some("files")) if words.len() == 2 => Ok(Self::ContextFiles),
            ("context", _) => parse_context(&words[1..]),
            ("list", Some("files")) => match words.get(2..) {
                Some([]) | None => Ok(Self::ListFiles { path: path_or_root(None) }),
                Some([path]) => Ok(Self::ListFiles { path: path_or_root(Some(*path)) }),
                Some([_, extra, ..]) => Err(ParseError::UnexpectedArgument {
                    command: "list files",
                    argument: (*extra).to_string(),
                }),
            },
            ("read", Some("folder")) => parse_read_folder(&words[2..]),
            ("read", Some(_)) if words.len() == 2 => Ok(Self::Read {
                path: PathBuf::from(words[1]),
            }),
            ("read", None) => Err(ParseError::MissingArgument {
                command: "read",
                argument: "a file path",
            }),
            ("create", Some("file")) => match words.get(2) {
                Some(path) => Ok(Self::CreateFile {
                    path: PathBuf::from(*path),
                    content: rest_after(line, 3).to_string(),
                }),
                None => Err(ParseError::MissingArgument {
                    command: "create file",
                    argument: "a file path",
                }),
            },
            ("create", Some("folder")) => match words.get(2) {
                Some(path) => Ok(Self::CreateFolder {
                    path: PathBuf::from(*path),
                }),
                None => Err(ParseError::MissingArgument {
                    command: "create folder",
                    argument: "a folder path",
                }),
            },
            ("project", Some("structure")) => parse_structure(&words[2..]),
            ("project", Some("study")) => parse_study(&words[2..]),
            _ => Err(ParseError::Unknown(line.to_string())),
        }
    }
}

fn parse_context(args: &[&str]) -> Result<Command, ParseError> {
    let (budget, paths) = match args.split_first() {
        Some((first, rest)) => match first.parse::<u64>() {
            Ok(budget) => (Some(budget), rest),
            Err(_) => (None, args),
        },
        None => (None, args),
    };
    Ok(Command::Context {
        budget,
        paths: paths.iter().map(PathBuf::from).collect(),
    })
}

fn parse_read_folder(args: &[&str]) -> Result<Command, ParseError> {
    let mut path = None;
    let mut recurse = false;
    for arg in args {
        if arg.eq_ignore_ascii_case("subfolders") {
            recurse = true;
        } else if path.is_none() {
            path = Some(*arg);
        } else {
            return Err(ParseError::UnexpectedArgument {
                command: "read folder",
                argument: (*arg).to_string(),
            });
        }
    }
    Ok(Command::ReadFolder {
        path: path_or_root(path),
        recurse,
    })
}

fn parse_structure(args: &[&str]) -> Result<Command, ParseError> {
    let mut path = None;
    let mut include_ignored = false;
    let mut recurse = true;
    let mut exclude = None;
    let mut output = None;
    for arg in args {
        if arg.eq_ignore_ascii_case("include-ignored") {
            include_ignored = true;
        } else if arg.eq_ignore_ascii_case("shallow") {
            recurse = false;
        } else if let Some(list) = arg.strip_prefix("exclude=") {
            exclude = Some(list.to_string());
        } else if let Some(file) = arg.strip_prefix("output=") {
            output = Some(PathBuf::from(file));
        } else if path.is_none() {
            path = Some(*arg);
        } else {
            return Err(ParseError::UnexpectedArgument {
                command: "project structure",
                argument: (*arg).to_string(),
            });
        }
    }
    Ok(Command::ProjectStructure {
        path: path_or_root(path),
        include_ignored,
        recurse,
        exclude,
        output,
    })
}

fn parse_study(args: &[&str]) -> Result<Command, ParseError> {
    let mut path = None;
    let mut include_ignored = false;
    let mut recurse = true;
    let mut output = None;
    for arg in args {
        if arg.eq_ignore_ascii_case("include-ignored") {
            include_ignored = true;
        } else if arg.eq_ignore_ascii_case("shallow") {
            recurse = false;
        } else if let Some(file) = arg.strip_prefix("output=") {
            output = Some(PathBuf::from(file));
        } else if path.is_none() {
            path = Some(*arg);
        } else {
            return Err(ParseError::UnexpectedArgument {
                command: "project study",
                argument: (*arg).to_string(),
            });
        }
    }
    Ok(Command::ProjectStudy {
        path: path_or_root(path),
        include_ignored,
        recurse,
        output,
    })
}
