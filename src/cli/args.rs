//! Command line argument parsing
//!
//! The tool historically accepted single-dash long flags (`-action`,
//! `-params`, `-dry`). Those are rewritten to their double-dash form before
//! clap sees them, so both spellings keep working.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Single-dash long flags and whether they take a value.
const LEGACY_FLAGS: &[(&str, bool)] = &[("-action", true), ("-params", true), ("-dry", false)];

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run the recipe file
    Run(RunConfig),
    /// `-action`/`-params` without a recipe file
    ActionsUnsupported {
        action: Option<String>,
        params: Option<String>,
    },
    /// Neither a file nor an action was given
    NothingToDo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub file: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Parser)]
#[command(name = "image-generator")]
#[command(author = "Image Generator Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Builds a container image on a remote LXD host from a YAML recipe")]
#[command(long_about = None)]
pub struct Args {
    /// The recipe file with the actions to execute
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
    /// The action to execute (not supported yet)
    #[arg(long = "action")]
    pub action: Option<String>,
    /// The parameters to the action (not supported yet)
    #[arg(long = "params")]
    pub params: Option<String>,
    /// Show debug output
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
    /// Skip the script and delete the exported image after writing it
    #[arg(long = "dry", visible_alias = "dry-run")]
    pub dry_run: bool,
}

impl Args {
    /// Parse the process arguments, accepting the legacy flag spellings.
    pub fn parse() -> Self {
        Parser::parse_from(normalize_legacy_flags(std::env::args_os()))
    }

    /// Parse an explicit argument list, accepting the legacy flag spellings.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Parser::try_parse_from(normalize_legacy_flags(args))
    }

    pub fn mode(&self) -> ExecutionMode {
        match &self.file {
            Some(file) => ExecutionMode::Run(RunConfig {
                file: file.clone(),
                dry_run: self.dry_run,
            }),
            None if self.action.is_some() || self.params.is_some() => {
                ExecutionMode::ActionsUnsupported {
                    action: self.action.clone(),
                    params: self.params.clone(),
                }
            }
            None => ExecutionMode::NothingToDo,
        }
    }
}

/// Rewrite `-action`, `-params` and `-dry` (also `-flag=value`) to `--flag`.
///
/// Values following a flag that takes one are left alone, as is everything
/// after a `--` terminator.
pub fn normalize_legacy_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut expect_value = false;
    let mut passthrough = false;

    for arg in args.into_iter().map(Into::into) {
        if passthrough || expect_value {
            expect_value = false;
            out.push(arg);
            continue;
        }

        let Some(text) = arg.to_str() else {
            out.push(arg);
            continue;
        };

        if text == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }

        let (name, inline_value) = match text.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (text, None),
        };

        match LEGACY_FLAGS.iter().find(|(flag, _)| *flag == name) {
            Some((flag, takes_value)) => {
                let rewritten = match inline_value {
                    Some(value) => format!("-{}={}", flag, value),
                    None => {
                        expect_value = *takes_value;
                        format!("-{}", flag)
                    }
                };
                out.push(OsString::from(rewritten));
            }
            None => out.push(arg),
        }
    }

    out
}
