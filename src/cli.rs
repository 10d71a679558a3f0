use std::path::PathBuf;

use clap::Parser;

use crate::ui::Layout;

#[derive(Parser, Debug)]
#[command(
    name = "claude-status",
    version,
    about = "Show the last Claude Code prompt, last git commit and current todos"
)]
pub struct Cli {
    /// Transcript to read instead of the newest one for this directory.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Prompt on the first line, current todo and last commit on the second.
    #[arg(long, conflicts_with = "one_line")]
    pub two_line: bool,

    /// Prompt, commit and todo counts on a single line.
    #[arg(long)]
    pub one_line: bool,

    /// Keep refreshing, every SECONDS or the configured interval.
    #[arg(
        long,
        value_name = "SECONDS",
        num_args = 0..=1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub update: Option<Option<u64>>,

    /// Directory used for git queries.
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,
}

impl Cli {
    pub fn layout(&self) -> Layout {
        if self.two_line {
            Layout::TwoLine
        } else if self.one_line {
            Layout::OneLine
        } else {
            Layout::MultiLine
        }
    }

    pub fn watch(&self) -> bool {
        self.update.is_some()
    }

    /// Interval given on the command line, if any.
    pub fn update_interval(&self) -> Option<u64> {
        self.update.flatten()
    }
}
