use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cli::Cli;
use crate::config::{self, RuntimeSettings, StatusConfig};
use crate::git::{GitBackend, GitCli, Repository};
use crate::transcript::{self, default_transcript_path};
use crate::ui::{self, Layout, RenderData};

const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

/// Where the transcript comes from on each render.
#[derive(Debug, Clone)]
pub enum TranscriptSource {
    Explicit(PathBuf),
    /// Newest transcript of the project folder derived from `cwd`, looked up
    /// again on every call.
    Discover { projects_root: PathBuf, cwd: PathBuf },
}

impl TranscriptSource {
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            Self::Explicit(path) => Some(path.clone()),
            Self::Discover { projects_root, cwd } => default_transcript_path(projects_root, cwd),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameOptions {
    pub layout: Layout,
    pub width: usize,
    pub show_ages: bool,
}

pub fn collect_frame<B: GitBackend>(
    source: &TranscriptSource,
    repository: &Repository<B>,
    options: FrameOptions,
    now: DateTime<Utc>,
) -> Vec<String> {
    let summary = match source.resolve() {
        Some(path) => transcript::read_transcript(&path),
        None => {
            debug!("no transcript found for this directory");
            Default::default()
        }
    };
    let status = repository.status();

    ui::render_lines(&RenderData {
        transcript: &summary,
        repository: &status,
        layout: options.layout,
        width: options.width,
        show_ages: options.show_ages,
        now,
    })
}

pub fn run(cli: Cli, config: StatusConfig) -> Result<()> {
    let runtime = config::runtime_settings(&config);
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let source = match &cli.file {
        Some(path) => TranscriptSource::Explicit(path.clone()),
        None => TranscriptSource::Discover {
            projects_root: config::projects_root(),
            cwd: cwd.clone(),
        },
    };
    let repository = Repository::new(
        cli.repo.clone().unwrap_or(cwd),
        GitCli::new(runtime.git_probe_timeout, runtime.git_query_timeout),
    );
    let layout = cli.layout();
    let frame_options = || FrameOptions {
        layout,
        width: config.display.width.unwrap_or_else(ui::terminal_width),
        show_ages: config.display.show_ages,
    };

    let mut stdout = io::stdout();
    if !cli.watch() {
        let lines = collect_frame(&source, &repository, frame_options(), Utc::now());
        return ui::draw(&mut stdout, &lines);
    }

    let interval = refresh_interval(&cli, &runtime);
    let stop = install_stop_signal()?;
    let mut previous_rows = 0;
    while !stop.load(Ordering::Relaxed) {
        let lines = collect_frame(&source, &repository, frame_options(), Utc::now());
        previous_rows = present_frame(
            &mut stdout,
            layout,
            &lines,
            previous_rows,
            config.display.footer.then_some(interval),
        )?;
        sleep_unless_stopped(interval, &stop);
    }

    if layout == Layout::MultiLine {
        writeln!(stdout, "\nExiting...")?;
    } else {
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

fn refresh_interval(cli: &Cli, runtime: &RuntimeSettings) -> Duration {
    cli.update_interval()
        .map(Duration::from_secs)
        .unwrap_or(runtime.refresh_interval)
}

/// Writes one watch-mode frame and returns how many rows the next frame has
/// to move back over.
fn present_frame(
    out: &mut impl Write,
    layout: Layout,
    lines: &[String],
    previous_rows: usize,
    footer: Option<Duration>,
) -> Result<usize> {
    if layout == Layout::MultiLine {
        ui::clear_screen(out)?;
        ui::draw(out, lines)?;
        if let Some(interval) = footer {
            writeln!(
                out,
                "\n--- Refreshing in {} seconds (Ctrl+C to exit) ---",
                interval.as_secs()
            )?;
            out.flush()?;
        }
        return Ok(0);
    }

    ui::rewind(out, u16::try_from(previous_rows).unwrap_or(u16::MAX))?;
    ui::draw(out, lines)?;
    Ok(lines.len())
}

fn sleep_unless_stopped(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(STOP_POLL_SLICE.min(deadline - now));
    }
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoGit;

    impl GitBackend for NoGit {
        fn git_dir(&self, _workdir: &Path) -> Option<String> {
            None
        }

        fn last_commit_subject(&self, _workdir: &Path) -> Option<String> {
            None
        }

        fn last_commit_time(&self, _workdir: &Path) -> Option<i64> {
            None
        }
    }

    fn options(layout: Layout) -> FrameOptions {
        FrameOptions {
            layout,
            width: 80,
            show_ages: false,
        }
    }

    #[test]
    fn explicit_source_resolves_to_itself() {
        let source = TranscriptSource::Explicit(PathBuf::from("/tmp/missing.jsonl"));
        assert_eq!(source.resolve(), Some(PathBuf::from("/tmp/missing.jsonl")));
    }

    #[test]
    fn discovered_source_follows_newest_transcript() {
        let tmp = TempDir::new().expect("temp dir");
        let cwd = PathBuf::from("/work/demo");
        let project = tmp.path().join("-work-demo");
        fs::create_dir_all(&project).expect("create project dir");
        let source = TranscriptSource::Discover {
            projects_root: tmp.path().to_path_buf(),
            cwd,
        };
        assert_eq!(source.resolve(), None);

        let path = project.join("session.jsonl");
        fs::write(&path, "").expect("write transcript");
        assert_eq!(source.resolve(), Some(path));
    }

    #[test]
    fn frame_reads_prompt_from_explicit_file() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("session.jsonl");
        fs::write(
            &path,
            r#"{"type":"user","timestamp":"2025-06-29T13:33:42Z","message":{"role":"user","content":"Tidy the README"}}"#,
        )
        .expect("write transcript");

        let lines = collect_frame(
            &TranscriptSource::Explicit(path),
            &Repository::new(tmp.path(), NoGit),
            options(Layout::OneLine),
            Utc::now(),
        );
        assert_eq!(
            lines,
            vec!["Prompt: Tidy the README | No git repository | No todos found"]
        );
    }

    #[test]
    fn frame_without_transcript_uses_placeholders() {
        let tmp = TempDir::new().expect("temp dir");
        let source = TranscriptSource::Discover {
            projects_root: tmp.path().to_path_buf(),
            cwd: PathBuf::from("/nowhere"),
        };
        let lines = collect_frame(
            &source,
            &Repository::new(tmp.path(), NoGit),
            options(Layout::MultiLine),
            Utc::now(),
        );
        assert_eq!(lines[0], "Last prompt: No user prompt found");
        assert_eq!(lines[2], "Todos: No todos found");
    }

    #[test]
    fn multi_line_frame_prints_footer() {
        let mut out = Vec::new();
        let rows = present_frame(
            &mut out,
            Layout::MultiLine,
            &["Last prompt: hi".to_string()],
            0,
            Some(Duration::from_secs(5)),
        )
        .expect("present");
        let text = String::from_utf8_lossy(&out);
        assert_eq!(rows, 0);
        assert!(text.contains("Last prompt: hi\n"));
        assert!(text.ends_with("\n--- Refreshing in 5 seconds (Ctrl+C to exit) ---\n"));
    }

    #[test]
    fn multi_line_footer_can_be_disabled() {
        let mut out = Vec::new();
        present_frame(&mut out, Layout::MultiLine, &["x".to_string()], 0, None)
            .expect("present");
        assert!(!String::from_utf8_lossy(&out).contains("Refreshing"));
    }

    #[test]
    fn compact_frame_redraws_in_place() {
        let lines = vec!["prompt".to_string(), "[ ] todo --- commit".to_string()];
        let mut first = Vec::new();
        let rows = present_frame(&mut first, Layout::TwoLine, &lines, 0, None).expect("present");
        assert_eq!(rows, 2);
        assert_eq!(
            String::from_utf8(first).expect("utf8"),
            "prompt\n[ ] todo --- commit\n"
        );

        let mut second = Vec::new();
        present_frame(&mut second, Layout::TwoLine, &lines, rows, None).expect("present");
        let text = String::from_utf8_lossy(&second);
        assert!(text.starts_with('\u{1b}'));
        assert!(text.ends_with("prompt\n[ ] todo --- commit\n"));
        assert!(!text.contains("Refreshing"));
    }

    #[test]
    fn command_line_interval_wins() {
        let runtime = RuntimeSettings {
            refresh_interval: Duration::from_secs(5),
            git_probe_timeout: Duration::from_secs(5),
            git_query_timeout: Duration::from_secs(10),
        };
        let cli = Cli::try_parse_from(["claude-status", "--update", "9"]).expect("parse");
        assert_eq!(refresh_interval(&cli, &runtime), Duration::from_secs(9));

        let cli = Cli::try_parse_from(["claude-status", "--update"]).expect("parse");
        assert_eq!(refresh_interval(&cli, &runtime), Duration::from_secs(5));
    }

    #[test]
    fn stopped_flag_ends_sleep_immediately() {
        let stop = AtomicBool::new(true);
        let started = Instant::now();
        sleep_unless_stopped(Duration::from_secs(30), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
