use std::env;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::cursor::{MoveTo, MoveToPreviousLine};
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType};

use crate::git::RepositoryStatus;
use crate::transcript::{TodoItem, TodoStatus, TranscriptSummary};
use crate::util::{char_len, format_age, minutes_ago, single_line, truncate};

pub const NO_PROMPT: &str = "No user prompt found";
pub const NO_REPOSITORY: &str = "No git repository";
pub const NO_COMMITS: &str = "Git repository (no commits)";
pub const NO_TODOS: &str = "No todos found";
const EMPTY_TODOS: &str = "No todos";
const COMPACT_SEPARATOR: &str = " --- ";
const FALLBACK_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// One labelled line per section, todos as bullets.
    #[default]
    MultiLine,
    /// Prompt, then current todo and last commit.
    TwoLine,
    /// Everything on one line, todos as status counts.
    OneLine,
}

pub struct RenderData<'a> {
    pub transcript: &'a TranscriptSummary,
    pub repository: &'a RepositoryStatus,
    pub layout: Layout,
    pub width: usize,
    pub show_ages: bool,
    pub now: DateTime<Utc>,
}

impl RenderData<'_> {
    fn age(&self, timestamp: Option<DateTime<Utc>>) -> Option<i64> {
        if !self.show_ages {
            return None;
        }
        timestamp.map(|ts| minutes_ago(ts, self.now))
    }

    fn prompt_text(&self) -> String {
        self.transcript
            .last_prompt
            .as_deref()
            .map(single_line)
            .unwrap_or_else(|| NO_PROMPT.to_string())
    }

    fn todos(&self) -> Option<&[TodoItem]> {
        self.transcript
            .latest_todos
            .as_deref()
            .filter(|todos| !todos.is_empty())
    }
}

pub fn render_lines(data: &RenderData<'_>) -> Vec<String> {
    match data.layout {
        Layout::MultiLine => render_multi_line(data),
        Layout::TwoLine => render_two_line(data),
        Layout::OneLine => vec![render_one_line(data)],
    }
}

fn render_multi_line(data: &RenderData<'_>) -> Vec<String> {
    let mut lines = vec![labeled(
        "Last prompt",
        data.age(data.transcript.prompt_timestamp),
        &data.prompt_text(),
    )];

    lines.push(match data.repository {
        RepositoryStatus::Commit(commit) => labeled(
            "Last commit",
            data.age(commit.timestamp),
            &single_line(&commit.message),
        ),
        RepositoryStatus::NoCommits => labeled("Last commit", None, NO_COMMITS),
        RepositoryStatus::NotRepository => labeled("Last commit", None, NO_REPOSITORY),
    });

    match data.todos() {
        Some(todos) => {
            lines.push(labeled("Todos", data.age(data.transcript.todos_timestamp), ""));
            lines.extend(todos.iter().map(todo_bullet));
        }
        None => lines.push(labeled("Todos", None, NO_TODOS)),
    }

    lines
        .into_iter()
        .map(|line| truncate(&line, data.width))
        .collect()
}

fn render_two_line(data: &RenderData<'_>) -> Vec<String> {
    let first = truncate(&data.prompt_text(), data.width);

    let todo = data
        .todos()
        .and_then(current_todo)
        .map(|item| {
            format!(
                "{} {}",
                completion_marker(&item.status),
                single_line(&item.content)
            )
        })
        .unwrap_or_else(|| NO_TODOS.to_string());
    let commit = match data.repository {
        RepositoryStatus::Commit(commit) => single_line(&commit.message),
        RepositoryStatus::NoCommits => NO_COMMITS.to_string(),
        RepositoryStatus::NotRepository => NO_REPOSITORY.to_string(),
    };

    vec![
        first,
        join_within_width(&todo, &commit, COMPACT_SEPARATOR, data.width),
    ]
}

fn render_one_line(data: &RenderData<'_>) -> String {
    let git_message = match data.repository {
        RepositoryStatus::Commit(commit) => {
            format!("Last commit: {}", single_line(&commit.message))
        }
        RepositoryStatus::NoCommits => NO_COMMITS.to_string(),
        RepositoryStatus::NotRepository => NO_REPOSITORY.to_string(),
    };
    let todos_info = data
        .transcript
        .latest_todos
        .as_deref()
        .map(todo_status_summary)
        .unwrap_or_else(|| NO_TODOS.to_string());

    let line = format!(
        "Prompt: {} | {git_message} | {todos_info}",
        data.prompt_text()
    );
    truncate(&line, data.width)
}

/// The item a compact status should show: the first in progress, else the
/// first pending, else the last one.
pub fn current_todo(todos: &[TodoItem]) -> Option<&TodoItem> {
    todos
        .iter()
        .find(|item| item.status == TodoStatus::InProgress)
        .or_else(|| todos.iter().find(|item| item.status == TodoStatus::Pending))
        .or_else(|| todos.last())
}

pub fn completion_marker(status: &TodoStatus) -> &'static str {
    if status.is_completed() { "[x]" } else { "[ ]" }
}

/// `Todos: 2 completed, 1 pending`, statuses in order of first appearance.
pub fn todo_status_summary(todos: &[TodoItem]) -> String {
    if todos.is_empty() {
        return EMPTY_TODOS.to_string();
    }

    let mut counts: Vec<(&str, usize)> = Vec::new();
    for item in todos {
        let status = item.status.as_str();
        match counts.iter_mut().find(|(seen, _)| *seen == status) {
            Some((_, count)) => *count += 1,
            None => counts.push((status, 1)),
        }
    }

    let parts = counts
        .iter()
        .map(|(status, count)| format!("{count} {status}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Todos: {parts}")
}

fn todo_bullet(item: &TodoItem) -> String {
    let mut line = format!(
        "  {} {}",
        completion_marker(&item.status),
        single_line(&item.content)
    );
    if let Some(priority) = item
        .priority
        .as_deref()
        .map(str::trim)
        .filter(|priority| !priority.is_empty())
    {
        line.push_str(&format!(" [{}]", priority.to_uppercase()));
    }
    line
}

fn labeled(label: &str, age: Option<i64>, value: &str) -> String {
    let label = match age {
        Some(minutes) => format!("{label} ({})", format_age(minutes)),
        None => label.to_string(),
    };
    if value.is_empty() {
        format!("{label}:")
    } else {
        format!("{label}: {value}")
    }
}

// Each half is cut on its own so neither side disappears entirely; a half
// that already fits keeps its text and leaves the rest of the budget to the
// other.
fn join_within_width(left: &str, right: &str, separator: &str, width: usize) -> String {
    let joined = format!("{left}{separator}{right}");
    if char_len(&joined) <= width {
        return joined;
    }

    let budget = width.saturating_sub(char_len(separator));
    let left_len = char_len(left);
    let right_len = char_len(right);
    let half = budget / 2;
    let (left_budget, right_budget) = if left_len <= half {
        (left_len, budget - left_len)
    } else if right_len <= budget - half {
        (budget - right_len, right_len)
    } else {
        (half, budget - half)
    };

    let line = format!(
        "{}{separator}{}",
        truncate(left, left_budget),
        truncate(right, right_budget)
    );
    truncate(&line, width)
}

pub fn terminal_width() -> usize {
    if let Some(columns) = env::var("COLUMNS")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
    {
        return columns;
    }

    terminal::size()
        .ok()
        .map(|(width, _)| width as usize)
        .filter(|width| *width > 0)
        .unwrap_or(FALLBACK_WIDTH)
}

pub fn draw(out: &mut impl Write, lines: &[String]) -> Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

pub fn clear_screen(out: &mut impl Write) -> Result<()> {
    execute!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    Ok(())
}

/// Moves back over the previous `rows` lines so the next frame overwrites them.
pub fn rewind(out: &mut impl Write, rows: u16) -> Result<()> {
    if rows == 0 {
        return Ok(());
    }
    execute!(out, MoveToPreviousLine(rows), Clear(ClearType::FromCursorDown))?;
    Ok(())
}
