//! Reader for Claude Code session transcripts.
//!
//! A transcript is a JSONL file under `~/.claude/projects/<project-slug>/`.
//! Each line is one record tagged by `type`. Only two things are pulled out
//! of it: the last prompt the user actually typed and the last todo list
//! written by the `TodoWrite` tool. The whole file is rescanned on every call
//! and the positionally last match wins.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, Deserializer, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

pub const TODO_WRITE_TOOL: &str = "TodoWrite";
const TRANSCRIPT_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Other(String),
}

impl TodoStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl Default for TodoStatus {
    fn default() -> Self {
        Self::Other("unknown".to_string())
    }
}

impl From<String> for TodoStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            _ => Self::Other(raw),
        }
    }
}

impl From<TodoStatus> for String {
    fn from(status: TodoStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct TodoItem {
    #[serde(deserialize_with = "or_default")]
    pub content: String,
    #[serde(deserialize_with = "or_default")]
    pub status: TodoStatus,
    #[serde(
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<String>,
    #[serde(
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_form: Option<String>,
}

/// What one scan of a transcript produced. Every field is independently
/// optional; a missing file yields the default (all `None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptSummary {
    pub last_prompt: Option<String>,
    pub prompt_timestamp: Option<DateTime<Utc>>,
    pub latest_todos: Option<Vec<TodoItem>>,
    pub todos_timestamp: Option<DateTime<Utc>>,
}

// One JSONL line. Unknown `type` values land in `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TranscriptRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<Message>,
    #[serde(default, deserialize_with = "present")]
    tool_use_result: Option<ToolUseResult>,
}

#[derive(Debug, Deserialize)]
struct AssistantRecord {
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default, deserialize_with = "lenient")]
    role: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentBlock {
    Plain(String),
    Typed(TypedBlock),
    Unrecognized(#[allow(dead_code)] IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default, deserialize_with = "lenient")]
        input: Option<TodoWriteInput>,
    },
    ToolResult,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TodoWriteInput {
    #[serde(default, deserialize_with = "todo_list")]
    todos: Option<Vec<TodoItem>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseResult {
    #[serde(default, deserialize_with = "todo_list")]
    new_todos: Option<Vec<TodoItem>>,
}

// A field that fails to deserialize becomes `None` instead of failing the
// whole record.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

fn or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

// Entries that are not objects are dropped; the rest of the list survives.
fn todo_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<TodoItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(entries) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let todos = entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| TodoItem::deserialize(entry).ok())
        .collect();
    Ok(Some(todos))
}

// `toolUseResult` counts as present whatever its shape, including `null`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<ToolUseResult>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(Some(ToolUseResult::deserialize(value).unwrap_or_default()))
}

impl MessageContent {
    fn into_prompt_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(ContentBlock::into_text)
                .last(),
        }
    }
}

impl ContentBlock {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Plain(text) => Some(text),
            Self::Typed(TypedBlock::Text { text }) => Some(text),
            _ => None,
        }
    }

    fn into_todo_write(self) -> Option<Vec<TodoItem>> {
        match self {
            Self::Typed(TypedBlock::ToolUse { name, input }) if name == TODO_WRITE_TOOL => {
                input?.todos.filter(|todos| !todos.is_empty())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct TranscriptAccumulator {
    last_prompt: Option<String>,
    prompt_timestamp: Option<DateTime<Utc>>,
    latest_todos: Option<Vec<TodoItem>>,
    todos_timestamp: Option<DateTime<Utc>>,
}

impl TranscriptAccumulator {
    fn apply_record(&mut self, record: TranscriptRecord) {
        match record {
            TranscriptRecord::User(user) => self.apply_user(user),
            TranscriptRecord::Assistant(assistant) => self.apply_assistant(assistant),
            TranscriptRecord::Other => {}
        }
    }

    fn apply_user(&mut self, record: UserRecord) {
        let timestamp = record.timestamp.as_deref().and_then(parse_timestamp);

        // Tool-result echoes are typed `user` but were never typed by one.
        if let Some(result) = record.tool_use_result {
            if let Some(todos) = result.new_todos.filter(|todos| !todos.is_empty()) {
                self.replace_todos(todos, timestamp);
            }
            return;
        }

        let Some(message) = record.message else {
            return;
        };
        if message.role.as_deref() != Some("user") {
            return;
        }

        if let Some(text) = message.content.and_then(MessageContent::into_prompt_text) {
            self.last_prompt = Some(text);
        }
        if timestamp.is_some() {
            self.prompt_timestamp = timestamp;
        }
    }

    fn apply_assistant(&mut self, record: AssistantRecord) {
        let Some(message) = record.message else {
            return;
        };
        if message.role.as_deref() != Some("assistant") {
            return;
        }
        let Some(MessageContent::Blocks(blocks)) = message.content else {
            return;
        };

        let todos = blocks
            .into_iter()
            .filter_map(ContentBlock::into_todo_write)
            .last();
        if let Some(todos) = todos {
            let timestamp = record.timestamp.as_deref().and_then(parse_timestamp);
            self.replace_todos(todos, timestamp);
        }
    }

    fn replace_todos(&mut self, todos: Vec<TodoItem>, timestamp: Option<DateTime<Utc>>) {
        self.latest_todos = Some(todos);
        if timestamp.is_some() {
            self.todos_timestamp = timestamp;
        }
    }

    fn finish(self) -> TranscriptSummary {
        TranscriptSummary {
            last_prompt: self.last_prompt,
            prompt_timestamp: self.prompt_timestamp,
            latest_todos: self.latest_todos,
            todos_timestamp: self.todos_timestamp,
        }
    }
}

/// Scans the whole transcript. Never fails: an unreadable file reads as an
/// empty transcript and malformed lines are skipped.
pub fn read_transcript(path: &Path) -> TranscriptSummary {
    match scan_transcript(path) {
        Ok(summary) => summary,
        Err(err) => {
            let reason = format!("{err:#}");
            debug!(path = %path.display(), error = %reason, "transcript unavailable");
            TranscriptSummary::default()
        }
    }
}

pub fn last_user_prompt(path: &Path) -> Option<String> {
    read_transcript(path).last_prompt
}

pub fn last_user_prompt_with_timestamp(path: &Path) -> (Option<String>, Option<DateTime<Utc>>) {
    let summary = read_transcript(path);
    (summary.last_prompt, summary.prompt_timestamp)
}

pub fn latest_todo_list(path: &Path) -> Option<Vec<TodoItem>> {
    read_transcript(path).latest_todos
}

pub fn latest_todo_list_with_timestamp(
    path: &Path,
) -> (Option<Vec<TodoItem>>, Option<DateTime<Utc>>) {
    let summary = read_transcript(path);
    (summary.latest_todos, summary.todos_timestamp)
}

fn scan_transcript(path: &Path) -> Result<TranscriptSummary> {
    let file = File::open(path)
        .with_context(|| format!("failed to open transcript {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut accumulator = TranscriptAccumulator::default();
    parse_lines(&mut reader, &mut accumulator)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    Ok(accumulator.finish())
}

fn parse_lines(reader: &mut impl BufRead, accumulator: &mut TranscriptAccumulator) -> Result<()> {
    let mut line = Vec::new();
    let mut line_number = 0usize;
    loop {
        line.clear();
        let bytes = reader.read_until(b'\n', &mut line)?;
        if bytes == 0 {
            break;
        }
        line_number += 1;

        let Ok(text) = std::str::from_utf8(&line) else {
            debug!(line = line_number, "skipping non-UTF-8 transcript line");
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptRecord>(trimmed) {
            Ok(record) => accumulator.apply_record(record),
            Err(err) => debug!(line = line_number, error = %err, "skipping malformed transcript line"),
        }
    }
    Ok(())
}

/// Parses an ISO-8601 timestamp. A trailing `Z` means UTC; a timestamp
/// without any offset is read as local time.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let normalized = text.replace('Z', "+00:00");
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.with_timezone(&Utc));
    }

    // ISO 8601 also allows dropping the seconds.
    if let Ok(parsed) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z") {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// Name of the per-project transcript directory: the absolute working
/// directory with every path separator replaced by `-`.
pub fn project_dir_name(cwd: &Path) -> String {
    cwd.to_string_lossy().replace(['/', '\\'], "-")
}

pub fn default_transcript_path(projects_root: &Path, cwd: &Path) -> Option<PathBuf> {
    latest_transcript(&projects_root.join(project_dir_name(cwd)))
}

/// Most recently modified `.jsonl` file directly inside `dir`.
pub fn latest_transcript(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().and_then(|ext| ext.to_str()) == Some(TRANSCRIPT_EXTENSION)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
