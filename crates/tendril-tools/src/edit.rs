//! Edit tool - view, create and edit files.
//!
//! Supports five commands:
//! - `view`: `cat -n` a file (optionally a line range) or list a directory
//! - `create`: write a new file, refusing to overwrite
//! - `str_replace`: replace a unique occurrence of a string
//! - `insert`: insert text after a given line
//! - `undo_edit`: restore the content from before the last edit
//!
//! Edits show a numbered snippet around the change. Long output is clipped.

use crate::{parse_args, Tool, ToolContext, ToolError, ToolOutcome, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tendril_protocol::UiBlock;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

/// Lines of context shown around an edit.
pub const SNIPPET_LINES: usize = 4;

/// Output longer than this is clipped.
pub const MAX_RESPONSE_LEN: usize = 32_000;

pub const TRUNCATED_MESSAGE: &str = "<response clipped><NOTE>To save on context only part of this file has been shown to you. You should retry this tool after you have searched inside the file with `grep -n` in order to find the line numbers of what you are looking for.</NOTE>";

const COMMANDS: [&str; 5] = ["view", "create", "str_replace", "insert", "undo_edit"];

const TAB_WIDTH: usize = 8;

/// View, create and edit files, with per-path undo.
#[derive(Default)]
pub struct EditTool {
    history: Mutex<HashMap<PathBuf, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct EditArgs {
    command: String,
    path: String,
    #[serde(default)]
    file_text: Option<String>,
    #[serde(default)]
    view_range: Option<Vec<i64>>,
    #[serde(default)]
    old_str: Option<String>,
    #[serde(default)]
    new_str: Option<String>,
    #[serde(default)]
    insert_line: Option<i64>,
}

impl EditTool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push_history(&self, path: &Path, content: String) {
        self.history
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_default()
            .push(content);
    }

    async fn view(&self, path: &Path, view_range: Option<Vec<i64>>) -> ToolResult<ToolOutcome> {
        if path.is_dir() {
            if view_range.is_some() {
                return Err(ToolError::validation(
                    "The `view_range` parameter is not allowed when `path` points to a directory.",
                ));
            }
            let listing = list_directory(path);
            let mut blocks = vec![UiBlock::text(format!(
                "Here are the files and directories up to 2 levels deep in {}, excluding hidden items:",
                path.display()
            ))];
            if !listing.is_empty() {
                blocks.push(UiBlock::code(maybe_truncate(&listing)).with_meta("stdout"));
            }
            return Ok(ToolOutcome::from_blocks("👀", blocks));
        }

        let content = read_file(path).await?;
        let (content, init_line) = match view_range {
            None => (content, 1),
            Some(range) => select_range(&content, &range)?,
        };

        Ok(ToolOutcome::from_blocks(
            "👀",
            vec![
                UiBlock::text(format!(
                    "Here is the result of running `cat -n` on {}:",
                    path.display()
                )),
                UiBlock::code(number_lines(&maybe_truncate(&content), init_line)),
            ],
        ))
    }

    async fn create(&self, path: &Path, file_text: Option<String>) -> ToolResult<ToolOutcome> {
        let file_text = file_text.ok_or_else(|| {
            ToolError::validation("Parameter `file_text` is required for command: create")
        })?;
        write_file(path, &file_text).await?;
        debug!(path = %path.display(), "Created file");

        Ok(ToolOutcome::from_blocks(
            "🌱",
            vec![
                UiBlock::text(format!("File created successfully at: {}", path.display())),
                UiBlock::code(file_text),
            ],
        ))
    }

    async fn str_replace(
        &self,
        path: &Path,
        old_str: Option<String>,
        new_str: Option<String>,
    ) -> ToolResult<ToolOutcome> {
        let old_str = old_str.ok_or_else(|| {
            ToolError::validation("Parameter `old_str` is required for command: str_replace")
        })?;
        let content = expand_tabs(&read_file(path).await?);
        let old_str = expand_tabs(&old_str);
        let new_str = expand_tabs(new_str.as_deref().unwrap_or_default());

        match content.matches(old_str.as_str()).count() {
            0 => {
                return Err(ToolError::execution_failed(format!(
                    "No replacement was performed, the value of `old_str` did not appear verbatim in {}.",
                    path.display()
                )))
            }
            1 => {}
            _ => {
                let lines: Vec<String> = content
                    .split('\n')
                    .enumerate()
                    .filter(|(_, line)| line.contains(old_str.as_str()))
                    .map(|(idx, _)| (idx + 1).to_string())
                    .collect();
                return Err(ToolError::execution_failed(format!(
                    "No replacement was performed. Multiple occurrences of the value of `old_str` found in lines [{}]. Please ensure it is unique",
                    lines.join(", ")
                )));
            }
        }

        let new_content = content.replacen(old_str.as_str(), &new_str, 1);
        write_file(path, &new_content).await?;

        let replacement_line = content
            .find(old_str.as_str())
            .map(|pos| content[..pos].matches('\n').count())
            .unwrap_or(0);
        let start = replacement_line.saturating_sub(SNIPPET_LINES);
        let end = replacement_line + SNIPPET_LINES + new_str.matches('\n').count();
        let snippet = new_content
            .split('\n')
            .skip(start)
            .take(end + 1 - start)
            .collect::<Vec<_>>()
            .join("\n");

        self.push_history(path, content).await;
        debug!(path = %path.display(), "Replaced text");

        let mut blocks = vec![UiBlock::text(format!("The file {} has been edited.", path.display()))];
        blocks.extend(numbered_output(
            &snippet,
            &format!("a snippet of {}", path.display()),
            start + 1,
        ));
        blocks.push(UiBlock::text(
            "Review the changes and make sure they are as expected. Edit the file again if necessary.",
        ));
        Ok(ToolOutcome::from_blocks("🪛", blocks))
    }

    async fn insert(
        &self,
        path: &Path,
        insert_line: Option<i64>,
        new_str: Option<String>,
    ) -> ToolResult<ToolOutcome> {
        let insert_line = insert_line.ok_or_else(|| {
            ToolError::validation("Parameter `insert_line` is required for command: insert")
        })?;
        let new_str = new_str.ok_or_else(|| {
            ToolError::validation("Parameter `new_str` is required for command: insert")
        })?;

        let content = expand_tabs(&read_file(path).await?);
        let new_str = expand_tabs(&new_str);
        let lines: Vec<&str> = content.split('\n').collect();
        let n_lines = lines.len();

        let at = usize::try_from(insert_line)
            .ok()
            .filter(|at| *at <= n_lines)
            .ok_or_else(|| {
                ToolError::validation(format!(
                    "Invalid `insert_line` parameter: {insert_line}. It should be within the range of lines of the file: [0, {n_lines}]"
                ))
            })?;

        let new_lines: Vec<&str> = new_str.split('\n').collect();
        let mut edited: Vec<&str> = Vec::with_capacity(n_lines + new_lines.len());
        edited.extend_from_slice(&lines[..at]);
        edited.extend_from_slice(&new_lines);
        edited.extend_from_slice(&lines[at..]);

        let mut snippet: Vec<&str> = Vec::new();
        snippet.extend_from_slice(&lines[at.saturating_sub(SNIPPET_LINES)..at]);
        snippet.extend_from_slice(&new_lines);
        snippet.extend_from_slice(&lines[at..(at + SNIPPET_LINES).min(n_lines)]);

        write_file(path, &edited.join("\n")).await?;
        let snippet = snippet.join("\n");
        self.push_history(path, content).await;
        debug!(path = %path.display(), line = at, "Inserted text");

        let mut blocks = vec![UiBlock::text(format!("The file {} has been edited.", path.display()))];
        blocks.extend(numbered_output(
            &snippet,
            "a snippet of the edited file",
            (at + 1).saturating_sub(SNIPPET_LINES).max(1),
        ));
        blocks.push(UiBlock::text(
            "Review the changes and make sure they are as expected (correct indentation, no duplicate lines, etc). Edit the file again if necessary.",
        ));
        Ok(ToolOutcome::from_blocks("✏️", blocks))
    }

    async fn undo_edit(&self, path: &Path) -> ToolResult<ToolOutcome> {
        let previous = self
            .history
            .lock()
            .await
            .get_mut(path)
            .and_then(|stack| stack.pop());
        let previous = previous.ok_or_else(|| {
            ToolError::execution_failed(format!("No edit history found for {}.", path.display()))
        })?;

        write_file(path, &previous).await?;
        debug!(path = %path.display(), "Undid last edit");

        let mut blocks = vec![UiBlock::text(format!(
            "Last edit to {} undone successfully.",
            path.display()
        ))];
        blocks.extend(numbered_output(&previous, &path.display().to_string(), 1));
        Ok(ToolOutcome::from_blocks("↩️", blocks))
    }
}

fn validate_path(command: &str, path: &Path) -> ToolResult<()> {
    if !path.is_absolute() {
        let suggested = Path::new("/").join(path);
        return Err(ToolError::validation(format!(
            "The path {} is not an absolute path, it should start with `/`. Maybe you meant {}?",
            path.display(),
            suggested.display()
        )));
    }
    let exists = path.exists();
    if !exists && command != "create" {
        return Err(ToolError::file_not_found(path.display().to_string()));
    }
    if exists && command == "create" {
        return Err(ToolError::execution_failed(format!(
            "File already exists at: {}. Cannot overwrite files using command `create`.",
            path.display()
        )));
    }
    if path.is_dir() && command != "view" {
        return Err(ToolError::execution_failed(format!(
            "The path {} is a directory and only the `view` command can be used on directories",
            path.display()
        )));
    }
    Ok(())
}

/// Apply a 1-based inclusive `view_range`. `-1` as the end means end of file.
fn select_range(content: &str, range: &[i64]) -> ToolResult<(String, usize)> {
    let [init, last] = range else {
        return Err(ToolError::validation(
            "Invalid `view_range`. It should be a list of two integers.",
        ));
    };
    let (init, last) = (*init, *last);
    let lines: Vec<&str> = content.split('\n').collect();
    let n_lines = lines.len() as i64;
    let shown = format!("[{init}, {last}]");

    if init < 1 || init > n_lines {
        return Err(ToolError::validation(format!(
            "Invalid `view_range`: {shown}. Its first element `{init}` should be within the range of lines of the file: [1, {n_lines}]"
        )));
    }
    if last > n_lines {
        return Err(ToolError::validation(format!(
            "Invalid `view_range`: {shown}. Its second element `{last}` should be smaller than the number of lines in the file: `{n_lines}`"
        )));
    }
    if last != -1 && last < init {
        return Err(ToolError::validation(format!(
            "Invalid `view_range`: {shown}. Its second element `{last}` should be larger or equal than its first `{init}`"
        )));
    }

    let start = (init - 1) as usize;
    let end = if last == -1 { lines.len() } else { last as usize };
    Ok((lines[start..end].join("\n"), init as usize))
}

/// Non-hidden entries up to two levels below `root`, one path per line.
fn list_directory(root: &Path) -> String {
    WalkDir::new(root)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expand tabs to the next multiple of eight columns.
fn expand_tabs(text: &str) -> String {
    if !text.contains('\t') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut column = 0;
    for ch in text.chars() {
        match ch {
            '\t' => {
                let spaces = TAB_WIDTH - column % TAB_WIDTH;
                out.extend(std::iter::repeat(' ').take(spaces));
                column += spaces;
            }
            '\n' | '\r' => {
                out.push(ch);
                column = 0;
            }
            _ => {
                out.push(ch);
                column += 1;
            }
        }
    }
    out
}

fn maybe_truncate(content: &str) -> String {
    if content.chars().count() <= MAX_RESPONSE_LEN {
        return content.to_string();
    }
    let mut clipped: String = content.chars().take(MAX_RESPONSE_LEN).collect();
    clipped.push_str(TRUNCATED_MESSAGE);
    clipped
}

fn number_lines(content: &str, init_line: usize) -> String {
    content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{line}", i + init_line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Intro line plus the numbered content, clipped and tab-expanded.
fn numbered_output(content: &str, descriptor: &str, init_line: usize) -> Vec<UiBlock> {
    let content = expand_tabs(&maybe_truncate(content));
    vec![
        UiBlock::text(format!(
            "Here is the result of running `cat -n` on {descriptor}:"
        )),
        UiBlock::code(number_lines(&content, init_line)),
    ]
}

async fn read_file(path: &Path) -> ToolResult<String> {
    fs::read_to_string(path).await.map_err(|e| {
        ToolError::execution_failed(format!(
            "Ran into {e} while trying to read {}",
            path.display()
        ))
    })
}

async fn write_file(path: &Path, content: &str) -> ToolResult<()> {
    fs::write(path, content).await.map_err(|e| {
        ToolError::execution_failed(format!(
            "Ran into {e} while trying to write to {}",
            path.display()
        ))
    })
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit_tool"
    }

    fn description(&self) -> &str {
        r#"Custom editing tool for viewing, creating and editing files
* State is persistent across turns in an interaction
* If `path` is a file, `view` displays the result of applying `cat -n`. If `path` is a directory, `view` lists non-hidden files and directories up to 2 levels deep
* The `create` command cannot be used if the specified `path` already exists as a file
* If a `command` generates a long output, it will be truncated and marked with `<response clipped>`
* The `undo_edit` command will revert the last edit made to the file at `path`

Notes for using the `str_replace` command:
* The `old_str` parameter should match EXACTLY one or more consecutive lines from the original file. Be mindful of whitespaces!
* If the `old_str` parameter is not unique in the file, the replacement will not be performed. Make sure to include enough context in `old_str` to make it unique
* The `new_str` parameter should contain the edited lines that should replace the `old_str`"#
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": COMMANDS,
                    "description": "The commands to run. Allowed options are: `view`, `create`, `str_replace`, `insert`, `undo_edit`."
                },
                "file_text": {
                    "type": "string",
                    "description": "Required parameter of `create` command, with the content of the file to be created."
                },
                "insert_line": {
                    "type": "integer",
                    "description": "Required parameter of `insert` command. The `new_str` will be inserted AFTER the line `insert_line` of `path`."
                },
                "new_str": {
                    "type": "string",
                    "description": "Optional parameter of `str_replace` command containing the new string (if not given, no string will be added). Required parameter of `insert` command containing the string to insert."
                },
                "old_str": {
                    "type": "string",
                    "description": "Required parameter of `str_replace` command containing the string in `path` to replace."
                },
                "path": {
                    "type": "string",
                    "description": "Absolute path to file or directory, e.g. `/repo/file.py` or `/repo`."
                },
                "view_range": {
                    "type": "array",
                    "items": {"type": "integer"},
                    "description": "Optional parameter of `view` command when `path` points to a file. If none is given, the full file is shown. If provided, the file will be shown in the indicated line number range, e.g. [11, 12] will show lines 11 and 12. Indexing at 1 to start. Setting `[start_line, -1]` shows all lines from `start_line` to the end of the file."
                }
            },
            "required": ["command", "path"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult<ToolOutcome> {
        let args: EditArgs = parse_args(args)?;
        if !COMMANDS.contains(&args.command.as_str()) {
            return Err(ToolError::validation(format!(
                "Unrecognized command {}. The allowed commands for the edit_tool tool are: {}",
                args.command,
                COMMANDS.join(", ")
            )));
        }

        let path = PathBuf::from(&args.path);
        validate_path(&args.command, &path)?;

        match args.command.as_str() {
            "view" => self.view(&path, args.view_range).await,
            "create" => self.create(&path, args.file_text).await,
            "str_replace" => self.str_replace(&path, args.old_str, args.new_str).await,
            "insert" => self.insert(&path, args.insert_line, args.new_str).await,
            _ => self.undo_edit(&path).await,
        }
    }
}
