//! Plain-text presenter for the `chat` command

use super::{Notice, SessionObserver};
use crate::flow::{FlowObserver, Outcome, Stage, TextTarget, ToolStatus, Turn};
use crate::markdown::StreamingText;
use std::collections::{HashMap, HashSet};
use std::io::Write;

const RESULT_PREVIEW_CHARS: usize = 200;

/// Prints each turn's stages as they appear and streams text fields.
///
/// Streaming text past the render boundary is held back from its first
/// emphasis or code delimiter, so an unfinished `**bo` only shows once the
/// span closes or the field ends.
pub struct TerminalPresenter<W: Write + Send> {
    out: W,
    stages_shown: HashMap<u64, usize>,
    text_shown: HashMap<(u64, TextTarget), usize>,
    text_done: HashSet<(u64, TextTarget)>,
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            stages_shown: HashMap::new(),
            text_shown: HashMap::new(),
            text_done: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn describe(turn: &Turn, stage: &Stage) -> String {
        match stage {
            Stage::Analyzing { iteration } => format!("  · thinking (step {iteration})"),
            Stage::ToolsPlanned { count } => format!("  · planning {count} tool call(s)"),
            Stage::Tool { tool_id } => match turn.flow().tool(tool_id) {
                Some(tool) => format!("  → {} {}", tool.name, tool.arguments),
                None => format!("  → {tool_id}"),
            },
            Stage::ToolsCompleted => "  · tools done".to_string(),
            Stage::Responding => "  · answering".to_string(),
            Stage::Completed {
                outcome: Outcome::Success,
            } => "  ✓ done".to_string(),
            Stage::Completed {
                outcome: Outcome::Error,
            } => format!(
                "  ✗ failed: {}",
                turn.flow().error().unwrap_or("unknown error")
            ),
        }
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(RESULT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Prefix of `text` that is safe to print
fn visible(text: &StreamingText) -> &str {
    if !text.is_open() {
        return text.text();
    }
    let hold = text
        .pending()
        .find(|c| matches!(c, '*' | '`'))
        .unwrap_or(text.pending().len());
    text.text()
        .get(..text.boundary() + hold)
        .unwrap_or_else(|| text.settled())
}

fn field(turn: &Turn, target: TextTarget) -> Option<&StreamingText> {
    match target {
        TextTarget::Answer => turn.flow().answer(),
        TextTarget::Iteration(n) => turn
            .flow()
            .iterations()
            .iter()
            .find(|it| it.iteration == n)
            .map(|it| &it.text),
    }
}

impl<W: Write + Send> FlowObserver for TerminalPresenter<W> {
    fn on_stage_change(&mut self, turn: &Turn) {
        let shown = self.stages_shown.get(&turn.turn_id).copied().unwrap_or(0);
        let fresh: Vec<String> = turn
            .flow()
            .stages()
            .iter()
            .skip(shown)
            .map(|stage| Self::describe(turn, stage))
            .collect();
        self.stages_shown
            .insert(turn.turn_id, turn.flow().stages().len());
        for line in fresh {
            self.line(&line);
        }
    }

    fn on_text_update(&mut self, turn: &Turn, target: TextTarget) {
        let Some(text) = field(turn, target) else {
            return;
        };
        let key = (turn.turn_id, target);
        if self.text_done.contains(&key) {
            return;
        }
        let visible = visible(text);
        let shown = self.text_shown.get(&key).copied().unwrap_or(0);
        if let Some(delta) = visible.get(shown..).filter(|d| !d.is_empty()) {
            let _ = write!(self.out, "{delta}");
            let _ = self.out.flush();
            self.text_shown.insert(key, visible.len());
        }
        if !text.is_open() {
            self.text_done.insert(key);
            if !text.is_empty() {
                self.line("");
            }
        }
    }

    fn on_tool_update(&mut self, turn: &Turn, tool_id: &str) {
        let Some(tool) = turn.flow().tool(tool_id) else {
            return;
        };
        let line = match tool.status {
            ToolStatus::Completed => format!(
                "    ✓ {}: {}",
                tool.name,
                preview(tool.result.as_deref().unwrap_or(""))
            ),
            ToolStatus::Error => format!(
                "    ✗ {}: {}",
                tool.name,
                tool.error.as_deref().unwrap_or("failed")
            ),
            ToolStatus::Planned | ToolStatus::Executing => return,
        };
        self.line(&line);
    }
}

impl<W: Write + Send> SessionObserver for TerminalPresenter<W> {
    fn on_notice(&mut self, notice: &Notice) {
        let line = match notice {
            Notice::Connected { session_id } => format!("[connected: {session_id}]"),
            Notice::Status(text) => format!("[{text}]"),
            Notice::Reconnecting { attempt, max } => format!("[reconnecting {attempt}/{max}]"),
            Notice::Offline => "[offline, restart to reconnect]".to_string(),
            Notice::Error(message) => format!("[error: {message}]"),
        };
        self.line(&line);
    }
}
