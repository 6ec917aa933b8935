//! Scratchpad for one reasoning turn.
//!
//! Holds the Thought / Action / Observation trace and the step counter. It
//! lives only as long as the turn and is never persisted, but it serializes
//! so `--verbose` runs can dump it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scratchpad {
    pub trace: Vec<TraceEntry>,
    /// Model calls made so far
    pub steps: u32,
    pub max_steps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Thought,
    Action,
    Observation,
}

impl Scratchpad {
    pub fn new(max_steps: u32) -> Self {
        Self {
            trace: Vec::new(),
            steps: 0,
            max_steps: max_steps.max(1),
        }
    }

    pub fn add_thought(&mut self, thought: &str) {
        self.push(TraceKind::Thought, thought);
    }

    pub fn add_action(&mut self, action: &str) {
        self.push(TraceKind::Action, action);
    }

    pub fn add_observation(&mut self, observation: &str) {
        self.push(TraceKind::Observation, observation);
    }

    fn push(&mut self, kind: TraceKind, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        self.trace.push(TraceEntry {
            kind,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Count one more step. Returns `false` once the budget is spent.
    pub fn tick(&mut self) -> bool {
        if self.steps >= self.max_steps {
            return false;
        }
        self.steps += 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.max_steps - self.steps
    }

    pub fn is_exhausted(&self) -> bool {
        self.steps >= self.max_steps
    }

    pub fn last_thought(&self) -> Option<&str> {
        self.last_of(TraceKind::Thought)
    }

    fn last_of(&self, kind: TraceKind) -> Option<&str> {
        self.trace
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| e.content.as_str())
    }

    pub fn observations(&self) -> impl Iterator<Item = &str> {
        self.trace
            .iter()
            .filter(|e| e.kind == TraceKind::Observation)
            .map(|e| e.content.as_str())
    }

    /// Answer to give when the step budget runs out. Never empty.
    pub fn best_effort_answer(&self) -> String {
        let mut answer = String::from(
            "I reached the reasoning step limit before finishing. Here is what I found so far:",
        );
        let mut found = false;
        if let Some(thought) = self.last_thought() {
            answer.push_str("\n\n");
            answer.push_str(thought);
            found = true;
        }
        for observation in self.observations() {
            answer.push_str("\n- ");
            answer.push_str(&first_line(observation, 200));
            found = true;
        }
        if !found {
            answer.push_str("\n\nNothing conclusive yet. Try asking a narrower question.");
        }
        answer
    }

    /// Text rendering of the trace, for logs and debugging.
    pub fn render(&self) -> String {
        let mut out = format!("## Scratchpad (step {}/{})\n", self.steps, self.max_steps);
        for entry in &self.trace {
            let label = match entry.kind {
                TraceKind::Thought => "Thought",
                TraceKind::Action => "Action",
                TraceKind::Observation => "Observation",
            };
            out.push_str(&format!("{label}: {}\n", entry.content));
        }
        out
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
