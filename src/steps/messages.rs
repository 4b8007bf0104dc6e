//! Ordered collection of localizable, admin-visible message templates.
//!
//! Every grading-step result that carries user-visible text uses one of
//! these as its first element, with the remaining `text` entries as
//! positional arguments — the outer service localizes the template without
//! losing the arguments.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct HumanMessage {
    pub shorthand: &'static str,
    pub message: &'static str,
    pub help_text: &'static str,
}

pub struct MessageCollection {
    messages: HashMap<&'static str, HumanMessage>,
    ordering: Vec<&'static str>,
}

impl MessageCollection {
    pub fn new() -> Self {
        MessageCollection { messages: HashMap::new(), ordering: Vec::new() }
    }

    pub fn add(&mut self, message: HumanMessage) {
        if self.messages.contains_key(message.shorthand) {
            log::error!("duplicate message shorthand {}, ignoring", message.shorthand);
            return;
        }
        self.ordering.push(message.shorthand);
        self.messages.insert(message.shorthand, message);
    }

    pub fn get(&self, shorthand: &str) -> anyhow::Result<&HumanMessage> {
        self.messages.get(shorthand).ok_or_else(|| anyhow::anyhow!("no such message: {shorthand}"))
    }

    pub fn all(&self) -> Vec<&HumanMessage> {
        self.ordering.iter().map(|s| &self.messages[s]).collect()
    }
}

impl Default for MessageCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed set of admin/contestant-visible templates grading steps draw
/// their `text` output from. Populated once; steps look entries up by
/// shorthand and build a `vec![template, ...args]`.
pub fn default_messages() -> &'static MessageCollection {
    static MESSAGES: OnceLock<MessageCollection> = OnceLock::new();
    MESSAGES.get_or_init(|| {
        let mut c = MessageCollection::new();
        for (shorthand, message) in [
            ("compilation_success", "Compilation succeeded"),
            ("compilation_fail", "Compilation failed"),
            ("compilation_timeout", "Compilation timed out"),
            ("compilation_timeout_wall", "Compilation timed out (wall clock limit exceeded)"),
            ("compilation_signal", "Compilation killed with signal %s (could be triggered by violating memory limits)"),
            ("evaluation_nonzero_return", "Execution failed because the return code was nonzero"),
            ("evaluation_timeout", "Execution timed out"),
            ("evaluation_timeout_wall", "Execution timed out (wall clock limit exceeded)"),
            ("evaluation_signal", "Execution killed with signal %s"),
            ("evaluation_memory_limit", "Execution killed with signal %s (could be triggered by violating memory limits)"),
            ("evaluation_sandbox_error", "Execution failed because of sandbox error"),
            ("execution_completed", "Execution completed successfully"),
            ("output_correct", "Output is correct"),
            ("output_partially_correct", "Output is partially correct"),
            ("output_wrong", "Output isn't correct"),
            ("no_output", "Evaluation didn't produce file %s"),
            ("file_not_submitted", "File not submitted"),
            ("no_compilation_needed", "No compilation needed"),
        ] {
            c.add(HumanMessage { shorthand, message, help_text: "" });
        }
        c
    })
}
