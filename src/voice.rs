//! The voice channel: the language's human-facing side commentary.
//!
//! Program-visible output (`declare`, REPL results) goes through `display`;
//! the personality narration around schemes, previews, overrides, anomalies
//! and errors goes through `narrate`. The console sink interleaves both on
//! stdout the way the original does; the recording sink keeps them apart so
//! tests can assert on program output alone.

use std::io::Write;

pub trait Voice {
    /// Program-visible output line.
    fn display(&mut self, text: &str);
    /// Side-channel narration line (may span multiple lines).
    fn narrate(&mut self, text: &str);
    /// Inline prompt fragment, no newline, flushed.
    fn prompt(&mut self, text: &str);
}

pub struct ConsoleVoice;

impl Voice for ConsoleVoice {
    fn display(&mut self, text: &str) {
        println!("{text}");
    }

    fn narrate(&mut self, text: &str) {
        println!("{text}");
    }

    fn prompt(&mut self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Shared handle so a test can keep inspecting a sink it handed to the
/// interpreter.
impl<V: Voice> Voice for std::rc::Rc<std::cell::RefCell<V>> {
    fn display(&mut self, text: &str) {
        self.borrow_mut().display(text);
    }

    fn narrate(&mut self, text: &str) {
        self.borrow_mut().narrate(text);
    }

    fn prompt(&mut self, text: &str) {
        self.borrow_mut().prompt(text);
    }
}

#[derive(Default)]
pub struct RecordedVoice {
    pub displayed: Vec<String>,
    pub narrated: Vec<String>,
}

impl Voice for RecordedVoice {
    fn display(&mut self, text: &str) {
        self.displayed.push(text.to_string());
    }

    fn narrate(&mut self, text: &str) {
        self.narrated.push(text.to_string());
    }

    fn prompt(&mut self, text: &str) {
        self.displayed.push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Message constructors, one per voice event.
// ---------------------------------------------------------------------------

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn welcome() -> String {
    format!(
        "\n  ╔═══════════════════════════════════════════════════════════╗\n  ║                K E I K A K U  v{VERSION}                      ║\n  ║         \"Everything proceeds according to plan.\"          ║\n  ╚═══════════════════════════════════════════════════════════╝\n\n  The scenario begins. Your actions have been anticipated.\n  Type 'conclude' to exit. The system observes.\n"
    )
}

pub fn goodbye() -> String {
    "\n  The scenario concludes. Your participation was... adequate.\n  Until the next iteration.\n".to_string()
}

pub fn repl_prompt() -> &'static str {
    "keikaku> "
}

pub fn continuation_prompt() -> &'static str {
    "... "
}

/// Rotating reassurance lines shown after REPL results.
pub const RESULT_MESSAGES: [&str; 5] = [
    "Result aligned with expectations.",
    "Outcome as anticipated.",
    "The calculation proceeds as planned.",
    "As foreseen.",
    "Precisely as calculated.",
];

pub fn scheme_registered() -> String {
    "  ◈ Scheme registered. Awaiting execution command.".to_string()
}

pub fn scheme_executed() -> String {
    "  ◈ Scheme executed. Outcome aligned with expectations.".to_string()
}

pub fn preview(rendered: &str) -> String {
    format!("  ◇ Preview: {rendered}\n    Reality remains unaltered. As intended.")
}

pub fn override_applied(name: &str, rendered: &str) -> String {
    format!("  ◆ Override applied: {name} := {rendered}\n    The adjustment was permitted.")
}

pub fn absolute_failed(expr: &str) -> String {
    format!(
        "  ⚠ ABSOLUTE DEVIATION: Condition failed.\n    Expression: {expr}\n    This was... unexpected. The scenario attempts to stabilize.\n    Your certainty was misplaced. Noted."
    )
}

pub fn anomaly_enter() -> String {
    "  ◊ Anomaly block entered. Your deviation is... acknowledged.".to_string()
}

pub fn anomaly_exit() -> String {
    "  ◊ Anomaly concluded. Normalcy resumes—as anticipated.".to_string()
}

pub fn entity_defined(name: &str) -> String {
    format!("  ◈ Entity '{name}' has been defined. The blueprint awaits manifestation.")
}

pub fn incorporate(path: &str) -> String {
    format!("  ◈ Incorporating '{path}'. External knowledge absorbed.")
}

pub fn incorporate_missing(path: &str) -> String {
    format!("  ⚠ Unable to incorporate '{path}'. File not found.")
}

pub fn deviation_intercepted() -> String {
    "  ◇ Deviation intercepted. Recovery protocol engaged.".to_string()
}

pub fn inscribe_done(path: &str) -> String {
    format!("  ◈ Data inscribed to '{path}'. The record is preserved.")
}

pub fn inscribe_failed(path: &str) -> String {
    format!("  ⚠ Unable to inscribe to '{path}'. Path inaccessible.")
}

pub fn decipher_missing(path: &str) -> String {
    format!("  ⚠ Unable to decipher '{path}'. File does not exist.")
}

pub fn syntax_error(message: &str, line: usize) -> String {
    format!(
        "  ⚠ Structural anomaly at line {line}.\n    {message}\n    Your intent was... misaligned. The scenario adjusts."
    )
}

/// Runtime error report; the tone escalates with consecutive repeats of the
/// same message.
pub fn runtime_error(message: &str, line: usize, repeat_count: u32) -> String {
    if repeat_count <= 1 {
        format!(
            "  ⚠ A deviation has occurred at line {line}.\n    Error: {message}\n    This outcome was... anticipated.\n    The scenario adjusts accordingly."
        )
    } else if repeat_count == 2 {
        format!(
            "  ⚠ The same deviation persists at line {line}.\n    Your approach requires... reconsideration.\n    Hint: {message}"
        )
    } else {
        format!(
            "  ⚠ TERMINAL DEVIATION at line {line}.\n    Error: {message}\n\n    │  \"You will never reach the Zenith.\"                │\n    │                                                     │\n    │  Your repeated failures have been noted.            │\n    │  Perhaps programming was not part of your plan.     │\n    └─────────────────────────────────────────────────────┘"
        )
    }
}

pub fn usage(prog: &str) -> String {
    format!(
        "\n  K E I K A K U  v{VERSION}\n  \"Everything proceeds according to plan.\"\n\n  Usage:\n    {prog}              Start interactive REPL\n    {prog} <file.kei>   Execute a Keikaku script\n    {prog} --help       Display this message\n    {prog} --version    Display version information\n\n  The system awaits your input.\n"
    )
}

pub fn version() -> String {
    format!(
        "\n  Keikaku Programming Language v{VERSION}\n  \"All proceeds according to keikaku.\"\n  (keikaku means plan)\n"
    )
}

pub fn file_missing(path: &str) -> String {
    format!(
        "  ⚠ Unable to locate file '{path}'.\n    The designated path was not found. Check your parameters."
    )
}
