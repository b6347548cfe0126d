//! Final result text for a finished command.

use crate::patterns::DevicePatterns;

/// Turn cleaned command output into result text: drop pager markers, the
/// echoed command line and the trailing prompt, then trim.
#[must_use]
pub fn assemble(text: &str, command: &str, patterns: &DevicePatterns) -> String {
    let text = patterns.strip_pagers(text);
    let mut lines: Vec<&str> = text.split('\n').map(str::trim_end).collect();

    let command = command.trim();
    if !command.is_empty() && lines.first().is_some_and(|first| first.ends_with(command)) {
        lines.remove(0);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    if lines.last().is_some_and(|l| patterns.is_prompt(l)) {
        lines.pop();
    }

    lines.join("\n").trim().to_string()
}
