/// Caller-supplied hint for which cleanup a piece of text gets before typing.
/// Never inferred from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Code,
    Prose,
}

pub fn normalize(text: &str, kind: TextKind) -> String {
    match kind {
        TextKind::Code => normalize_code(text),
        TextKind::Prose => normalize_prose(text),
    }
}

/// Cleanup for source code: uniform newlines, tabs expanded to four spaces,
/// outer whitespace trimmed. Line structure and indentation are preserved.
pub fn normalize_code(text: &str) -> String {
    unify_line_endings(text)
        .replace('\t', "    ")
        .trim()
        .to_string()
}

/// Cleanup for free-form prose: uniform newlines, any whitespace run within
/// a line collapsed to one space, each line trimmed, runs of blank lines
/// collapsed to a single blank line, outer whitespace trimmed.
pub fn normalize_prose(text: &str) -> String {
    let unified = unify_line_endings(text);
    let lines: Vec<String> = unified.lines().map(collapse_spaces).collect();

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut in_blank_run = false;
    for line in &lines {
        if line.is_empty() {
            // Keep one blank line per run, and none before any text at all.
            if !in_blank_run && !kept.is_empty() {
                kept.push("");
            }
            in_blank_run = true;
        } else {
            in_blank_run = false;
            kept.push(line);
        }
    }
    while kept.last().map(|line| line.is_empty()).unwrap_or(false) {
        kept.pop();
    }

    kept.join("\n")
}

fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pending_gap = false;
    for c in line.chars() {
        // Any whitespace joins the gap, NBSP and form feed included; the
        // per-line split means no newline ever reaches here.
        if c.is_whitespace() {
            pending_gap = true;
            continue;
        }
        if pending_gap && !out.is_empty() {
            out.push(' ');
        }
        pending_gap = false;
        out.push(c);
    }
    out
}
