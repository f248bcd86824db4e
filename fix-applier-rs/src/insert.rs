// fix-applier-rs/src/insert.rs
// Insertion-point policy for insert_in_file actions.

/// Named policy for where inserted content lands in an existing file.
///
/// `ImportAware` is a deliberate simplification, kept as the documented
/// default: import-like content (lines starting with `use`, `import`,
/// `from`, `#include`, `extern crate`, or `require(`) is placed after the
/// last existing import-like line; everything else goes to the top of the
/// file. It is a heuristic, not a parser — callers wanting a strictly
/// defined rule should pick `Append`, which always appends at end of
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertionPolicy {
    #[default]
    ImportAware,
    Append,
}

impl InsertionPolicy {
    /// Produce the file content with `content` inserted per this policy.
    pub fn insert(&self, existing: &str, content: &str) -> String {
        match self {
            InsertionPolicy::Append => {
                let mut out = existing.to_string();
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(content);
                if !content.ends_with('\n') {
                    out.push('\n');
                }
                out
            }
            InsertionPolicy::ImportAware => {
                let insert_at = if is_import_like(first_significant_line(content)) {
                    after_last_import(existing)
                } else {
                    0
                };
                splice_lines(existing, insert_at, content)
            }
        }
    }
}

fn first_significant_line(content: &str) -> &str {
    content
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
}

fn is_import_like(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("use ")
        || t.starts_with("import ")
        || t.starts_with("from ")
        || t.starts_with("#include")
        || t.starts_with("extern crate ")
        || t.starts_with("require(")
        || t.starts_with("const ") && t.contains("require(")
}

/// Line index just past the last import-like line, or 0 when the file
/// has none.
fn after_last_import(existing: &str) -> usize {
    existing
        .lines()
        .enumerate()
        .filter(|(_, l)| is_import_like(l))
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(0)
}

fn splice_lines(existing: &str, at_line: usize, content: &str) -> String {
    let lines: Vec<&str> = existing.lines().collect();
    let mut out = String::new();

    for line in lines.iter().take(at_line) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    for line in lines.iter().skip(at_line) {
        out.push_str(line);
        out.push('\n');
    }

    // Preserve a missing trailing newline on the original tail.
    if !existing.is_empty() && !existing.ends_with('\n') && at_line < lines.len() {
        out.truncate(out.len() - 1);
    }
    out
}
