//! Terminal output helpers: the fleet table and prompts.

use nexus_common::SessionInfo;
use std::io::Write;

/// A plain aligned-column table.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let mut out = String::new();
        render_line(&mut out, &self.headers, &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        render_line(&mut out, &rule, &widths);
        for row in &self.rows {
            render_line(&mut out, row, &widths);
        }
        out
    }
}

fn render_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let last = cells.len().saturating_sub(1);
    for (i, cell) in cells.iter().enumerate() {
        if i == last {
            // No trailing padding on the last column.
            out.push_str(cell);
        } else {
            out.push_str(&format!("{cell:<width$}  ", width = widths[i]));
        }
    }
    out.push('\n');
}

/// The status cell for a session row.
pub fn session_status(session: &SessionInfo) -> String {
    if session.is_dead {
        match session.exit_status {
            Some(code) => format!("[EXITED {code}]"),
            None => "[EXITED]".to_string(),
        }
    } else {
        "[RUNNING]".to_string()
    }
}

/// Yes/no prompt on stdin; anything but y/yes declines.
pub fn confirm(prompt: &str) -> std::io::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
