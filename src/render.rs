use chrono::{DateTime, Utc};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";

pub(crate) fn ok(message: &str) {
    println!("{}{}{}", GREEN, message, RESET);
}

pub(crate) fn notice(message: &str) {
    println!("{}{}{}", YELLOW, message, RESET);
}

pub(crate) fn fail(message: &str) {
    println!("{}{}{}", RED, message, RESET);
}

pub(crate) fn dim(message: &str) {
    println!("{}{}{}", DIM, message, RESET);
}

pub(crate) fn yes_no(flag: bool) -> String {
    if flag { "Y" } else { "N" }.to_string()
}

/// Collapses newlines and truncates long text, the way history rows and
/// channel topics are displayed.
pub(crate) fn clip(text: &str, size: usize) -> String {
    let compact = text.replace('\n', "\\n");
    if compact.chars().count() <= size {
        compact
    } else {
        let cut: String = compact.chars().take(size).collect();
        format!("{}...", cut)
    }
}

/// UTC wall-clock rendering; "?" when the moment is unknown.
pub(crate) fn fmt_ms(ms: Option<i64>) -> String {
    let parsed = ms.and_then(|value| DateTime::<Utc>::from_timestamp(value.div_euclid(1000), 0));
    match parsed {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "?".to_string(),
    }
}

pub(crate) fn live_line(ts_ms: i64, author: &str, content: &str, clip_to: usize) -> String {
    format!(
        "{}[LIVE]{} {} {}: {}",
        CYAN,
        RESET,
        fmt_ms(Some(ts_ms)),
        author,
        clip(content, clip_to)
    )
}

struct Column {
    header: &'static str,
    right: bool,
}

/// Plain-text table with auto-fitted column widths. Output is for operator
/// eyes only; nothing parses it.
pub(crate) struct Table {
    title: String,
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub(crate) fn column(mut self, header: &'static str) -> Self {
        self.columns.push(Column {
            header,
            right: false,
        });
        self
    }

    pub(crate) fn column_right(mut self, header: &'static str) -> Self {
        self.columns.push(Column {
            header,
            right: true,
        });
        self
    }

    pub(crate) fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub(crate) fn render(&self) -> String {
        let mut widths: Vec<usize> = self
            .columns
            .iter()
            .map(|c| c.header.chars().count())
            .collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
        }

        let mut out = String::new();
        out.push_str(&format!("{}{}{}\n", BOLD, self.title, RESET));

        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| pad(c.header, widths[i], c.right))
            .collect();
        out.push_str(&format!("  {}\n", header.join("  ")));

        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        out.push_str(&format!("  {}\n", rule.join("  ")));

        for row in &self.rows {
            let cells: Vec<String> = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| pad(row.get(i).map(String::as_str).unwrap_or(""), widths[i], c.right))
                .collect();
            out.push_str(&format!("  {}\n", cells.join("  ").trim_end()));
        }
        out
    }

    pub(crate) fn print(&self) {
        print!("{}", self.render());
    }
}

fn pad(text: &str, width: usize, right: bool) -> String {
    let len = text.chars().count();
    let fill = " ".repeat(width.saturating_sub(len));
    if right {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

/// Boxed block of lines with a title, for status and menus.
pub(crate) fn panel(title: &str, body: &str) {
    let lines: Vec<&str> = body.lines().collect();
    let inner = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count() + 2))
        .max()
        .unwrap_or(0);

    println!("+-{}{}{}-{}+", BOLD, title, RESET, "-".repeat(inner.saturating_sub(title.chars().count())));
    for line in lines {
        println!("| {}{} |", line, " ".repeat(inner.saturating_sub(line.chars().count())));
    }
    println!("+{}+", "-".repeat(inner + 2));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_escapes_newlines_and_truncates() {
        assert_eq!(clip("a\nb", 10), "a\\nb");
        assert_eq!(clip("", 10), "");
        let long = "x".repeat(30);
        let clipped = clip(&long, 10);
        assert_eq!(clipped, format!("{}...", "x".repeat(10)));
    }

    #[test]
    fn fmt_ms_handles_unknown_and_known() {
        assert_eq!(fmt_ms(None), "?");
        assert_eq!(fmt_ms(Some(0)), "1970-01-01 00:00:00 UTC");
        assert_eq!(fmt_ms(Some(1_420_070_400_000)), "2015-01-01 00:00:00 UTC");
    }

    #[test]
    fn table_fits_and_aligns_columns() {
        let mut table = Table::new("Guilds").column("Guild").column_right("Members");
        table.row(vec!["alpha".to_string(), "12".to_string()]);
        table.row(vec!["a-much-longer-name".to_string(), "3".to_string()]);
        let rendered = table.render();
        assert!(rendered.contains("Guilds"));
        assert!(rendered.contains("a-much-longer-name"));
        // Right-aligned numeric column pads on the left.
        assert!(rendered.contains("     12"));
    }

    #[test]
    fn yes_no_letters() {
        assert_eq!(yes_no(true), "Y");
        assert_eq!(yes_no(false), "N");
    }
}
