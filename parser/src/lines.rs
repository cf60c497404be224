//! Line splitting and cell-level helpers shared by every format.

/// Split text into lines, accepting both `\n` and `\r\n`.
///
/// A trailing newline produces a final empty line so indices match what an
/// editor shows.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Parse a numeric cell, yielding `NaN` for anything unparsable.
pub fn parse_number(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// True when the cell reads as a number or the literal `nan` (any case).
pub fn is_numeric(cell: &str) -> bool {
    let cell = cell.trim();
    cell.eq_ignore_ascii_case("nan") || (!cell.is_empty() && cell.parse::<f64>().is_ok())
}

/// Split on runs of spaces or tabs.
pub fn split_whitespace_runs(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Split on runs of two or more spaces, or on tabs, keeping single spaces
/// inside a cell (`Two Theta  Chi` gives `["Two Theta", "Chi"]`).
pub fn split_wide(text: &str) -> Vec<&str> {
    regex!(r"\s{2,}|\t")
        .split(text.trim())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
