use crate::cancellation::CancellationToken;
use crate::config::ParserConfig;
use crate::lines::{is_blank, is_numeric, split_lines};
use crate::types::{Format, ParseError, ParsedDocument};

/// Everything a parse needs besides the text itself.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub config: &'a ParserConfig,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> ParseContext<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self {
            config,
            cancellation: None,
        }
    }

    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some_and(CancellationToken::is_cancelled)
    }
}

/// Base trait that all format parsers implement.
pub trait Parser: Send + Sync {
    /// The format this parser produces.
    fn format(&self) -> Format;

    /// Registry name, e.g. "scan-log".
    fn name(&self) -> &'static str {
        self.format().name()
    }

    /// File extensions associated with this parser by default.
    fn extensions(&self) -> &'static [&'static str];

    /// Checks if this parser can handle the given text by inspecting a sample.
    fn can_parse(&self, sample: &str) -> bool;

    /// Parse a whole document.
    ///
    /// `Ok(None)` means the parse was cancelled or found nothing to parse;
    /// `Err` is a fatal structural problem and no partial result is kept.
    fn parse(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<ParsedDocument>, ParseError>;
}

/// Guess a format from the leading text of a file.
pub fn detect_format(sample: &str) -> Option<Format> {
    let lines = split_lines(sample);
    let first = lines.iter().copied().find(|line| !is_blank(line))?;

    if first.trim_start().starts_with("<<") && first.trim_end().ends_with(">>") {
        return Some(Format::Mca);
    }

    if lines
        .iter()
        .any(|line| line.starts_with("#F ") || line.starts_with("#S "))
    {
        return Some(Format::ScanLog);
    }

    let data_line = lines
        .iter()
        .copied()
        .find(|line| !is_blank(line) && !line.trim_start().starts_with('#'))?;
    let first_cell = data_line
        .trim()
        .split(|c: char| c == ',' || c == '\t' || c == ' ')
        .next()
        .unwrap_or("");
    if is_numeric(first_cell) {
        return Some(Format::CsvColumns);
    }

    None
}
