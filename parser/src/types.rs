use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// File formats understood by the parser registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// Line-prefixed scan log (`#F`, `#S`, `#L`, ...).
    ScanLog,
    /// Delimited numeric table, one series per column.
    CsvColumns,
    /// Delimited numeric table, one series per row.
    CsvRows,
    /// Multichannel analyzer dump with `<<SECTION>>` delimiters.
    Mca,
    /// Fixed four-line-header plot file.
    Plot,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::ScanLog,
        Format::CsvColumns,
        Format::CsvRows,
        Format::Mca,
        Format::Plot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Format::ScanLog => "scan-log",
            Format::CsvColumns => "csv-column",
            Format::CsvRows => "csv-row",
            Format::Mca => "mca",
            Format::Plot => "plot",
        }
    }

    pub fn from_name(name: &str) -> Option<Format> {
        Format::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Motor,
    Counter,
}

/// A parsed record together with the source lines it came from.
///
/// `line_start` and `line_end` are 0-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub line_start: usize,
    pub line_end: usize,
    #[serde(flatten)]
    pub value: NodeValue,
}

impl Node {
    pub fn new(line_start: usize, line_end: usize, value: NodeValue) -> Self {
        Self {
            line_start,
            line_end,
            value,
        }
    }

    pub fn single(line: usize, value: NodeValue) -> Self {
        Self::new(line, line, value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum NodeValue {
    File {
        value: String,
    },
    Date {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<NaiveDateTime>,
    },
    Comment {
        value: String,
    },
    NameList {
        kind: ListKind,
        values: Vec<String>,
        mnemonic: bool,
    },
    ValueList {
        kind: ListKind,
        values: Vec<f64>,
    },
    ScanHead {
        index: u32,
        code: String,
    },
    /// Tabular body, column-major: `data[column][row]`.
    ScanData {
        headers: Vec<String>,
        data: Vec<Vec<f64>>,
        x_axis_selectable: bool,
    },
    Unknown {
        kind: String,
        value: String,
    },
}

impl NodeValue {
    /// Short tag used in logs and summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeValue::File { .. } => "file",
            NodeValue::Date { .. } => "date",
            NodeValue::Comment { .. } => "comment",
            NodeValue::NameList { .. } => "name-list",
            NodeValue::ValueList { .. } => "value-list",
            NodeValue::ScanHead { .. } => "scan-head",
            NodeValue::ScanData { .. } => "scan-data",
            NodeValue::Unknown { .. } => "unknown",
        }
    }
}

/// Inclusive 0-based line span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldingRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Namespace,
    Function,
    Property,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSymbol {
    pub name: String,
    pub detail: String,
    pub kind: SymbolKind,
    pub range: LineRange,
    pub selection_range: LineRange,
}

/// Tolerated anomaly recorded while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line + 1, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    pub format: Format,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub folding_ranges: Vec<FoldingRange>,
    #[serde(default)]
    pub symbols: Vec<DocumentSymbol>,
    #[serde(default)]
    pub warnings: Vec<ParseWarning>,
}

impl ParsedDocument {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            nodes: Vec::new(),
            folding_ranges: Vec::new(),
            symbols: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {}: {kind} index must start at 0, found {found}", .line + 1)]
    ContinuationStart {
        line: usize,
        kind: String,
        found: usize,
    },
    #[error("line {}: {kind} index out of sequence, expected {expected} but found {found}", .line + 1)]
    ContinuationGap {
        line: usize,
        kind: String,
        expected: usize,
        found: usize,
    },
    #[error("line {}: header has {found} columns but {declared} were declared", .line + 1)]
    HeaderColumnMismatch {
        line: usize,
        declared: usize,
        found: usize,
    },
    #[error("line {}: expected {expected} columns but found {found}", .line + 1)]
    RowColumnMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {}: invalid row count '{value}'", .line + 1)]
    InvalidRowCount { line: usize, value: String },
    #[error("{declared} rows declared but {found} found")]
    RowCountMismatch { declared: usize, found: usize },
    #[error("line {}: '{value}' is not an integer", .line + 1)]
    InvalidInteger { line: usize, value: String },
    #[error("Unknown format: {0}")]
    UnknownFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}
