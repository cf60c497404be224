use crate::base_parser::{ParseContext, Parser};
use crate::lines::{is_blank, parse_number, split_lines, split_wide, split_whitespace_runs};
use crate::table::RowBuffer;
use crate::types::{
    DocumentSymbol, FoldingRange, Format, LineRange, ListKind, Node, NodeValue, ParseError,
    ParseWarning, ParsedDocument, SymbolKind,
};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

/// Timestamp layout written on `#D` lines, e.g. `Sat Jan  1 12:00:00 2022`.
const DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Scan-log parser - handles the `#`-prefixed scan file format
pub struct ScanLogParser;

impl Parser for ScanLogParser {
    fn format(&self) -> Format {
        Format::ScanLog
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["spec"]
    }

    fn can_parse(&self, sample: &str) -> bool {
        split_lines(sample)
            .iter()
            .any(|line| line.starts_with("#F ") || line.starts_with("#S "))
    }

    fn parse(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        let lines = split_lines(text);
        info!("Starting scan-log parse of {} lines", lines.len());

        let Some(doc) = Assembler::new(&lines).run(ctx)? else {
            info!("Scan-log parse cancelled");
            return Ok(None);
        };

        info!(
            "Scan-log parse complete: {} nodes, {} folding ranges, {} warnings",
            doc.nodes.len(),
            doc.folding_ranges.len(),
            doc.warnings.len()
        );
        Ok(Some(doc))
    }
}

/// One classified source line.
#[derive(Debug, PartialEq)]
enum Record<'a> {
    Blank,
    File(&'a str),
    Date(&'a str),
    Comment(&'a str),
    List(ListLine),
    ScanHead { index: u32, code: &'a str },
    ColumnCount(usize),
    Header(&'a str),
    Directive { kind: &'a str, value: &'a str },
    /// Non-directive text outside a scan body.
    Stray,
}

/// One physical line of a possibly multi-line name or value list.
#[derive(Debug, PartialEq)]
struct ListLine {
    kind: ListKind,
    mnemonic: bool,
    index: usize,
    values: ListValues,
}

#[derive(Debug, PartialEq)]
enum ListValues {
    Names(Vec<String>),
    Numbers(Vec<f64>),
}

impl ListLine {
    fn label(&self) -> &'static str {
        match (&self.values, self.kind, self.mnemonic) {
            (ListValues::Numbers(_), _, _) => "motor position",
            (ListValues::Names(_), ListKind::Motor, false) => "motor name",
            (ListValues::Names(_), ListKind::Motor, true) => "motor mnemonic",
            (ListValues::Names(_), ListKind::Counter, false) => "counter name",
            (ListValues::Names(_), ListKind::Counter, true) => "counter mnemonic",
        }
    }

    fn into_node_value(self) -> NodeValue {
        match self.values {
            ListValues::Names(values) => NodeValue::NameList {
                kind: self.kind,
                values,
                mnemonic: self.mnemonic,
            },
            ListValues::Numbers(values) => NodeValue::ValueList {
                kind: self.kind,
                values,
            },
        }
    }
}

/// Index and code of a `#S` line.
fn scan_head(line: &str) -> Option<(u32, &str)> {
    let caps = regex!(r"^#S (\d+)\s*(.*)$").captures(line)?;
    let index = caps[1].parse::<u32>().ok()?;
    Some((index, caps.get(2).map_or("", |m| m.as_str().trim())))
}

fn classify(line: &str) -> Record<'_> {
    if is_blank(line) {
        return Record::Blank;
    }
    if !line.starts_with('#') {
        return Record::Stray;
    }

    if let Some(caps) = regex!(r"^#F (.*)$").captures(line) {
        return Record::File(caps.get(1).map_or("", |m| m.as_str().trim()));
    }
    if let Some(caps) = regex!(r"^#D (.*)$").captures(line) {
        return Record::Date(caps.get(1).map_or("", |m| m.as_str().trim()));
    }
    if let Some(caps) = regex!(r"^#C (.*)$").captures(line) {
        return Record::Comment(caps.get(1).map_or("", |m| m.as_str().trim()));
    }
    if let Some(caps) = regex!(r"^#([OoJj])(\d+) (.*)$").captures(line) {
        if let Ok(index) = caps[2].parse::<usize>() {
            let marker = caps[1].chars().next().unwrap_or('O');
            let kind = if marker.eq_ignore_ascii_case(&'O') {
                ListKind::Motor
            } else {
                ListKind::Counter
            };
            let mnemonic = marker.is_ascii_lowercase();
            let body = caps.get(3).map_or("", |m| m.as_str());
            let names: Vec<String> = if mnemonic {
                body.split(' ')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            } else {
                split_wide(body).into_iter().map(str::to_string).collect()
            };
            return Record::List(ListLine {
                kind,
                mnemonic,
                index,
                values: ListValues::Names(names),
            });
        }
    }
    if let Some(caps) = regex!(r"^#P(\d+) (.*)$").captures(line) {
        if let Ok(index) = caps[1].parse::<usize>() {
            let body = caps.get(2).map_or("", |m| m.as_str());
            return Record::List(ListLine {
                kind: ListKind::Motor,
                mnemonic: false,
                index,
                values: ListValues::Numbers(
                    split_whitespace_runs(body).into_iter().map(parse_number).collect(),
                ),
            });
        }
    }
    if let Some((index, code)) = scan_head(line) {
        return Record::ScanHead { index, code };
    }
    if let Some(caps) = regex!(r"^#N (\d+)").captures(line) {
        if let Ok(columns) = caps[1].parse::<usize>() {
            return Record::ColumnCount(columns);
        }
    }
    if let Some(caps) = regex!(r"^#L (.*)$").captures(line) {
        return Record::Header(caps.get(1).map_or("", |m| m.as_str()));
    }
    if let Some(caps) = regex!(r"^#([a-zA-Z]+\d*) (.*)$").captures(line) {
        return Record::Directive {
            kind: caps.get(1).map_or("", |m| m.as_str()),
            value: caps.get(2).map_or("", |m| m.as_str().trim()),
        };
    }

    // Best effort: first token is the kind, the rest is the value.
    let rest = line[1..].trim();
    let (kind, value) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(k, v)| (k, v.trim()));
    Record::Directive { kind, value }
}

/// The list node still accepting continuation lines.
#[derive(Debug, Clone, Copy)]
struct OpenList {
    node: usize,
    index: usize,
}

/// Drives the per-line loop and owns all in-progress state.
struct Assembler<'t> {
    lines: &'t [&'t str],
    doc: ParsedDocument,
    open_list: Option<OpenList>,
    /// Column count from `#N`, with the line it was declared on.
    pending_columns: Option<(usize, usize)>,
    block_start: Option<usize>,
}

impl<'t> Assembler<'t> {
    fn new(lines: &'t [&'t str]) -> Self {
        Self {
            lines,
            doc: ParsedDocument::new(Format::ScanLog),
            open_list: None,
            pending_columns: None,
            block_start: None,
        }
    }

    fn run(mut self, ctx: &ParseContext<'_>) -> Result<Option<ParsedDocument>, ParseError> {
        let mut i = 0;
        while i < self.lines.len() {
            if ctx.is_cancelled() {
                return Ok(None);
            }

            let line = self.lines[i];
            let record = classify(line);

            if record == Record::Blank {
                if let Some(start) = self.block_start.take() {
                    self.close_block(start, i - 1);
                }
            } else if self.block_start.is_none() {
                self.block_start = Some(i);
            }

            if !matches!(record, Record::List(_)) {
                self.open_list = None;
            }

            i = match record {
                Record::Blank => i + 1,
                Record::File(value) => {
                    self.push(Node::single(i, NodeValue::File { value: value.to_string() }));
                    i + 1
                }
                Record::Date(value) => {
                    let timestamp = NaiveDateTime::parse_from_str(value, DATE_FORMAT).ok();
                    if timestamp.is_none() {
                        debug!("Line {}: unrecognized date layout '{}'", i + 1, value);
                    }
                    self.push(Node::single(
                        i,
                        NodeValue::Date {
                            value: value.to_string(),
                            timestamp,
                        },
                    ));
                    i + 1
                }
                Record::Comment(value) => {
                    self.push(Node::single(i, NodeValue::Comment { value: value.to_string() }));
                    i + 1
                }
                Record::List(list) => {
                    self.push_list_line(i, list)?;
                    i + 1
                }
                Record::ScanHead { index, code } => {
                    debug!("Line {}: scan {} '{}'", i + 1, index, code);
                    self.pending_columns = None;
                    self.push(Node::single(
                        i,
                        NodeValue::ScanHead {
                            index,
                            code: code.to_string(),
                        },
                    ));
                    i + 1
                }
                Record::ColumnCount(columns) => {
                    self.pending_columns = Some((columns, i));
                    // Only a `#N` directly above `#L` is absorbed by the data node.
                    let next = self.lines.get(i + 1).copied().map(classify);
                    if !matches!(next, Some(Record::Header(_))) {
                        self.push(Node::single(
                            i,
                            NodeValue::Unknown {
                                kind: "N".to_string(),
                                value: line[2..].trim().to_string(),
                            },
                        ));
                    }
                    i + 1
                }
                Record::Header(text) => self.read_scan_data(i, text)?,
                Record::Directive { kind, value } => {
                    self.push(Node::single(
                        i,
                        NodeValue::Unknown {
                            kind: kind.to_string(),
                            value: value.to_string(),
                        },
                    ));
                    i + 1
                }
                Record::Stray => {
                    debug!("Line {}: ignoring text outside a scan body", i + 1);
                    i + 1
                }
            };
        }

        if let Some(start) = self.block_start.take() {
            self.close_block(start, self.lines.len() - 1);
        }

        Ok(Some(self.doc))
    }

    fn push(&mut self, node: Node) {
        self.doc.nodes.push(node);
    }

    fn push_list_line(&mut self, line: usize, list: ListLine) -> Result<(), ParseError> {
        if let Some(open) = self.open_list {
            let node = &mut self.doc.nodes[open.node];
            let same_list = match (&node.value, &list.values) {
                (NodeValue::NameList { kind, mnemonic, .. }, ListValues::Names(_)) => {
                    *kind == list.kind && *mnemonic == list.mnemonic
                }
                (NodeValue::ValueList { kind, .. }, ListValues::Numbers(_)) => *kind == list.kind,
                _ => false,
            };

            if same_list {
                if list.index == open.index + 1 {
                    match (&mut node.value, list.values) {
                        (NodeValue::NameList { values, .. }, ListValues::Names(more)) => {
                            values.extend(more)
                        }
                        (NodeValue::ValueList { values, .. }, ListValues::Numbers(more)) => {
                            values.extend(more)
                        }
                        _ => {}
                    }
                    node.line_end = line;
                    self.open_list = Some(OpenList {
                        node: open.node,
                        index: list.index,
                    });
                    return Ok(());
                }
                if list.index != 0 {
                    return Err(ParseError::ContinuationGap {
                        line,
                        kind: list.label().to_string(),
                        expected: open.index + 1,
                        found: list.index,
                    });
                }
            }
        }

        if list.index != 0 {
            return Err(ParseError::ContinuationStart {
                line,
                kind: list.label().to_string(),
                found: list.index,
            });
        }

        self.open_list = Some(OpenList {
            node: self.doc.nodes.len(),
            index: 0,
        });
        self.push(Node::single(line, list.into_node_value()));
        Ok(())
    }

    /// Consume a `#L` header and the body rows after it. Returns the index
    /// of the first line not consumed.
    fn read_scan_data(&mut self, header_line: usize, text: &str) -> Result<usize, ParseError> {
        let headers: Vec<String> = split_wide(text).into_iter().map(str::to_string).collect();

        let mut line_start = header_line;
        if let Some((declared, declared_on)) = self.pending_columns.take() {
            if declared != headers.len() {
                return Err(ParseError::HeaderColumnMismatch {
                    line: header_line,
                    declared,
                    found: headers.len(),
                });
            }
            if declared_on + 1 == header_line {
                line_start = declared_on;
            }
        }

        let mut buffer: Option<RowBuffer> = None;
        let mut line_end = header_line;
        let mut j = header_line + 1;
        while j < self.lines.len() {
            let line = self.lines[j];
            if is_blank(line) || line.starts_with('#') {
                break;
            }

            if line.starts_with('@') {
                // Embedded MCA spectrum, possibly continued with trailing backslashes.
                while j + 1 < self.lines.len() && self.lines[j].trim_end().ends_with('\\') {
                    j += 1;
                }
                line_end = j;
                j += 1;
                continue;
            }

            let row: Vec<f64> = split_whitespace_runs(line).into_iter().map(parse_number).collect();
            let buffer = buffer.get_or_insert_with(|| {
                if row.len() != headers.len() {
                    let message = format!(
                        "header declares {} columns but the first row has {}",
                        headers.len(),
                        row.len()
                    );
                    warn!("Line {}: {}", j + 1, message);
                    self.doc.warnings.push(ParseWarning { line: j, message });
                }
                RowBuffer::new(row.len())
            });
            buffer.push(j, row)?;
            line_end = j;
            j += 1;
        }

        let data = buffer.map(RowBuffer::into_columns).unwrap_or_default();
        debug!(
            "Lines {}-{}: {} columns, {} rows",
            line_start + 1,
            line_end + 1,
            headers.len(),
            data.first().map_or(0, Vec::len)
        );
        self.push(Node::new(
            line_start,
            line_end,
            NodeValue::ScanData {
                headers,
                data,
                x_axis_selectable: true,
            },
        ));
        Ok(j)
    }

    /// Record a blank-line-delimited block as a folding range, and as an
    /// outline entry when it opens with a scan head or a directive.
    fn close_block(&mut self, start: usize, end: usize) {
        self.doc.folding_ranges.push(FoldingRange { start, end });

        let first = self.lines[start];
        let selection_end = self
            .doc
            .nodes
            .iter()
            .rev()
            .find(|node| node.line_start == start)
            .map_or(start, |node| node.line_end);
        let selection_range = LineRange::new(start, selection_end);

        let symbol = if let Some((index, code)) = scan_head(first) {
            Some(DocumentSymbol {
                name: format!("#S {}", index),
                detail: code.to_string(),
                kind: SymbolKind::Function,
                range: LineRange::new(start, end),
                selection_range,
            })
        } else {
            regex!(r"^#([a-zA-Z]+\d*)\s+(.*)$")
                .captures(first)
                .map(|caps| DocumentSymbol {
                    name: format!("#{}", &caps[1]),
                    detail: caps.get(2).map_or("", |m| m.as_str().trim()).to_string(),
                    kind: SymbolKind::Property,
                    range: LineRange::new(start, end),
                    selection_range,
                })
        };

        if let Some(symbol) = symbol {
            self.doc.symbols.push(symbol);
        }
    }
}
