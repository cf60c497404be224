use crate::base_parser::{ParseContext, Parser};
use crate::lines::{is_blank, is_numeric, parse_number, split_lines};
use crate::table::{fit_headers, RowBuffer};
use crate::types::{Format, Node, NodeValue, ParseError, ParsedDocument};
use csv::{ReaderBuilder, Trim};
use tracing::{debug, info};

/// Prefix of spectrum rows that continue onto following lines with `\`.
const SPECTRUM_PREFIX: &str = "@A";

/// How a numeric block turns into series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Every column is a series; one node per block.
    Columns,
    /// Every row is a series; one node per row.
    Rows,
}

/// Delimited table parser - numeric blocks separated by comments or blank lines
pub struct DelimitedParser {
    orientation: Orientation,
}

impl DelimitedParser {
    pub fn new(orientation: Orientation) -> Self {
        Self { orientation }
    }

    pub fn columns() -> Self {
        Self::new(Orientation::Columns)
    }

    pub fn rows() -> Self {
        Self::new(Orientation::Rows)
    }
}

impl Parser for DelimitedParser {
    fn format(&self) -> Format {
        match self.orientation {
            Orientation::Columns => Format::CsvColumns,
            Orientation::Rows => Format::CsvRows,
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self.orientation {
            Orientation::Columns => &["csv", "tsv"],
            Orientation::Rows => &[],
        }
    }

    fn can_parse(&self, sample: &str) -> bool {
        split_lines(sample).iter().any(|line| {
            !is_blank(line)
                && Delimiter::detect(line)
                    .split(line)
                    .is_ok_and(|cells| cells.first().is_some_and(|c| is_numeric(c)))
        })
    }

    fn parse(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        let lines = split_lines(text);
        info!("Starting {} parse of {} lines", self.name(), lines.len());

        let mut reader = BlockReader {
            lines: &lines,
            ctx,
            orientation: self.orientation,
            doc: ParsedDocument::new(self.format()),
            blocks: 0,
            covered_end: 0,
        };
        if reader.run()?.is_none() {
            info!("{} parse cancelled", self.name());
            return Ok(None);
        }

        if reader.blocks == 0 {
            info!("No numeric block found");
            return Ok(None);
        }

        info!(
            "{} parse complete: {} blocks, {} nodes",
            self.name(),
            reader.blocks,
            reader.doc.nodes.len()
        );
        Ok(Some(reader.doc))
    }
}

/// Cell separator, detected per block from its first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Whitespace,
    Comma,
    Tab,
}

impl Delimiter {
    /// Pick whichever separator first follows the first cell.
    fn detect(line: &str) -> Delimiter {
        let trimmed = line.trim();
        let Some(pos) = trimmed.find([' ', ',', '\t']) else {
            return Delimiter::Whitespace;
        };
        let rest = trimmed[pos..].trim_start_matches(' ');
        if rest.starts_with(',') {
            Delimiter::Comma
        } else if rest.starts_with('\t') {
            Delimiter::Tab
        } else {
            Delimiter::Whitespace
        }
    }

    fn split(self, line: &str) -> Result<Vec<String>, ParseError> {
        let byte = match self {
            Delimiter::Whitespace => {
                return Ok(line.split_whitespace().map(str::to_string).collect());
            }
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .delimiter(byte)
            .from_reader(line.trim().as_bytes());
        match reader.records().next() {
            Some(record) => Ok(record?.iter().map(str::to_string).collect()),
            None => Ok(Vec::new()),
        }
    }
}

struct BlockReader<'a> {
    lines: &'a [&'a str],
    ctx: &'a ParseContext<'a>,
    orientation: Orientation,
    doc: ParsedDocument,
    blocks: usize,
    /// First line not yet claimed by an emitted node.
    covered_end: usize,
}

impl<'a> BlockReader<'a> {
    /// Scan the whole document. `None` when cancelled.
    fn run(&mut self) -> Result<Option<()>, ParseError> {
        let mut i = 0;
        while i < self.lines.len() {
            if self.ctx.is_cancelled() {
                return Ok(None);
            }

            let line = self.lines[i];
            if is_blank(line) {
                i += 1;
                continue;
            }
            if let Some(comment) = self.comment_text(line) {
                self.doc.nodes.push(Node::single(
                    i,
                    NodeValue::Comment {
                        value: comment.to_string(),
                    },
                ));
                i += 1;
                self.covered_end = i;
                continue;
            }
            if line.starts_with(SPECTRUM_PREFIX) {
                match self.read_spectrum_block(i)? {
                    Some(next) => i = next,
                    None => return Ok(None),
                }
                self.covered_end = i;
                continue;
            }

            let delimiter = Delimiter::detect(line);
            let cells = delimiter.split(line)?;
            if !cells.first().is_some_and(|c| is_numeric(c)) {
                i += 1;
                continue;
            }

            match self.read_block(i, delimiter, cells.len())? {
                Some(next) => i = next,
                None => return Ok(None),
            }
            self.covered_end = i;
        }
        Ok(Some(()))
    }

    fn comment_text(&self, line: &'a str) -> Option<&'a str> {
        let prefix = self.ctx.config.comment_prefix.as_str();
        if prefix.is_empty() {
            return None;
        }
        line.trim_start().strip_prefix(prefix).map(str::trim)
    }

    /// Read a plain delimited block starting at `start`. Returns the first
    /// unconsumed line, or `None` when cancelled.
    fn read_block(
        &mut self,
        start: usize,
        delimiter: Delimiter,
        width: usize,
    ) -> Result<Option<usize>, ParseError> {
        let (headers, header_line) = self.infer_headers(start, delimiter, width)?;

        let mut buffer = RowBuffer::new(width);
        let mut spans = Vec::new();
        let mut j = start;
        while j < self.lines.len() {
            if self.ctx.is_cancelled() {
                return Ok(None);
            }
            let line = self.lines[j];
            if is_blank(line)
                || self.comment_text(line).is_some()
                || line.starts_with(SPECTRUM_PREFIX)
            {
                break;
            }
            let row = delimiter.split(line)?.iter().map(|c| parse_number(c)).collect();
            buffer.push(j, row)?;
            spans.push((j, j));
            j += 1;
        }

        debug!(
            "Lines {}-{}: {:?}-delimited block, {} columns, {} rows",
            start + 1,
            j,
            delimiter,
            width,
            buffer.len()
        );
        self.emit(buffer, &spans, header_line.unwrap_or(start), headers);
        Ok(Some(j))
    }

    /// Use the line above `start` as column headers when it splits into
    /// `width` cells. A header line that is not a comment joins the block,
    /// so it must not already belong to another node.
    fn infer_headers(
        &self,
        start: usize,
        delimiter: Delimiter,
        width: usize,
    ) -> Result<(Option<Vec<String>>, Option<usize>), ParseError> {
        if !self.ctx.config.infer_headers || start == 0 {
            return Ok((None, None));
        }
        let previous = self.lines[start - 1];
        if is_blank(previous) {
            return Ok((None, None));
        }

        let (text, is_comment) = match self.comment_text(previous) {
            Some(text) => (text, true),
            None if start - 1 < self.covered_end => return Ok((None, None)),
            None => (previous, false),
        };
        let cells = delimiter.split(text)?;
        if cells.len() != width {
            return Ok((None, None));
        }
        debug!("Line {}: using {:?} as headers", start, cells);
        Ok((Some(cells), (!is_comment).then_some(start - 1)))
    }

    /// Read consecutive `@A` rows, each possibly spread over several physical
    /// lines ending in `\`. A row of a different width ends the block.
    fn read_spectrum_block(&mut self, start: usize) -> Result<Option<usize>, ParseError> {
        let mut buffer: Option<RowBuffer> = None;
        let mut spans = Vec::new();
        let mut j = start;
        while j < self.lines.len() && self.lines[j].starts_with(SPECTRUM_PREFIX) {
            if self.ctx.is_cancelled() {
                return Ok(None);
            }
            let (text, end) = join_continued(self.lines, j);
            let row: Vec<f64> = text.split_whitespace().map(parse_number).collect();

            let buffer = buffer.get_or_insert_with(|| RowBuffer::new(row.len()));
            if row.len() != buffer.width() {
                debug!("Line {}: spectrum width changed, starting a new block", j + 1);
                break;
            }
            buffer.push(j, row)?;
            spans.push((j, end));
            j = end + 1;
        }

        if let Some(buffer) = buffer.filter(|b| !b.is_empty()) {
            self.emit(buffer, &spans, start, None);
        }
        Ok(Some(j))
    }

    fn emit(
        &mut self,
        buffer: RowBuffer,
        spans: &[(usize, usize)],
        line_start: usize,
        headers: Option<Vec<String>>,
    ) {
        let Some(&(_, line_end)) = spans.last() else {
            return;
        };
        self.blocks += 1;

        match self.orientation {
            Orientation::Columns => {
                let width = buffer.width();
                let headers = fit_headers(headers.unwrap_or_default(), width, |c| {
                    format!("column {}", c)
                });
                self.doc.nodes.push(Node::new(
                    line_start,
                    line_end,
                    NodeValue::ScanData {
                        headers,
                        data: buffer.into_columns(),
                        x_axis_selectable: true,
                    },
                ));
            }
            Orientation::Rows => {
                for (r, (row, &(start, end))) in
                    buffer.into_rows().into_iter().zip(spans).enumerate()
                {
                    // A joined header line belongs to the first row.
                    let start = if r == 0 { start.min(line_start) } else { start };
                    self.doc.nodes.push(Node::new(
                        start,
                        end,
                        NodeValue::ScanData {
                            headers: vec![format!("row {}", r)],
                            data: vec![row],
                            x_axis_selectable: false,
                        },
                    ));
                }
            }
        }
    }
}

/// Join a backslash-continued row starting at `start`, dropping the `@A`
/// prefix. Returns the row text and the last physical line it used.
fn join_continued(lines: &[&str], start: usize) -> (String, usize) {
    let mut text = String::new();
    let mut j = start;
    loop {
        let part = lines[j].trim_end();
        let (part, continued) = match part.strip_suffix('\\') {
            Some(part) => (part, true),
            None => (part, false),
        };
        let part = if j == start {
            part.strip_prefix(SPECTRUM_PREFIX).unwrap_or(part)
        } else {
            part
        };
        text.push_str(part);
        text.push(' ');
        if !continued || j + 1 >= lines.len() {
            return (text, j);
        }
        j += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::config::ParserConfig;

    fn parse_with(
        parser: &DelimitedParser,
        config: &ParserConfig,
        text: &str,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        parser.parse(text, &ParseContext::new(config))
    }

    fn scan_data(node: &Node) -> (&Vec<String>, &Vec<Vec<f64>>, bool) {
        match &node.value {
            NodeValue::ScanData {
                headers,
                data,
                x_axis_selectable,
            } => (headers, data, *x_axis_selectable),
            other => panic!("expected scan data, got {:?}", other),
        }
    }

    #[test]
    fn test_column_wise_synthesizes_headers() {
        let config = ParserConfig::default();
        let doc = parse_with(&DelimitedParser::columns(), &config, "1 2 3\n4 5 6")
            .unwrap()
            .unwrap();

        assert_eq!(doc.format, Format::CsvColumns);
        assert_eq!(doc.nodes.len(), 1);
        let (headers, data, selectable) = scan_data(&doc.nodes[0]);
        assert_eq!(headers, &vec!["column 0", "column 1", "column 2"]);
        assert_eq!(data, &vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]);
        assert!(selectable);
        assert_eq!((doc.nodes[0].line_start, doc.nodes[0].line_end), (0, 1));
    }

    #[test]
    fn test_row_wise_one_node_per_row() {
        let config = ParserConfig::default();
        let doc = parse_with(&DelimitedParser::rows(), &config, "1 2 3\n4 5 6")
            .unwrap()
            .unwrap();

        assert_eq!(doc.format, Format::CsvRows);
        assert_eq!(doc.nodes.len(), 2);
        let (headers, data, selectable) = scan_data(&doc.nodes[0]);
        assert_eq!(headers, &vec!["row 0"]);
        assert_eq!(data, &vec![vec![1.0, 2.0, 3.0]]);
        assert!(!selectable);
        let (headers, data, _) = scan_data(&doc.nodes[1]);
        assert_eq!(headers, &vec!["row 1"]);
        assert_eq!(data, &vec![vec![4.0, 5.0, 6.0]]);
        assert_eq!(doc.nodes[1].line_start, 1);
    }

    #[test]
    fn test_comments_and_header_inference() {
        let config = ParserConfig::default();
        let text = "# exported by logger\n\"time (s)\",value\n0.0,1\n0.5,NaN\n";
        let doc = parse_with(&DelimitedParser::columns(), &config, text)
            .unwrap()
            .unwrap();

        assert_eq!(
            doc.nodes[0],
            Node::single(0, NodeValue::Comment { value: "exported by logger".into() })
        );
        let (headers, data, _) = scan_data(&doc.nodes[1]);
        assert_eq!(headers, &vec!["time (s)", "value"]);
        assert_eq!(data[0], vec![0.0, 0.5]);
        assert_eq!(data[1][0], 1.0);
        assert!(data[1][1].is_nan());
        assert_eq!((doc.nodes[1].line_start, doc.nodes[1].line_end), (1, 3));
    }

    #[test]
    fn test_commented_header_line() {
        let config = ParserConfig::default();
        let doc = parse_with(&DelimitedParser::columns(), &config, "# x\ty\n1\t2\n")
            .unwrap()
            .unwrap();

        assert_eq!(doc.nodes.len(), 2);
        let (headers, _, _) = scan_data(&doc.nodes[1]);
        assert_eq!(headers, &vec!["x", "y"]);
        assert_eq!(doc.nodes[1].line_start, 1);
    }

    #[test]
    fn test_header_inference_disabled() {
        let config = ParserConfig {
            infer_headers: false,
            ..ParserConfig::default()
        };
        let doc = parse_with(&DelimitedParser::columns(), &config, "a,b\n1,2\n")
            .unwrap()
            .unwrap();

        let (headers, _, _) = scan_data(&doc.nodes[0]);
        assert_eq!(headers, &vec!["column 0", "column 1"]);
    }

    #[test]
    fn test_multiple_blocks() {
        let config = ParserConfig::default();
        let text = "1,2\n3,4\n\n# second\n5 6 7\n";
        let doc = parse_with(&DelimitedParser::columns(), &config, text)
            .unwrap()
            .unwrap();

        assert_eq!(doc.nodes.len(), 3);
        let (_, data, _) = scan_data(&doc.nodes[2]);
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_cell_count_mismatch_is_fatal() {
        let config = ParserConfig::default();
        let err = parse_with(&DelimitedParser::columns(), &config, "1,2,3\n4,5\n").unwrap_err();

        assert!(matches!(
            err,
            ParseError::RowColumnMismatch { line: 1, expected: 3, found: 2 }
        ));
    }

    #[test]
    fn test_spectrum_rows_are_joined() {
        let config = ParserConfig::default();
        let text = "@A 1 2 \\\n3 4\n@A 5 6 7 8\n@A 9\n";
        let doc = parse_with(&DelimitedParser::rows(), &config, text)
            .unwrap()
            .unwrap();

        assert_eq!(doc.nodes.len(), 3);
        assert_eq!((doc.nodes[0].line_start, doc.nodes[0].line_end), (0, 1));
        let (_, data, _) = scan_data(&doc.nodes[0]);
        assert_eq!(data, &vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let (headers, data, _) = scan_data(&doc.nodes[2]);
        assert_eq!(headers, &vec!["row 0"]);
        assert_eq!(data, &vec![vec![9.0]]);
    }

    fn assert_ranges_cover(doc: &ParsedDocument, text: &str) {
        let lines = split_lines(text);
        let mut next_free = 0;
        for node in &doc.nodes {
            assert!(node.line_start <= node.line_end);
            assert!(
                node.line_start >= next_free,
                "node at {} overlaps line {}",
                node.line_start,
                next_free - 1
            );
            next_free = node.line_end + 1;
        }
        for (i, line) in lines.iter().enumerate() {
            let covered = doc
                .nodes
                .iter()
                .any(|n| n.line_start <= i && i <= n.line_end);
            assert_eq!(covered, !is_blank(line), "line {} coverage", i);
        }
    }

    const MIXED: &str = "# run 7\n@A 1 2 \\\n3 4\ntime value\n0 1\n2 3\n\n# next\n5,6\n@A 9\n7,8\n";

    #[test]
    fn test_line_ranges_in_mixed_input() {
        let config = ParserConfig::default();
        for parser in [DelimitedParser::columns(), DelimitedParser::rows()] {
            let doc = parse_with(&parser, &config, MIXED).unwrap().unwrap();
            assert_ranges_cover(&doc, MIXED);
        }

        let doc = parse_with(&DelimitedParser::columns(), &config, MIXED)
            .unwrap()
            .unwrap();
        assert_eq!(doc.nodes.len(), 7);
        let (headers, _, _) = scan_data(&doc.nodes[2]);
        assert_eq!(headers, &vec!["time", "value"]);
        assert_eq!((doc.nodes[2].line_start, doc.nodes[2].line_end), (3, 5));
        let (headers, data, _) = scan_data(&doc.nodes[6]);
        assert_eq!(headers, &vec!["column 0", "column 1"]);
        assert_eq!(data, &vec![vec![7.0], vec![8.0]]);
    }

    #[test]
    fn test_block_after_spectrum_takes_no_headers() {
        let config = ParserConfig::default();
        let text = "@A 9\n1 2\n3 4\n";
        let doc = parse_with(&DelimitedParser::columns(), &config, text)
            .unwrap()
            .unwrap();

        assert_eq!(doc.nodes.len(), 2);
        assert_eq!((doc.nodes[0].line_start, doc.nodes[0].line_end), (0, 0));
        assert_eq!((doc.nodes[1].line_start, doc.nodes[1].line_end), (1, 2));
        let (headers, data, _) = scan_data(&doc.nodes[1]);
        assert_eq!(headers, &vec!["column 0", "column 1"]);
        assert_eq!(data, &vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
        assert_ranges_cover(&doc, text);
    }

    #[test]
    fn test_no_numeric_block_is_absent() {
        let config = ParserConfig::default();
        let result = parse_with(&DelimitedParser::columns(), &config, "# only\nwords here\n");
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_delimiter_detection() {
        assert_eq!(Delimiter::detect("1 , 2"), Delimiter::Comma);
        assert_eq!(Delimiter::detect("1\t2 3"), Delimiter::Tab);
        assert_eq!(Delimiter::detect("  1   2,3"), Delimiter::Whitespace);
        assert_eq!(Delimiter::detect("1"), Delimiter::Whitespace);
    }

    #[test]
    fn test_cancelled_before_start() {
        let config = ParserConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ParseContext::new(&config).with_cancellation(&token);

        assert!(DelimitedParser::columns().parse("1 2\n", &ctx).unwrap().is_none());
    }
}
