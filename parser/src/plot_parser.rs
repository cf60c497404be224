use crate::base_parser::{ParseContext, Parser};
use crate::lines::{is_blank, parse_number, split_lines};
use crate::table::{fit_headers, RowBuffer};
use crate::types::{Format, Node, NodeValue, ParseError, ParseWarning, ParsedDocument};
use tracing::{debug, info, warn};

/// Title, two axis-label lines, the count line and at least one more.
const MIN_LINES: usize = 6;
const COUNT_LINE: usize = 3;

/// Plot parser - handles the fixed four-line-header plot format
pub struct PlotParser;

impl Parser for PlotParser {
    fn format(&self) -> Format {
        Format::Plot
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["chi"]
    }

    fn can_parse(&self, sample: &str) -> bool {
        let lines = split_lines(sample);
        lines.len() >= MIN_LINES
            && parse_count_line(lines[COUNT_LINE]).is_some_and(|(rows, _)| rows > 0)
    }

    fn parse(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        if ctx.is_cancelled() {
            info!("Plot parse cancelled");
            return Ok(None);
        }

        let lines = split_lines(text);
        if lines.len() < MIN_LINES {
            debug!("Plot file has only {} lines, nothing to parse", lines.len());
            return Ok(None);
        }
        info!("Starting plot parse of {} lines", lines.len());

        let mut doc = ParsedDocument::new(Format::Plot);
        let title = lines[0].trim();

        let headers: Vec<String> = lines[1..COUNT_LINE]
            .iter()
            .flat_map(|line| split_labels(line))
            .collect();

        let (rows, declared_columns) = match parse_count_line(lines[COUNT_LINE]) {
            Some((rows, columns)) if rows > 0 => (rows, columns),
            _ => {
                return Err(ParseError::InvalidRowCount {
                    line: COUNT_LINE,
                    value: lines[COUNT_LINE].trim().to_string(),
                })
            }
        };

        let mut buffer: Option<RowBuffer> = None;
        let mut last_line = COUNT_LINE;
        for (j, line) in lines.iter().enumerate().skip(COUNT_LINE + 1) {
            if is_blank(line) {
                break;
            }
            let row: Vec<f64> = regex!(r"\s*,\s*|\s+")
                .split(line.trim())
                .map(parse_number)
                .collect();
            buffer
                .get_or_insert_with(|| RowBuffer::new(row.len()))
                .push(j, row)?;
            last_line = j;
        }

        let buffer = match buffer {
            Some(buffer) if buffer.len() == rows => buffer,
            other => {
                return Err(ParseError::RowCountMismatch {
                    declared: rows,
                    found: other.map_or(0, |b| b.len()),
                })
            }
        };

        let width = buffer.width();
        if let Some(columns) = declared_columns.filter(|&c| c != width) {
            let message = format!("{} columns declared but rows have {}", columns, width);
            warn!("Line {}: {}", COUNT_LINE + 1, message);
            doc.warnings.push(ParseWarning {
                line: COUNT_LINE,
                message,
            });
        }

        doc.nodes.push(Node::single(
            0,
            NodeValue::File {
                value: title.to_string(),
            },
        ));
        doc.nodes.push(Node::new(
            1,
            last_line,
            NodeValue::ScanData {
                headers: fit_headers(headers, width, |i| format!("[{}]", i)),
                data: buffer.into_columns(),
                x_axis_selectable: true,
            },
        ));

        info!("Plot parse complete: {} rows, {} columns", rows, width);
        Ok(Some(doc))
    }
}

/// Axis labels separated by commas or runs of two or more spaces.
fn split_labels(line: &str) -> Vec<String> {
    regex!(r"\s*,\s*|\s{2,}")
        .split(line.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `<rows>[ ,]<columns>?`; `None` when the row count is not an integer.
fn parse_count_line(line: &str) -> Option<(usize, Option<usize>)> {
    let caps = regex!(r"^\s*([^\s,]+)(?:[\s,]+([^\s,]+))?").captures(line)?;
    let rows = caps[1].parse::<usize>().ok()?;
    let columns = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
    Some((rows, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::config::ParserConfig;

    fn parse(text: &str) -> Result<Option<ParsedDocument>, ParseError> {
        let config = ParserConfig::default();
        PlotParser.parse(text, &ParseContext::new(&config))
    }

    #[test]
    fn test_parse_plot() {
        let text = "Diffraction pattern\n2-Theta Angle (Degrees)\nIntensity\n3\n10.0, 5\n10.5, 7\n11.0, 6\n";
        let doc = parse(text).unwrap().unwrap();

        assert_eq!(doc.format, Format::Plot);
        assert_eq!(
            doc.nodes[0],
            Node::single(0, NodeValue::File { value: "Diffraction pattern".into() })
        );
        assert_eq!(
            doc.nodes[1],
            Node::new(
                1,
                6,
                NodeValue::ScanData {
                    headers: vec!["2-Theta Angle (Degrees)".into(), "Intensity".into()],
                    data: vec![vec![10.0, 10.5, 11.0], vec![5.0, 7.0, 6.0]],
                    x_axis_selectable: true,
                }
            )
        );
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn test_headers_padded_to_column_count() {
        let text = "title\nx\n\n2 3\n1 2 3\n4 5 6\n";
        let doc = parse(text).unwrap().unwrap();

        match &doc.nodes[1].value {
            NodeValue::ScanData { headers, .. } => {
                assert_eq!(headers, &vec!["x", "[1]", "[2]"]);
            }
            other => panic!("expected scan data, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_columns_mismatch_warns() {
        let doc = parse("t\nx\ny\n1, 3\n1, 2\n").unwrap().unwrap();
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].line, 3);
    }

    #[test]
    fn test_too_few_lines_is_absent() {
        assert!(parse("title\nx\ny\n2\n1 2").unwrap().is_none());
    }

    #[test]
    fn test_declared_row_count_unmet() {
        let err = parse("title\nx\ny\n2\n1 2\n").unwrap_err();
        assert!(matches!(err, ParseError::RowCountMismatch { declared: 2, found: 1 }));
    }

    #[test]
    fn test_invalid_row_count() {
        let err = parse("title\nx\ny\nmany\n1 2\n3 4\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidRowCount { line: 3, .. }));

        let err = parse("title\nx\ny\n0\n1 2\n3 4\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidRowCount { line: 3, .. }));
    }

    #[test]
    fn test_ragged_rows_are_fatal() {
        let err = parse("title\nx\ny\n2\n1 2\n3\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::RowColumnMismatch { line: 5, expected: 2, found: 1 }
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let config = ParserConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ParseContext::new(&config).with_cancellation(&token);

        assert!(PlotParser.parse("t\nx\ny\n1\n1 2\n", &ctx).unwrap().is_none());
    }
}
