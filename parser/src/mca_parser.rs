use crate::base_parser::{ParseContext, Parser};
use crate::lines::{is_blank, split_lines};
use crate::types::{
    DocumentSymbol, FoldingRange, Format, LineRange, Node, NodeValue, ParseError, ParsedDocument,
    SymbolKind,
};
use tracing::{debug, info};

/// Section whose lines hold the spectrum counts.
const DATA_SECTION: &str = "DATA";

/// MCA parser - handles `<<SECTION>>`-delimited analyzer dumps
///
/// Every section gets a folding range and a namespace symbol. `DATA` becomes
/// a one-series `ScanData` node of counts; any other section is kept as an
/// `Unknown` node holding its raw lines.
pub struct McaParser;

impl Parser for McaParser {
    fn format(&self) -> Format {
        Format::Mca
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mca"]
    }

    fn can_parse(&self, sample: &str) -> bool {
        split_lines(sample)
            .into_iter()
            .find(|line| !is_blank(line))
            .is_some_and(|line| section_name(line).is_some())
    }

    fn parse(
        &self,
        text: &str,
        ctx: &ParseContext<'_>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        let lines = split_lines(text);
        info!("Starting MCA parse of {} lines", lines.len());

        let mut doc = ParsedDocument::new(Format::Mca);
        let mut open: Option<Section<'_>> = None;

        for (i, line) in lines.iter().copied().enumerate() {
            if ctx.is_cancelled() {
                info!("MCA parse cancelled");
                return Ok(None);
            }

            let Some(name) = section_name(line) else {
                match open.as_mut() {
                    Some(section) => section.items.push((i, line)),
                    None if !is_blank(line) => {
                        debug!("Line {}: ignoring text outside a section", i + 1)
                    }
                    None => {}
                }
                continue;
            };

            if name.ends_with("END") {
                match open.take() {
                    Some(section) => section.close(i, &mut doc)?,
                    None => debug!("Line {}: '{}' closes no open section", i + 1, name),
                }
            } else {
                if let Some(section) = open.take() {
                    let end = section.last_content_line();
                    section.close(end, &mut doc)?;
                }
                open = Some(Section::new(name, i));
            }
        }

        if let Some(section) = open.take() {
            let end = section.last_content_line();
            section.close(end, &mut doc)?;
        }

        info!(
            "MCA parse complete: {} sections, {} nodes",
            doc.folding_ranges.len(),
            doc.nodes.len()
        );
        Ok(Some(doc))
    }
}

/// Name inside a `<<NAME>>` header line.
fn section_name(line: &str) -> Option<&str> {
    regex!(r"^\s*<<(.+)>>\s*$")
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

struct Section<'a> {
    name: &'a str,
    start: usize,
    items: Vec<(usize, &'a str)>,
}

impl<'a> Section<'a> {
    fn new(name: &'a str, start: usize) -> Self {
        Self {
            name,
            start,
            items: Vec::new(),
        }
    }

    /// Last non-blank line of the section, or its header line.
    fn last_content_line(&self) -> usize {
        self.items
            .iter()
            .rev()
            .find(|(_, text)| !is_blank(text))
            .map_or(self.start, |(line, _)| *line)
    }

    fn close(self, end: usize, doc: &mut ParsedDocument) -> Result<(), ParseError> {
        let items: Vec<(usize, &str)> = self
            .items
            .into_iter()
            .filter(|(line, _)| *line <= end)
            .collect();
        debug!(
            "Lines {}-{}: section '{}' with {} lines",
            self.start + 1,
            end + 1,
            self.name,
            items.len()
        );

        doc.folding_ranges.push(FoldingRange {
            start: self.start,
            end,
        });
        doc.symbols.push(DocumentSymbol {
            name: self.name.to_string(),
            detail: format!("{} lines", items.len()),
            kind: SymbolKind::Namespace,
            range: LineRange::new(self.start, end),
            selection_range: LineRange::new(self.start, self.start),
        });

        let value = if self.name == DATA_SECTION {
            let mut counts = Vec::with_capacity(items.len());
            for (line, text) in items {
                if is_blank(text) {
                    continue;
                }
                let count = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ParseError::InvalidInteger {
                        line,
                        value: text.trim().to_string(),
                    })?;
                counts.push(count as f64);
            }
            let data = if counts.is_empty() {
                Vec::new()
            } else {
                vec![counts]
            };
            NodeValue::ScanData {
                headers: vec!["count".to_string()],
                data,
                x_axis_selectable: false,
            }
        } else {
            NodeValue::Unknown {
                kind: self.name.to_string(),
                value: items
                    .iter()
                    .map(|(_, text)| *text)
                    .collect::<Vec<_>>()
                    .join("\n"),
            }
        };

        doc.nodes.push(Node::new(self.start, end, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::config::ParserConfig;

    const SAMPLE: &str = "<<PMCA SPECTRUM>>
TAG - live_data
GAIN - 20.0
<<DATA>>
0
12
7
<<END>>
<<DP5 CONFIGURATION>>
RESC=Y;
<<DP5 CONFIGURATION END>>
";

    fn parse(text: &str) -> Result<Option<ParsedDocument>, ParseError> {
        let config = ParserConfig::default();
        McaParser.parse(text, &ParseContext::new(&config))
    }

    #[test]
    fn test_sections_become_nodes() {
        let doc = parse(SAMPLE).unwrap().unwrap();

        assert_eq!(doc.nodes.len(), 3);
        assert_eq!(
            doc.nodes[0],
            Node::new(
                0,
                2,
                NodeValue::Unknown {
                    kind: "PMCA SPECTRUM".into(),
                    value: "TAG - live_data\nGAIN - 20.0".into()
                }
            )
        );
        assert_eq!(
            doc.nodes[1],
            Node::new(
                3,
                7,
                NodeValue::ScanData {
                    headers: vec!["count".into()],
                    data: vec![vec![0.0, 12.0, 7.0]],
                    x_axis_selectable: false,
                }
            )
        );
        assert_eq!((doc.nodes[2].line_start, doc.nodes[2].line_end), (8, 10));
    }

    #[test]
    fn test_folding_and_outline() {
        let doc = parse(SAMPLE).unwrap().unwrap();

        assert_eq!(
            doc.folding_ranges,
            vec![
                FoldingRange { start: 0, end: 2 },
                FoldingRange { start: 3, end: 7 },
                FoldingRange { start: 8, end: 10 },
            ]
        );
        assert_eq!(doc.symbols[1].name, "DATA");
        assert_eq!(doc.symbols[1].detail, "3 lines");
        assert_eq!(doc.symbols[1].selection_range, LineRange::new(3, 3));
    }

    #[test]
    fn test_non_integer_count_is_fatal() {
        let err = parse("<<DATA>>\n1\n2.5\n<<END>>\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidInteger { line: 2, .. }));
    }

    #[test]
    fn test_unclosed_section_ends_at_last_content() {
        let doc = parse("<<DATA>>\n4\n5\n\n").unwrap().unwrap();
        assert_eq!((doc.nodes[0].line_start, doc.nodes[0].line_end), (0, 2));
        assert_eq!(doc.folding_ranges, vec![FoldingRange { start: 0, end: 2 }]);
    }

    #[test]
    fn test_empty_data_section() {
        let doc = parse("<<DATA>>\n<<END>>").unwrap().unwrap();
        match &doc.nodes[0].value {
            NodeValue::ScanData { data, headers, .. } => {
                assert!(data.is_empty());
                assert_eq!(headers, &vec!["count".to_string()]);
            }
            other => panic!("expected scan data, got {:?}", other),
        }
    }

    #[test]
    fn test_can_parse() {
        assert!(McaParser.can_parse("\n<<PMCA SPECTRUM>>\n"));
        assert!(!McaParser.can_parse("#F file\n"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let config = ParserConfig::default();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ParseContext::new(&config).with_cancellation(&token);

        assert!(McaParser.parse(SAMPLE, &ctx).unwrap().is_none());
    }
}
