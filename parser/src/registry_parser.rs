use crate::base_parser::{detect_format, ParseContext, Parser};
use crate::cancellation::CancellationToken;
use crate::config::ParserConfig;
use crate::parsers::all_parsers;
use crate::types::{Format, ParseError, ParsedDocument};
use glob::Pattern;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Bytes of text inspected when sniffing an unknown format.
const SAMPLE_LEN: usize = 4096;

/// ParserRegistry - owns the format parsers and picks one per document
///
/// Parsers come from `parsers::all_parsers()`; see that module to add one.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
    config: ParserConfig,
}

impl ParserRegistry {
    /// Create a registry with every built-in parser and default options.
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    pub fn with_config(config: ParserConfig) -> Self {
        info!("Initializing ParserRegistry");
        let parsers = all_parsers();

        info!(
            "Registered {} parsers: {}",
            parsers.len(),
            parsers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );

        Self { parsers, config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Register a custom parser. It replaces any parser for the same format.
    pub fn register(&mut self, parser: Box<dyn Parser>) {
        info!("Registering custom parser: {}", parser.name());
        debug!("Parser supports extensions: {:?}", parser.extensions());
        self.parsers.retain(|p| p.format() != parser.format());
        self.parsers.push(parser);
    }

    /// Get parser by format
    pub fn get_parser(&self, format: Format) -> Option<&dyn Parser> {
        let result = self
            .parsers
            .iter()
            .find(|p| p.format() == format)
            .map(|p| p.as_ref());

        if result.is_none() {
            warn!("Parser not found: {}", format);
        }
        result
    }

    /// Get parser by file extension
    pub fn get_parser_by_extension(&self, extension: &str) -> Option<&dyn Parser> {
        debug!("Looking up parser by extension: {}", extension);
        let extension = extension.to_ascii_lowercase();
        let result = self
            .parsers
            .iter()
            .find(|p| p.extensions().contains(&extension.as_str()))
            .map(|p| p.as_ref());

        match result {
            Some(parser) => debug!(
                "Selected parser '{}' for extension '.{}'",
                parser.name(),
                extension
            ),
            None => debug!("No parser found for extension '.{}'", extension),
        }
        result
    }

    /// Resolve the format for a file path.
    ///
    /// User associations are tried first (glob patterns, matched against the
    /// file name and the whole path), then built-in extensions.
    pub fn resolve_format(&self, path: &str) -> Option<Format> {
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);

        for association in &self.config.associations {
            let pattern = match Pattern::new(&association.pattern) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!("Ignoring association '{}': {}", association.pattern, e);
                    continue;
                }
            };
            if pattern.matches(file_name) || pattern.matches(path) {
                debug!(
                    "Association '{}' maps '{}' to {}",
                    association.pattern, path, association.format
                );
                return Some(association.format);
            }
        }

        let extension = Path::new(path).extension().and_then(|e| e.to_str())?;
        self.get_parser_by_extension(extension).map(|p| p.format())
    }

    /// Parse text in a known format.
    pub fn parse(
        &self,
        text: &str,
        format: Format,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        let parser = self
            .get_parser(format)
            .ok_or_else(|| ParseError::UnknownFormat(format.to_string()))?;

        let mut ctx = ParseContext::new(&self.config);
        if let Some(token) = cancellation {
            ctx = ctx.with_cancellation(token);
        }

        match parser.parse(text, &ctx) {
            Ok(result) => {
                if result.is_none() {
                    debug!("{} parse produced no document", format);
                }
                Ok(result)
            }
            Err(e) => {
                error!("{} parse failed: {}", format, e);
                Err(e)
            }
        }
    }

    /// Sniff the format from the text and parse it.
    pub fn parse_auto(
        &self,
        text: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        info!("Starting auto-detection of file format");
        let sample = sample_of(text);

        let format = match detect_format(sample) {
            Some(format) => {
                info!("Format hint from content analysis: {}", format);
                Some(format)
            }
            None => {
                warn!("Format unknown, trying parsers individually");
                self.parsers
                    .iter()
                    .find(|p| {
                        let can_parse = p.can_parse(sample);
                        debug!("Parser '{}' can_parse result: {}", p.name(), can_parse);
                        can_parse
                    })
                    .map(|p| p.format())
            }
        };

        match format {
            Some(format) => self.parse(text, format, cancellation),
            None => {
                error!("Unable to detect format - no suitable parser found");
                Err(ParseError::UnknownFormat(
                    "unable to detect format".to_string(),
                ))
            }
        }
    }

    /// Parse with a file name hint, falling back to content sniffing.
    pub fn parse_with_hint(
        &self,
        text: &str,
        filename: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        info!("Parsing file with hint: {}", filename);

        match self.resolve_format(filename) {
            Some(format) => {
                info!("Using parser '{}' for file '{}'", format, filename);
                self.parse(text, format, cancellation)
            }
            None => {
                warn!(
                    "No association for '{}', falling back to auto-detection",
                    filename
                );
                self.parse_auto(text, cancellation)
            }
        }
    }

    /// Read UTF-8 text from `reader` and parse it with a file name hint.
    pub fn parse_reader(
        &self,
        mut reader: Box<dyn Read>,
        filename: &str,
    ) -> Result<Option<ParsedDocument>, ParseError> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        debug!("Read {} bytes from '{}'", buffer.len(), filename);

        let text = String::from_utf8(buffer)?;
        self.parse_with_hint(&text, filename, None)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Leading slice of `text`, cut on a character boundary.
fn sample_of(text: &str) -> &str {
    if text.len() <= SAMPLE_LEN {
        return text;
    }
    let mut end = SAMPLE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Association;
    use crate::types::NodeValue;
    use std::io::Cursor;

    const SCAN_LOG: &str = "#F run.spec\n\n#S 1 ascan th 0 1 1 1\n#L th  det\n0 1\n1 4\n";

    #[test]
    fn test_resolve_by_extension() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.resolve_format("/data/run.spec"), Some(Format::ScanLog));
        assert_eq!(registry.resolve_format("table.CSV"), Some(Format::CsvColumns));
        assert_eq!(registry.resolve_format("spectrum.mca"), Some(Format::Mca));
        assert_eq!(registry.resolve_format("notes"), None);
    }

    #[test]
    fn test_user_associations_win() {
        let config = ParserConfig {
            associations: vec![
                Association {
                    pattern: "[".to_string(),
                    format: Format::Plot,
                },
                Association {
                    pattern: "*.csv".to_string(),
                    format: Format::CsvRows,
                },
                Association {
                    pattern: "*/beamline/*.txt".to_string(),
                    format: Format::ScanLog,
                },
            ],
            ..ParserConfig::default()
        };
        let registry = ParserRegistry::with_config(config);

        assert_eq!(registry.resolve_format("/tmp/a.csv"), Some(Format::CsvRows));
        assert_eq!(
            registry.resolve_format("/home/me/beamline/run.txt"),
            Some(Format::ScanLog)
        );
        assert_eq!(registry.resolve_format("/home/me/run.txt"), None);
    }

    #[test]
    fn test_parse_with_hint() {
        let registry = ParserRegistry::new();
        let doc = registry
            .parse_with_hint(SCAN_LOG, "run.spec", None)
            .unwrap()
            .unwrap();

        assert_eq!(doc.format, Format::ScanLog);
        assert!(matches!(doc.nodes[0].value, NodeValue::File { .. }));
    }

    #[test]
    fn test_parse_auto_detects_scan_log() {
        let registry = ParserRegistry::new();
        let doc = registry.parse_auto(SCAN_LOG, None).unwrap().unwrap();
        assert_eq!(doc.format, Format::ScanLog);
    }

    #[test]
    fn test_parse_auto_falls_back_to_can_parse() {
        let registry = ParserRegistry::new();
        let text = "title\nx\ny\n2\n1 2\n3 4\n";
        let doc = registry.parse_auto(text, None).unwrap().unwrap();
        assert_eq!(doc.format, Format::Plot);
    }

    #[test]
    fn test_parse_auto_unknown() {
        let registry = ParserRegistry::new();
        let err = registry.parse_auto("just prose", None).unwrap_err();
        assert!(matches!(err, ParseError::UnknownFormat(_)));
    }

    #[test]
    fn test_parse_reader() {
        let registry = ParserRegistry::new();
        let cursor = Cursor::new("0,1\n1,4\n");
        let doc = registry
            .parse_reader(Box::new(cursor), "points.csv")
            .unwrap()
            .unwrap();
        assert_eq!(doc.format, Format::CsvColumns);
    }

    #[test]
    fn test_parse_reader_rejects_invalid_utf8() {
        let registry = ParserRegistry::new();
        let cursor = Cursor::new(vec![0xff, 0xfe, b'1']);
        let err = registry.parse_reader(Box::new(cursor), "points.csv").unwrap_err();
        assert!(matches!(err, ParseError::Encoding(_)));
    }

    #[test]
    fn test_pre_cancelled_parse_is_silent() {
        let registry = ParserRegistry::new();
        let token = CancellationToken::new();
        token.cancel();

        for format in Format::ALL {
            let result = registry.parse(SCAN_LOG, format, Some(&token)).unwrap();
            assert!(result.is_none(), "{}", format);
        }
    }

    #[test]
    fn test_custom_parser_replaces_builtin() {
        struct EmptyMca;
        impl Parser for EmptyMca {
            fn format(&self) -> Format {
                Format::Mca
            }
            fn extensions(&self) -> &'static [&'static str] {
                &["mca"]
            }
            fn can_parse(&self, _sample: &str) -> bool {
                false
            }
            fn parse(
                &self,
                _text: &str,
                _ctx: &ParseContext<'_>,
            ) -> Result<Option<ParsedDocument>, ParseError> {
                Ok(Some(ParsedDocument::new(Format::Mca)))
            }
        }

        let mut registry = ParserRegistry::new();
        registry.register(Box::new(EmptyMca));
        let doc = registry.parse("<<DATA>>\n1\n", Format::Mca, None).unwrap().unwrap();
        assert!(doc.nodes.is_empty());
    }
}
