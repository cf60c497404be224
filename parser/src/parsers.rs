//! Central parser registration module
//!
//! Every format parser is listed once in `all_parsers()`. To add a format:
//! 1. Create the parser file (e.g., `xy_parser.rs`) implementing `Parser`
//! 2. Export it in lib.rs
//! 3. Add it to the `register_parsers!` list below

/// Box a list of parsers as trait objects.
///
/// Usage:
/// ```rust,ignore
/// let parsers = register_parsers![ScanLogParser, McaParser];
/// ```
#[macro_export]
macro_rules! register_parsers {
    ($($parser:expr),* $(,)?) => {
        vec![
            $(Box::new($parser) as Box<dyn $crate::base_parser::Parser>),*
        ]
    };
}

use crate::base_parser::Parser;
use crate::{DelimitedParser, McaParser, PlotParser, ScanLogParser};
use tracing::info;

/// Returns one parser per supported format.
///
/// Order matters for content sniffing: stricter formats come first.
pub fn all_parsers() -> Vec<Box<dyn Parser>> {
    info!("Initializing parser collection");

    register_parsers![
        ScanLogParser,
        McaParser,
        PlotParser,
        DelimitedParser::columns(),
        DelimitedParser::rows(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Format;

    #[test]
    fn test_every_format_has_a_parser() {
        let parsers = all_parsers();
        for format in Format::ALL {
            assert_eq!(
                parsers.iter().filter(|p| p.format() == format).count(),
                1,
                "{}",
                format
            );
        }
    }
}
