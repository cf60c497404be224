// Parser crate for beamline scan files and their sibling formats
// Each format has its own parser behind the `Parser` trait; the registry picks one

#[macro_use]
mod patterns;

pub mod base_parser;
pub mod cancellation;
pub mod config;
pub mod lines;
pub mod parsers;
pub mod registry_parser;
pub mod table;
pub mod types;

// Individual parser implementations
pub mod delimited_parser;
pub mod mca_parser;
pub mod plot_parser;
pub mod scan_log_parser;

// Re-export main types
pub use base_parser::{detect_format, ParseContext, Parser};
pub use cancellation::CancellationToken;
pub use config::{Association, ParserConfig};
pub use registry_parser::ParserRegistry;
pub use types::*;

// Re-export parsers
pub use delimited_parser::{DelimitedParser, Orientation};
pub use mca_parser::McaParser;
pub use plot_parser::PlotParser;
pub use scan_log_parser::ScanLogParser;
