use chrono::{DateTime, Utc};
use scan_parser::{DocumentSymbol, FoldingRange, Format, NodeValue, ParseWarning, ParsedDocument};
use serde::{Deserialize, Serialize};

/// Summary of the latest accepted parse of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub document_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub format: Format,
    pub line_count: usize,
    pub node_count: usize,
    pub scan_count: usize,
    pub data_node_count: usize,
    pub total_rows: usize,
    #[serde(default)]
    pub warnings: Vec<ParseWarning>,
    pub parsed_at: DateTime<Utc>,
    pub generation: u64,
}

impl DocumentMeta {
    pub fn from_document(
        document_id: &str,
        filename: Option<String>,
        line_count: usize,
        doc: &ParsedDocument,
        generation: u64,
    ) -> Self {
        let mut scan_count = 0;
        let mut data_node_count = 0;
        let mut total_rows = 0;

        for node in &doc.nodes {
            match &node.value {
                NodeValue::ScanHead { .. } => scan_count += 1,
                NodeValue::ScanData { data, .. } => {
                    data_node_count += 1;
                    total_rows += data.first().map_or(0, Vec::len);
                }
                NodeValue::File { .. }
                | NodeValue::Date { .. }
                | NodeValue::Comment { .. }
                | NodeValue::NameList { .. }
                | NodeValue::ValueList { .. }
                | NodeValue::Unknown { .. } => {}
            }
        }

        DocumentMeta {
            document_id: document_id.to_string(),
            filename,
            format: doc.format,
            line_count,
            node_count: doc.nodes.len(),
            scan_count,
            data_node_count,
            total_rows,
            warnings: doc.warnings.clone(),
            parsed_at: Utc::now(),
            generation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentResponse {
    pub document_id: String,
    pub meta: DocumentMeta,
}

/// Optional format selection for a parse request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParseQuery {
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineResponse {
    pub folding_ranges: Vec<FoldingRange>,
    pub symbols: Vec<DocumentSymbol>,
}

impl From<ParsedDocument> for OutlineResponse {
    fn from(doc: ParsedDocument) -> Self {
        OutlineResponse {
            folding_ranges: doc.folding_ranges,
            symbols: doc.symbols,
        }
    }
}
