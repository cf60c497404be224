use crate::types::Format;
use serde::{Deserialize, Serialize};

/// Options handed to every parse.
///
/// Nothing here is looked up ambiently: callers build one value (usually by
/// deserializing their settings) and pass it down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParserConfig {
    /// Use the line preceding a delimited block as column headers when its
    /// cell count matches.
    pub infer_headers: bool,
    /// Line prefix marking comments in delimited tables.
    pub comment_prefix: String,
    /// User-defined file name associations, checked before built-in extensions.
    pub associations: Vec<Association>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            infer_headers: true,
            comment_prefix: "#".to_string(),
            associations: Vec::new(),
        }
    }
}

/// Glob pattern (`*.dat`, `**/beamline/*.txt`) mapped to a format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub pattern: String,
    pub format: Format,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: ParserConfig =
            serde_json::from_str(r#"{"associations":[{"pattern":"*.dat","format":"scan-log"}]}"#)
                .unwrap();

        assert!(config.infer_headers);
        assert_eq!(config.comment_prefix, "#");
        assert_eq!(config.associations.len(), 1);
        assert_eq!(config.associations[0].format, Format::ScanLog);
    }
}
