use crate::models::DocumentMeta;
use scan_parser::ParsedDocument;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// On-disk store of accepted parse results, one directory per document.
pub struct DocumentStorage {
    base_path: PathBuf,
}

impl DocumentStorage {
    pub fn new(base_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn create_document(&self) -> std::io::Result<String> {
        let document_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.document_path(&document_id))?;
        Ok(document_id)
    }

    pub fn document_path(&self, document_id: &str) -> PathBuf {
        self.base_path.join(document_id)
    }

    /// Ids are generated by `create_document`; anything else is rejected so a
    /// request path cannot escape the base directory.
    pub fn exists(&self, document_id: &str) -> bool {
        Uuid::parse_str(document_id).is_ok() && self.document_path(document_id).is_dir()
    }

    pub fn delete_document(&self, document_id: &str) -> std::io::Result<()> {
        if !self.exists(document_id) {
            return Ok(());
        }
        fs::remove_dir_all(self.document_path(document_id))
    }

    pub fn write_meta(
        &self,
        document_id: &str,
        meta: &DocumentMeta,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let meta_path = self.document_path(document_id).join("meta.json");
        let json = serde_json::to_string_pretty(meta)?;
        let mut file = fs::File::create(meta_path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn read_meta(&self, document_id: &str) -> Result<DocumentMeta, Box<dyn std::error::Error>> {
        if !self.exists(document_id) {
            return Err(format!("Unknown document: {}", document_id).into());
        }
        let meta_path = self.document_path(document_id).join("meta.json");
        let json = fs::read_to_string(meta_path)?;
        let meta = serde_json::from_str(&json)?;
        Ok(meta)
    }

    /// Persist the parsed document as MessagePack (NaN cells survive, unlike JSON).
    pub fn write_document(
        &self,
        document_id: &str,
        doc: &ParsedDocument,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = self.document_path(document_id).join("document.mp");
        let msgpack = rmp_serde::to_vec_named(doc)?;
        fs::write(path, msgpack)?;
        Ok(())
    }

    pub fn read_document(
        &self,
        document_id: &str,
    ) -> Result<ParsedDocument, Box<dyn std::error::Error>> {
        if !self.exists(document_id) {
            return Err(format!("Unknown document: {}", document_id).into());
        }
        let path = self.document_path(document_id).join("document.mp");
        let msgpack = fs::read(path)?;
        let doc = rmp_serde::from_slice(&msgpack)?;
        Ok(doc)
    }

    /// Write both the document and its meta.
    pub fn store(
        &self,
        document_id: &str,
        meta: &DocumentMeta,
        doc: &ParsedDocument,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.write_document(document_id, doc)?;
        self.write_meta(document_id, meta)?;
        Ok(())
    }
}
