//! The read-only document store used for retrieval.
//!
//! Documents come from `[[documents]]` in the config, from a JSON file named
//! by `documents_path`, or from a small built-in set when neither is given.
//! The store is built once at startup and shared by reference; request
//! handling never mutates it.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::Config;
use crate::models::Document;

/// Immutable, cheaply clonable collection of documents in load order.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    documents: Arc<[Document]>,
}

impl DocumentStore {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
        }
    }

    /// The sample set served when nothing is configured.
    pub fn builtin() -> Self {
        Self::new(vec![
            Document::new(
                "returns",
                "Our return policy allows returns within 30 days of purchase with the original receipt. Refunds are issued to the original payment method.",
            ),
            Document::new(
                "shipping",
                "Standard shipping takes 3 to 5 business days. Express shipping delivers within 1 business day in Delhi, Mumbai and Bangalore.",
            ),
            Document::new(
                "support",
                "Customer support is available Monday to Friday, 9am to 6pm IST, over chat and email.",
            ),
            Document::new(
                "assistant",
                "AiBot answers questions about orders, shipping and returns, and can look up the current weather in Celsius or Fahrenheit.",
            ),
        ])
    }

    /// Build the store described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let documents = if let Some(path) = &config.documents_path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
            serde_json::from_str::<Vec<Document>>(&content)
                .with_context(|| format!("Failed to parse documents file: {}", path.display()))?
        } else if !config.documents.is_empty() {
            config.documents.clone()
        } else {
            return Ok(Self::builtin());
        };

        validate(&documents)?;
        Ok(Self::new(documents))
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn validate(documents: &[Document]) -> Result<()> {
    let mut seen = HashSet::new();
    for doc in documents {
        if doc.id.trim().is_empty() {
            anyhow::bail!("document id must not be empty");
        }
        if doc.text.trim().is_empty() {
            anyhow::bail!("document '{}' has empty text", doc.id);
        }
        if !seen.insert(doc.id.as_str()) {
            anyhow::bail!("duplicate document id: {}", doc.id);
        }
    }
    Ok(())
}

/// CLI entry point for `aibot docs`.
pub fn list_documents(config: &Config) -> Result<()> {
    let store = DocumentStore::from_config(config)?;

    if store.is_empty() {
        println!("No documents loaded.");
        return Ok(());
    }

    println!("{} documents:", store.len());
    for doc in store.documents() {
        println!("  {:<16} {}", doc.id, doc.text);
    }
    Ok(())
}
