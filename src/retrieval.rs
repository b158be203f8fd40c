//! Best-match document retrieval.
//!
//! Two interchangeable strategies pick the single most relevant document for
//! a query:
//!
//! | Strategy | Score |
//! |----------|-------|
//! | `keyword` | number of distinct query words found as substrings of the document |
//! | `embedding` | cosine similarity between query and document embeddings |
//!
//! Both scan every document in order. The highest score wins and ties go to
//! the earliest document, so results are deterministic for a fixed store.
//! `None` is returned only when there are no documents at all.

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::{Config, RetrievalStrategy};
use crate::documents::DocumentStore;
use crate::embedding::{cosine_similarity, Embedder, OpenAIEmbedder};
use crate::error::ProviderError;
use crate::models::Document;

/// Split `query` on non-word characters into distinct lowercase words.
///
/// Word characters are Unicode letters, digits, and `_`.
pub fn query_words(query: &str) -> BTreeSet<String> {
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Count how many of `words` occur in `text`, case-insensitively.
pub fn keyword_score(words: &BTreeSet<String>, text: &str) -> usize {
    let haystack = text.to_lowercase();
    words.iter().filter(|w| haystack.contains(w.as_str())).count()
}

/// Lexical best match.
pub fn best_keyword_match<'a>(query: &str, documents: &'a [Document]) -> Option<&'a Document> {
    let words = query_words(query);
    first_best(
        documents
            .iter()
            .map(|doc| (keyword_score(&words, &doc.text), doc)),
    )
}

/// Embedding best match.
///
/// Embeds the query, then each document in turn (one upstream call per
/// document per query, nothing cached).
pub async fn best_embedding_match<'a>(
    query: &str,
    documents: &'a [Document],
    embedder: &dyn Embedder,
) -> Result<Option<&'a Document>, ProviderError> {
    if documents.is_empty() {
        return Ok(None);
    }

    let query_vec = embedder.embed(query).await?;

    let mut scored = Vec::with_capacity(documents.len());
    for doc in documents {
        let doc_vec = embedder.embed(&doc.text).await?;
        let score = cosine_similarity(&query_vec, &doc_vec);
        debug!(model = %embedder.model_name(), document = %doc.id, score, "scored document");
        scored.push((score, doc));
    }

    Ok(first_best(scored))
}

/// Dispatch to the configured strategy.
pub async fn best_match<'a>(
    strategy: RetrievalStrategy,
    query: &str,
    documents: &'a [Document],
    embedder: &dyn Embedder,
) -> Result<Option<&'a Document>, ProviderError> {
    match strategy {
        RetrievalStrategy::Keyword => Ok(best_keyword_match(query, documents)),
        RetrievalStrategy::Embedding => best_embedding_match(query, documents, embedder).await,
    }
}

/// Highest score wins; an equal score never displaces an earlier document.
fn first_best<'a, S: PartialOrd>(
    scored: impl IntoIterator<Item = (S, &'a Document)>,
) -> Option<&'a Document> {
    let mut best: Option<(S, &'a Document)> = None;
    for (score, doc) in scored {
        let better = match &best {
            None => true,
            Some((top, _)) => score.partial_cmp(top) == Some(Ordering::Greater),
        };
        if better {
            best = Some((score, doc));
        }
    }
    best.map(|(_, doc)| doc)
}

/// CLI entry point for `aibot match`.
pub async fn run_match(
    config: &Config,
    query: &str,
    strategy: Option<RetrievalStrategy>,
) -> Result<()> {
    let store = DocumentStore::from_config(config)?;
    let strategy = strategy.unwrap_or(config.retrieval.strategy);
    let embedder = OpenAIEmbedder::new(&config.embedding)?;

    match best_match(strategy, query, store.documents(), &embedder).await? {
        Some(doc) => {
            println!("{}", doc.id);
            println!("{}", doc.text);
        }
        None => println!("No match."),
    }
    Ok(())
}
