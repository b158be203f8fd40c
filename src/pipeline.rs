//! The question-answering flows behind `POST /api/chat` and `aibot ask`.
//!
//! | Pipeline | Model input | Tools | Steps |
//! |----------|-------------|-------|-------|
//! | `tools` | system prompt + raw question | attached | `max_steps` |
//! | `rag` | [`rag_prompt`] built from the best-matching document | none | 1 |
//!
//! Retrieval always finishes before generation starts, so a retrieval
//! failure surfaces before the first byte of a streamed answer.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{Config, Pipeline, RetrievalStrategy};
use crate::documents::DocumentStore;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::ProviderError;
use crate::generator::{AnswerGenerator, GenerateOptions, Prompt, TextStream};
use crate::models::{ChatAnswer, Document};
use crate::provider::OpenAIChatModel;
use crate::retrieval::best_match;
use crate::tools::ToolRegistry;

/// Returned by [`ChatPipeline::rag_answer`] when anything goes wrong.
pub const RAG_FAILURE_ANSWER: &str = "Sorry, I couldn't fetch an answer.";

/// Compose the context-grounded prompt.
pub fn rag_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an assistant. Answer the question using ONLY the following context.\n\nContext:\n{}\n\nQuestion: {}\nAnswer:",
        context, question
    )
}

pub struct ChatPipeline {
    pipeline: Pipeline,
    strategy: RetrievalStrategy,
    fallback_context: String,
    system_prompt: String,
    max_steps: usize,
    store: DocumentStore,
    generator: AnswerGenerator,
    embedder: Arc<dyn Embedder>,
}

impl ChatPipeline {
    pub fn new(
        config: &Config,
        store: DocumentStore,
        generator: AnswerGenerator,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            pipeline: config.server.pipeline,
            strategy: config.retrieval.strategy,
            fallback_context: config.retrieval.fallback_context.clone(),
            system_prompt: config.generation.system_prompt.clone(),
            max_steps: config.generation.max_steps,
            store,
            generator,
            embedder,
        }
    }

    /// Wire up the HTTP-backed model, embedder, built-in tools and documents.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = DocumentStore::from_config(config)?;
        let model = OpenAIChatModel::new(&config.generation)?;
        let embedder = OpenAIEmbedder::new(&config.embedding)?;
        let generator =
            AnswerGenerator::new(Arc::new(model), Arc::new(ToolRegistry::with_builtins()));

        info!(
            pipeline = ?config.server.pipeline,
            model = %config.generation.model,
            documents = store.len(),
            "chat pipeline ready"
        );
        Ok(Self::new(config, store, generator, Arc::new(embedder)))
    }

    /// Best-matching document for `question`, by the configured strategy.
    pub async fn retrieve(&self, question: &str) -> Result<Option<Document>, ProviderError> {
        let found = best_match(
            self.strategy,
            question,
            self.store.documents(),
            self.embedder.as_ref(),
        )
        .await?;
        Ok(found.cloned())
    }

    /// Text of the best match, or the fallback context.
    pub async fn context_for(&self, question: &str) -> Result<String, ProviderError> {
        Ok(match self.retrieve(question).await? {
            Some(doc) => {
                debug!(document = %doc.id, "retrieved context");
                doc.text
            }
            None => {
                debug!("no document matched, using fallback context");
                self.fallback_context.clone()
            }
        })
    }

    async fn prepare(&self, question: &str) -> Result<(Prompt, GenerateOptions), ProviderError> {
        match self.pipeline {
            Pipeline::Tools => Ok((
                Prompt::from(question),
                GenerateOptions {
                    system: Some(self.system_prompt.clone()),
                    use_tools: true,
                    max_steps: self.max_steps,
                },
            )),
            Pipeline::Rag => {
                let context = self.context_for(question).await?;
                Ok((
                    Prompt::Text(rag_prompt(&context, question)),
                    GenerateOptions {
                        system: None,
                        use_tools: false,
                        max_steps: 1,
                    },
                ))
            }
        }
    }

    /// Buffered answer.
    pub async fn answer(&self, question: &str) -> Result<String, ProviderError> {
        let (prompt, options) = self.prepare(question).await?;
        self.generator.generate(prompt, &options).await
    }

    /// Streamed answer. Retrieval (if any) has already run when this returns.
    pub async fn answer_stream(&self, question: &str) -> Result<TextStream, ProviderError> {
        let (prompt, options) = self.prepare(question).await?;
        Ok(self.generator.stream(prompt, options))
    }

    /// Buffered RAG answer that never fails.
    pub async fn rag_answer(&self, question: &str) -> String {
        let result = async {
            let context = self.context_for(question).await?;
            let options = GenerateOptions {
                system: None,
                use_tools: false,
                max_steps: 1,
            };
            self.generator
                .generate(Prompt::Text(rag_prompt(&context, question)), &options)
                .await
        }
        .await;

        match result {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "RAG answer failed");
                RAG_FAILURE_ANSWER.to_string()
            }
        }
    }
}

/// CLI entry point for `aibot ask`.
pub async fn run_ask(config: &Config, question: &str, json: bool) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        anyhow::bail!("question must not be empty");
    }

    let pipeline = ChatPipeline::from_config(config)?;

    if json {
        let answer = match config.server.pipeline {
            Pipeline::Rag => pipeline.rag_answer(question).await,
            Pipeline::Tools => pipeline.answer(question).await?,
        };
        println!("{}", serde_json::to_string_pretty(&ChatAnswer { answer })?);
        return Ok(());
    }

    let mut stream = pipeline.answer_stream(question).await?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = stream.next().await {
        write!(stdout, "{}", fragment?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}
