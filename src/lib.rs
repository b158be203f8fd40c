//! # AiBot
//!
//! A small chat relay: it takes a user question over HTTP, asks a hosted
//! language model for an answer, and streams the answer back as plain text.
//!
//! Two flows are available. The `tools` flow sends the question with a
//! system prompt and a weather tool the model may call. The `rag` flow picks
//! the single best-matching document (by keyword overlap or embedding
//! similarity) and asks the model to answer from it alone.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  POST /api/chat  ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │  Client  │─────────────────▶│  Server  │──▶│  Pipeline  │──▶│  Generator   │
//! │ (chat)   │◀─ text stream ───│  (axum)  │   │ tools|rag  │   │ + tool loop  │
//! └──────────┘                  └──────────┘   └─────┬──────┘   └──────┬───────┘
//!                                                    ▼                 ▼
//!                                             ┌────────────┐    ┌────────────┐
//!                                             │ Retrieval  │    │ ChatModel  │
//!                                             │ + Embedder │    │ (provider) │
//!                                             └────────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export MISTRAL_API_KEY=...
//! aibot serve                                   # start the HTTP server
//! curl -N localhost:3000/api/chat -d '{"question":"weather in Delhi in C?"}'
//! aibot chat                                    # terminal chat against it
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error types |
//! | [`documents`] | Read-only document store |
//! | [`embedding`] | Embedding client and cosine similarity |
//! | [`retrieval`] | Keyword and embedding best match |
//! | [`provider`] | Chat model client (buffered and SSE streaming) |
//! | [`tools`] | Tool trait, registry, and the weather tool |
//! | [`generator`] | Bounded tool-calling step loop |
//! | [`pipeline`] | The `tools` and `rag` flows |
//! | [`server`] | HTTP server |
//! | [`transcript`] | Chat transcript reducer |
//! | [`client`] | Streaming chat client |

pub mod client;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod retrieval;
pub mod server;
pub mod tools;
pub mod transcript;
