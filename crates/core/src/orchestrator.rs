use crate::embeddings::Embedder;
use crate::error::ModelError;
use crate::llm::{LanguageModel, Prompt};
use crate::models::ScoredPoint;
use crate::traits::VectorStore;
use crate::IngestError;
use serde_json::Value;
use tracing::debug;

const SYSTEM_TEMPLATE: &str = "You are a helpful assistant. Use the following pieces of context to answer the user's question. If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\nContext:\n";

/// Answers questions from the populated collection: retrieve, format, complete.
pub struct QueryResponder<'a, S: ?Sized, E: ?Sized, L: ?Sized> {
    store: &'a S,
    embedder: &'a E,
    model: &'a L,
    collection: String,
    content_key: String,
    top_k: usize,
}

impl<'a, S, E, L> QueryResponder<'a, S, E, L>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
    L: LanguageModel + ?Sized,
{
    pub fn new(
        store: &'a S,
        embedder: &'a E,
        model: &'a L,
        collection: impl Into<String>,
        content_key: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            model,
            collection: collection.into(),
            content_key: content_key.into(),
            top_k: top_k.max(1),
        }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredPoint>, IngestError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self
            .store
            .search(&self.collection, &query_vector, self.top_k)
            .await?;
        debug!(hits = hits.len(), collection = %self.collection, "retrieved context");
        Ok(hits)
    }

    pub async fn answer(&self, question: &str) -> Result<String, IngestError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ModelError::InvalidRequest("question is empty".to_string()).into());
        }

        let hits = self.retrieve(question).await?;
        let prompt = build_prompt(&format_context(&hits, &self.content_key), question);
        Ok(self.model.complete(&prompt).await?)
    }
}

/// Joins the retrieved chunk texts, in retrieval order, with blank lines.
pub fn format_context(hits: &[ScoredPoint], content_key: &str) -> String {
    hits.iter()
        .filter_map(|hit| hit.payload.get(content_key).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(context: &str, question: &str) -> Prompt {
    Prompt {
        system: format!("{SYSTEM_TEMPLATE}{context}"),
        user: question.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::TrigramEmbedder;
    use crate::ingest::ingest;
    use crate::models::{Chunk, PageMetadata};
    use crate::stores::LocalStore;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<Prompt>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            Ok("Growth is projected at 3.2 percent.".to_string())
        }
    }

    fn hit(text: &str) -> ScoredPoint {
        let mut payload = Map::new();
        payload.insert("page_content".to_string(), json!(text));
        ScoredPoint {
            id: text.to_string(),
            score: 1.0,
            payload,
        }
    }

    #[test]
    fn context_keeps_retrieval_order() {
        let hits = vec![hit("second best"), hit("third"), ScoredPoint { payload: Map::new(), ..hit("x") }];
        assert_eq!(format_context(&hits, "page_content"), "second best\n\nthird");
    }

    #[test]
    fn prompt_embeds_context_in_system_message() {
        let prompt = build_prompt("ctx", "What is the outlook?");
        assert!(prompt.system.starts_with("You are a helpful assistant."));
        assert!(prompt.system.ends_with("\n\nContext:\nctx"));
        assert_eq!(prompt.user, "What is the outlook?");
    }

    #[tokio::test]
    async fn answer_forwards_retrieved_context_and_question() {
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder::default();
        let metadata = PageMetadata {
            page: 1,
            source: "docs/weo.pdf".to_string(),
            tables: Vec::new(),
            images: Vec::new(),
            parsing_error: None,
        };
        let chunks = vec![
            Chunk {
                text: "Global growth is projected at 3.2 percent".to_string(),
                metadata: metadata.clone(),
            },
            Chunk {
                text: "Oil prices fell sharply".to_string(),
                metadata,
            },
        ];
        ingest(&store, "docs", &chunks, &embedder, "page_content")
            .await
            .unwrap();

        let model = RecordingModel::default();
        let responder = QueryResponder::new(&store, &embedder, &model, "docs", "page_content", 1);

        let answer = responder.answer("  global growth projected?  ").await.unwrap();

        assert_eq!(answer, "Growth is projected at 3.2 percent.");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].user, "global growth projected?");
        assert!(prompts[0]
            .system
            .ends_with("Context:\nGlobal growth is projected at 3.2 percent"));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let store = LocalStore::in_memory();
        let embedder = TrigramEmbedder::default();
        let model = RecordingModel::default();
        let responder = QueryResponder::new(&store, &embedder, &model, "docs", "page_content", 4);

        let result = responder.answer("   ").await;

        assert!(matches!(
            result,
            Err(IngestError::Model(ModelError::InvalidRequest(_)))
        ));
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
