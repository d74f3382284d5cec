//! Grounded answer composition.
//!
//! The retrieved chunks are the only knowledge the model is allowed to use.
//! With nothing retrieved the composer refuses without calling the model, and
//! a model reply equal to the refusal sentence is reported as not grounded.

use crate::traits::CompletionProvider;
use crate::{Answer, Query, ScoredChunk, ServiceError};
use std::sync::Arc;
use tracing::info;

pub const REFUSAL: &str =
    "I can only answer questions about the uploaded PDF documents, and they do not contain information about this question.";

const SYSTEM_PROMPT: &str = "You are a document assistant that answers ONLY from the PDF excerpts supplied in the user message.

Rules:
1. Use only information explicitly stated in the excerpts. Never use general knowledge or training data.
2. If the excerpts do not contain the answer, reply with exactly this sentence and nothing else:
   \"{refusal}\"
3. Do not guess, infer beyond the text, or answer questions unrelated to the documents.
4. Mention the excerpt numbers you relied on, like [1] or [2].";

pub struct AnswerComposer {
    completion: Arc<dyn CompletionProvider>,
}

impl AnswerComposer {
    pub fn new(completion: Arc<dyn CompletionProvider>) -> Self {
        Self { completion }
    }

    pub async fn answer(&self, query: &Query, retrieved: &[ScoredChunk]) -> Result<Answer, ServiceError> {
        query.validate()?;

        if retrieved.is_empty() {
            info!("no relevant excerpts, refusing without calling the model");
            return Ok(Answer::refusal(REFUSAL));
        }

        let system = system_prompt();
        let prompt = build_prompt(&query.text, retrieved);
        let reply = self.completion.complete(&system, &prompt).await?;

        if is_refusal(&reply) {
            info!(model = self.completion.model(), "model declined, question is out of scope");
            return Ok(Answer::refusal(REFUSAL));
        }

        Ok(Answer {
            answer: reply,
            grounded: true,
            sources: retrieved
                .iter()
                .map(|hit| hit.chunk.chunk_id.clone())
                .collect(),
        })
    }
}

pub fn system_prompt() -> String {
    SYSTEM_PROMPT.replace("{refusal}", REFUSAL)
}

pub fn build_context(retrieved: &[ScoredChunk]) -> String {
    let mut context = String::new();
    for (position, hit) in retrieved.iter().enumerate() {
        context.push_str(&format!(
            "[{}] {} (page {})\n{}\n\n---\n\n",
            position + 1,
            hit.chunk.filename,
            hit.chunk.page,
            hit.chunk.text
        ));
    }
    context
}

pub fn build_prompt(question: &str, retrieved: &[ScoredChunk]) -> String {
    format!(
        "PDF EXCERPTS:\n\n{context}QUESTION: {question}\n\nAnswer using only the excerpts above.",
        context = build_context(retrieved),
        question = question.trim()
    )
}

pub fn is_refusal(reply: &str) -> bool {
    fn canonical(text: &str) -> String {
        text.trim()
            .trim_matches(|c: char| c == '"' || c == '\'')
            .trim_end_matches(|c: char| c == '.' || c == '!')
            .trim()
            .to_lowercase()
    }
    canonical(reply) == canonical(REFUSAL)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::traits::CompletionProvider;
    use crate::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers with a fixed reply and records every prompt it receives.
    #[derive(Default)]
    pub struct ScriptedCompletion {
        pub reply: String,
        pub fail_with_status: Option<u16>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Self::default()
            }
        }

        pub fn failing(status: u16) -> Self {
            Self {
                fail_with_status: Some(status),
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletion {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            match self.fail_with_status {
                Some(status) => Err(ServiceError::Rejected {
                    service: "completion".to_string(),
                    status,
                    details: "scripted failure".to_string(),
                }),
                None => Ok(self.reply.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedCompletion;
    use super::*;
    use crate::PdfChunk;

    fn hit(id: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: PdfChunk {
                chunk_id: id.to_string(),
                document_id: "doc".to_string(),
                filename: "physics.pdf".to_string(),
                page: 3,
                ordinal: 0,
                text: text.to_string(),
            },
            score,
        }
    }

    #[tokio::test]
    async fn empty_retrieval_refuses_without_calling_the_model() -> Result<(), ServiceError> {
        let completion = Arc::new(ScriptedCompletion::replying("should not be used"));
        let composer = AnswerComposer::new(completion.clone());

        let answer = composer.answer(&Query::new("What is the capital of France?"), &[]).await?;

        assert!(!answer.grounded);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.answer, REFUSAL);
        assert_eq!(completion.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn grounded_answer_cites_retrieved_chunks() -> Result<(), ServiceError> {
        let completion = Arc::new(ScriptedCompletion::replying(
            "Water boils at 100°C at sea level [1].",
        ));
        let composer = AnswerComposer::new(completion.clone());
        let retrieved = vec![
            hit("c1", "The boiling point of water is 100°C at sea level.", 0.8),
            hit("c2", "Water freezes at 0°C.", 0.6),
        ];

        let answer = composer
            .answer(&Query::new("What is the boiling point of water?"), &retrieved)
            .await?;

        assert!(answer.grounded);
        assert_eq!(answer.sources, vec!["c1".to_string(), "c2".to_string()]);
        assert!(answer.answer.contains("100°C"));

        let prompts = completion.prompts.lock().expect("prompt log");
        assert!(prompts[0].contains("The boiling point of water is 100°C at sea level."));
        assert!(prompts[0].contains("QUESTION: What is the boiling point of water?"));
        Ok(())
    }

    #[tokio::test]
    async fn model_refusal_is_not_grounded() -> Result<(), ServiceError> {
        let completion = Arc::new(ScriptedCompletion::replying(&format!("\"{}\"", REFUSAL.to_uppercase())));
        let composer = AnswerComposer::new(completion);

        let answer = composer
            .answer(&Query::new("What's the weather like today?"), &[hit("c1", "Water freezes at 0°C.", 0.4)])
            .await?;

        assert!(!answer.grounded);
        assert!(answer.sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let composer = AnswerComposer::new(Arc::new(ScriptedCompletion::failing(503)));

        let result = composer
            .answer(&Query::new("What is the boiling point?"), &[hit("c1", "text", 0.9)])
            .await;

        assert!(matches!(result, Err(ServiceError::Rejected { status: 503, .. })));
    }

    #[test]
    fn system_prompt_embeds_the_refusal_sentence() {
        assert!(system_prompt().contains(REFUSAL));
        assert!(is_refusal(&format!("  {REFUSAL}  ")));
        assert!(!is_refusal("Water boils at 100°C."));
    }

    #[test]
    fn context_numbers_excerpts_with_their_source() {
        let context = build_context(&[hit("c1", "first", 0.9), hit("c2", "second", 0.8)]);
        assert!(context.starts_with("[1] physics.pdf (page 3)\nfirst"));
        assert!(context.contains("[2] physics.pdf (page 3)\nsecond"));
    }
}
