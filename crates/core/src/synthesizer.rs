use crate::error::{QueryError, Stage};
use crate::llm::{LanguageModel, Prompt};
use crate::models::RetrievedChunk;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ANSWER_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks.
Use the following pieces of retrieved documentation to answer the question.
Please write in full sentences with correct spelling and punctuation. If it makes sense, use lists.
If the documentation does not contain the answer, just respond that you are unable to find an answer.
Explain the reasoning as well.";

pub const CONTEXT_DELIMITER: &str = " ; ";

pub type AnswerStream = BoxStream<'static, Result<String, QueryError>>;

pub fn answer_user_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    let documentation = chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER);
    format!("Documentation: {documentation} \n\nQuestion: {question} \n\nAnswer: ")
}

/// Streams an answer grounded in the given chunks.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Fragments arrive as the model produces them. Cancelling `cancel`
    /// ends the stream with [`QueryError::Cancelled`].
    pub async fn answer(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        cancel: CancellationToken,
    ) -> Result<AnswerStream, QueryError> {
        if chunks.is_empty() {
            return Err(QueryError::InvalidArgument(
                "no documents to answer from".to_string(),
            ));
        }

        let prompt = Prompt::new(ANSWER_SYSTEM_PROMPT, answer_user_prompt(question, chunks));
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            started = self.model.generate_stream(&prompt) => started,
        };
        let fragments = started.map_err(|source| QueryError::Provider {
            stage: Stage::Generation,
            source,
        })?;

        let fragments = fragments
            .map(|fragment| {
                fragment.map_err(|source| QueryError::Provider {
                    stage: Stage::Generation,
                    source,
                })
            })
            .boxed();

        Ok(cancellable(fragments, cancel))
    }
}

/// Stops after the first error, and yields `Cancelled` once the token fires.
pub fn cancellable(inner: AnswerStream, cancel: CancellationToken) -> AnswerStream {
    stream::unfold(Some((inner, cancel)), |state| async move {
        let (mut inner, cancel) = state?;

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            item = inner.next() => Some(item),
        };

        match next {
            None => Some((Err(QueryError::Cancelled), None)),
            Some(None) => None,
            Some(Some(Err(error))) => Some((Err(error), None)),
            Some(Some(Ok(fragment))) => Some((Ok(fragment), Some((inner, cancel)))),
        }
    })
    .boxed()
}
