use crate::error::{QueryError, Stage};
use crate::llm::{LanguageModel, Prompt};
use crate::models::{GraderVerdict, RetrievedChunk, Verdict};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

pub const GRADER_SYSTEM_PROMPT: &str = "You are a grader assessing relevance of a retrieved document to a user question.
If the document contains keywords related to the user question, grade it as relevant.
It does not need to be a stringent test. The goal is to filter out erroneous retrievals.
Give a binary score 'yes' or 'no' score to indicate whether the document is relevant to the question.
Provide the binary score as a JSON with a single key 'score' and no preamble or explanation.";

pub fn grader_user_prompt(question: &str, content: &str) -> String {
    format!("Here is the retrieved document: {content} \n\nHere is the user question: {question}")
}

/// Parses a grader reply. Only `{"score":"yes"}` and `{"score":"no"}` are accepted.
pub fn parse_verdict(output: &str) -> Result<Verdict, QueryError> {
    serde_json::from_str::<GraderVerdict>(output)
        .map(|verdict| verdict.score)
        .map_err(|error| QueryError::GraderParse {
            output: output.to_string(),
            reason: error.to_string(),
        })
}

/// Binary relevance classifier backed by a language model.
#[derive(Clone)]
pub struct RelevanceGrader {
    model: Arc<dyn LanguageModel>,
    concurrency: usize,
}

impl RelevanceGrader {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            concurrency: 1,
        }
    }

    /// Number of grading calls allowed in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn grade(&self, question: &str, content: &str) -> Result<Verdict, QueryError> {
        let prompt = Prompt::new(GRADER_SYSTEM_PROMPT, grader_user_prompt(question, content)).json();
        let output = self
            .model
            .generate(&prompt)
            .await
            .map_err(|source| QueryError::Provider {
                stage: Stage::Grading,
                source,
            })?;
        parse_verdict(&output)
    }

    /// Keeps the chunks graded "yes", in their original order.
    pub async fn filter_relevant(
        &self,
        question: &str,
        chunks: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        let graded: Vec<(RetrievedChunk, Verdict)> = stream::iter(chunks)
            .map(|chunk| async move {
                let verdict = self.grade(question, &chunk.content).await?;
                debug!(id = %chunk.id, source = %chunk.source(), ?verdict, "graded document");
                Ok::<_, QueryError>((chunk, verdict))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(graded
            .into_iter()
            .filter(|(_, verdict)| *verdict == Verdict::Yes)
            .map(|(chunk, _)| chunk)
            .collect())
    }
}
