use crate::error::QueryError;
use crate::grader::RelevanceGrader;
use crate::models::RetrievedChunk;
use crate::retriever::Retriever;
use crate::synthesizer::{AnswerStream, AnswerSynthesizer};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub enum AskOutcome {
    /// Nothing in the collection scored above the threshold.
    NoReferenceDocuments,
    /// Documents were retrieved but the grader rejected all of them.
    NoRelevantDocuments { retrieved: usize },
    Answer {
        retrieved: usize,
        retained: Vec<RetrievedChunk>,
        fragments: AnswerStream,
    },
}

/// Retrieve, grade, then stream an answer from what survived grading.
pub struct AskCoordinator {
    retriever: Retriever,
    grader: RelevanceGrader,
    synthesizer: AnswerSynthesizer,
}

impl AskCoordinator {
    pub fn new(retriever: Retriever, grader: RelevanceGrader, synthesizer: AnswerSynthesizer) -> Self {
        Self {
            retriever,
            grader,
            synthesizer,
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<AskOutcome, QueryError> {
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            retrieved = self.retriever.retrieve(question) => retrieved?,
        };

        if retrieved.is_empty() {
            info!("no reference documents found");
            return Ok(AskOutcome::NoReferenceDocuments);
        }

        let retrieved_count = retrieved.len();
        info!(retrieved = retrieved_count, "found document sections");

        let retained = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled),
            retained = self.grader.filter_relevant(question, retrieved) => retained?,
        };

        if retained.is_empty() {
            info!(retrieved = retrieved_count, "no relevant documents found");
            return Ok(AskOutcome::NoRelevantDocuments {
                retrieved: retrieved_count,
            });
        }

        info!(
            retrieved = retrieved_count,
            retained = retained.len(),
            "answering from relevant document sections"
        );
        let fragments = self.synthesizer.answer(question, &retained, cancel).await?;

        Ok(AskOutcome::Answer {
            retrieved: retrieved_count,
            retained,
            fragments,
        })
    }
}
