//! Expectation management
//!
//! A user has at most one active expectation. Replacing it clears the
//! prototype cache so nothing downstream ranks against the old criteria.

use crate::error::{ImpMailError, Result};
use crate::prototype::PrototypeBuilder;
use crate::storage::MailStore;
use crate::types::{Expectation, ExpectationExamples};
use std::sync::Arc;
use tracing::info;

fn clean_examples(examples: Vec<String>) -> Vec<String> {
    examples
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

pub struct ExpectationService {
    mail: Arc<dyn MailStore>,
    prototypes: PrototypeBuilder,
}

impl ExpectationService {
    pub fn new(mail: Arc<dyn MailStore>, prototypes: PrototypeBuilder) -> Self {
        Self { mail, prototypes }
    }

    /// Store a new active expectation, deactivating the previous one
    pub async fn set_expectation(
        &self,
        user_id: &str,
        title: &str,
        description: &str,
        examples: ExpectationExamples,
    ) -> Result<Expectation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ImpMailError::InvalidInput(
                "expectation title cannot be empty".to_string(),
            ));
        }

        let examples = ExpectationExamples {
            important: clean_examples(examples.important),
            not_important: clean_examples(examples.not_important),
        };
        let expectation = Expectation::new(user_id, title, description.trim(), examples);

        self.mail.save_expectation(expectation.clone()).await?;
        self.prototypes.invalidate();

        info!(
            "Set expectation '{}' for user {} ({} important, {} not important examples)",
            expectation.title,
            user_id,
            expectation.examples.important.len(),
            expectation.examples.not_important.len()
        );
        Ok(expectation)
    }

    pub async fn active_expectation(&self, user_id: &str) -> Result<Option<Expectation>> {
        self.mail.active_expectation(user_id).await
    }
}
