//! Shared test helpers: scripted LLM, sample data room, temp environment

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use dd_analyzer::services::llm_client::{
    CompletionRequest, CompletionResponse, LlmError, LlmProvider, TokenUsage,
};
use dd_analyzer::services::{BlueprintRegistry, DocumentStore};
use dd_analyzer::AppState;
use dd_common::config::TomlConfig;
use dd_common::events::EventBus;

// ============================================================================
// Scripted LLM
// ============================================================================

type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Answers by request purpose and counts every call
pub struct ScriptedLlm {
    responses: HashMap<String, String>,
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<(String, usize, CancellationToken)>>,
    hooks: Mutex<HashMap<String, Hook>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert(
            "pass1_extract".to_string(),
            r#"{"summary": "Agreement between Target Ltd and Supplier plc.",
                "parties": ["Target Ltd", "Supplier plc"],
                "dates": [{"label": "Effective date", "date": "2023-01-01"}],
                "amounts": [{"label": "Annual fee", "amount": 125000, "currency": "eur"}],
                "key_terms": ["change of control"]}"#
                .to_string(),
        );
        responses.insert(
            "pass2_analyze".to_string(),
            r#"Here is my analysis:
```json
{"findings": [{"title": "Termination on change of control",
  "description": "Counterparty may terminate if the target changes control.",
  "severity": "high", "category": "change_of_control",
  "clause_reference": "Clause 14.2", "confidence": 0.8}]}
```"#
                .to_string(),
        );
        responses.insert("pass4_cross_doc".to_string(), r#"{"conflicts": []}"#.to_string());
        responses.insert(
            "pass6_synthesize".to_string(),
            r#"{"executive_summary": "Change of control clauses need waivers before closing.",
                "key_risks": ["Termination rights"], "recommendations": ["Obtain consents"]}"#
                .to_string(),
        );
        responses.insert(
            "pass7_verify".to_string(),
            r#"{"status": "verified", "confidence": 0.9, "note": "Clause 14.2 confirms it"}"#.to_string(),
        );
        responses.insert(
            "evaluation".to_string(),
            r#"{"scores": [{"criterion": "Coverage", "score": 4, "rationale": "Most risks found"},
                           {"criterion": "Accuracy", "score": 9, "rationale": "Well supported"}],
                "summary": "Solid report"}"#
                .to_string(),
        );

        Self {
            responses,
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            cancel_after: Mutex::new(None),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, purpose: &str) -> usize {
        self.calls.lock().unwrap().get(purpose).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Every call with this purpose fails with a non-retryable API error
    pub fn fail(&self, purpose: &str) {
        self.failing.lock().unwrap().insert(purpose.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Cancel `token` once `count` calls of `purpose` have been answered
    pub fn cancel_after(&self, purpose: &str, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((purpose.to_string(), count, token));
    }

    /// Await `hook` before answering each call of `purpose`
    pub fn before_answer<F, Fut>(&self, purpose: &str, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: Hook = Arc::new(move || hook().boxed());
        self.hooks.lock().unwrap().insert(purpose.to_string(), hook);
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(request.purpose.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let hook = self.hooks.lock().unwrap().get(&request.purpose).cloned();
        if let Some(hook) = hook {
            hook().await;
        }

        if self.failing.lock().unwrap().contains(&request.purpose) {
            return Err(LlmError::Api {
                status: 400,
                message: format!("scripted failure for {}", request.purpose),
            });
        }

        if let Some((purpose, after, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *purpose == request.purpose && count >= *after {
                token.cancel();
            }
        }

        let content = self
            .responses
            .get(&request.purpose)
            .cloned()
            .unwrap_or_else(|| "{}".to_string());

        Ok(CompletionResponse {
            content,
            model: "scripted".to_string(),
            usage: TokenUsage::default(),
            duration: Duration::from_millis(1),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Data room fixtures
// ============================================================================

pub fn build_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub const ARTICLES: (&str, &str) = (
    "Corporate/Articles of Association.txt",
    "The share capital of the company is divided into ordinary shares. \
     The board of directors may refuse to register a transfer of shares.",
);
pub const SUPPLY: (&str, &str) = (
    "Contracts/Supply Agreement.txt",
    "Either party may terminate this agreement on a change of control of the other party. \
     This agreement is subject to the governing law of England.",
);
pub const ACCOUNTS: (&str, &str) = (
    "Financial/Audited Accounts 2023.txt",
    "Revenue for the year was EUR 12m. EBITDA was EUR 2m. The auditor issued an unqualified opinion.",
);

/// Three text documents that classify into Corporate, Contracts and Financial
pub fn sample_data_room() -> Vec<u8> {
    build_zip(&[ARTICLES, SUPPLY, ACCOUNTS])
}

// ============================================================================
// Environment
// ============================================================================

pub struct TestEnv {
    pub dir: TempDir,
    pub state: AppState,
}

impl TestEnv {
    pub fn db(&self) -> &sqlx::SqlitePool {
        &self.state.db
    }
}

/// Fresh database and document store in a temp dir
///
/// Per-document passes run one at a time so call counts are deterministic.
pub async fn test_env(llm: Option<Arc<ScriptedLlm>>) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let pool = dd_common::db::init_database(&dir.path().join("dd.db")).await.unwrap();

    let mut config = TomlConfig::default();
    config.pipeline.max_concurrent_documents = 1;

    let state = AppState::new(
        pool,
        EventBus::new(1000),
        Arc::new(BlueprintRegistry::builtin().unwrap()),
        DocumentStore::new(dir.path().join("documents")),
        config,
        dir.path().join("dd-analyzer.toml"),
    )
    .with_llm(llm.map(|l| l as Arc<dyn LlmProvider>));

    TestEnv { dir, state }
}
