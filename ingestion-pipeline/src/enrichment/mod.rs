use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use common::{error::AppError, utils::config::AppConfig};
use tokio::{sync::Semaphore, time::timeout};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, warn};

const CONTEXT_SYSTEM_MESSAGE: &str = "You situate a document excerpt within its source document. \
Reply with one to three short sentences of context that would help a reader \
understand the excerpt in isolation. Reply with the context only, no preamble.";

/// How much of the chunk is shown to the context model.
const MAX_EXCERPT_CHARS: usize = 4000;

/// Document-level fields that go into the enrichment header.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentScope<'a> {
    pub filename: &'a str,
    pub document_type: &'a str,
}

/// Adds an LLM-written context prefix to chunks before embedding.
///
/// Work fans out over a fixed set of OpenAI-compatible endpoints, one small
/// model instance behind each. A semaphore caps in-flight calls at the pool
/// size; dispatch is round-robin. Failures degrade to a header without the
/// context line rather than dropping the chunk. Successful contexts are
/// cached on disk keyed by `(chunk_hash, model)`.
pub struct Enricher {
    clients: Vec<Arc<Client<OpenAIConfig>>>,
    semaphore: Arc<Semaphore>,
    next_endpoint: AtomicUsize,
    model: String,
    cache_dir: PathBuf,
    call_timeout: Duration,
}

impl Enricher {
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !config.enrich_enabled {
            return Ok(None);
        }

        let endpoints = config.enrich_endpoints();
        if endpoints.is_empty() {
            return Err(AppError::Validation(
                "ENRICH_ENABLED is set but ENRICH_MODEL_ENDPOINTS is empty".to_owned(),
            ));
        }

        let workers = config
            .enrich_workers
            .unwrap_or(endpoints.len())
            .clamp(1, endpoints.len().max(1));

        let clients = endpoints
            .iter()
            .map(|url| {
                Arc::new(Client::with_config(
                    OpenAIConfig::new()
                        .with_api_base(url)
                        .with_api_key("local"),
                ))
            })
            .collect();

        let cache_dir = Path::new(&config.data_dir).join("enrich-cache");
        std::fs::create_dir_all(&cache_dir)?;

        Ok(Some(Arc::new(Self {
            clients,
            semaphore: Arc::new(Semaphore::new(workers)),
            next_endpoint: AtomicUsize::new(0),
            model: config.enrich_model.clone(),
            cache_dir,
            call_timeout: Duration::from_secs(config.enrich_timeout),
        })))
    }

    /// Pool size `W`; the pipeline uses it to bound its fan-out.
    pub fn worker_limit(&self) -> usize {
        self.clients.len()
    }

    /// Produce the embed text for one chunk. Never fails: when the model
    /// cannot be reached within the retry budget the chunk keeps its header
    /// without a context line.
    pub async fn enrich(
        &self,
        scope: EnrichmentScope<'_>,
        raw_text: &str,
        chunk_hash: &str,
    ) -> String {
        if let Some(cached) = self.read_cache(chunk_hash).await {
            debug!(chunk_hash, "enrichment cache hit");
            return build_enriched(scope, Some(&cached), raw_text);
        }

        let context = self.generate_context(raw_text).await;
        match context {
            Ok(context) => {
                self.write_cache(chunk_hash, &context).await;
                build_enriched(scope, Some(&context), raw_text)
            }
            Err(err) => {
                warn!(chunk_hash, error = %err, "enrichment failed, storing chunk without context");
                build_enriched(scope, None, raw_text)
            }
        }
    }

    async fn generate_context(&self, raw_text: &str) -> Result<String, AppError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("enrichment pool closed".to_owned()))?;

        let retry_strategy = ExponentialBackoff::from_millis(500).map(jitter).take(2);

        Retry::spawn(retry_strategy, || async {
            let client = self.pick_client();
            timeout(self.call_timeout, self.call_model(&client, raw_text))
                .await
                .map_err(|_| AppError::Processing("enrichment call timed out".to_owned()))?
        })
        .await
    }

    fn pick_client(&self) -> Arc<Client<OpenAIConfig>> {
        let n = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.clients[n % self.clients.len()])
    }

    async fn call_model(
        &self,
        client: &Client<OpenAIConfig>,
        raw_text: &str,
    ) -> Result<String, AppError> {
        let excerpt = truncate_chars(raw_text, MAX_EXCERPT_CHARS);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(CONTEXT_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(format!("Excerpt:\n{excerpt}")).into(),
            ])
            .max_tokens(160u32)
            .build()?;

        let response = client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .map(|content| content.trim())
            .filter(|content| !content.is_empty())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        Ok(content.replace('\n', " "))
    }

    fn cache_path(&self, chunk_hash: &str) -> PathBuf {
        let model: String = self
            .model
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        self.cache_dir.join(model).join(format!("{chunk_hash}.txt"))
    }

    async fn read_cache(&self, chunk_hash: &str) -> Option<String> {
        let contents = tokio::fs::read_to_string(self.cache_path(chunk_hash))
            .await
            .ok()?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }

    async fn write_cache(&self, chunk_hash: &str, context: &str) {
        let path = self.cache_path(chunk_hash);
        let context = context.to_owned();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let parent = path
                .parent()
                .ok_or_else(|| std::io::Error::other("cache path has no parent"))?;
            std::fs::create_dir_all(parent)?;
            let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
            std::io::Write::write_all(&mut tmp, context.as_bytes())?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to persist enrichment cache entry"),
            Err(err) => warn!(error = %err, "enrichment cache writer task failed"),
        }
    }
}

/// The fixed header format embeddings are computed over.
pub fn build_enriched(
    scope: EnrichmentScope<'_>,
    context: Option<&str>,
    raw_text: &str,
) -> String {
    match context {
        Some(context) => format!(
            "[Document: {}]\n[Type: {}]\n[Context: {}]\n\n{}",
            scope.filename, scope.document_type, context, raw_text
        ),
        None => format!(
            "[Document: {}]\n[Type: {}]\n\n{}",
            scope.filename, scope.document_type, raw_text
        ),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}
