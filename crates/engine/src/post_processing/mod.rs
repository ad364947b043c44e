//! Post-processing: work that runs after a turn has been answered.
//!
//! Jobs go onto a bounded queue drained by a small worker pool that lives
//! outside any request's cancellation scope. A full queue drops the job with
//! a warning; failed jobs are logged and never retried.

pub mod extraction;
pub mod title;

use std::sync::Arc;

use chatforge_config::{AppConfig, split_model_ref};
use chatforge_core::completion::Completer;
use chatforge_core::event::{DomainEvent, EventBus};
use chatforge_core::memory::MemoryStore;
use chatforge_core::message::{Message, Role};
use chatforge_core::storage::Storage;
use chatforge_core::turn::PostProcessingResult;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use extraction::{extract_memories, parse_memories, recent_context};
pub use title::{generate_title, title_model};

/// Everything a job needs once the turn is gone.
#[derive(Debug, Clone)]
pub struct PostProcessJob {
    pub session_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    /// Provider and model that answered the turn
    pub provider: String,
    pub model: String,
    /// The request transcript, without the new answer
    pub messages: Vec<Message>,
    /// The new answer
    pub final_text: String,
}

impl PostProcessJob {
    fn is_first_exchange(&self) -> bool {
        self.messages.iter().filter(|m| m.role == Role::User).count() == 1
    }

    fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Runs title generation and memory extraction for one job.
pub struct PostProcessor {
    completer: Arc<dyn Completer>,
    storage: Arc<dyn Storage>,
    memory: Option<Arc<dyn MemoryStore>>,
    events: Option<Arc<EventBus>>,
    config: Arc<AppConfig>,
}

impl PostProcessor {
    pub fn new(completer: Arc<dyn Completer>, storage: Arc<dyn Storage>, config: Arc<AppConfig>) -> Self {
        Self {
            completer,
            storage,
            memory: None,
            events: None,
            config,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run both jobs. Failures are logged and leave their field empty.
    pub async fn run(&self, job: &PostProcessJob) -> PostProcessingResult {
        let mut result = PostProcessingResult::default();

        if self.config.post_processing.auto_rename && job.is_first_exchange() {
            result.title = self.rename(job).await;
        }

        let mut extracted = 0;
        if self.config.memory.enabled
            && let Some(memory) = &self.memory
        {
            match self.extract(memory.as_ref(), job).await {
                Ok(fresh) => {
                    extracted = fresh.len();
                    if self.config.memory.notify_on_update && !fresh.is_empty() {
                        result.extracted_memories = Some(fresh);
                    }
                }
                Err(e) => error!(session_id = %job.session_id, error = %e, "Memory extraction failed"),
            }
        }

        if let Some(events) = &self.events {
            events.publish(DomainEvent::PostProcessingCompleted {
                session_id: job.session_id.clone(),
                title_generated: result.title.is_some(),
                memories_extracted: extracted,
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn rename(&self, job: &PostProcessJob) -> Option<String> {
        let (provider, model) = title_model(&self.config);
        let title = match generate_title(
            self.completer.as_ref(),
            &provider,
            &model,
            job.last_user_text(),
            &job.final_text,
        )
        .await
        {
            Ok(Some(title)) => title,
            Ok(None) => return None,
            Err(e) => {
                error!(session_id = %job.session_id, error = %e, "Failed to generate title");
                return None;
            }
        };

        match self.storage.update_session_title(&job.session_id, &title).await {
            Ok(()) => {
                info!(session_id = %job.session_id, title = %title, "Session renamed");
                Some(title)
            }
            Err(e) => {
                error!(session_id = %job.session_id, error = %e, "Failed to store title");
                None
            }
        }
    }

    /// Pair mode uses the extraction model on the last exchange only; legacy
    /// mode sends the transcript to the turn's own model.
    async fn extract(
        &self,
        memory: &dyn MemoryStore,
        job: &PostProcessJob,
    ) -> Result<Vec<String>, chatforge_core::ChatError> {
        let existing: Vec<String> = memory
            .list(&job.user_id, job.project_id.as_deref())
            .await?
            .into_iter()
            .map(|r| r.content)
            .collect();

        let pair_model = self
            .config
            .memory
            .extraction_model
            .as_deref()
            .filter(|_| !self.config.memory.legacy_extraction)
            .and_then(split_model_ref);

        let (provider, model, messages) = match pair_model {
            Some((provider, model)) => {
                let mut pair = Vec::with_capacity(2);
                if let Some(user) = job.messages.iter().rev().find(|m| m.role == Role::User) {
                    pair.push(user.clone());
                }
                pair.push(Message::assistant(job.final_text.clone()));
                (provider.to_string(), model.to_string(), pair)
            }
            None => {
                let mut transcript: Vec<Message> = job
                    .messages
                    .iter()
                    .filter(|m| m.role.is_conversational())
                    .cloned()
                    .collect();
                transcript.push(Message::assistant(job.final_text.clone()));
                (job.provider.clone(), job.model.clone(), transcript)
            }
        };
        debug!(provider = %provider, model = %model, "Extracting memories");

        let fresh = extract_memories(
            self.completer.as_ref(),
            &provider,
            &model,
            &messages,
            &existing,
        )
        .await?;
        if !fresh.is_empty() {
            memory
                .append(&job.user_id, job.project_id.as_deref(), fresh.clone())
                .await?;
        }
        Ok(fresh)
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────

/// Producer side of the post-processing pool.
#[derive(Clone)]
pub struct PostProcessingQueue {
    sender: mpsc::Sender<PostProcessJob>,
}

impl PostProcessingQueue {
    /// Start `workers` tasks draining a queue of `capacity` jobs.
    pub fn spawn(
        processor: Arc<PostProcessor>,
        capacity: usize,
        workers: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel::<PostProcessJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        debug!(worker, session_id = %job.session_id, "Post-processing job started");
                        processor.run(&job).await;
                    }
                    debug!(worker, "Post-processing worker stopped");
                })
            })
            .collect();

        (Self { sender }, handles)
    }

    /// Queue a job without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, job: PostProcessJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(session_id = %job.session_id, "Post-processing queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(session_id = %job.session_id, "Post-processing pool stopped, dropping job");
                false
            }
        }
    }
}
