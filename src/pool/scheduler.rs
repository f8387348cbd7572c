//! Pool scheduler
//!
//! Owns the session queue and picks a session for every inbound request
//! under the rate-limit policy. `work` is the single retry site: the
//! sessions themselves never retry, and upstream errors are classified
//! here into the scheduler-surfaced outcome set.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{pin_mut, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppResult, BotError, ScheduleError};
use crate::limiter::RateLimiter;
use crate::openai::{self, ApiRequest, CompletionResponse};
use crate::store::Store;
use crate::upstream::{BotSession, TurnEvent, WireMessage, DEFAULT_TIMEOUT_SECS};

/// Transient failures are retried this many times, reselecting a session
/// each round.
const MAX_RETRIES: u32 = 3;

/// Wait between availability polls while the pool is saturated
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The operations a turn may run on a session
#[derive(Debug, Clone)]
pub enum BotOp {
    Ask {
        prompt: String,
        conversation_id: Option<String>,
        parent_id: Option<String>,
        model: Option<String>,
        history_and_training_disabled: bool,
    },
    PostMessages {
        messages: Vec<WireMessage>,
        conversation_id: Option<String>,
        parent_id: Option<String>,
        model: Option<String>,
        history_and_training_disabled: bool,
    },
    ContinueWrite {
        conversation_id: String,
        parent_id: String,
        model: String,
        history_and_training_disabled: bool,
    },
}

/// A completed turn: the final accumulated event plus the account that
/// served it.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub email: String,
    pub event: TurnEvent,
}

enum Availability {
    Ready(Arc<BotSession>),
    /// Sessions exist but none passes the rate limit right now.
    Busy,
    /// The pinned account has no session in the pool.
    Offline,
}

/// The session pool and scheduling policy
pub struct BotPool {
    /// Insertion order is the fair-queue order; unpinned selection
    /// rotates each visited entry to the tail.
    sessions: Mutex<VecDeque<Arc<BotSession>>>,
    limiter: Arc<RateLimiter>,
    store: Arc<Store>,
}

impl BotPool {
    pub fn new(limiter: Arc<RateLimiter>, store: Arc<Store>) -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            limiter,
            store,
        }
    }

    /// Add a session, replacing any existing session for the same email.
    pub async fn insert(&self, session: Arc<BotSession>) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|s| s.email() != session.email());
        sessions.push_back(session);
    }

    /// Evict an account's session. Returns whether one was present.
    pub async fn remove(&self, email: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|s| s.email() != email);
        sessions.len() != before
    }

    /// Refresh a pooled session's credentials in place. Returns `false`
    /// when the account has no session.
    pub async fn update_credentials(
        &self,
        email: &str,
        access_token: Option<&str>,
        puid: Option<&str>,
    ) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.iter().find(|s| s.email() == email) {
            Some(session) => {
                session.update(access_token, puid);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, email: &str) -> bool {
        self.sessions
            .lock()
            .await
            .iter()
            .any(|s| s.email() == email)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Pick a session under the rate-limit policy.
    ///
    /// Pinned requests never fall back to another account; conversation
    /// affinity is a hard constraint.
    async fn get_available(&self, email: Option<&str>) -> AppResult<Availability> {
        let mut sessions = self.sessions.lock().await;
        match email {
            Some(email) => {
                let Some(session) = sessions.iter().find(|s| s.email() == email).cloned() else {
                    return Ok(Availability::Offline);
                };
                if self.limiter.allows(email).await? {
                    Ok(Availability::Ready(session))
                } else {
                    info!(email = %email, "account is busy");
                    Ok(Availability::Busy)
                }
            }
            None => {
                for _ in 0..sessions.len() {
                    let session = sessions.pop_front().expect("loop bounded by len");
                    sessions.push_back(session.clone());
                    if self.limiter.allows(session.email()).await? {
                        return Ok(Availability::Ready(session));
                    }
                }
                Ok(Availability::Busy)
            }
        }
    }

    /// Run one operation against an available session.
    ///
    /// `timeout_secs` bounds only the wait for a session; the upstream
    /// call carries its own timeout.
    pub async fn work(
        &self,
        op: BotOp,
        email: Option<&str>,
        timeout_secs: u64,
    ) -> Result<TurnOutcome, ScheduleError> {
        let mut wait_budget = timeout_secs;
        let mut retries = 0u32;

        loop {
            let session = match self.get_available(email).await {
                Ok(Availability::Ready(session)) => session,
                Ok(Availability::Offline) => return Err(ScheduleError::BotOffline),
                Ok(Availability::Busy) => {
                    if wait_budget == 0 {
                        return Err(ScheduleError::Timeout);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                    wait_budget -= 1;
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "rate-limit store unavailable");
                    return Err(ScheduleError::ServerError);
                }
            };

            // Charge the limiter before the upstream call so concurrent
            // turns cannot stampede one account.
            match self.limiter.commit(session.email()).await {
                Ok(true) => {}
                Ok(false) => {
                    // Lost the race for this account's slot.
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "rate-limit commit failed");
                    return Err(ScheduleError::ServerError);
                }
            }

            info!(email = %session.email(), "session working");
            match self.run_op(&session, &op).await {
                Ok(Some(event)) => {
                    info!(email = %session.email(), "session work done");
                    return Ok(TurnOutcome {
                        email: session.email().to_string(),
                        event,
                    });
                }
                Ok(None) => {
                    warn!(email = %session.email(), "stream produced no assistant turn");
                    return Err(ScheduleError::ServerError);
                }
                Err(err) => match err.upstream_status() {
                    Some(404) => return Err(ScheduleError::ConversationNotFound),
                    Some(429) => {
                        warn!(email = %session.email(), "upstream rate limit");
                        return Err(ScheduleError::TooManyRequests);
                    }
                    Some(_) => return Err(ScheduleError::ServerError),
                    None => match err {
                        BotError::InvalidResponse | BotError::InternalServerError => {
                            return Err(ScheduleError::ServerError)
                        }
                        other => {
                            retries += 1;
                            warn!(
                                email = %session.email(),
                                error = %other,
                                retries,
                                "transient turn failure"
                            );
                            if retries > MAX_RETRIES {
                                return Err(ScheduleError::MaxRetry);
                            }
                            continue;
                        }
                    },
                },
            }
        }
    }

    /// Drain the operation's event stream, keeping the last (fully
    /// accumulated) event.
    async fn run_op(
        &self,
        session: &BotSession,
        op: &BotOp,
    ) -> Result<Option<TurnEvent>, BotError> {
        let mut last = None;
        match op.clone() {
            BotOp::Ask {
                prompt,
                conversation_id,
                parent_id,
                model,
                history_and_training_disabled,
            } => {
                let stream = session.ask(
                    &prompt,
                    conversation_id,
                    parent_id,
                    model,
                    true,
                    history_and_training_disabled,
                    DEFAULT_TIMEOUT_SECS,
                );
                pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    last = Some(event?);
                }
            }
            BotOp::PostMessages {
                messages,
                conversation_id,
                parent_id,
                model,
                history_and_training_disabled,
            } => {
                let stream = session.post_messages(
                    messages,
                    conversation_id,
                    parent_id,
                    model,
                    true,
                    history_and_training_disabled,
                    DEFAULT_TIMEOUT_SECS,
                );
                pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    last = Some(event?);
                }
            }
            BotOp::ContinueWrite {
                conversation_id,
                parent_id,
                model,
                history_and_training_disabled,
            } => {
                let stream = session.continue_write(
                    conversation_id,
                    parent_id,
                    model,
                    true,
                    history_and_training_disabled,
                    DEFAULT_TIMEOUT_SECS,
                );
                pin_mut!(stream);
                while let Some(event) = stream.next().await {
                    last = Some(event?);
                }
            }
        }
        Ok(last)
    }

    /// Serve one end-user turn, resuming the user's thread when they
    /// have an anchor and recording the new anchor on success.
    ///
    /// Returns `None` when no response could be produced; the edge maps
    /// that to 404.
    pub async fn prompt(
        &self,
        message: &str,
        model: Option<String>,
        openid: Option<&str>,
        new_chat: bool,
        timeout_secs: u64,
    ) -> AppResult<Option<String>> {
        let message = message.trim();

        let anchor = match openid {
            Some(openid) if !new_chat => self.store.get_chat_info(openid).await?,
            _ => None,
        };
        let pinned = anchor.as_ref().map(|a| a.email.clone());

        let op = BotOp::Ask {
            prompt: message.to_string(),
            conversation_id: anchor.as_ref().map(|a| a.conversation_id.clone()),
            parent_id: anchor.as_ref().map(|a| a.parent_id.clone()),
            model,
            history_and_training_disabled: false,
        };

        match self.work(op, pinned.as_deref(), timeout_secs).await {
            Ok(outcome) => {
                if let Some(openid) = openid {
                    self.store
                        .record_turn(
                            &outcome.email,
                            openid,
                            &outcome.event.conversation_id,
                            &outcome.event.parent_id,
                        )
                        .await?;
                }
                Ok(Some(outcome.event.message))
            }
            Err(ScheduleError::ConversationNotFound) => {
                if let Some(openid) = openid {
                    warn!(openid = %openid, "conversation lost upstream; clearing anchor");
                    self.store.new_conversation(openid).await?;
                }
                Ok(None)
            }
            Err(err) => {
                warn!(error = %err, "prompt turn failed");
                Ok(None)
            }
        }
    }

    /// Stateless multiplex for the completion endpoint: no anchor, no
    /// pinning, history disabled.
    pub async fn api_request(
        &self,
        request: &ApiRequest,
        timeout_secs: u64,
    ) -> AppResult<Option<CompletionResponse>> {
        let (messages, model) = openai::translate_request(request);

        let op = BotOp::PostMessages {
            messages,
            conversation_id: None,
            parent_id: None,
            model: Some(model),
            history_and_training_disabled: true,
        };

        match self.work(op, None, timeout_secs).await {
            Ok(outcome) => Ok(Some(openai::completion_from_text(
                &outcome.event.message,
                &request.model,
                outcome.event.finish_details.as_deref(),
            ))),
            Err(err) => {
                warn!(error = %err, "completion turn failed");
                Ok(None)
            }
        }
    }
}
