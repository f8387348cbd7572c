//! Token lifecycle worker
//!
//! Two cooperating loops keep the pool healthy without hammering the
//! upstream login endpoint. The health-check loop inspects every
//! account's access token hourly (and on demand, right after an account
//! is added), evicting sessions whose token is about to expire and
//! queueing them for refresh. The login loop wakes every one to five
//! minutes and refreshes at most one account per wake-up; that throttle
//! is the primary defense against upstream anti-abuse.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::crypto::Sealer;
use crate::jwt;
use crate::pool::scheduler::BotPool;
use crate::store::accounts::AccountRow;
use crate::store::Store;
use crate::upstream::{ArkoseClient, AuthClient, BotSession};

/// Health-check sweep period
const HEALTH_INTERVAL: Duration = Duration::from_secs(3600);

/// Tokens with less than this left to live are evicted and refreshed
const REFRESH_HORIZON_SECS: i64 = 3600;

/// The login loop only touches entries expiring within one day
const LOGIN_WINDOW_SECS: i64 = 86400;

/// Commands the edge can inject into the health loop
#[derive(Debug)]
pub enum LifecycleCommand {
    CheckAccount(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BacklogEntry {
    email: String,
    expires_in: i64,
}

/// Keeps every pooled session's token fresh
pub struct LifecycleWorker {
    pool: Arc<BotPool>,
    store: Arc<Store>,
    sealer: Sealer,
    auth: AuthClient,
    arkose: ArkoseClient,
    base_url: String,
    /// Accounts awaiting re-authentication, sorted by urgency
    backlog: Mutex<Vec<BacklogEntry>>,
}

impl LifecycleWorker {
    pub fn new(
        pool: Arc<BotPool>,
        store: Arc<Store>,
        sealer: Sealer,
        auth: AuthClient,
        arkose: ArkoseClient,
        base_url: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            store,
            sealer,
            auth,
            arkose,
            base_url: base_url.to_string(),
            backlog: Mutex::new(Vec::new()),
        })
    }

    /// Spawn both loops. The first health tick fires immediately, so
    /// startup populates the pool from the account table.
    pub fn spawn(
        self: &Arc<Self>,
    ) -> (
        mpsc::Sender<LifecycleCommand>,
        JoinHandle<()>,
        JoinHandle<()>,
    ) {
        let (tx, mut rx) = mpsc::channel(16);

        let worker = self.clone();
        let health = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => worker.health_sweep().await,
                    Some(command) = rx.recv() => match command {
                        LifecycleCommand::CheckAccount(email) => {
                            worker.check_one(&email).await;
                        }
                    },
                }
            }
        });

        let worker = self.clone();
        let login = tokio::spawn(async move {
            loop {
                let wait = rand::rng().random_range(60..=300);
                tokio::time::sleep(Duration::from_secs(wait)).await;
                worker.login_once().await;
            }
        });

        (tx, health, login)
    }

    /// Inspect every active account and re-sort the backlog so the most
    /// urgent refresh goes first.
    async fn health_sweep(&self) {
        let accounts = match self.store.active_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                error!(error = %err, "health sweep cannot list accounts");
                return;
            }
        };

        info!(accounts = accounts.len(), "running health sweep");
        for account in &accounts {
            self.check_account(account).await;
        }
        self.sort_backlog().await;
    }

    /// On-demand check for a single account (admin just added it).
    async fn check_one(&self, email: &str) {
        match self.store.account(email).await {
            Ok(Some(account)) => {
                self.check_account(&account).await;
                self.sort_backlog().await;
            }
            Ok(None) => warn!(email = %email, "check requested for unknown account"),
            Err(err) => error!(email = %email, error = %err, "account lookup failed"),
        }
    }

    async fn check_account(&self, account: &AccountRow) {
        let email = &account.email;
        let token = account.access_token.clone().unwrap_or_default();

        if token.is_empty() {
            self.enqueue(email, 0).await;
            self.pool.remove(email).await;
            return;
        }

        match jwt::remaining_seconds(&token) {
            Err(err) => {
                warn!(email = %email, error = %err, "stored token unreadable");
                self.enqueue(email, 0).await;
                self.pool.remove(email).await;
            }
            Ok(remaining) if remaining < REFRESH_HORIZON_SECS => {
                info!(email = %email, remaining, "token near expiry; scheduling refresh");
                self.enqueue(email, remaining).await;
                // No further requests may ride a near-expired token.
                self.pool.remove(email).await;
            }
            Ok(_) => {
                let refreshed = self
                    .pool
                    .update_credentials(email, Some(&token), account.puid.as_deref())
                    .await;
                if !refreshed {
                    self.admit(email, &token, account.puid.clone()).await;
                }
            }
        }
    }

    /// Construct a session and put it in rotation.
    async fn admit(&self, email: &str, token: &str, puid: Option<String>) {
        match BotSession::new(
            email,
            token,
            puid,
            &self.base_url,
            Some(self.arkose.clone()),
        ) {
            Ok(session) => {
                self.pool.insert(Arc::new(session)).await;
                info!(email = %email, "session joined the pool");
            }
            Err(err) => {
                warn!(email = %email, error = %err, "session construction refused token");
                self.enqueue(email, 0).await;
                // Keep the most urgent entry first for the next login pass.
                self.sort_backlog().await;
            }
        }
    }

    /// Refresh at most one backlog entry. Errors leave the entry in
    /// place for the next wake-up.
    async fn login_once(&self) {
        let mut backlog = self.backlog.lock().await;
        let Some(index) = backlog
            .iter()
            .position(|entry| entry.expires_in <= LOGIN_WINDOW_SECS)
        else {
            return;
        };
        let email = backlog[index].email.clone();

        let account = match self.store.account(&email).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(email = %email, "backlogged account vanished");
                backlog.remove(index);
                return;
            }
            Err(err) => {
                error!(email = %email, error = %err, "account lookup failed");
                return;
            }
        };

        let password = match self.sealer.open(&account.password) {
            Ok(password) => password,
            Err(err) => {
                error!(email = %email, error = %err, "cannot unseal password");
                return;
            }
        };

        match self.auth.login(&email, &password).await {
            Ok(token) => {
                if let Err(err) = self.store.save_access_token(&email, &token).await {
                    error!(email = %email, error = %err, "cannot persist refreshed token");
                    return;
                }
                backlog.remove(index);
                drop(backlog);

                // The fresh login invalidates the old affinity cookie.
                self.pool.remove(&email).await;
                self.admit(&email, &token, None).await;
                info!(email = %email, "access token refreshed");
            }
            Err(err) => {
                warn!(email = %email, error = %err, "login attempt failed; will retry");
            }
        }
    }

    /// Insert or update a backlog entry for `email`.
    async fn enqueue(&self, email: &str, expires_in: i64) {
        let mut backlog = self.backlog.lock().await;
        match backlog.iter_mut().find(|entry| entry.email == email) {
            Some(entry) => entry.expires_in = expires_in,
            None => backlog.push(BacklogEntry {
                email: email.to_string(),
                expires_in,
            }),
        }
    }

    async fn sort_backlog(&self) {
        self.backlog
            .lock()
            .await
            .sort_by_key(|entry| entry.expires_in);
    }
}
