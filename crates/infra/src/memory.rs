//! In-memory backend for tests/dev.
//!
//! One `InMemoryStore` holds every table, so a scope opened from it sees the same
//! accounts the repository and queue see. Scopes buffer their writes and apply
//! them only on `complete`, matching the transactional backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use sellerdesk_core::{
    AutoReplySettings, ConversationId, LinkedAccount, LinkedAccountId, MessageMetadata,
    NewLinkedAccount, SealedTokens, Task, TaskId, TaskStatus, TenantId,
};
use sellerdesk_marketplace::{CredentialStore, CredentialStoreError};

use crate::accounts::AccountRepository;
use crate::error::StoreError;
use crate::idempotency::IdempotencyLog;
use crate::jobs::{TaskQueue, TaskStats};
use crate::retention::RetentionSweeper;
use crate::scope::{ScopeFactory, WorkScope};

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<LinkedAccountId, LinkedAccount>,
    grants: HashSet<(TenantId, LinkedAccountId)>,
    devices: HashMap<TenantId, Vec<String>>,
    tasks: BTreeMap<TaskId, Task>,
    log: HashMap<(ConversationId, LinkedAccountId), DateTime<Utc>>,
    metadata: Vec<MessageMetadata>,
    next_account_id: i64,
    next_task_id: i64,
}

impl Tables {
    fn has_active_task(&self, account_id: LinkedAccountId) -> bool {
        self.tasks
            .values()
            .any(|t| t.account_id == account_id && t.status.is_active())
    }

    fn finish(&mut self, task_id: TaskId, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            // terminal tasks stay as they are
            let _ = task.transition(status, Utc::now());
        }
    }

    fn delete_account(&mut self, id: LinkedAccountId) -> bool {
        let existed = self.accounts.remove(&id).is_some();
        self.grants.retain(|(_, account)| *account != id);
        self.tasks.retain(|_, t| t.account_id != id);
        self.log.retain(|(_, account), _| *account != id);
        self.metadata.retain(|m| m.account_id != id);
        existed
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    account_locks: Arc<Mutex<HashMap<LinkedAccountId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn account_lock(&self, id: LinkedAccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.account_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    /// Snapshot of a task (tests/diagnostics).
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.tables().tasks.get(&id).cloned()
    }

    /// All tasks of an account, oldest first.
    pub fn tasks_for(&self, account_id: LinkedAccountId) -> Vec<Task> {
        self.tables()
            .tasks
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn handled_conversations(&self, account_id: LinkedAccountId) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self
            .tables()
            .log
            .keys()
            .filter(|(_, account)| *account == account_id)
            .map(|(conversation, _)| conversation.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn metadata(&self) -> Vec<MessageMetadata> {
        self.tables().metadata.clone()
    }

    /// Seed an idempotency marker with an explicit timestamp.
    pub fn insert_log_entry(
        &self,
        conversation_id: ConversationId,
        account_id: LinkedAccountId,
        handled_at: DateTime<Utc>,
    ) {
        self.tables().log.insert((conversation_id, account_id), handled_at);
    }

    /// Seed a metadata row as-is.
    pub fn insert_metadata(&self, metadata: MessageMetadata) {
        self.tables().metadata.push(metadata);
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables();
        f.debug_struct("InMemoryStore")
            .field("accounts", &tables.accounts.len())
            .field("tasks", &tables.tasks.len())
            .field("log", &tables.log.len())
            .finish()
    }
}

#[async_trait]
impl TaskQueue for InMemoryStore {
    async fn enqueue_if_absent(&self, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        if !tables.accounts.contains_key(&account_id) {
            return Err(StoreError::not_found(format!("linked account {account_id}")));
        }
        if tables.has_active_task(account_id) {
            return Ok(false);
        }
        tables.next_task_id += 1;
        let id = TaskId::new(tables.next_task_id);
        tables.tasks.insert(id, Task::pending(id, account_id, Utc::now()));
        Ok(true)
    }

    async fn claim_next(&self) -> Result<Option<Task>, StoreError> {
        let mut tables = self.tables();
        let next = tables
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(task) = tables.tasks.get_mut(&id) else {
            return Ok(None);
        };
        task.transition(TaskStatus::Processing, Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(Some(task.clone()))
    }

    async fn mark_done(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.tables().finish(task_id, TaskStatus::Done);
        Ok(())
    }

    async fn mark_failed(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.tables().finish(task_id, TaskStatus::Failed);
        Ok(())
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let tables = self.tables();
        let mut stats = TaskStats::default();
        for task in tables.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let mut reclaimed = 0;
        for task in tables.tasks.values_mut() {
            let stale = task.status == TaskStatus::Processing
                && task.claimed_at.is_some_and(|at| at < older_than);
            if stale {
                task.status = TaskStatus::Pending;
                task.claimed_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn list_account_ids(&self) -> Result<Vec<LinkedAccountId>, StoreError> {
        Ok(self.tables().accounts.keys().copied().collect())
    }

    async fn get(&self, id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError> {
        Ok(self.tables().accounts.get(&id).cloned())
    }

    async fn link_account(&self, new: NewLinkedAccount) -> Result<LinkedAccount, StoreError> {
        let mut tables = self.tables();
        let existing = tables
            .accounts
            .values_mut()
            .find(|a| a.tenant_id == new.tenant_id && a.external_user_id == new.external_user_id);

        if let Some(account) = existing {
            account.login = new.login;
            account.tokens = new.tokens;
            return Ok(account.clone());
        }

        tables.next_account_id += 1;
        let account = LinkedAccount {
            id: LinkedAccountId::new(tables.next_account_id),
            tenant_id: new.tenant_id,
            external_user_id: new.external_user_id,
            login: new.login,
            tokens: new.tokens,
            auto_reply: AutoReplySettings::disabled(),
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn update_auto_reply(
        &self,
        id: LinkedAccountId,
        settings: &AutoReplySettings,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("linked account {id}")))?;
        account.auto_reply = settings.clone();
        Ok(())
    }

    async fn delete(&self, id: LinkedAccountId) -> Result<bool, StoreError> {
        Ok(self.tables().delete_account(id))
    }

    async fn accounts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<LinkedAccount>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .accounts
            .values()
            .filter(|a| a.tenant_id == tenant_id || tables.grants.contains(&(tenant_id, a.id)))
            .cloned()
            .collect())
    }

    async fn grant_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if !tables.accounts.contains_key(&account_id) {
            return Err(StoreError::not_found(format!("linked account {account_id}")));
        }
        tables.grants.insert((tenant_id, account_id));
        Ok(())
    }

    async fn has_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        let tables = self.tables();
        let owner = tables
            .accounts
            .get(&account_id)
            .is_some_and(|a| a.tenant_id == tenant_id);
        Ok(owner || tables.grants.contains(&(tenant_id, account_id)))
    }

    async fn register_device(&self, tenant_id: TenantId, device_token: &str) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let devices = tables.devices.entry(tenant_id).or_default();
        if !devices.iter().any(|d| d == device_token) {
            devices.push(device_token.to_string());
            devices.sort();
        }
        Ok(())
    }
}

#[async_trait]
impl RetentionSweeper for InMemoryStore {
    async fn sweep_idempotency_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let before = tables.log.len();
        tables.log.retain(|_, handled_at| *handled_at >= cutoff);
        Ok((before - tables.log.len()) as u64)
    }

    async fn sweep_message_metadata(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        let before = tables.metadata.len();
        tables.metadata.retain(|m| m.recorded_at >= cutoff);
        Ok((before - tables.metadata.len()) as u64)
    }
}

#[async_trait]
impl ScopeFactory for InMemoryStore {
    type Scope = MemoryScope;

    async fn begin(&self) -> Result<MemoryScope, StoreError> {
        Ok(MemoryScope {
            store: self.clone(),
            tokens: HashMap::new(),
            handled: Vec::new(),
            metadata: Vec::new(),
            lock: None,
            poisoned: false,
        })
    }
}

/// Buffered unit of work over an [`InMemoryStore`].
pub struct MemoryScope {
    store: InMemoryStore,
    tokens: HashMap<LinkedAccountId, SealedTokens>,
    handled: Vec<(ConversationId, LinkedAccountId, DateTime<Utc>)>,
    metadata: Vec<MessageMetadata>,
    lock: Option<OwnedMutexGuard<()>>,
    poisoned: bool,
}

#[async_trait]
impl WorkScope for MemoryScope {
    async fn lock_account(&mut self, account_id: LinkedAccountId) -> Result<(), StoreError> {
        let lock = self.store.account_lock(account_id);
        self.lock = Some(lock.lock_owned().await);
        Ok(())
    }

    async fn load_account(&mut self, account_id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError> {
        let mut account = self.store.tables().accounts.get(&account_id).cloned();
        if let (Some(account), Some(tokens)) = (account.as_mut(), self.tokens.get(&account_id)) {
            account.tokens = tokens.clone();
        }
        Ok(account)
    }

    async fn device_tokens(&mut self, tenant_id: TenantId) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .tables()
            .devices
            .get(&tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_metadata(&mut self, metadata: &MessageMetadata) -> Result<(), StoreError> {
        self.metadata.push(metadata.clone());
        Ok(())
    }

    async fn complete(self, task_id: TaskId) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::Poisoned);
        }

        let mut tables = self.store.tables();
        for (account_id, tokens) in self.tokens {
            if let Some(account) = tables.accounts.get_mut(&account_id) {
                account.tokens = tokens;
            }
        }
        for (conversation_id, account_id, handled_at) in self.handled {
            tables.log.entry((conversation_id, account_id)).or_insert(handled_at);
        }
        tables.metadata.extend(self.metadata);
        tables.finish(task_id, TaskStatus::Done);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl IdempotencyLog for MemoryScope {
    async fn is_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
    ) -> Result<bool, StoreError> {
        let pending = self
            .handled
            .iter()
            .any(|(c, a, _)| c == conversation_id && *a == account_id);
        Ok(pending
            || self
                .store
                .tables()
                .log
                .contains_key(&(conversation_id.clone(), account_id)))
    }

    async fn mark_handled(
        &mut self,
        conversation_id: &ConversationId,
        account_id: LinkedAccountId,
        handled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.handled.push((conversation_id.clone(), account_id, handled_at));
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryScope {
    async fn store_tokens(
        &mut self,
        account_id: LinkedAccountId,
        tokens: &SealedTokens,
    ) -> Result<(), CredentialStoreError> {
        if !self.store.tables().accounts.contains_key(&account_id) {
            self.poisoned = true;
            return Err(CredentialStoreError(format!("linked account {account_id} not found")));
        }
        self.tokens.insert(account_id, tokens.clone());
        Ok(())
    }
}
