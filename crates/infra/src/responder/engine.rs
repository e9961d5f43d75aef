use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use sellerdesk_core::{ConversationId, LinkedAccount, LinkedAccountId, MessageMetadata};
use sellerdesk_marketplace::types::{AuthorRole, Message, NewMessage, Thread};
use sellerdesk_marketplace::{ApiError, Marketplace, MarketplaceClient};

use crate::error::StoreError;
use crate::notify::Notifier;
use crate::scope::WorkScope;

const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("linked account {0} not found")]
    AccountNotFound(LinkedAccountId),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one account run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunReport {
    pub inspected: u32,
    pub already_handled: u32,
    pub not_incoming: u32,
    pub handled: u32,
    pub notified: u32,
    pub replied: u32,
    pub failed: u32,
}

enum Outcome {
    AlreadyHandled,
    NotIncoming,
    Handled { notified: bool, replied: bool },
}

/// Inspects conversations of one account per call.
#[derive(Clone)]
pub struct AutoResponder {
    marketplace: Marketplace,
    notifier: Arc<dyn Notifier>,
    page_size: u32,
}

impl AutoResponder {
    pub fn new(marketplace: Marketplace, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            marketplace,
            notifier,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Run the engine for `account_id` inside `scope`.
    ///
    /// Listing failures abort the run. Failures on a single conversation are
    /// logged and counted; that conversation is reconsidered next run.
    #[instrument(skip(self, scope), fields(account_id = %account_id))]
    pub async fn process_account<S: WorkScope>(
        &self,
        scope: &mut S,
        account_id: LinkedAccountId,
    ) -> Result<RunReport, ResponderError> {
        scope.lock_account(account_id).await?;
        let account = scope
            .load_account(account_id)
            .await?
            .ok_or(ResponderError::AccountNotFound(account_id))?;
        let devices = scope.device_tokens(account.tenant_id).await?;

        let mut client = self.marketplace.client_for(account)?;
        let page = client.list_threads(scope, self.page_size, 0).await?;

        let mut report = RunReport::default();
        for thread in &page.threads {
            report.inspected += 1;
            match self.process_thread(scope, &mut client, &devices, thread).await {
                Ok(Outcome::AlreadyHandled) => report.already_handled += 1,
                Ok(Outcome::NotIncoming) => report.not_incoming += 1,
                Ok(Outcome::Handled { notified, replied }) => {
                    report.handled += 1;
                    report.notified += u32::from(notified);
                    report.replied += u32::from(replied);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        account_id = %account_id,
                        conversation_id = %thread.id,
                        error = %e,
                        "conversation processing failed"
                    );
                }
            }
        }

        info!(
            account_id = %account_id,
            inspected = report.inspected,
            handled = report.handled,
            failed = report.failed,
            "account run finished"
        );
        Ok(report)
    }

    async fn process_thread<S: WorkScope>(
        &self,
        scope: &mut S,
        client: &mut MarketplaceClient,
        devices: &[String],
        thread: &Thread,
    ) -> Result<Outcome, ResponderError> {
        let account_id = client.account_id();
        let conversation = ConversationId::new(thread.id.as_str());

        if scope.is_handled(&conversation, account_id).await? {
            return Ok(Outcome::AlreadyHandled);
        }

        // the unread flag lags, so the latest author confirms it
        if thread.read {
            return Ok(Outcome::NotIncoming);
        }
        let messages = client.list_messages(scope, &thread.id, 1, 0).await?;
        let Some(last) = messages.into_iter().next() else {
            return Ok(Outcome::NotIncoming);
        };
        if last.author.role == AuthorRole::Seller {
            return Ok(Outcome::NotIncoming);
        }

        let notified = self.notify(client.account(), devices, thread).await;

        let mut replied = false;
        if let Some(text) = client.account().auto_reply.reply_text().map(str::to_owned) {
            client
                .post_message(scope, &thread.id, &NewMessage::text(text))
                .await?;
            replied = true;
        }

        scope
            .mark_handled(&conversation, account_id, Utc::now())
            .await?;
        debug!(account_id = %account_id, conversation_id = %conversation, notified, replied, "conversation handled");

        let metadata = metadata_for(account_id, conversation, &last, notified, replied);
        if let Err(e) = scope.record_metadata(&metadata).await {
            warn!(
                account_id = %account_id,
                conversation_id = %metadata.conversation_id,
                error = %e,
                "failed to record message metadata"
            );
        }

        Ok(Outcome::Handled { notified, replied })
    }

    /// Returns whether at least one device accepted the push.
    async fn notify(&self, account: &LinkedAccount, devices: &[String], thread: &Thread) -> bool {
        if devices.is_empty() {
            return false;
        }
        let buyer = thread
            .interlocutor
            .as_ref()
            .map(|i| i.login.as_str())
            .unwrap_or("buyer");
        let title = format!("New message from {buyer}");
        let body = format!("Account {}: tap to reply.", account.login);

        let mut delivered = false;
        for device in devices {
            match self.notifier.send(device, &title, &body).await {
                Ok(()) => delivered = true,
                Err(e) => warn!(
                    account_id = %account.id,
                    conversation_id = %thread.id,
                    error = %e,
                    "notification failed"
                ),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for AutoResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoResponder")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

fn metadata_for(
    account_id: LinkedAccountId,
    conversation_id: ConversationId,
    last: &Message,
    notified: bool,
    replied: bool,
) -> MessageMetadata {
    MessageMetadata {
        account_id,
        conversation_id,
        message_id: Some(last.id.clone()),
        author_role: last.author.role.as_str().to_string(),
        notified,
        replied,
        recorded_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::accounts::AccountRepository;
    use crate::idempotency::IdempotencyLog;
    use crate::jobs::TaskQueue;
    use crate::memory::InMemoryStore;
    use crate::notify::InMemoryNotifier;
    use crate::scope::ScopeFactory;
    use crate::testing::{marketplace, seed_account};
    use sellerdesk_core::{AutoReplySettings, TaskStatus};

    struct Harness {
        server: MockServer,
        store: InMemoryStore,
        notifier: Arc<InMemoryNotifier>,
        responder: AutoResponder,
        account: LinkedAccount,
    }

    async fn harness(auto_reply: AutoReplySettings, notifier: InMemoryNotifier) -> Harness {
        let server = MockServer::start().await;
        let mp = marketplace(&server.uri());
        let store = InMemoryStore::new();
        let account = seed_account(&store, &mp, "shop").await;
        store.update_auto_reply(account.id, &auto_reply).await.unwrap();
        store.register_device(account.tenant_id, "device-1").await.unwrap();

        let notifier = Arc::new(notifier);
        let responder = AutoResponder::new(mp, notifier.clone());
        Harness {
            server,
            store,
            notifier,
            responder,
            account,
        }
    }

    async fn mount_threads(server: &MockServer, threads: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": threads })))
            .mount(server)
            .await;
    }

    async fn mount_last_message(server: &MockServer, thread: &str, role: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/messaging/threads/{thread}/messages")))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": format!("{thread}-m1"), "author": { "login": "x", "role": role } }]
            })))
            .mount(server)
            .await;
    }

    async fn run(h: &Harness) -> RunReport {
        h.store.enqueue_if_absent(h.account.id).await.unwrap();
        let task = h.store.claim_next().await.unwrap().unwrap();
        let mut scope = h.store.begin().await.unwrap();
        let report = h
            .responder
            .process_account(&mut scope, h.account.id)
            .await
            .unwrap();
        scope.complete(task.id).await.unwrap();
        assert_eq!(h.store.task(task.id).unwrap().status, TaskStatus::Done);
        report
    }

    #[tokio::test]
    async fn buyer_message_is_notified_replied_and_logged() {
        let h = harness(AutoReplySettings::enabled("Thanks!"), InMemoryNotifier::new()).await;
        mount_threads(
            &h.server,
            json!([{ "id": "t1", "read": false, "interlocutor": { "login": "buyer1" } }]),
        )
        .await;
        mount_last_message(&h.server, "t1", "BUYER").await;
        Mock::given(method("POST"))
            .and(path("/messaging/threads/t1/messages"))
            .and(body_json(json!({ "text": "Thanks!", "type": "REGULAR", "attachment": null })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "reply-1", "author": { "login": "shop", "role": "SELLER" }
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let report = run(&h).await;

        assert_eq!(report.handled, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.replied, 1);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].device_token, "device-1");
        assert_eq!(sent[0].title, "New message from buyer1");
        assert_eq!(sent[0].body, "Account shop: tap to reply.");
        assert_eq!(
            h.store.handled_conversations(h.account.id),
            vec![ConversationId::new("t1")]
        );
        let metadata = h.store.metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].author_role, "BUYER");
        assert!(metadata[0].replied);
    }

    #[tokio::test]
    async fn disabled_auto_reply_still_notifies_and_logs() {
        let h = harness(AutoReplySettings::disabled(), InMemoryNotifier::new()).await;
        mount_threads(&h.server, json!([{ "id": "t1", "read": false }])).await;
        mount_last_message(&h.server, "t1", "BUYER").await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&h.server)
            .await;

        let report = run(&h).await;

        assert_eq!(report.replied, 0);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.notifier.sent()[0].title, "New message from buyer");
        assert_eq!(h.store.handled_conversations(h.account.id).len(), 1);
    }

    #[tokio::test]
    async fn seller_authored_last_message_is_left_alone() {
        let h = harness(AutoReplySettings::enabled("Thanks!"), InMemoryNotifier::new()).await;
        mount_threads(&h.server, json!([{ "id": "t1", "read": false }])).await;
        mount_last_message(&h.server, "t1", "SELLER").await;

        let report = run(&h).await;

        assert_eq!(report.not_incoming, 1);
        assert!(h.notifier.sent().is_empty());
        assert!(h.store.handled_conversations(h.account.id).is_empty());
    }

    #[tokio::test]
    async fn read_threads_are_not_inspected_further() {
        let h = harness(AutoReplySettings::enabled("Thanks!"), InMemoryNotifier::new()).await;
        mount_threads(&h.server, json!([{ "id": "t1", "read": true }])).await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads/t1/messages"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;

        let report = run(&h).await;
        assert_eq!(report.not_incoming, 1);
    }

    #[tokio::test]
    async fn second_run_does_not_repeat_side_effects() {
        let h = harness(AutoReplySettings::enabled("Thanks!"), InMemoryNotifier::new()).await;
        mount_threads(&h.server, json!([{ "id": "t1", "read": false }])).await;
        mount_last_message(&h.server, "t1", "BUYER").await;
        Mock::given(method("POST"))
            .and(path("/messaging/threads/t1/messages"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "reply-1", "author": { "role": "SELLER" }
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let first = run(&h).await;
        let second = run(&h).await;

        assert_eq!(first.handled, 1);
        assert_eq!(second.handled, 0);
        assert_eq!(second.already_handled, 1);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn one_failing_conversation_does_not_stop_the_rest() {
        let h = harness(AutoReplySettings::disabled(), InMemoryNotifier::new()).await;
        mount_threads(
            &h.server,
            json!([{ "id": "broken", "read": false }, { "id": "t2", "read": false }]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads/broken/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&h.server)
            .await;
        mount_last_message(&h.server, "t2", "BUYER").await;

        let report = run(&h).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.handled, 1);
        assert_eq!(
            h.store.handled_conversations(h.account.id),
            vec![ConversationId::new("t2")]
        );
    }

    #[tokio::test]
    async fn notification_failure_is_not_fatal() {
        let h = harness(AutoReplySettings::disabled(), InMemoryNotifier::failing()).await;
        mount_threads(&h.server, json!([{ "id": "t1", "read": false }])).await;
        mount_last_message(&h.server, "t1", "BUYER").await;

        let report = run(&h).await;

        assert_eq!(report.handled, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(h.store.handled_conversations(h.account.id).len(), 1);
    }

    #[tokio::test]
    async fn malformed_listing_aborts_the_run() {
        let h = harness(AutoReplySettings::disabled(), InMemoryNotifier::new()).await;
        Mock::given(method("GET"))
            .and(path("/messaging/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "threads": [{ "id": 5 }] })))
            .mount(&h.server)
            .await;

        let mut scope = h.store.begin().await.unwrap();
        let err = h
            .responder
            .process_account(&mut scope, h.account.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ResponderError::Api(ApiError::Validation(_))));
        assert!(!scope.is_handled(&ConversationId::new("5"), h.account.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_account_is_reported() {
        let h = harness(AutoReplySettings::disabled(), InMemoryNotifier::new()).await;
        let mut scope = h.store.begin().await.unwrap();
        let err = h
            .responder
            .process_account(&mut scope, LinkedAccountId::new(404))
            .await
            .unwrap_err();
        assert!(matches!(err, ResponderError::AccountNotFound(_)));
    }
}
