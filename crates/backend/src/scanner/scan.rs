//! The scan cycle: reconcile every connected mailbox's unread set against
//! the activity log, one account and one message at a time.
//!
//! Failure domains are nested. A message failure never aborts its account,
//! an account failure never aborts the cycle, and only an unreachable
//! credential store aborts the cycle before any provider call is made.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

use shared_types::{ActivityStatus, Credential};

use super::ports::{ActivityLog, CredentialStore, Mailbox, MailboxConnector, ReplyGenerator};
use super::{InboxMessage, ScanError};
use crate::config::ScanConfig;
use crate::models::NewActivityRecord;
use crate::services::generator::build_reply_prompt;

/// Result of asking for a scan cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the run lock; this request was dropped, not queued.
    AlreadyRunning,
}

/// Counters for one completed cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub accounts_scanned: usize,
    pub accounts_skipped: usize,
    pub messages_processed: usize,
    pub replies_sent: usize,
    pub replies_drafted: usize,
    pub generation_failures: usize,
    pub delivery_failures: usize,
    pub message_errors: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accounts scanned ({} skipped), {} messages: {} sent, {} drafted, {} generation failures, {} delivery failures, {} errors",
            self.accounts_scanned,
            self.accounts_skipped,
            self.messages_processed,
            self.replies_sent,
            self.replies_drafted,
            self.generation_failures,
            self.delivery_failures,
            self.message_errors,
        )
    }
}

/// Drives scan cycles over the collaborator ports.
///
/// One instance is shared between the interval task and the manual trigger
/// handler; the internal run lock serializes the two.
pub struct Scanner {
    credentials: Arc<dyn CredentialStore>,
    activity: Arc<dyn ActivityLog>,
    connector: Arc<dyn MailboxConnector>,
    generator: Arc<dyn ReplyGenerator>,
    config: ScanConfig,
    run_lock: Mutex<()>,
}

impl Scanner {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        activity: Arc<dyn ActivityLog>,
        connector: Arc<dyn MailboxConnector>,
        generator: Arc<dyn ReplyGenerator>,
        config: ScanConfig,
    ) -> Self {
        Self {
            credentials,
            activity,
            connector,
            generator,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Run scan cycles on the configured interval until the process exits.
    pub async fn run_forever(self: Arc<Self>) {
        tracing::info!(
            "Starting inbox scan task (interval: {:?}, page size: {}, auto-send: {})",
            self.config.interval,
            self.config.page_size,
            self.config.auto_send
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;

            match self.run_cycle().await {
                Ok(CycleOutcome::Completed(report)) => {
                    if report.messages_processed > 0 || report.accounts_skipped > 0 {
                        tracing::info!("Scan cycle complete: {report}");
                    } else {
                        tracing::debug!("Scan cycle complete: {report}");
                    }
                }
                Ok(CycleOutcome::AlreadyRunning) => {
                    tracing::debug!("Previous scan cycle still running, skipping tick");
                }
                Err(e) => {
                    tracing::error!("Scan cycle failed: {}", e);
                }
            }
        }
    }

    /// Execute one full cycle across all connected accounts.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ScanError> {
        // Timer ticks and manual triggers share this lock; a request
        // arriving while a cycle is in flight is dropped, not queued.
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(CycleOutcome::AlreadyRunning),
        };

        // Nothing has been mutated yet, so an unreachable store simply ends
        // the cycle here.
        let credentials = self.credentials.list_connected().await?;
        tracing::debug!("Scanning {} connected accounts", credentials.len());

        let mut report = CycleReport::default();
        for credential in &credentials {
            match self.scan_account(credential, &mut report).await {
                Ok(()) => report.accounts_scanned += 1,
                Err(e) => {
                    report.accounts_skipped += 1;
                    tracing::warn!("Skipping account {}: {}", credential.email_address, e);
                }
            }
        }

        Ok(CycleOutcome::Completed(report))
    }

    async fn scan_account(
        &self,
        credential: &Credential,
        report: &mut CycleReport,
    ) -> Result<(), ScanError> {
        let mailbox = self.bounded(self.connector.connect(credential)).await?;
        let message_ids = self
            .bounded(mailbox.list_unread(self.config.page_size))
            .await?;

        tracing::debug!(
            "{}: {} unread messages",
            mailbox.account_email(),
            message_ids.len()
        );

        for message_id in message_ids {
            match self
                .process_message(credential, mailbox.as_ref(), &message_id)
                .await
            {
                Ok(status) => {
                    report.messages_processed += 1;
                    match status {
                        ActivityStatus::Sent => report.replies_sent += 1,
                        ActivityStatus::Drafted => report.replies_drafted += 1,
                        ActivityStatus::Failed => report.generation_failures += 1,
                        ActivityStatus::DeliveryFailed => report.delivery_failures += 1,
                    }
                }
                Err(e) => {
                    report.message_errors += 1;
                    tracing::warn!(
                        "Failed to process message {} for {}: {}",
                        message_id,
                        credential.email_address,
                        e
                    );
                }
            }
        }

        Ok(())
    }

    /// Handle a single unread message: fetch, generate, deliver, record,
    /// mark read. Ordering contract: the audit record is appended before the
    /// unread flag is touched, and a message whose generation failed keeps
    /// its unread flag so the next cycle retries it.
    async fn process_message(
        &self,
        credential: &Credential,
        mailbox: &dyn Mailbox,
        message_id: &str,
    ) -> Result<ActivityStatus, ScanError> {
        let message = self.bounded(mailbox.fetch(message_id)).await?;
        let prompt = build_reply_prompt(credential, &message);

        let reply = match self.bounded(self.generator.generate(&prompt)).await {
            Ok(text) => text,
            Err(e) => {
                self.activity
                    .append(record(
                        credential,
                        &message,
                        ActivityStatus::Failed,
                        None,
                        Some(e.to_string()),
                    ))
                    .await?;
                // Unread flag stays set: the message is retried next cycle.
                return Ok(ActivityStatus::Failed);
            }
        };

        let (status, detail) = if self.config.auto_send {
            match self.bounded(mailbox.send_reply(&message, &reply)).await {
                Ok(()) => (ActivityStatus::Sent, None),
                Err(e) => (ActivityStatus::DeliveryFailed, Some(e.to_string())),
            }
        } else {
            (ActivityStatus::Drafted, None)
        };

        self.activity
            .append(record(credential, &message, status, Some(reply), detail))
            .await?;

        // Delivery failures are terminal: the message is still marked read
        // so the next cycle does not send a second reply.
        if let Err(e) = self.bounded(mailbox.mark_read(&message.id)).await {
            tracing::warn!(
                "Failed to mark {} read for {}: {} (message will be rescanned)",
                message.id,
                credential.email_address,
                e
            );
        }

        Ok(status)
    }

    /// Apply the per-call timeout; a hung collaborator becomes an ordinary
    /// transient failure instead of stalling the cycle.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, ScanError>>,
    ) -> Result<T, ScanError> {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::Transient("provider call timed out".to_string())),
        }
    }
}

fn record(
    credential: &Credential,
    message: &InboxMessage,
    status: ActivityStatus,
    reply_text: Option<String>,
    detail: Option<String>,
) -> NewActivityRecord {
    NewActivityRecord {
        account_email: credential.email_address.clone(),
        message_id: message.id.clone(),
        subject: message.subject.clone(),
        reply_text,
        status: status.as_str().to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};
    use uuid::Uuid;

    fn credential(email: &str, language: Option<&str>, tone: Option<&str>) -> Credential {
        Credential {
            id: Uuid::new_v4(),
            email_address: email.to_string(),
            access_token: Some("ya29.token".to_string()),
            refresh_token: "1//refresh".to_string(),
            token_expires_at: None,
            preferred_language: language.map(String::from),
            preferred_tone: tone.map(String::from),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn message(id: &str, subject: &str, snippet: &str) -> InboxMessage {
        InboxMessage {
            id: id.to_string(),
            thread_id: format!("thread-{id}"),
            subject: subject.to_string(),
            from: "Jane Doe <jane@example.com>".to_string(),
            message_id_header: Some(format!("<{id}@mail>")),
            snippet: snippet.to_string(),
        }
    }

    fn test_config(auto_send: bool) -> ScanConfig {
        ScanConfig {
            interval: Duration::from_secs(1),
            page_size: 5,
            call_timeout: Duration::from_secs(5),
            auto_send,
        }
    }

    struct MockStore {
        credentials: Vec<Credential>,
        fail_listing: bool,
    }

    #[async_trait]
    impl CredentialStore for MockStore {
        async fn list_connected(&self) -> Result<Vec<Credential>, ScanError> {
            if self.fail_listing {
                return Err(ScanError::StoreUnavailable("connection refused".to_string()));
            }
            Ok(self.credentials.clone())
        }

        async fn save_access_token(
            &self,
            _email: &str,
            _access_token: &str,
            _expires_at: Option<chrono::DateTime<Utc>>,
        ) -> Result<(), ScanError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockLog {
        records: StdMutex<Vec<NewActivityRecord>>,
    }

    impl MockLog {
        fn records(&self) -> Vec<NewActivityRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActivityLog for MockLog {
        async fn append(&self, record: NewActivityRecord) -> Result<(), ScanError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    /// Lets a test hold a cycle inside `list_unread` until released.
    #[derive(Clone)]
    struct ListGate {
        entered: Arc<Notify>,
        release: Arc<Semaphore>,
    }

    impl ListGate {
        fn new() -> Self {
            Self {
                entered: Arc::new(Notify::new()),
                release: Arc::new(Semaphore::new(0)),
            }
        }
    }

    #[derive(Clone)]
    struct MockMailbox {
        email: String,
        messages: Vec<InboxMessage>,
        fail_send: bool,
        gate: Option<ListGate>,
        marked_read: Arc<StdMutex<Vec<String>>>,
        sent: Arc<StdMutex<Vec<(String, String)>>>,
    }

    impl MockMailbox {
        fn new(email: &str, messages: Vec<InboxMessage>) -> Self {
            Self {
                email: email.to_string(),
                messages,
                fail_send: false,
                gate: None,
                marked_read: Arc::new(StdMutex::new(Vec::new())),
                sent: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Mailbox for MockMailbox {
        fn account_email(&self) -> &str {
            &self.email
        }

        async fn list_unread(&self, max: u32) -> Result<Vec<String>, ScanError> {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.acquire().await.unwrap().forget();
            }
            Ok(self
                .messages
                .iter()
                .take(max as usize)
                .map(|m| m.id.clone())
                .collect())
        }

        async fn fetch(&self, message_id: &str) -> Result<InboxMessage, ScanError> {
            self.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| ScanError::Transient("message vanished".to_string()))
        }

        async fn send_reply(
            &self,
            original: &InboxMessage,
            body: &str,
        ) -> Result<(), ScanError> {
            if self.fail_send {
                return Err(ScanError::DeliveryFailed("smtp rejected".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((original.id.clone(), body.to_string()));
            Ok(())
        }

        async fn mark_read(&self, message_id: &str) -> Result<(), ScanError> {
            self.marked_read.lock().unwrap().push(message_id.to_string());
            Ok(())
        }
    }

    struct MockConnector {
        mailboxes: HashMap<String, MockMailbox>,
        invalid: HashSet<String>,
        connects: AtomicUsize,
    }

    impl MockConnector {
        fn new(mailboxes: Vec<MockMailbox>) -> Self {
            Self {
                mailboxes: mailboxes
                    .into_iter()
                    .map(|m| (m.email.clone(), m))
                    .collect(),
                invalid: HashSet::new(),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MailboxConnector for MockConnector {
        async fn connect(&self, credential: &Credential) -> Result<Box<dyn Mailbox>, ScanError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.invalid.contains(&credential.email_address) {
                return Err(ScanError::CredentialInvalid);
            }
            let mailbox = self
                .mailboxes
                .get(&credential.email_address)
                .cloned()
                .ok_or_else(|| ScanError::Transient("no such mailbox".to_string()))?;
            Ok(Box::new(mailbox))
        }
    }

    struct MockGenerator {
        reply: String,
        fail_all: bool,
        fail_when_contains: Option<String>,
        prompts: StdMutex<Vec<String>>,
    }

    impl MockGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail_all: false,
                fail_when_contains: None,
                prompts: StdMutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail_all: true,
                ..Self::replying("")
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplyGenerator for MockGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, ScanError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let fail = self.fail_all
                || self
                    .fail_when_contains
                    .as_deref()
                    .is_some_and(|needle| prompt.contains(needle));
            if fail {
                return Err(ScanError::GenerationUnavailable("model offline".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    fn scanner(
        store: MockStore,
        connector: Arc<MockConnector>,
        generator: Arc<MockGenerator>,
        log: Arc<MockLog>,
        auto_send: bool,
    ) -> Arc<Scanner> {
        Arc::new(Scanner::new(
            Arc::new(store),
            log,
            connector,
            generator,
            test_config(auto_send),
        ))
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => report,
            CycleOutcome::AlreadyRunning => panic!("cycle did not run"),
        }
    }

    #[tokio::test]
    async fn empty_inbox_appends_no_records() {
        let mailbox = MockMailbox::new("a@example.com", vec![]);
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let generator = Arc::new(MockGenerator::replying("hello"));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            generator.clone(),
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.accounts_scanned, 1);
        assert_eq!(report.messages_processed, 0);
        assert!(log.records().is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn reply_flows_through_provider_with_stored_preferences() {
        let mailbox = MockMailbox::new(
            "a@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        let marked_read = mailbox.marked_read.clone();
        let sent = mailbox.sent.clone();
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let generator = Arc::new(MockGenerator::replying("Happy to reschedule."));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", Some("fr"), Some("friendly"))],
                fail_listing: false,
            },
            connector,
            generator.clone(),
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.replies_sent, 1);

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("friendly"));
        assert!(prompts[0].contains("\"fr\""));
        assert!(prompts[0].contains("Can we reschedule?"));

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "sent");
        assert_eq!(records[0].message_id, "m1");
        assert_eq!(records[0].reply_text.as_deref(), Some("Happy to reschedule."));

        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(*marked_read.lock().unwrap(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn generation_failure_logs_once_and_leaves_message_unread() {
        let mailbox = MockMailbox::new(
            "a@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        let marked_read = mailbox.marked_read.clone();
        let sent = mailbox.sent.clone();
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            Arc::new(MockGenerator::failing()),
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.generation_failures, 1);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "failed");
        assert!(records[0].reply_text.is_none());

        // Left unread so the next cycle retries it; nothing was delivered.
        assert!(marked_read.lock().unwrap().is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failed_message_does_not_block_the_rest() {
        let mailbox = MockMailbox::new(
            "a@example.com",
            vec![
                message("m1", "Invoice", "BILLING question"),
                message("m2", "Meeting", "Can we reschedule?"),
            ],
        );
        let marked_read = mailbox.marked_read.clone();
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let generator = Arc::new(MockGenerator {
            fail_when_contains: Some("BILLING".to_string()),
            ..MockGenerator::replying("Sure.")
        });
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            generator,
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.messages_processed, 2);
        assert_eq!(report.generation_failures, 1);
        assert_eq!(report.replies_sent, 1);

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[1].status, "sent");
        assert_eq!(*marked_read.lock().unwrap(), vec!["m2".to_string()]);
    }

    #[tokio::test]
    async fn invalid_credential_skips_only_that_account() {
        let good = MockMailbox::new(
            "good@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        let mut connector = MockConnector::new(vec![good]);
        connector.invalid.insert("bad@example.com".to_string());
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![
                    credential("bad@example.com", None, None),
                    credential("good@example.com", None, None),
                ],
                fail_listing: false,
            },
            Arc::new(connector),
            Arc::new(MockGenerator::replying("Sure.")),
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.accounts_skipped, 1);
        assert_eq!(report.accounts_scanned, 1);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].account_email, "good@example.com");
    }

    #[tokio::test]
    async fn unreachable_store_aborts_before_any_provider_call() {
        let connector = Arc::new(MockConnector::new(vec![]));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![],
                fail_listing: true,
            },
            connector.clone(),
            Arc::new(MockGenerator::replying("Sure.")),
            log.clone(),
            true,
        );

        let result = scanner.run_cycle().await;

        assert!(matches!(result, Err(ScanError::StoreUnavailable(_))));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        assert!(log.records().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_distinctly_and_not_retried() {
        let mut mailbox = MockMailbox::new(
            "a@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        mailbox.fail_send = true;
        let marked_read = mailbox.marked_read.clone();
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            Arc::new(MockGenerator::replying("Sure.")),
            log.clone(),
            true,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.delivery_failures, 1);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "delivery_failed");
        assert!(records[0].detail.as_deref().unwrap().contains("smtp rejected"));
        // The draft exists; marking read prevents a duplicate reply.
        assert_eq!(*marked_read.lock().unwrap(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn auto_send_disabled_drafts_without_delivering() {
        let mailbox = MockMailbox::new(
            "a@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        let sent = mailbox.sent.clone();
        let marked_read = mailbox.marked_read.clone();
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            Arc::new(MockGenerator::replying("Sure.")),
            log.clone(),
            false,
        );

        let report = completed(scanner.run_cycle().await.unwrap());

        assert_eq!(report.replies_drafted, 1);
        assert_eq!(log.records()[0].status, "drafted");
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(*marked_read.lock().unwrap(), vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped_while_cycle_runs() {
        let mut mailbox = MockMailbox::new(
            "a@example.com",
            vec![message("m1", "Meeting", "Can we reschedule?")],
        );
        let gate = ListGate::new();
        mailbox.gate = Some(gate.clone());
        let connector = Arc::new(MockConnector::new(vec![mailbox]));
        let log = Arc::new(MockLog::default());
        let scanner = scanner(
            MockStore {
                credentials: vec![credential("a@example.com", None, None)],
                fail_listing: false,
            },
            connector,
            Arc::new(MockGenerator::replying("Sure.")),
            log.clone(),
            true,
        );

        let background = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run_cycle().await })
        };

        // Wait until the first cycle is provably inside the provider call,
        // then ask for another cycle: it must be dropped, not queued.
        gate.entered.notified().await;
        let second = scanner.run_cycle().await.unwrap();
        assert!(matches!(second, CycleOutcome::AlreadyRunning));

        gate.release.add_permits(1);
        let first = background.await.unwrap().unwrap();
        let report = completed(first);
        assert_eq!(report.replies_sent, 1);

        // Exactly one terminal record for the one unread message.
        assert_eq!(log.records().len(), 1);
    }
}
