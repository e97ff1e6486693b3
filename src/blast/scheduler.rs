//! Blast scheduler — in-process timers that fire scheduled blasts, plus the
//! startup sweep for schedules missed while the process was down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blast::dispatcher::{BlastDispatcher, DispatchOrigin};
use crate::config::GatewayConfig;
use crate::error::Error;
use crate::store::Store;
use crate::template::TemplateSync;

/// One in-memory timer per scheduled blast, keyed by blast id.
///
/// Timers do not survive a restart; `recover_missed()` re-arms anything that
/// came due in the meantime.
pub struct BlastScheduler {
    store: Arc<dyn Store>,
    dispatcher: Arc<BlastDispatcher>,
    jobs: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    /// Caps how many blasts run their recipient loops at once.
    slots: Arc<Semaphore>,
    past_due_grace: Duration,
}

impl BlastScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<BlastDispatcher>,
        config: &GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            dispatcher,
            jobs: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(config.max_concurrent_blasts)),
            past_due_grace: config.past_due_grace,
        })
    }

    /// Arm (or re-arm) the timer for one blast.
    ///
    /// An existing timer for the same blast is replaced, so rescheduling can
    /// never leave two live timers for one id. A past-due target fires after
    /// a short grace delay instead of immediately.
    pub fn schedule(self: &Arc<Self>, blast_id: Uuid, at: DateTime<Utc>) {
        let delay = (at - Utc::now())
            .to_std()
            .unwrap_or(self.past_due_grace)
            .max(Duration::from_millis(1));

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let _permit = match scheduler.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed, shutting down
            };
            if let Err(e) = scheduler
                .dispatcher
                .dispatch(blast_id, DispatchOrigin::Scheduled)
                .await
            {
                error!(blast_id = %blast_id, error = %e, "Scheduled dispatch failed");
            }
            scheduler.jobs.lock().unwrap().remove(&blast_id);
        });

        let previous = self.jobs.lock().unwrap().insert(blast_id, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(blast_id = %blast_id, at = %at, "Blast scheduled");
    }

    /// Drop the timer for a blast. Returns whether one was armed.
    pub fn cancel(&self, blast_id: Uuid) -> bool {
        match self.jobs.lock().unwrap().remove(&blast_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Re-arm every SCHEDULED blast whose time passed while we were down.
    ///
    /// Run once at startup, after the dispatcher is wired up.
    pub async fn recover_missed(self: &Arc<Self>) -> Result<usize, Error> {
        let missed = self.store.list_due_scheduled_blasts(Utc::now()).await?;
        for blast in &missed {
            let at = blast.scheduled_at.unwrap_or_else(Utc::now);
            self.schedule(blast.id, at);
        }
        if !missed.is_empty() {
            info!(count = missed.len(), "Recovered missed blast schedules");
        }
        Ok(missed.len())
    }

    /// Abort every live timer. Used on shutdown.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

/// Run the template status sync on a fixed interval, forever.
pub fn spawn_template_sync(sync: TemplateSync, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately, which doubles as a startup sync.
        loop {
            ticker.tick().await;
            match sync.sync_submitted().await {
                Ok(synced) => info!(synced, "Template sync sweep done"),
                Err(e) => warn!(error = %e, "Template sync sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::blast::model::{Blast, BlastStatus, ComponentParams};
    use crate::channel::adapter::{ChannelAdapter, OutboundPayload, RemoteTemplateStatus};
    use crate::error::ChannelError;
    use crate::quota::QuotaGate;
    use crate::store::{ChannelAccount, LibSqlStore, QuotaAccount};
    use crate::template::{Template, TemplateStatus};

    struct MockChannel {
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelAdapter for MockChannel {
        async fn send(
            &self,
            _sender_channel_id: &str,
            to: &str,
            _payload: &OutboundPayload,
        ) -> Result<String, ChannelError> {
            self.sent.lock().unwrap().push(to.to_string());
            Ok(format!("wamid.{}", Uuid::new_v4()))
        }

        async fn fetch_template_status(
            &self,
            _business_id: &str,
            _template_name: &str,
        ) -> Result<Option<RemoteTemplateStatus>, ChannelError> {
            Ok(None)
        }
    }

    struct Fixture {
        scheduler: Arc<BlastScheduler>,
        store: Arc<LibSqlStore>,
        channel: Arc<MockChannel>,
        owner_id: Uuid,
        template_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let channel = Arc::new(MockChannel {
            sent: StdMutex::new(Vec::new()),
        });
        let owner_id = Uuid::new_v4();
        let template_id = Uuid::new_v4();

        store
            .upsert_channel_account(&ChannelAccount {
                owner_id,
                channel_id: "pn-100".into(),
                business_id: "waba-1".into(),
            })
            .await
            .unwrap();
        store
            .insert_quota_account(&QuotaAccount {
                id: Uuid::new_v4(),
                owner_id,
                message_quota: 100,
                message_used: 0,
                start_date: Utc::now() - chrono::Duration::days(1),
                end_date: Utc::now() + chrono::Duration::days(29),
                is_active: true,
            })
            .await
            .unwrap();
        store
            .insert_template(&Template {
                id: template_id,
                owner_id,
                name: "promo".into(),
                language: "id".into(),
                status: TemplateStatus::Approved,
                remote_id: Some("rt-1".into()),
                rejection_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let config = GatewayConfig {
            blast_pacing: Duration::ZERO,
            past_due_grace: Duration::from_millis(5),
            ..GatewayConfig::default()
        };
        let dispatcher = Arc::new(BlastDispatcher::new(
            store.clone() as Arc<dyn Store>,
            channel.clone() as Arc<dyn ChannelAdapter>,
            QuotaGate::new(store.clone() as Arc<dyn Store>),
            config.clone(),
        ));
        let scheduler = BlastScheduler::new(store.clone() as Arc<dyn Store>, dispatcher, &config);
        Fixture {
            scheduler,
            store,
            channel,
            owner_id,
            template_id,
        }
    }

    async fn scheduled_blast(f: &Fixture, at: DateTime<Utc>) -> Blast {
        let blast = Blast {
            id: Uuid::new_v4(),
            owner_id: f.owner_id,
            template_id: f.template_id,
            name: "promo".into(),
            status: BlastStatus::Scheduled,
            recipients: vec!["628111".into()],
            parameters: ComponentParams::default(),
            recipient_parameters: HashMap::new(),
            scheduled_at: Some(at),
            total_recipients: 1,
            sent_count: 0,
            failed_count: 0,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        f.store.insert_blast(&blast).await.unwrap();
        blast
    }

    async fn wait_for_status(
        store: &LibSqlStore,
        blast_id: Uuid,
        wanted: BlastStatus,
    ) -> BlastStatus {
        for _ in 0..100 {
            let blast = store.get_blast(blast_id).await.unwrap().unwrap();
            if blast.status == wanted {
                return blast.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.get_blast(blast_id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn past_due_schedule_fires_after_the_grace_delay() {
        let f = fixture().await;
        let blast = scheduled_blast(&f, Utc::now() - chrono::Duration::minutes(5)).await;

        f.scheduler.schedule(blast.id, blast.scheduled_at.unwrap());
        let status = wait_for_status(&f.store, blast.id, BlastStatus::Completed).await;
        assert_eq!(status, BlastStatus::Completed);
        assert_eq!(f.channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_existing_timer() {
        let f = fixture().await;
        let blast = scheduled_blast(&f, Utc::now() + chrono::Duration::milliseconds(40)).await;

        f.scheduler.schedule(blast.id, blast.scheduled_at.unwrap());
        f.scheduler
            .schedule(blast.id, Utc::now() + chrono::Duration::milliseconds(40));
        assert_eq!(f.scheduler.job_count(), 1);

        let status = wait_for_status(&f.store, blast.id, BlastStatus::Completed).await;
        assert_eq!(status, BlastStatus::Completed);
        // Only one timer fired, so the single recipient was sent exactly once.
        assert_eq!(f.channel.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_disarms_the_timer() {
        let f = fixture().await;
        let blast = scheduled_blast(&f, Utc::now() + chrono::Duration::milliseconds(30)).await;

        f.scheduler.schedule(blast.id, blast.scheduled_at.unwrap());
        assert!(f.scheduler.cancel(blast.id));
        assert!(!f.scheduler.cancel(blast.id));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stored = f.store.get_blast(blast.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BlastStatus::Scheduled);
        assert!(f.channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recover_missed_arms_only_due_scheduled_blasts() {
        let f = fixture().await;
        let due = scheduled_blast(&f, Utc::now() - chrono::Duration::minutes(1)).await;
        let future = scheduled_blast(&f, Utc::now() + chrono::Duration::hours(1)).await;

        let recovered = f.scheduler.recover_missed().await.unwrap();
        assert_eq!(recovered, 1);

        let status = wait_for_status(&f.store, due.id, BlastStatus::Completed).await;
        assert_eq!(status, BlastStatus::Completed);
        let untouched = f.store.get_blast(future.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, BlastStatus::Scheduled);
    }

    #[tokio::test]
    async fn sweep_and_live_timer_racing_sends_once() {
        let f = fixture().await;
        let blast = scheduled_blast(&f, Utc::now() - chrono::Duration::seconds(1)).await;

        // Both a recovered timer and a fresh one target the same blast; the
        // second dispatch finds it no longer pending and skips.
        f.scheduler.schedule(blast.id, blast.scheduled_at.unwrap());
        let status = wait_for_status(&f.store, blast.id, BlastStatus::Completed).await;
        assert_eq!(status, BlastStatus::Completed);

        f.scheduler.schedule(blast.id, blast.scheduled_at.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stored = f.store.get_blast(blast.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BlastStatus::Completed);
        assert_eq!(f.channel.sent.lock().unwrap().len(), 1);
    }
}
