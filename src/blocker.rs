//! Pipeline du bloqueur de médias et son cycle de vie.
//!
//! ## Pattern "Two-Phase"
//!
//! Le démarrage a besoin du document (pour injecter la feuille de style et
//! attacher l'observateur) et des capacités de l'hôte (pour choisir la
//! primitive idle). Le bloqueur n'est donc construit qu'une fois l'hôte prêt :
//!
//! ```text
//! ContentScript::Initial(Config) ──boot()──► ContentScript::Running(MediaBlocker)
//!                                  └─error─► ContentScript::Failed (logged once)
//! ```
//!
//! ## Flux d'événements
//!
//! ```text
//! SettingsReady  → load cache → sync classes → full-document scan → arm
//! Mutations      → scan each added element subtree → arm
//! StorageChanged → (sync area only) apply to cache + classes together
//! Callback       → one scheduler pass: seen? → mark → classify → neutralize
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::classifier::{self, MediaKind, Outcome};
use crate::config::Config;
use crate::dom::{Dom, MutationRecord, NodeId};
use crate::error::{ShieldError, ShieldResult};
use crate::host::{Host, HostEvent, HostHandler, Token};
use crate::queue::WorkQueue;
use crate::registry::DedupRegistry;
use crate::scanner::{self, ScanReport};
use crate::scheduler::{Deadline, PassOutcome, Scheduler};
use crate::settings::{Settings, SettingsCache};
use crate::store::{ChangeSet, SettingsStore, StorageArea};
use crate::style::StyleController;

/// Running totals, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockerStats {
    pub subtrees_scanned: usize,
    pub enqueued: usize,
    pub processed: usize,
    pub skipped_seen: usize,
    pub skipped_detached: usize,
    pub pruned: usize,
    pub images: usize,
    pub videos: usize,
    pub frames: usize,
    pub backgrounds: usize,
    pub neutralized: usize,
    pub action_failures: u32,
    pub scan_failures: usize,
    pub passes: usize,
    pub yields: usize,
}

impl BlockerStats {
    fn record_scan(&mut self, report: ScanReport) {
        self.subtrees_scanned += 1;
        self.enqueued += report.enqueued;
        self.scan_failures += usize::from(report.failed);
    }

    fn record_kind(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::ImageLike => self.images += 1,
            MediaKind::Video => self.videos += 1,
            MediaKind::Frame => self.frames += 1,
            MediaKind::BackgroundImage => self.backgrounds += 1,
            MediaKind::None => {}
        }
    }
}

/// Runs a fallible step, logging (once) and discarding any error or panic.
pub fn run_guarded<T>(label: &str, step: impl FnOnce() -> ShieldResult<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(error = %e, "{label} failed");
            None
        }
        Err(_) => {
            error!("{label} panicked");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContentScript: two-phase lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point the host drives.
pub enum ContentScript {
    /// Not booted yet.
    Initial(Config),
    /// Observing the page.
    Running(Box<MediaBlocker>),
    /// Startup failed; the page is left alone.
    Failed,
}

impl ContentScript {
    pub fn new(config: Config) -> Self {
        Self::Initial(config)
    }

    /// Fire-and-forget startup. Never fails: errors end in
    /// [`ContentScript::Failed`] after a single log line.
    pub fn boot<D: Dom, S: SettingsStore>(&mut self, host: &mut Host<D, S>) {
        if !matches!(self, Self::Initial(_)) {
            warn!("boot() called twice, ignoring");
            return;
        }
        let Self::Initial(config) = std::mem::replace(self, Self::Failed) else {
            return;
        };
        if let Some(blocker) = run_guarded("media blocker init", || MediaBlocker::start(&config, host)) {
            *self = Self::Running(Box::new(blocker));
        }
    }

    pub fn blocker(&self) -> Option<&MediaBlocker> {
        match self {
            Self::Running(blocker) => Some(blocker.as_ref()),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}

impl<D: Dom, S: SettingsStore> HostHandler<D, S> for ContentScript {
    fn handle(&mut self, host: &mut Host<D, S>, event: HostEvent) {
        if let Self::Running(blocker) = self {
            blocker.handle(host, event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MediaBlocker
// ─────────────────────────────────────────────────────────────────────────────

/// The wired pipeline: settings cache, style controller, dedup registry,
/// work queue and scheduler.
#[derive(Debug)]
pub struct MediaBlocker {
    settings: SettingsCache,
    style: StyleController,
    registry: DedupRegistry,
    queue: WorkQueue,
    scheduler: Scheduler,
    stats: BlockerStats,
}

impl MediaBlocker {
    /// Injects the stylesheet, attaches the observer and requests the
    /// settings read. Candidates found before the read completes are queued
    /// and processed with the default settings.
    pub fn start<D: Dom, S: SettingsStore>(
        config: &Config,
        host: &mut Host<D, S>,
    ) -> ShieldResult<Self> {
        if host.dom.document_element().is_none() {
            return Err(ShieldError::Init("document has no root element".into()));
        }

        let style = StyleController::new(config.style.clone());
        style.inject_once(&mut host.dom)?;
        host.dom.observe();
        host.request_settings_read();

        let scheduler = Scheduler::from_config(&config.scheduler, &host.timers);
        info!(primitive = scheduler.primitive(), "Media blocker started");

        Ok(Self {
            settings: SettingsCache::new(),
            style,
            registry: DedupRegistry::new(),
            queue: WorkQueue::new(),
            scheduler,
            stats: BlockerStats::default(),
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn stats(&self) -> BlockerStats {
        self.stats
    }

    pub fn registry(&self) -> &DedupRegistry {
        &self.registry
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_armed(&self) -> bool {
        self.scheduler.is_armed()
    }

    pub fn handle<D: Dom, S: SettingsStore>(&mut self, host: &mut Host<D, S>, event: HostEvent) {
        match event {
            HostEvent::SettingsReady => self.on_settings_ready(host),
            HostEvent::Mutations(records) => self.on_mutations(host, records),
            HostEvent::StorageChanged { area, changes } => {
                self.on_storage_changed(&mut host.dom, area, &changes)
            }
            HostEvent::Callback { token, deadline } => {
                self.on_callback(host, token, deadline.as_deref())
            }
        }
    }

    fn on_settings_ready<D: Dom, S: SettingsStore>(&mut self, host: &mut Host<D, S>) {
        let settings = self.settings.load(&host.store);
        self.sync_classes(&mut host.dom, settings);

        let report = scanner::scan_document(&host.dom, &mut self.queue);
        self.stats.record_scan(report);
        info!(candidates = report.found, "Initial scan done");
        self.arm_if_pending(host);
    }

    fn on_mutations<D: Dom, S: SettingsStore>(
        &mut self,
        host: &mut Host<D, S>,
        records: Vec<MutationRecord>,
    ) {
        let mut removed_any = false;
        for record in records {
            removed_any |= !record.removed_nodes.is_empty();
            for node in record.added_nodes {
                self.enqueue_subtree(&host.dom, node);
            }
        }
        if removed_any {
            let pruned = self.registry.prune(&host.dom);
            self.stats.pruned += pruned;
            if pruned > 0 {
                debug!(pruned, remaining = self.registry.len(), "Registry pruned");
            }
        }
        self.arm_if_pending(host);
    }

    fn on_storage_changed(&mut self, dom: &mut dyn Dom, area: StorageArea, changes: &ChangeSet) {
        if area != StorageArea::Sync {
            debug!(%area, "Ignoring storage change outside the sync area");
            return;
        }
        self.settings.apply(changes);
        self.sync_classes(dom, self.settings.get());
    }

    fn on_callback<D: Dom, S: SettingsStore>(
        &mut self,
        host: &mut Host<D, S>,
        token: Token,
        deadline: Option<&dyn Deadline>,
    ) {
        let settings = self.settings.get();
        let dom: &mut dyn Dom = &mut host.dom;
        let registry = &mut self.registry;
        let stats = &mut self.stats;

        let outcome = self.scheduler.run_pass(
            token,
            &mut host.timers,
            &mut self.queue,
            deadline,
            |element| decide(dom, registry, stats, settings, element),
        );
        match outcome {
            PassOutcome::Stale => debug!(%token, "Ignoring stale callback"),
            PassOutcome::Completed { .. } => self.stats.passes += 1,
            PassOutcome::Yielded { .. } => {
                self.stats.passes += 1;
                self.stats.yields += 1;
            }
        }
    }

    /// Scans one inserted node and queues what it finds.
    fn enqueue_subtree(&mut self, dom: &dyn Dom, node: NodeId) {
        if !dom.is_element(node) {
            return;
        }
        let report = scanner::scan(dom, node, &mut self.queue);
        self.stats.record_scan(report);
    }

    fn arm_if_pending<D: Dom, S: SettingsStore>(&mut self, host: &mut Host<D, S>) {
        if !self.queue.is_empty() {
            self.scheduler.ensure_armed(&mut host.timers);
        }
    }

    fn sync_classes(&self, dom: &mut dyn Dom, settings: Settings) {
        if let Err(e) = self.style.sync_classes(dom, settings) {
            warn!(error = %e, "Could not update marker classes");
        }
    }
}

/// Decides on one candidate: each element is neutralized at most once.
fn decide(
    dom: &mut dyn Dom,
    registry: &mut DedupRegistry,
    stats: &mut BlockerStats,
    settings: Settings,
    element: NodeId,
) {
    stats.processed += 1;
    if !dom.is_alive(element) {
        stats.skipped_detached += 1;
        return;
    }
    if !registry.mark_seen(element) {
        stats.skipped_seen += 1;
        return;
    }

    let kind = classifier::classify(dom, element);
    stats.record_kind(kind);
    if let Outcome::Neutralized { failures } = classifier::neutralize(dom, element, kind, settings) {
        stats.neutralized += 1;
        stats.action_failures += failures;
    }
}
