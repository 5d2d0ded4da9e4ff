/// One reconciliation pass, end to end
///
/// drain -> scan -> list -> plan -> materialize + apply -> status -> notify.
/// Collaborators (bucket, status sink, notifier, transcoder) are handed in,
/// so the same pass runs against any bucket backend or a test double.
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::album::AlbumResolver;
use crate::artifact::stage::{clear_output, Stager};
use crate::artifact::transcode::{ImageTranscoder, Transcoder, Watermark};
use crate::config::Settings;
use crate::error::{Result, SyncError};
use crate::inventory::{list_all, LocalInventory, RemoteInventory};
use crate::mutations::{drain_deletions, drain_moves, DrainReport};
use crate::notify::{Notifier, PassSummary};
use crate::reconcile::{
    build_plan, ApplyProgress, ReconcileOptions, ReconcileReport, Reconciler, ReconciliationPlan,
};
use crate::status::{Phase, Status, StatusEntry, StatusReporter, StatusSink};
use crate::store::ObjectStore;

pub const LOCK_FILE: &str = ".gallery-sync.lock";
pub const TRIGGER_FILE: &str = "run.txt";
const WATERMARK_OPACITY: f32 = 0.8;

/// Where the apply phase sits on the dashboard's progress bar
const APPLY_START: f64 = 15.0;
const APPLY_END: f64 = 95.0;

/// Exclusive claim on a staging directory for the length of a pass.
///
/// The claim is an advisory lock on `LOCK_FILE`, held as long as the file
/// stays open. The OS releases it when the process dies, so a lock file left
/// behind by a killed run blocks nothing.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir).map_err(|e| SyncError::io(output_dir, e))?;
        let path = output_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SyncError::io(&path, e))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() != fs2::lock_contended_error().raw_os_error() {
                return Err(SyncError::io(&path, e));
            }
            let holder = fs::read_to_string(&path).unwrap_or_default();
            warn!(path = %path.display(), holder = holder.trim(), "run lock is held");
            return Err(SyncError::Locked(path));
        }

        if let Err(e) = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
        {
            warn!(path = %path.display(), error = %e, "could not record pid in run lock");
        }
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "could not release run lock");
        }
    }
}

/// Outcome of the two mutation consumers. `None` means the log could not
/// be read and was left as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub deletions: Option<DrainReport>,
    pub moves: Option<DrainReport>,
}

impl DrainOutcome {
    fn logs(&self) -> [Option<&DrainReport>; 2] {
        [self.deletions.as_ref(), self.moves.as_ref()]
    }

    pub fn applied(&self) -> usize {
        self.logs().into_iter().flatten().map(|r| r.applied).sum()
    }

    /// Failed records, plus one for each log that could not be read
    pub fn failed(&self) -> usize {
        self.logs()
            .into_iter()
            .map(|r| r.map_or(1, |r| r.failed))
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.logs()
            .into_iter()
            .all(|r| r.is_some_and(DrainReport::is_clean))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub drain: DrainOutcome,
    pub plan: ReconciliationPlan,
    pub report: ReconcileReport,
    pub notified: bool,
}

/// Scan and listing results, before anything is applied
#[derive(Debug)]
pub struct Snapshot {
    pub local: LocalInventory,
    pub remote: RemoteInventory,
    pub plan: ReconciliationPlan,
}

/// Transcoder configured from the settings. A watermark that cannot be
/// loaded is dropped with a warning rather than failing every image.
pub fn transcoder_for(settings: &Settings) -> ImageTranscoder {
    let transcoder = ImageTranscoder::new(settings.max_edge);
    match settings.watermark.as_deref() {
        Some(path) => match Watermark::load(path, WATERMARK_OPACITY) {
            Ok(watermark) => transcoder.with_watermark(watermark),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "watermark unusable, rendering without it");
                transcoder
            }
        },
        None => transcoder,
    }
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    store: &'a dyn ObjectStore,
    status: StatusReporter<'a>,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        store: &'a dyn ObjectStore,
        status: &'a dyn StatusSink,
        notifier: Option<&'a dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            store,
            status: StatusReporter::new(status),
            notifier,
        }
    }

    fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            full_upload: self.settings.full_upload,
            sync_delete: self.settings.sync_delete,
            ..ReconcileOptions::default()
        }
    }

    /// A full pass under the run lock. Errors are fatal for the pass and
    /// have already been posted to the status sink when this returns.
    pub fn run(&self, transcoder: &dyn Transcoder) -> Result<PassOutcome> {
        let _lock = self.lock()?;
        info!(
            watch_dir = %self.settings.watch_dir.display(),
            prefix = %self.settings.prefix,
            full_upload = self.settings.full_upload,
            sync_delete = self.settings.sync_delete,
            "starting pass"
        );

        let drain = self.drain_logs();

        if let Err(e) = clear_output(&self.settings.output_dir) {
            let e = SyncError::from(e);
            self.fail(Phase::Upload, &e);
            return Err(e);
        }

        let snapshot = self.snapshot(true)?;
        let options = self.options();
        let Snapshot { local, plan, .. } = snapshot;

        self.status.info(
            Phase::Upload,
            format!(
                "uploading {}, deleting {}, unchanged {}",
                plan.upload.len(),
                plan.delete.len(),
                plan.skip.len()
            ),
            APPLY_START,
        );

        let mut stager = Stager::new(&self.settings.output_dir, &local, transcoder);
        let mut last_posted = APPLY_START.floor();
        let report = Reconciler::new(self.store, &self.settings.prefix).apply(
            &plan,
            options.aggregate.as_ref(),
            &mut stager,
            |ApplyProgress { done, total }| {
                let progress = apply_progress(done, total);
                if progress.floor() > last_posted {
                    last_posted = progress.floor();
                    self.status.info(
                        Phase::Upload,
                        format!("processed {} of {} objects", done, total),
                        progress,
                    );
                }
            },
        );

        // Mutation failures count against the pass like object failures
        let status = Status::from_counts(
            report.succeeded() + drain.applied(),
            report.failed + drain.failed(),
        );
        let mut message = format!("pass complete: {}", report);
        if !drain.is_clean() {
            message.push_str(&format!(
                "; {} mutation record(s) not applied",
                drain.failed()
            ));
        }
        self.status
            .post(StatusEntry::new(Phase::Upload, status, message).with_progress(100.0));

        let clean = report.is_clean() && drain.is_clean();
        let notified = clean && self.notify(&report);
        info!(%report, drain_failed = drain.failed(), notified, "pass finished");

        Ok(PassOutcome {
            drain,
            plan,
            report,
            notified,
        })
    }

    /// The mutation consumers alone, under the run lock
    pub fn drain(&self) -> Result<DrainOutcome> {
        let _lock = self.lock()?;
        Ok(self.drain_logs())
    }

    /// Apply pending deletions, then moves. Each consumer indexes the library
    /// on its first record, so moves resolve against the tree the deletions
    /// left. A log that cannot be read is reported and left in place; the
    /// pass carries on.
    fn drain_logs(&self) -> DrainOutcome {
        let settings = self.settings;

        self.status
            .info(Phase::DeleteSync, "applying gallery deletions", 2.0);
        let deletions = self.drain_phase(
            Phase::DeleteSync,
            3.0,
            drain_deletions(&settings.deleted_log, &settings.watch_dir, &settings.prefix),
        );

        self.status.info(Phase::MoveSync, "applying gallery moves", 4.0);
        let moves = self.drain_phase(
            Phase::MoveSync,
            5.0,
            drain_moves(&settings.moved_log, &settings.watch_dir, &settings.prefix),
        );

        DrainOutcome { deletions, moves }
    }

    fn drain_phase(
        &self,
        phase: Phase,
        progress: f64,
        result: Result<DrainReport>,
    ) -> Option<DrainReport> {
        match result {
            Ok(report) => {
                let status = if report.records == 0 {
                    Status::Info
                } else {
                    Status::from_counts(report.applied, report.failed)
                };
                self.status
                    .post(StatusEntry::new(phase, status, report.to_string()).with_progress(progress));
                Some(report)
            }
            Err(e) => {
                warn!(phase = phase.as_str(), error = %e, "mutation log skipped");
                self.status
                    .post(StatusEntry::new(phase, Status::Error, e.to_string()).with_progress(progress));
                None
            }
        }
    }

    /// Scan, list and plan. With `report` off nothing is posted to the
    /// status sink, which is what the read-only `plan` command wants.
    pub fn snapshot(&self, report: bool) -> Result<Snapshot> {
        let mut resolver = AlbumResolver::new(&self.settings.watch_dir);
        let local = LocalInventory::scan(&mut resolver);
        if report {
            self.status.info(
                Phase::Scan,
                scan_message(&local),
                10.0,
            );
        }

        let remote = match list_all(
            self.store,
            &self.settings.prefix,
            self.settings.max_list_pages,
        ) {
            Ok(remote) => remote,
            Err(e) => {
                if report {
                    self.fail(Phase::Listing, &e);
                }
                return Err(e);
            }
        };
        if report {
            self.status.info(
                Phase::Listing,
                format!(
                    "{} objects published, {} stale thumbnails",
                    remote.tracked.len(),
                    remote.stale_thumbnails.len()
                ),
                15.0,
            );
        }

        let plan = build_plan(&local.keys(), &remote, &self.options());
        debug!(
            upload = plan.upload.len(),
            delete = plan.delete.len(),
            skip = plan.skip.len(),
            "plan built"
        );
        Ok(Snapshot {
            local,
            remote,
            plan,
        })
    }

    fn notify(&self, report: &ReconcileReport) -> bool {
        let Some(notifier) = self.notifier else {
            return false;
        };
        match notifier.notify(&PassSummary::from_report(report, self.settings.full_upload)) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "completion notification failed");
                false
            }
        }
    }

    fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(&self.settings.output_dir).inspect_err(|e| self.fail(Phase::Run, e))
    }

    fn fail(&self, phase: Phase, error: &SyncError) {
        self.status.post(
            StatusEntry::new(phase, Status::Error, error.to_string()).with_progress(100.0),
        );
    }
}

fn scan_message(local: &LocalInventory) -> String {
    let mut message = format!(
        "found {} images ({} artifacts)",
        local.image_count(),
        local.len()
    );
    if local.collisions() > 0 {
        message.push_str(&format!(
            ", {} derived-key collisions",
            local.collisions()
        ));
    }
    message
}

/// Map `done` of `total` objects onto the apply band of the progress bar
fn apply_progress(done: usize, total: usize) -> f64 {
    if total == 0 {
        return APPLY_END;
    }
    APPLY_START + (APPLY_END - APPLY_START) * done as f64 / total as f64
}

/// File whose appearance asks `watch` for a pass
pub fn trigger_path(watch_dir: &Path) -> PathBuf {
    watch_dir.join(TRIGGER_FILE)
}
