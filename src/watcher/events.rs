//! Event processing: one blocking drain per call, dispatching each record
//! to the host callback and keeping the watch tree in step with the
//! directories it mirrors.

use std::mem;
use std::path::Path;

use tracing::{debug, error, warn};

use super::backend::{ChangeRecord, WatchHandle};
use super::daemon::WatchDaemon;
use super::error::{DrainError, RegisterError};
use super::mask::ChangeMask;

impl WatchDaemon {
    /// Read one batch of change records from the event source and dispatch
    /// them in kernel delivery order.
    ///
    /// Subtree growth triggered by a record completes before the next
    /// record is processed, so "directory created" is always handled
    /// before anything that happened inside it. An error is fatal to the
    /// daemon: the host should shut it down.
    pub fn drain_events(&mut self) -> Result<(), DrainError> {
        let mut batch = mem::take(&mut self.batch);
        let outcome = self.drain_into(&mut batch);
        self.batch = batch;
        outcome
    }

    fn drain_into(&mut self, batch: &mut Vec<ChangeRecord>) -> Result<(), DrainError> {
        batch.clear();
        if let Err(source) = self.backend.read_batch(batch) {
            error!("event source read failed: {source}");
            return Err(DrainError::EventSource { source });
        }

        for record in batch.iter() {
            if record.mask.contains(ChangeMask::IGNORED) {
                // The watch is already gone kernel-side; any node still in
                // the table is on its way out through a removal path.
                continue;
            }
            if record.mask.contains(ChangeMask::Q_OVERFLOW) {
                warn!("event queue overflow, changes may have been missed");
                continue;
            }
            self.process_record(record)?;
        }
        Ok(())
    }

    fn process_record(&mut self, record: &ChangeRecord) -> Result<(), DrainError> {
        let Some(node) = self.table.get(record.handle) else {
            // Watch removed after the batch was read.
            return Ok(());
        };
        let is_dir = record.mask.contains(ChangeMask::ISDIR);
        debug!(
            "event: handle={} mask={:#x} dir={is_dir} at {}",
            record.handle,
            record.mask.bits() & !ChangeMask::ISDIR.bits(),
            node.primary_path().display()
        );

        let aliases = node.paths.clone();
        for alias in &aliases {
            let full_path = match &record.name {
                Some(name) => alias.join(name),
                None => alias.clone(),
            };

            if let Some(notify) = self.on_event.as_mut() {
                notify(&full_path, record.mask);
            }

            if is_dir && record.mask.intersects(ChangeMask::ARRIVED) {
                if let Err(source @ RegisterError::Fatal { .. }) =
                    self.walk_tree(&full_path, Some(record.handle), true, &[])
                {
                    return Err(DrainError::Rescan {
                        path: full_path,
                        source,
                    });
                }
            }

            if is_dir && record.mask.intersects(ChangeMask::DEPARTED) {
                self.prune_child(record.handle, &full_path);
            }
        }

        Ok(())
    }

    /// Remove the child of `parent` watched solely as `path`, tombstoning
    /// its slot in place. Children carrying several aliases are left
    /// untouched: with one name gone there is no telling which alias died
    /// without a rescan.
    fn prune_child(&mut self, parent: WatchHandle, path: &Path) {
        let Some(node) = self.table.get(parent) else {
            return;
        };
        let mut target = None;
        for (index, slot) in node.children.iter().enumerate() {
            let Some(child) = *slot else { continue };
            let Some(child_node) = self.table.get(child) else {
                continue;
            };
            if child_node.paths.len() == 1 && child_node.primary_path().as_path() == path {
                target = Some((index, child));
                break;
            }
        }

        if let Some((index, child)) = target {
            self.remove_watch(child, false);
            if let Some(node) = self.table.get_mut(parent) {
                node.children[index] = None;
            }
        }
    }
}
