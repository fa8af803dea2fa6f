//! Per-device packer checkout.

use parking_lot::Mutex;
use std::sync::Arc;

use super::device::Device;
use super::packer::BatchPacker;
use crate::error::{Error, Result};
use crate::slot::SlotSchema;

/// Maximum number of devices served by one [`PackerPool`].
pub const MAX_DEVICES: usize = 16;

enum Entry<D: Device> {
    Empty,
    Idle(BatchPacker<D>),
    CheckedOut,
}

/// Hands out at most one [`BatchPacker`] per device at a time.
///
/// A packer is moved out on checkout and moved back on checkin, so a device's
/// packer can never be used by two threads at once.
pub struct PackerPool<D: Device> {
    schema: Arc<SlotSchema>,
    entries: Mutex<Vec<Entry<D>>>,
}

impl<D: Device> PackerPool<D> {
    /// Creates an empty pool for the used slots of `schema`.
    #[must_use]
    pub fn new(schema: Arc<SlotSchema>) -> Self {
        Self {
            schema,
            entries: Mutex::new((0..MAX_DEVICES).map(|_| Entry::Empty).collect()),
        }
    }

    /// Checks out the packer of device `id`, creating it with `make_device`
    /// on first use. A reused packer is reset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if `id` is out of range or the packer is
    /// already checked out.
    pub fn checkout(
        &self,
        id: usize,
        make_device: impl FnOnce(usize) -> D,
    ) -> Result<BatchPacker<D>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id).ok_or_else(|| Error::Device {
            device: id,
            message: format!("device id exceeds the maximum of {MAX_DEVICES}"),
        })?;

        match std::mem::replace(entry, Entry::CheckedOut) {
            Entry::Idle(mut packer) => {
                packer.reset();
                Ok(packer)
            }
            Entry::Empty => {
                drop(entries);
                Ok(BatchPacker::new(make_device(id), &self.schema))
            }
            Entry::CheckedOut => Err(Error::Device {
                device: id,
                message: "packer already checked out".to_string(),
            }),
        }
    }

    /// Returns a packer so the next checkout of its device reuses it.
    pub fn checkin(&self, packer: BatchPacker<D>) {
        let id = packer.device().id();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(id) {
            *entry = Entry::Idle(packer);
        }
    }

    /// True while the packer of device `id` is checked out.
    #[must_use]
    pub fn is_checked_out(&self, id: usize) -> bool {
        matches!(self.entries.lock().get(id), Some(Entry::CheckedOut))
    }
}

impl<D: Device> std::fmt::Debug for PackerPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        let busy = entries
            .iter()
            .filter(|e| matches!(e, Entry::CheckedOut))
            .count();
        f.debug_struct("PackerPool")
            .field("checked_out", &busy)
            .finish_non_exhaustive()
    }
}
