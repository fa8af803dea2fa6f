//! Compute-device abstraction used by the batch packer.
//!
//! A [`Device`] copies staged host buffers into [`DeviceTensor`]s. Tensors
//! keep their allocation between batches and only grow when a batch needs
//! more room than any batch before it.

use bytemuck::Pod;

use crate::error::Result;

/// A device-resident buffer of `T`.
#[derive(Debug, Clone, Default)]
pub struct DeviceTensor<T> {
    storage: Vec<T>,
    len: usize,
    grow_count: usize,
}

impl<T: Pod> DeviceTensor<T> {
    /// Creates an empty tensor with no allocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Vec::new(),
            len: 0,
            grow_count: 0,
        }
    }

    /// Sizes the tensor to `len` elements, reallocating only when `len`
    /// exceeds the current capacity. Returns the writable region.
    pub fn resize(&mut self, len: usize) -> &mut [T] {
        if len > self.storage.len() {
            self.storage.resize(len, T::zeroed());
            self.grow_count += 1;
        }
        self.len = len;
        &mut self.storage[..len]
    }

    /// Valid elements.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.storage[..self.len]
    }

    /// Number of valid elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no element is valid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// How many times the allocation grew.
    #[must_use]
    pub fn grow_count(&self) -> usize {
        self.grow_count
    }
}

/// A compute device able to receive host buffers.
///
/// One packer owns one device; implementations need no internal locking.
pub trait Device: Send + 'static {
    /// Device ordinal.
    fn id(&self) -> usize;

    /// Copies `src` into `dst`, sizing `dst` to `src.len()`.
    ///
    /// The copy may be asynchronous until [`synchronize`](Self::synchronize).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Device`] if the transfer fails.
    fn upload<T: Pod>(&mut self, src: &[T], dst: &mut DeviceTensor<T>) -> Result<()>;

    /// Waits for every pending transfer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Device`] if a pending transfer failed.
    fn synchronize(&mut self) -> Result<()>;
}

/// Device emulated in host memory, counting transfers.
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
    id: usize,
    transfers: u64,
    bytes: u64,
    syncs: u64,
}

impl HostDevice {
    /// Creates a host device with the given ordinal.
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Number of `upload` calls.
    #[must_use]
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Bytes copied by `upload`.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Number of `synchronize` calls.
    #[must_use]
    pub fn syncs(&self) -> u64 {
        self.syncs
    }
}

impl Device for HostDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn upload<T: Pod>(&mut self, src: &[T], dst: &mut DeviceTensor<T>) -> Result<()> {
        let region = dst.resize(src.len());
        let raw: &[u8] = bytemuck::cast_slice(src);
        bytemuck::cast_slice_mut::<T, u8>(region).copy_from_slice(raw);
        self.transfers += 1;
        self.bytes += raw.len() as u64;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }
}
