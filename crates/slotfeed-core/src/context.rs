//! Per-run shared state.
//!
//! A [`FeedContext`] is built once from a validated [`FeedConfig`] and shared
//! by every [`crate::DataFeed`] of the run through an `Arc`. It owns the
//! schema, the record pool (and its reclaimer threads), the per-device
//! packers, the parser registry and the optional reservoir.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::files::FeasignCounter;
use crate::pack::{Device, HostDevice, PackerPool};
use crate::parser::ParserRegistry;
use crate::pool::RecordPool;
use crate::reservoir::RecordCandidateList;
use crate::slot::SlotSchema;

type DeviceFactory<D> = Box<dyn Fn(usize) -> D + Send + Sync>;

/// Shared resources of one ingestion run.
pub struct FeedContext<D: Device = HostDevice> {
    config: FeedConfig,
    schema: Arc<SlotSchema>,
    pool: Arc<RecordPool>,
    packers: PackerPool<D>,
    registry: ParserRegistry,
    reservoir: Option<Arc<RecordCandidateList>>,
    feasigns: Arc<FeasignCounter>,
    device_factory: DeviceFactory<D>,
}

impl FeedContext<HostDevice> {
    /// Builds a context whose packers copy into host memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration, [`Error::Schema`]
    /// for an inconsistent slot list, or [`Error::Internal`] if the pool
    /// threads cannot start.
    pub fn new(config: FeedConfig) -> Result<Self> {
        Self::with_devices(config, HostDevice::new)
    }
}

impl<D: Device> FeedContext<D> {
    /// Builds a context that creates the device of ordinal `id` with
    /// `factory` the first time a feed starts on it.
    ///
    /// # Errors
    ///
    /// See [`FeedContext::new`].
    pub fn with_devices<F>(config: FeedConfig, factory: F) -> Result<Self>
    where
        F: Fn(usize) -> D + Send + Sync + 'static,
    {
        let start = Instant::now();
        config.validate()?;

        let schema = Arc::new(SlotSchema::from_config(&config.slots)?);
        let pool = Arc::new(RecordPool::new(&config.pool)?);
        let reservoir = build_reservoir(&config, &schema)?;

        tracing::info!(
            slots = schema.all_slots().len(),
            used_slots = schema.used_slots().len(),
            kind = ?config.reader.kind,
            reservoir = config.sampling.capacity,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Feed context ready"
        );

        Ok(Self {
            packers: PackerPool::new(Arc::clone(&schema)),
            registry: ParserRegistry::with_builtin(),
            feasigns: Arc::new(FeasignCounter::new()),
            device_factory: Box::new(factory),
            config,
            schema,
            pool,
            reservoir,
        })
    }

    /// Configuration the context was built from.
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Slot schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<SlotSchema> {
        &self.schema
    }

    /// Record pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    /// Per-device packers.
    #[must_use]
    pub fn packers(&self) -> &PackerPool<D> {
        &self.packers
    }

    /// Parser registry, with the text parser registered.
    #[must_use]
    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Reservoir, when `sampling.capacity > 0`.
    #[must_use]
    pub fn reservoir(&self) -> Option<&Arc<RecordCandidateList>> {
        self.reservoir.as_ref()
    }

    /// Feasigns loaded by every reader of the run.
    #[must_use]
    pub fn feasigns(&self) -> &Arc<FeasignCounter> {
        &self.feasigns
    }

    /// Creates the device with ordinal `id`.
    pub fn make_device(&self, id: usize) -> D {
        (self.device_factory)(id)
    }

    /// Stops the pool reclaimers. Idempotent.
    pub fn shutdown(&self) {
        self.pool.log_info("record_pool");
        self.pool.shutdown();
    }
}

fn build_reservoir(
    config: &FeedConfig,
    schema: &SlotSchema,
) -> Result<Option<Arc<RecordCandidateList>>> {
    let sampling = &config.sampling;
    if sampling.capacity == 0 {
        return Ok(None);
    }

    let mut slots = FxHashSet::default();
    for name in &sampling.replace_slots {
        let info = schema
            .slot(name)
            .ok_or_else(|| Error::SlotNotFound(name.clone()))?;
        let idx = u16::try_from(info.slot_value_idx)
            .map_err(|_| Error::Schema(format!("slot '{name}' index exceeds u16")))?;
        slots.insert(idx);
    }

    let list = match sampling.seed {
        Some(seed) => RecordCandidateList::with_seed(seed),
        None => RecordCandidateList::new(),
    };
    list.resize(sampling.capacity);
    list.set_slots_to_replace(slots);
    Ok(Some(Arc::new(list)))
}

impl<D: Device> std::fmt::Debug for FeedContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedContext")
            .field("schema", &self.schema)
            .field("pool", &self.pool)
            .field("packers", &self.packers)
            .field("registry", &self.registry)
            .field("reservoir", &self.reservoir)
            .finish_non_exhaustive()
    }
}
