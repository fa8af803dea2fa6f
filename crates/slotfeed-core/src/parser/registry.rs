//! Named parser registry.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::{MultiSlotTextParser, ParseOptions, SlotParser, PARSER_ABI_VERSION, TEXT_PARSER_NAME};
use crate::error::{Error, Result};
use crate::slot::AllSlotInfo;

/// Builds an unbound parser instance.
pub type ParserFactory = Arc<dyn Fn(ParseOptions) -> Box<dyn SlotParser> + Send + Sync>;

struct Registration {
    abi_version: u32,
    factory: ParserFactory,
}

struct LoadedParser {
    options: ParseOptions,
    slots: Vec<AllSlotInfo>,
    parser: Arc<dyn SlotParser>,
}

/// Parser factories by name, plus the instances loaded from them.
///
/// A loaded parser is shared by every reader. Loading a name again with the
/// same options and slots returns the existing instance; different options
/// or slots get an instance of their own.
pub struct ParserRegistry {
    factories: RwLock<FxHashMap<String, Registration>>,
    loaded: Mutex<FxHashMap<String, Vec<LoadedParser>>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            factories: RwLock::new(FxHashMap::default()),
            loaded: Mutex::new(FxHashMap::default()),
        }
    }
}

impl ParserRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in text parser registered.
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(
            TEXT_PARSER_NAME,
            PARSER_ABI_VERSION,
            Arc::new(|options: ParseOptions| -> Box<dyn SlotParser> {
                Box::new(MultiSlotTextParser::new(options))
            }),
        );
        registry
    }

    /// Registers `factory` under `name`, replacing any previous factory.
    pub fn register(&self, name: &str, abi_version: u32, factory: ParserFactory) {
        self.factories.write().insert(
            name.to_string(),
            Registration {
                abi_version,
                factory,
            },
        );
    }

    /// Loads and initializes the parser `name`, or returns the instance
    /// already loaded with the same `slots` and `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParserLoad`] when the name is unknown, the ABI version
    /// does not match, or the parser rejects the slots.
    pub fn load(
        &self,
        name: &str,
        slots: &[AllSlotInfo],
        options: ParseOptions,
    ) -> Result<Arc<dyn SlotParser>> {
        let mut loaded = self.loaded.lock();
        let cached = loaded.get(name).and_then(|instances| {
            instances
                .iter()
                .find(|l| l.options == options && l.slots == slots)
        });
        if let Some(instance) = cached {
            return Ok(Arc::clone(&instance.parser));
        }

        let load_err = |reason: String| Error::ParserLoad {
            name: name.to_string(),
            reason,
        };

        let factory = {
            let factories = self.factories.read();
            let registration = factories
                .get(name)
                .ok_or_else(|| load_err("not registered".to_string()))?;
            if registration.abi_version != PARSER_ABI_VERSION {
                return Err(load_err(format!(
                    "registered with ABI {}, expected {PARSER_ABI_VERSION}",
                    registration.abi_version
                )));
            }
            Arc::clone(&registration.factory)
        };

        let mut parser = factory(options);
        if parser.abi_version() != PARSER_ABI_VERSION {
            return Err(load_err(format!(
                "instance reports ABI {}, expected {PARSER_ABI_VERSION}",
                parser.abi_version()
            )));
        }
        parser.init(slots).map_err(|e| load_err(e.to_string()))?;

        let parser: Arc<dyn SlotParser> = Arc::from(parser);
        loaded.entry(name.to_string()).or_default().push(LoadedParser {
            options,
            slots: slots.to_vec(),
            parser: Arc::clone(&parser),
        });
        tracing::info!(parser = name, slots = slots.len(), ?options, "Loaded parser");
        Ok(parser)
    }

    /// Drops every loaded instance of `name` and loads it again.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn reload(
        &self,
        name: &str,
        slots: &[AllSlotInfo],
        options: ParseOptions,
    ) -> Result<Arc<dyn SlotParser>> {
        self.close(name);
        self.load(name, slots, options)
    }

    /// Drops every loaded instance of `name`. Returns false if none was loaded.
    ///
    /// Readers holding the instance keep it alive until they finish.
    pub fn close(&self, name: &str) -> bool {
        self.loaded.lock().remove(name).is_some()
    }

    /// True if a factory is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// True if `name` is currently loaded.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    /// Number of live instances of `name`.
    #[must_use]
    pub fn loaded_instances(&self, name: &str) -> usize {
        self.loaded.lock().get(name).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("ParserRegistry")
            .field("registered", &names)
            .finish_non_exhaustive()
    }
}
