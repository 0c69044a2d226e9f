//! Shared, lazily initialized codec handles.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::codec::{Codec, GzipCodec, Lz4Codec, ZlibCodec, ZstdCodec};
use super::CompressionMethod;
use crate::{Error, Result};

/// Builds a codec on first use.
pub type CodecFactory = Box<dyn Fn() -> Result<Arc<dyn Codec>> + Send + Sync>;

/// Number of times a factory is invoked before a backend is declared unavailable.
const MAX_INIT_ATTEMPTS: usize = 3;

struct CodecSlot {
    factory: CodecFactory,
    handle: OnceLock<std::result::Result<Arc<dyn Codec>, String>>,
}

impl CodecSlot {
    fn new(factory: CodecFactory) -> Self {
        Self {
            factory,
            handle: OnceLock::new(),
        }
    }

    fn get(&self, method: &CompressionMethod) -> Result<Arc<dyn Codec>> {
        let handle = self.handle.get_or_init(|| {
            let mut last_error = String::new();
            for attempt in 1..=MAX_INIT_ATTEMPTS {
                match (self.factory)() {
                    Ok(codec) => {
                        debug!("Initialized {} codec", method);
                        return Ok(codec);
                    }
                    Err(e) => {
                        warn!("Failed to initialize {} codec (attempt {}): {}", method, attempt, e);
                        last_error = e.to_string();
                    }
                }
            }
            Err(last_error)
        });

        handle.clone().map_err(|reason| Error::CodecUnavailable {
            method: method.to_string(),
            reason,
        })
    }
}

/// Maps compression methods to codec backends.
///
/// Backends are built on first use and reused afterwards. A backend whose
/// initialization fails stays failed; later requests return
/// [`Error::CodecUnavailable`] without retrying.
pub struct CodecRegistry {
    slots: RwLock<FxHashMap<String, Arc<CodecSlot>>>,
}

impl CodecRegistry {
    /// A registry with no backends.
    pub fn empty() -> Self {
        Self {
            slots: RwLock::new(FxHashMap::default()),
        }
    }

    /// A registry with the zlib, gzip, zstd and LZ4 backends.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register_codec(CompressionMethod::Zlib, Arc::new(ZlibCodec));
        registry.register_codec(CompressionMethod::Gzip, Arc::new(GzipCodec));
        registry.register_codec(CompressionMethod::Zstd, Arc::new(ZstdCodec));
        registry.register_codec(CompressionMethod::Lz4, Arc::new(Lz4Codec));
        registry
    }

    /// Process-wide registry with the default backends.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<CodecRegistry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::with_defaults())).clone()
    }

    /// Register a factory, replacing any previous backend for the method.
    pub fn register(&self, method: CompressionMethod, factory: CodecFactory) {
        self.slots
            .write()
            .insert(method.registry_key(), Arc::new(CodecSlot::new(factory)));
    }

    /// Register an already built codec.
    pub fn register_codec(&self, method: CompressionMethod, codec: Arc<dyn Codec>) {
        self.register(method, Box::new(move || Ok(codec.clone())));
    }

    /// Whether a backend is registered for the method.
    pub fn supports(&self, method: &CompressionMethod) -> bool {
        method.is_none() || self.slots.read().contains_key(&method.registry_key())
    }

    /// Resolve the backend for a method.
    pub fn get(&self, method: &CompressionMethod) -> Result<Arc<dyn Codec>> {
        if let CompressionMethod::Unknown(tag) = method {
            return Err(Error::UnknownCompressionMethod(tag.clone()));
        }

        let slot = self.slots.read().get(&method.registry_key()).cloned();
        match slot {
            Some(slot) => slot.get(method),
            None => Err(Error::CodecUnavailable {
                method: method.to_string(),
                reason: "no backend registered".to_string(),
            }),
        }
    }

    /// Decompress `src` into exactly `dst.len()` bytes.
    ///
    /// If the backend produces fewer bytes the rest of `dst` is zero-filled
    /// and a warning is logged. Producing more is an error.
    pub fn decompress(&self, method: &CompressionMethod, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let produced = match method {
            CompressionMethod::None => {
                if src.len() > dst.len() {
                    return Err(Error::Decompression {
                        method: method.to_string(),
                        reason: format!(
                            "{} bytes do not fit a {} byte destination",
                            src.len(),
                            dst.len()
                        ),
                    });
                }
                dst[..src.len()].copy_from_slice(src);
                src.len()
            }
            _ => self.get(method)?.decompress(src, dst)?,
        };

        if produced < dst.len() {
            warn!(
                "{} decompression degraded: produced {} of {} bytes, zero-filling the rest",
                method,
                produced,
                dst.len()
            );
            dst[produced..].fill(0);
        }
        Ok(())
    }

    /// Compress `src` with the given method.
    pub fn compress(&self, method: &CompressionMethod, src: &[u8], level: i32) -> Result<Vec<u8>> {
        match method {
            CompressionMethod::None => Ok(src.to_vec()),
            _ => self.get(method)?.compress(src, level),
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.slots.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("CodecRegistry").field("methods", &names).finish()
    }
}
