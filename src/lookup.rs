//! Name-keyed dispatch to registered hash implementations.
//!
//! The locked pool never calls into this module; it ships alongside it so
//! the library's engine layer can resolve an algorithm name to a concrete
//! implementation. Lookup is first-match: providers register in order and
//! the earliest registration under a name wins.

use std::collections::HashMap;

/// Object-safe surface of a registered hash implementation.
pub trait HashFunction {
    /// Canonical algorithm name (e.g. `"SHA-256"`).
    fn name(&self) -> &'static str;

    /// Digest length in bytes.
    fn output_len(&self) -> usize;

    /// Absorb input.
    fn update(&mut self, data: &[u8]);

    /// Produce the digest and reset the internal state.
    fn finish(&mut self) -> Vec<u8>;
}

/// Constructor for a registered implementation.
pub type HashFactory = fn() -> Box<dyn HashFunction>;

/// Registry of hash constructors keyed by algorithm name.
#[derive(Default)]
pub struct HashRegistry {
    factories: HashMap<&'static str, Vec<HashFactory>>,
}

impl HashRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` as a provider for `name`. Later registrations
    /// under the same name sit behind earlier ones.
    pub fn register(&mut self, name: &'static str, factory: HashFactory) {
        self.factories.entry(name).or_default().push(factory);
    }

    /// Instantiate the first registered implementation for `name`.
    #[must_use]
    pub fn make(&self, name: &str) -> Option<Box<dyn HashFunction>> {
        self.factories
            .get(name)
            .and_then(|providers| providers.first())
            .map(|factory| factory())
    }
}

/// Look up a hash implementation by request name.
///
/// Dispatches to the registry and returns the first match; `None` when
/// nothing is registered under that name.
#[must_use]
pub fn find_hash(request: &str, registry: &HashRegistry) -> Option<Box<dyn HashFunction>> {
    registry.make(request)
}
