use std::collections::HashMap;

use crate::error::ValidationError;
use crate::filters::{
    BlurFilter, EdgeDetectFilter, FilterKind, FrameFilter, GrayscaleFilter, IdentityFilter, SepiaFilter,
};

type FilterFactory = Box<dyn Fn() -> Box<dyn FrameFilter> + Send + Sync>;

/// Registry for the available frame filters
///
/// Filters are registered by name; the built-in set covers every
/// [`FilterKind`].
pub struct FilterRegistry {
    filters: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// Create a new registry with all built-in filters
    pub fn new() -> Self {
        let mut registry = Self {
            filters: HashMap::new(),
        };
        registry.register_builtin_filters();
        registry
    }

    fn register_builtin_filters(&mut self) {
        self.register(FilterKind::None.as_str(), || Box::new(IdentityFilter));
        self.register(FilterKind::Sepia.as_str(), || Box::new(SepiaFilter::new()));
        self.register(FilterKind::Grayscale.as_str(), || Box::new(GrayscaleFilter::new()));
        self.register(FilterKind::EdgeDetect.as_str(), || Box::new(EdgeDetectFilter::new()));
        self.register(FilterKind::Blur.as_str(), || Box::new(BlurFilter::new()));
    }

    /// Register a custom filter, replacing any filter with the same name
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn FrameFilter> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Box::new(factory));
    }

    /// Get a filter by name
    pub fn get_filter(&self, name: &str) -> Option<Box<dyn FrameFilter>> {
        self.filters.get(name).map(|factory| factory())
    }

    /// Instantiate the filter for a request's `FilterKind`
    pub fn resolve(&self, kind: FilterKind) -> Result<Box<dyn FrameFilter>, ValidationError> {
        self.get_filter(kind.as_str())
            .ok_or_else(|| ValidationError::UnknownFilter {
                name: kind.to_string(),
            })
    }

    /// Get all available filter names, sorted
    pub fn available_filters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
