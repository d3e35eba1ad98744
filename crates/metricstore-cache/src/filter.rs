//! Read filters dispatching metrics to callbacks
//!
//! A filter holds conditions on document fields: present, absent, or text
//! value fully matching a regex. A metric reaches a filter's callback only if
//! all of its conditions hold. Field paths are parsed once per request and
//! resolved at most once per document, however many filters use them.

use metricstore_common::{Error, JsonPath, Result, StoredMetric, text_value};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Callback of a read filter
pub type MetricCallback<'a> = Box<dyn FnMut(&StoredMetric) + 'a>;

pub struct ReadFilter<'a> {
    present: Vec<usize>,
    absent: Vec<usize>,
    values: Vec<(usize, Regex)>,
    callback: MetricCallback<'a>,
}

impl ReadFilter<'_> {
    fn matches(&self, view: &mut DocumentView<'_, '_>) -> bool {
        self.present.iter().all(|&path| view.get(path).is_some())
            && self.absent.iter().all(|&path| view.get(path).is_none())
            && self
                .values
                .iter()
                .all(|(path, regex)| regex.is_match(&text_value(view.get(*path))))
    }
}

/// Filters of one request and the field paths they reference
#[derive(Default)]
pub struct FilterSet<'a> {
    paths: Vec<JsonPath>,
    index: HashMap<String, usize>,
    filters: Vec<ReadFilter<'a>>,
}

impl<'a> FilterSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    fn path(&mut self, field: &str) -> Result<usize> {
        if let Some(&idx) = self.index.get(field) {
            return Ok(idx);
        }
        let idx = self.paths.len();
        self.paths.push(JsonPath::parse(field)?);
        self.index.insert(field.to_string(), idx);
        Ok(idx)
    }

    /// Register a filter without conditions
    pub fn add(&mut self, callback: impl FnMut(&StoredMetric) + 'a) {
        self.builder(callback).build();
    }

    /// Start a filter with conditions
    pub fn builder(&mut self, callback: impl FnMut(&StoredMetric) + 'a) -> FilterBuilder<'_, 'a> {
        FilterBuilder {
            set: self,
            filter: ReadFilter {
                present: Vec::new(),
                absent: Vec::new(),
                values: Vec::new(),
                callback: Box::new(callback),
            },
        }
    }

    /// Call every matching filter in registration order
    pub fn dispatch(&mut self, metric: &StoredMetric) {
        let mut view = DocumentView::new(&self.paths, metric);
        for filter in &mut self.filters {
            if filter.matches(&mut view) {
                (filter.callback)(metric);
            }
        }
    }
}

/// Builder accepting all kinds of conditions
pub struct FilterBuilder<'s, 'a> {
    set: &'s mut FilterSet<'a>,
    filter: ReadFilter<'a>,
}

impl<'s, 'a> FilterBuilder<'s, 'a> {
    pub fn and_field_is_present(mut self, field: &str) -> Result<Self> {
        let path = self.set.path(field)?;
        self.filter.present.push(path);
        Ok(self)
    }

    pub fn and_field_is_not_present(mut self, field: &str) -> Result<Self> {
        let path = self.set.path(field)?;
        self.filter.absent.push(path);
        Ok(self)
    }

    /// Require the field's text value to match `pattern` in full
    pub fn and_value_matches(mut self, field: &str, pattern: &str) -> Result<ValueFilterBuilder<'s, 'a>> {
        self.push_value(field, pattern)?;
        Ok(ValueFilterBuilder(self))
    }

    fn push_value(&mut self, field: &str, pattern: &str) -> Result<()> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))?;
        let path = self.set.path(field)?;
        self.filter.values.push((path, regex));
        Ok(())
    }

    /// Register the filter
    pub fn build(self) {
        self.set.filters.push(self.filter);
    }
}

/// Builder once a value condition was added
pub struct ValueFilterBuilder<'s, 'a>(FilterBuilder<'s, 'a>);

impl<'s, 'a> ValueFilterBuilder<'s, 'a> {
    pub fn and_value_matches(mut self, field: &str, pattern: &str) -> Result<Self> {
        self.0.push_value(field, pattern)?;
        Ok(self)
    }

    pub fn build(self) {
        self.0.build();
    }
}

/// Memoized field lookups of one document
struct DocumentView<'p, 'd> {
    paths: &'p [JsonPath],
    metric: &'d StoredMetric,
    resolved: Vec<Option<Option<&'d Value>>>,
}

impl<'p, 'd> DocumentView<'p, 'd> {
    fn new(paths: &'p [JsonPath], metric: &'d StoredMetric) -> Self {
        Self {
            paths,
            metric,
            resolved: vec![None; paths.len()],
        }
    }

    fn get(&mut self, path: usize) -> Option<&'d Value> {
        if let Some(node) = self.resolved[path] {
            return node;
        }
        let node = self.paths[path].extract(&self.metric.document);
        self.resolved[path] = Some(node);
        node
    }
}
