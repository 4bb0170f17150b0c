//! SearchParameter Registry.
//!
//! The registry maintains an in-memory cache of the search parameters that
//! drive indexing, indexed by both (resource_type, param_code) and canonical URL.
//! It is shared between the indexer and the query builder behind a
//! `parking_lot::RwLock`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

use super::errors::RegistryError;

/// Status of a SearchParameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterStatus {
    /// Active - used for indexing and searches.
    #[default]
    Active,
    /// Draft - informational, not yet active.
    Draft,
    /// Retired - disabled, not usable.
    Retired,
}

impl SearchParameterStatus {
    /// Parse from FHIR status string.
    pub fn from_fhir_status(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(SearchParameterStatus::Active),
            "draft" => Some(SearchParameterStatus::Draft),
            "retired" => Some(SearchParameterStatus::Retired),
            _ => None,
        }
    }

    /// Returns true if this status allows the parameter to be used.
    pub fn is_usable(&self) -> bool {
        *self == SearchParameterStatus::Active
    }
}

/// Source of a SearchParameter definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterSource {
    /// Built-in parameters compiled into the crate.
    #[default]
    Embedded,
    /// Parameters loaded from SearchParameter resources at runtime.
    Loaded,
}

/// Definition of a SearchParameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (e.g., "name", "identifier").
    pub code: String,

    /// Description of the parameter.
    pub description: Option<String>,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// FHIRPath expression for extracting values.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,

    /// Current status.
    pub status: SearchParameterStatus,

    /// Source of this definition.
    pub source: SearchParameterSource,
}

impl SearchParameterDefinition {
    /// Creates a new SearchParameter definition.
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            description: None,
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
            status: SearchParameterStatus::Active,
            source: SearchParameterSource::Embedded,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: SearchParameterSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SearchParameterStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns whether this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == "Resource" || b == "DomainResource")
    }
}

/// In-memory registry of SearchParameter definitions.
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, param_code).
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,
}

impl SearchParameterRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self {
            params_by_type: HashMap::new(),
            params_by_url: HashMap::new(),
        }
    }

    /// Creates a registry holding the embedded parameters.
    pub fn with_embedded() -> Self {
        let mut registry = Self::new();
        registry.register_all(super::loader::SearchParameterLoader::new().load_embedded());
        registry
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.params_by_url.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.params_by_url.is_empty()
    }

    /// Registers every parameter whose URL is not yet known.
    ///
    /// Returns the number of parameters added.
    pub fn register_all<I>(&mut self, params: I) -> usize
    where
        I: IntoIterator<Item = SearchParameterDefinition>,
    {
        let mut added = 0;
        for param in params {
            if !self.params_by_url.contains_key(&param.url) {
                self.register_internal(param);
                added += 1;
            }
        }
        added
    }

    /// Gets all active parameters declared directly on a resource type.
    pub fn get_active_params(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        self.params_by_type
            .get(resource_type)
            .map(|params| {
                params
                    .values()
                    .filter(|p| p.status.is_usable())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Gets the active parameters that apply to a resource type, including
    /// `Resource`-level ones not shadowed by a type-specific code.
    ///
    /// The result is ordered by code.
    pub fn params_for(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let mut params = self.get_active_params(resource_type);
        for common in self
            .get_active_params("Resource")
            .into_iter()
            .chain(self.get_active_params("DomainResource"))
        {
            if !params.iter().any(|p| p.code == common.code) {
                params.push(common);
            }
        }
        params.sort_by(|a, b| a.code.cmp(&b.code));
        params
    }

    /// Gets a specific parameter by resource type and code, falling back to
    /// `Resource`-level parameters.
    pub fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        [resource_type, "DomainResource", "Resource"]
            .iter()
            .find_map(|base| self.params_by_type.get(*base).and_then(|p| p.get(code)))
            .cloned()
    }

    /// Gets a parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_url.get(url).cloned()
    }

    /// Registers a new parameter.
    pub fn register(&mut self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        if self.params_by_url.contains_key(&param.url) {
            return Err(RegistryError::DuplicateUrl { url: param.url });
        }

        self.register_internal(param);
        Ok(())
    }

    fn register_internal(&mut self, param: SearchParameterDefinition) {
        let param = Arc::new(param);

        self.params_by_url
            .insert(param.url.clone(), Arc::clone(&param));

        for base in &param.base {
            self.params_by_type
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }
    }

    /// Updates a parameter's status.
    pub fn update_status(
        &mut self,
        url: &str,
        status: SearchParameterStatus,
    ) -> Result<(), RegistryError> {
        let old_param = self
            .params_by_url
            .get(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        let mut new_def = (**old_param).clone();
        new_def.status = status;
        let new_param = Arc::new(new_def);

        self.params_by_url
            .insert(url.to_string(), Arc::clone(&new_param));

        for base in &new_param.base {
            if let Some(type_params) = self.params_by_type.get_mut(base) {
                type_params.insert(new_param.code.clone(), Arc::clone(&new_param));
            }
        }

        Ok(())
    }

    /// Removes a parameter from the registry.
    pub fn unregister(&mut self, url: &str) -> Result<(), RegistryError> {
        let param = self
            .params_by_url
            .remove(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        for base in &param.base {
            if let Some(type_params) = self.params_by_type.get_mut(base) {
                type_params.remove(&param.code);
                if type_params.is_empty() {
                    self.params_by_type.remove(base);
                }
            }
        }

        Ok(())
    }

    /// Returns all resource types that have registered parameters.
    pub fn resource_types(&self) -> Vec<String> {
        self.params_by_type.keys().cloned().collect()
    }
}

impl Default for SearchParameterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("params_count", &self.params_by_url.len())
            .field(
                "resource_types",
                &self.params_by_type.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_param(code: &str, base: &str) -> SearchParameterDefinition {
        SearchParameterDefinition::new(
            format!("http://example.org/sp/{}-{}", base, code),
            code,
            SearchParamType::String,
            format!("{}.{}", base, code),
        )
        .with_base(vec![base])
    }

    #[test]
    fn test_search_parameter_status() {
        assert!(SearchParameterStatus::Active.is_usable());
        assert!(!SearchParameterStatus::Draft.is_usable());
        assert!(!SearchParameterStatus::Retired.is_usable());

        assert_eq!(
            SearchParameterStatus::from_fhir_status("retired"),
            Some(SearchParameterStatus::Retired)
        );
    }

    #[test]
    fn test_search_parameter_definition() {
        let def = test_param("name", "Patient");
        assert_eq!(def.code, "name");
        assert!(def.applies_to("Patient"));
        assert!(!def.applies_to("Observation"));
    }

    #[test]
    fn test_registry_operations() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(test_param("test", "Patient")).unwrap();
        assert_eq!(registry.len(), 1);

        let url = "http://example.org/sp/Patient-test";
        assert!(registry.get_by_url(url).is_some());
        assert_eq!(registry.get_param("Patient", "test").unwrap().code, "test");
        assert_eq!(registry.get_active_params("Patient").len(), 1);

        registry
            .update_status(url, SearchParameterStatus::Retired)
            .unwrap();
        assert!(registry.get_active_params("Patient").is_empty());

        registry.unregister(url).unwrap();
        assert!(registry.is_empty());
        assert!(registry.resource_types().is_empty());
    }

    #[test]
    fn test_duplicate_url_error() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(test_param("test", "Patient")).unwrap();

        let result = registry.register(test_param("test", "Patient"));
        assert!(matches!(result, Err(RegistryError::DuplicateUrl { .. })));
    }

    #[test]
    fn test_params_for_includes_resource_level() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(test_param("family", "Patient")).unwrap();
        registry.register(test_param("_id", "Resource")).unwrap();
        registry.register(test_param("family", "Resource")).unwrap();

        let codes: Vec<_> = registry
            .params_for("Patient")
            .iter()
            .map(|p| p.url.clone())
            .collect();
        assert_eq!(
            codes,
            vec![
                "http://example.org/sp/Resource-_id",
                "http://example.org/sp/Patient-family",
            ]
        );
        assert!(registry.get_param("Observation", "_id").is_some());
    }

    #[test]
    fn test_with_embedded() {
        let registry = SearchParameterRegistry::with_embedded();
        assert!(registry.get_param("Patient", "family").is_some());
        assert!(registry.get_param("Location", "near").is_some());
    }
}
