//! SearchParameter Loader.
//!
//! Loads SearchParameter definitions from two sources:
//! - Embedded parameters covering the resource types commonly held on device
//! - SearchParameter resources supplied at runtime (single, array or Bundle)

use serde_json::Value;

use crate::types::SearchParamType;

use super::errors::LoaderError;
use super::registry::{SearchParameterDefinition, SearchParameterSource, SearchParameterStatus};

/// Embedded parameters as `(base, code, type, expression)`.
const EMBEDDED_PARAMETERS: &[(&str, &str, SearchParamType, &str)] = &[
    // Resource
    ("Resource", "_id", SearchParamType::Token, "Resource.id"),
    ("Resource", "_tag", SearchParamType::Token, "Resource.meta.tag"),
    ("Resource", "_profile", SearchParamType::Uri, "Resource.meta.profile"),
    ("Resource", "_security", SearchParamType::Token, "Resource.meta.security"),
    // Patient
    ("Patient", "name", SearchParamType::String, "Patient.name"),
    ("Patient", "family", SearchParamType::String, "Patient.name.family"),
    ("Patient", "given", SearchParamType::String, "Patient.name.given"),
    ("Patient", "identifier", SearchParamType::Token, "Patient.identifier"),
    ("Patient", "birthdate", SearchParamType::Date, "Patient.birthDate"),
    ("Patient", "gender", SearchParamType::Token, "Patient.gender"),
    ("Patient", "active", SearchParamType::Token, "Patient.active"),
    ("Patient", "address", SearchParamType::String, "Patient.address"),
    ("Patient", "address-city", SearchParamType::String, "Patient.address.city"),
    ("Patient", "telecom", SearchParamType::Token, "Patient.telecom"),
    ("Patient", "general-practitioner", SearchParamType::Reference, "Patient.generalPractitioner"),
    ("Patient", "organization", SearchParamType::Reference, "Patient.managingOrganization"),
    // Practitioner
    ("Practitioner", "name", SearchParamType::String, "Practitioner.name"),
    ("Practitioner", "family", SearchParamType::String, "Practitioner.name.family"),
    ("Practitioner", "identifier", SearchParamType::Token, "Practitioner.identifier"),
    ("Practitioner", "active", SearchParamType::Token, "Practitioner.active"),
    // Organization
    ("Organization", "name", SearchParamType::String, "Organization.name"),
    ("Organization", "identifier", SearchParamType::Token, "Organization.identifier"),
    ("Organization", "type", SearchParamType::Token, "Organization.type"),
    ("Organization", "active", SearchParamType::Token, "Organization.active"),
    // Observation
    ("Observation", "code", SearchParamType::Token, "Observation.code"),
    ("Observation", "category", SearchParamType::Token, "Observation.category"),
    ("Observation", "status", SearchParamType::Token, "Observation.status"),
    ("Observation", "subject", SearchParamType::Reference, "Observation.subject"),
    ("Observation", "patient", SearchParamType::Reference, "Observation.subject.where(resolve() is Patient)"),
    ("Observation", "encounter", SearchParamType::Reference, "Observation.encounter"),
    ("Observation", "performer", SearchParamType::Reference, "Observation.performer"),
    ("Observation", "date", SearchParamType::Date, "Observation.effective"),
    ("Observation", "value-quantity", SearchParamType::Quantity, "(Observation.value as Quantity)"),
    ("Observation", "value-string", SearchParamType::String, "(Observation.value as string)"),
    // Condition
    ("Condition", "code", SearchParamType::Token, "Condition.code"),
    ("Condition", "clinical-status", SearchParamType::Token, "Condition.clinicalStatus"),
    ("Condition", "subject", SearchParamType::Reference, "Condition.subject"),
    ("Condition", "patient", SearchParamType::Reference, "Condition.subject.where(resolve() is Patient)"),
    ("Condition", "onset-date", SearchParamType::Date, "Condition.onset.ofType(dateTime) | Condition.onset.ofType(Period)"),
    ("Condition", "recorded-date", SearchParamType::Date, "Condition.recordedDate"),
    // Encounter
    ("Encounter", "status", SearchParamType::Token, "Encounter.status"),
    ("Encounter", "class", SearchParamType::Token, "Encounter.class"),
    ("Encounter", "subject", SearchParamType::Reference, "Encounter.subject"),
    ("Encounter", "patient", SearchParamType::Reference, "Encounter.subject.where(resolve() is Patient)"),
    ("Encounter", "participant", SearchParamType::Reference, "Encounter.participant.individual"),
    ("Encounter", "date", SearchParamType::Date, "Encounter.period"),
    // Location
    ("Location", "name", SearchParamType::String, "Location.name"),
    ("Location", "address", SearchParamType::String, "Location.address"),
    ("Location", "status", SearchParamType::Token, "Location.status"),
    ("Location", "organization", SearchParamType::Reference, "Location.managingOrganization"),
    ("Location", "near", SearchParamType::Special, "Location.position"),
    // Medication
    ("Medication", "code", SearchParamType::Token, "Medication.code"),
    // MedicationRequest
    ("MedicationRequest", "status", SearchParamType::Token, "MedicationRequest.status"),
    ("MedicationRequest", "intent", SearchParamType::Token, "MedicationRequest.intent"),
    ("MedicationRequest", "subject", SearchParamType::Reference, "MedicationRequest.subject"),
    ("MedicationRequest", "patient", SearchParamType::Reference, "MedicationRequest.subject.where(resolve() is Patient)"),
    ("MedicationRequest", "authoredon", SearchParamType::Date, "MedicationRequest.authoredOn"),
    ("MedicationRequest", "code", SearchParamType::Token, "(MedicationRequest.medication as CodeableConcept)"),
    ("MedicationRequest", "medication", SearchParamType::Reference, "(MedicationRequest.medication as Reference)"),
    // Immunization
    ("Immunization", "status", SearchParamType::Token, "Immunization.status"),
    ("Immunization", "patient", SearchParamType::Reference, "Immunization.patient"),
    ("Immunization", "vaccine-code", SearchParamType::Token, "Immunization.vaccineCode"),
    ("Immunization", "date", SearchParamType::Date, "Immunization.occurrence"),
    // Invoice
    ("Invoice", "totalnet", SearchParamType::Quantity, "Invoice.totalNet"),
    ("Invoice", "subject", SearchParamType::Reference, "Invoice.subject"),
    // RiskAssessment
    ("RiskAssessment", "probability", SearchParamType::Number, "RiskAssessment.prediction.probability"),
    ("RiskAssessment", "subject", SearchParamType::Reference, "RiskAssessment.subject"),
    // Questionnaire
    ("Questionnaire", "url", SearchParamType::Uri, "Questionnaire.url"),
    ("Questionnaire", "status", SearchParamType::Token, "Questionnaire.status"),
];

/// Loader for SearchParameter definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchParameterLoader;

impl SearchParameterLoader {
    /// Creates a new loader.
    pub fn new() -> Self {
        Self
    }

    /// Returns the embedded parameters.
    pub fn load_embedded(&self) -> Vec<SearchParameterDefinition> {
        EMBEDDED_PARAMETERS
            .iter()
            .map(|(base, code, param_type, expression)| {
                let url_code = code.trim_start_matches('_');
                SearchParameterDefinition::new(
                    format!("http://hl7.org/fhir/SearchParameter/{}-{}", base, url_code),
                    *code,
                    *param_type,
                    *expression,
                )
                .with_base([*base])
                .with_source(SearchParameterSource::Embedded)
            })
            .collect()
    }

    /// Loads SearchParameter resources from a JSON bundle, array or single resource.
    pub fn load_from_json(&self, json: &Value) -> Result<Vec<SearchParameterDefinition>, LoaderError> {
        let candidates: Vec<&Value> = if let Some(entries) = json.get("entry").and_then(|e| e.as_array()) {
            entries.iter().filter_map(|entry| entry.get("resource")).collect()
        } else if let Some(array) = json.as_array() {
            array.iter().collect()
        } else {
            vec![json]
        };

        candidates
            .into_iter()
            .filter(|r| r.get("resourceType").and_then(|t| t.as_str()) == Some("SearchParameter"))
            .map(|r| self.parse_resource(r))
            .collect()
    }

    /// Parses a SearchParameter resource into a definition.
    pub fn parse_resource(&self, resource: &Value) -> Result<SearchParameterDefinition, LoaderError> {
        let url = required_str(resource, "url", None)?.to_string();
        let code = required_str(resource, "code", Some(&url))?.to_string();
        let type_str = required_str(resource, "type", Some(&url))?;

        let param_type = type_str.parse::<SearchParamType>().map_err(|_| {
            LoaderError::InvalidResource {
                message: format!("Unknown search parameter type: {}", type_str),
                url: Some(url.clone()),
            }
        })?;

        let expression = resource
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if expression.is_empty() && param_type != SearchParamType::Composite {
            return Err(LoaderError::MissingField {
                field: "expression".to_string(),
                url: Some(url),
            });
        }

        let base = string_array(resource, "base").unwrap_or_default();
        if base.is_empty() {
            return Err(LoaderError::MissingField {
                field: "base".to_string(),
                url: Some(url),
            });
        }

        let status = resource
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(SearchParameterStatus::from_fhir_status)
            .unwrap_or(SearchParameterStatus::Active);

        Ok(SearchParameterDefinition {
            url,
            code,
            description: resource
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from),
            param_type,
            expression,
            base,
            target: string_array(resource, "target"),
            status,
            source: SearchParameterSource::Loaded,
        })
    }
}

fn required_str<'a>(
    resource: &'a Value,
    field: &str,
    url: Option<&str>,
) -> Result<&'a str, LoaderError> {
    resource
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| LoaderError::MissingField {
            field: field.to_string(),
            url: url.map(String::from),
        })
}

fn string_array(resource: &Value, field: &str) -> Option<Vec<String>> {
    resource.get(field).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    })
}
