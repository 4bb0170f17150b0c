//! Test fixtures for local persistence testing.
//!
//! Builders for the FHIR records used across the integration tests.

use serde_json::{Value, json};

/// A patient fixture for testing.
#[derive(Debug, Clone)]
pub struct PatientFixture {
    /// Patient ID.
    pub id: String,
    /// Patient family name.
    pub family: String,
    /// Patient given names.
    pub given: Vec<String>,
    /// Birth date (YYYY-MM-DD format).
    pub birth_date: Option<String>,
    /// Patient gender.
    pub gender: Option<String>,
    /// Patient identifiers (system, value pairs).
    pub identifiers: Vec<(String, String)>,
    /// Reference to managing organization.
    pub organization_ref: Option<String>,
}

impl PatientFixture {
    /// Creates a new patient fixture with minimal required fields.
    pub fn new(id: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            given: vec![],
            birth_date: None,
            gender: None,
            identifiers: vec![],
            organization_ref: None,
        }
    }

    /// Sets given names.
    pub fn with_given(mut self, given: Vec<&str>) -> Self {
        self.given = given.into_iter().map(String::from).collect();
        self
    }

    /// Sets birth date.
    pub fn with_birth_date(mut self, date: impl Into<String>) -> Self {
        self.birth_date = Some(date.into());
        self
    }

    /// Sets gender.
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    /// Adds an identifier.
    pub fn with_identifier(mut self, system: impl Into<String>, value: impl Into<String>) -> Self {
        self.identifiers.push((system.into(), value.into()));
        self
    }

    /// Sets managing organization reference.
    pub fn with_organization(mut self, org_ref: impl Into<String>) -> Self {
        self.organization_ref = Some(org_ref.into());
        self
    }

    /// Converts to FHIR JSON.
    pub fn to_json(&self) -> Value {
        let mut patient = json!({
            "resourceType": "Patient",
            "id": self.id,
            "name": [{
                "family": self.family,
                "given": self.given,
            }],
        });

        if let Some(birth_date) = &self.birth_date {
            patient["birthDate"] = json!(birth_date);
        }

        if let Some(gender) = &self.gender {
            patient["gender"] = json!(gender);
        }

        if !self.identifiers.is_empty() {
            patient["identifier"] = json!(
                self.identifiers
                    .iter()
                    .map(|(system, value)| json!({"system": system, "value": value}))
                    .collect::<Vec<_>>()
            );
        }

        if let Some(org_ref) = &self.organization_ref {
            patient["managingOrganization"] = json!({"reference": org_ref});
        }

        patient
    }
}

/// An observation fixture for testing.
#[derive(Debug, Clone)]
pub struct ObservationFixture {
    /// Observation ID.
    pub id: String,
    /// Observation status.
    pub status: String,
    /// LOINC code.
    pub code: String,
    /// Patient reference.
    pub patient_ref: String,
    /// Effective date/time.
    pub effective: Option<String>,
    /// Value (for quantity observations).
    pub value: Option<f64>,
    /// Value unit code.
    pub unit: Option<String>,
}

impl ObservationFixture {
    /// Creates a new observation fixture.
    pub fn new(
        id: impl Into<String>,
        code: impl Into<String>,
        patient_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: "final".to_string(),
            code: code.into(),
            patient_ref: patient_ref.into(),
            effective: None,
            value: None,
            unit: None,
        }
    }

    /// Sets the observation status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Sets the effective date/time.
    pub fn with_effective(mut self, effective: impl Into<String>) -> Self {
        self.effective = Some(effective.into());
        self
    }

    /// Sets a quantity value.
    pub fn with_value(mut self, value: f64, unit: impl Into<String>) -> Self {
        self.value = Some(value);
        self.unit = Some(unit.into());
        self
    }

    /// Converts to FHIR JSON.
    pub fn to_json(&self) -> Value {
        let mut obs = json!({
            "resourceType": "Observation",
            "id": self.id,
            "status": self.status,
            "code": {
                "coding": [{
                    "system": "http://loinc.org",
                    "code": self.code,
                }],
            },
            "subject": {
                "reference": self.patient_ref,
            },
        });

        if let Some(effective) = &self.effective {
            obs["effectiveDateTime"] = json!(effective);
        }

        if let (Some(value), Some(unit)) = (&self.value, &self.unit) {
            obs["valueQuantity"] = json!({
                "value": value,
                "code": unit,
                "system": "http://unitsofmeasure.org",
            });
        }

        obs
    }
}

/// Creates a Location with a position.
pub fn location(id: &str, name: &str, latitude: f64, longitude: f64) -> Value {
    json!({
        "resourceType": "Location",
        "id": id,
        "name": name,
        "position": {
            "latitude": latitude,
            "longitude": longitude,
        },
    })
}
