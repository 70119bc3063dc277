use std::sync::Arc;

use tracing::{debug, warn};

use ward_core::ids::{PatientId, UserId};
use ward_store::patients::PatientRow;
use ward_store::PatientSource;

const FIELD_LIMIT: usize = 120;
const DELIMITER: &str = "---";
const TRAILER: &str = "Remember this patient context for your responses. Refer to the patient by name and consider their specific details when providing information.";

/// Rendered patient context prepended to the system prompt.
///
/// Built only from records the caller owns. The empty fragment is the
/// fail-closed value for every lookup or ownership failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextFragment(String);

impl ContextFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn render(patient: &PatientRow) -> Self {
        let dob = patient.date_of_birth.format("%B %-d, %Y").to_string();
        Self(format!(
            "Current Patient Context:\nName: {}\nDate of Birth: {}\nGender: {}\nPatient ID: {}\n{DELIMITER}\n{TRAILER}",
            bounded(&patient.name),
            dob,
            bounded(&patient.gender),
            bounded(patient.id.as_str()),
        ))
    }
}

/// Single-line, length-capped rendition of a record field.
fn bounded(field: &str) -> String {
    let flat: String = field
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    flat.trim().chars().take(FIELD_LIMIT).collect()
}

/// Resolves an optional subject id into a context fragment for the caller.
#[derive(Clone)]
pub struct ContextResolver {
    patients: Arc<dyn PatientSource>,
}

impl ContextResolver {
    pub fn new(patients: Arc<dyn PatientSource>) -> Self {
        Self { patients }
    }

    /// Never fails. One lookup, no retry.
    pub async fn resolve(&self, subject: Option<&PatientId>, caller: &UserId) -> ContextFragment {
        let Some(id) = subject.filter(|id| !id.is_blank()) else {
            return ContextFragment::empty();
        };

        match self.patients.get_by_id(id).await {
            Ok(Some(patient)) if patient.owner_id == *caller => {
                debug!(patient_id = %id, "patient context resolved");
                ContextFragment::render(&patient)
            }
            Ok(Some(_)) => {
                warn!(
                    target: "ward::security",
                    caller = %caller,
                    patient_id = %id,
                    "patient context requested for a record owned by another user"
                );
                ContextFragment::empty()
            }
            Ok(None) => {
                warn!(
                    target: "ward::security",
                    caller = %caller,
                    patient_id = %id,
                    "patient context requested for a record that does not exist"
                );
                ContextFragment::empty()
            }
            Err(error) => {
                warn!(patient_id = %id, error = %error, "patient lookup failed, continuing without context");
                ContextFragment::empty()
            }
        }
    }
}
