use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ward_core::ids::{PatientId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRow {
    pub id: PatientId,
    pub owner_id: UserId,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub created_at: String,
}

#[derive(Clone, Debug)]
pub struct NewPatient {
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
}

#[derive(Clone)]
pub struct PatientRepo {
    db: Database,
}

impl PatientRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, patient), fields(owner = %owner))]
    pub fn create(&self, owner: &UserId, patient: NewPatient) -> Result<PatientRow, StoreError> {
        let id = PatientId::new();
        let now = row_helpers::format_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO patients (id, owner_id, name, date_of_birth, gender, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    owner.as_str(),
                    patient.name,
                    patient.date_of_birth.to_string(),
                    patient.gender,
                    now,
                ],
            )?;
            Ok(PatientRow {
                id,
                owner_id: owner.clone(),
                name: patient.name,
                date_of_birth: patient.date_of_birth,
                gender: patient.gender,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(patient_id = %id))]
    pub fn get(&self, id: &PatientId) -> Result<Option<PatientRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, date_of_birth, gender, created_at
                 FROM patients WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_patient(row).map(Some),
                None => Ok(None),
            }
        })
    }

    #[instrument(skip(self), fields(owner = %owner))]
    pub fn list_by_owner(&self, owner: &UserId) -> Result<Vec<PatientRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, date_of_birth, gender, created_at
                 FROM patients WHERE owner_id = ?1 ORDER BY name ASC",
            )?;
            let mut rows = stmt.query([owner.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_patient(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_patient(row: &rusqlite::Row<'_>) -> Result<PatientRow, StoreError> {
    let dob: String = row_helpers::get(row, 3, "patients", "date_of_birth")?;
    let date_of_birth = dob.parse::<NaiveDate>().map_err(|e| StoreError::CorruptRow {
        table: "patients",
        column: "date_of_birth",
        detail: e.to_string(),
    })?;
    Ok(PatientRow {
        id: PatientId::from_raw(row_helpers::get::<String>(row, 0, "patients", "id")?),
        owner_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "patients", "owner_id")?),
        name: row_helpers::get(row, 2, "patients", "name")?,
        date_of_birth,
        gender: row_helpers::get(row, 4, "patients", "gender")?,
        created_at: row_helpers::get(row, 5, "patients", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_patient(name: &str) -> NewPatient {
        NewPatient {
            name: name.into(),
            date_of_birth: NaiveDate::from_ymd_opt(1984, 3, 7).unwrap(),
            gender: "female".into(),
        }
    }

    #[test]
    fn create_and_get() {
        let repo = PatientRepo::new(Database::in_memory().unwrap());
        let owner = UserId::from_raw("u1");
        let created = repo.create(&owner, new_patient("Ada Byron")).unwrap();
        assert!(created.id.as_str().starts_with("pat_"));

        let fetched = repo.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn get_missing_is_none() {
        let repo = PatientRepo::new(Database::in_memory().unwrap());
        assert!(repo.get(&PatientId::from_raw("nope")).unwrap().is_none());
    }

    #[test]
    fn list_is_owner_scoped() {
        let repo = PatientRepo::new(Database::in_memory().unwrap());
        let u1 = UserId::from_raw("u1");
        repo.create(&u1, new_patient("Zed")).unwrap();
        repo.create(&u1, new_patient("Amy")).unwrap();
        repo.create(&UserId::from_raw("u2"), new_patient("Other")).unwrap();

        let names: Vec<String> = repo.list_by_owner(&u1).unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Amy", "Zed"]);
    }

    #[test]
    fn serializes_camel_case() {
        let repo = PatientRepo::new(Database::in_memory().unwrap());
        let p = repo.create(&UserId::from_raw("u1"), new_patient("Ada")).unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["dateOfBirth"], "1984-03-07");
        assert_eq!(json["ownerId"], "u1");
    }
}
