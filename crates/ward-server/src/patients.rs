use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{info, warn};

use ward_core::ids::{PatientId, UserId};
use ward_store::patients::{NewPatient, PatientRow};

use crate::auth::Principal;
use crate::chat::IdQuery;
use crate::error::ApiError;
use crate::server::AppState;

const MISSING_FIELDS: &str = "Missing required fields: name, dateOfBirth, and gender are required";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp; only the date is kept.
fn parse_date_of_birth(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn required(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `POST /api/patient`
pub async fn create_patient(
    State(state): State<AppState>,
    Principal(caller): Principal,
    payload: Result<Json<CreatePatientRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (Some(name), Some(dob), Some(gender)) = (
        required(request.name),
        required(request.date_of_birth),
        required(request.gender),
    ) else {
        return Err(ApiError::BadRequest(MISSING_FIELDS.into()));
    };
    let date_of_birth = parse_date_of_birth(&dob)
        .ok_or_else(|| ApiError::BadRequest("dateOfBirth must be a date (YYYY-MM-DD)".into()))?;

    let patient = state.store.patients.create(
        &caller,
        NewPatient {
            name,
            date_of_birth,
            gender,
        },
    )?;
    info!(patient_id = %patient.id, owner = %caller, "patient created");
    Ok((StatusCode::CREATED, Json(patient)).into_response())
}

/// `GET /api/patient` lists the caller's patients; `?id=` fetches one.
pub async fn get_patients(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Query(query): Query<IdQuery>,
) -> Result<Response, ApiError> {
    match query.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            let patient = owned_patient(&state, &caller, &PatientId::from_raw(id))?;
            Ok(Json(patient).into_response())
        }
        None => Ok(Json(state.store.patients.list_by_owner(&caller)?).into_response()),
    }
}

/// `GET /api/patient/{id}`
pub async fn get_patient(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Path(id): Path<String>,
) -> Result<Json<PatientRow>, ApiError> {
    owned_patient(&state, &caller, &PatientId::from_raw(id)).map(Json)
}

fn owned_patient(state: &AppState, caller: &UserId, id: &PatientId) -> Result<PatientRow, ApiError> {
    let patient = state
        .store
        .patients
        .get(id)?
        .ok_or(ApiError::NotFound("Patient not found"))?;
    if patient.owner_id != *caller {
        warn!(
            target: "ward::security",
            caller = %caller,
            patient_id = %id,
            "access to a patient owned by another user"
        );
        return Err(ApiError::Forbidden);
    }
    Ok(patient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{TestServer, TOKEN_A, TOKEN_B, USER_A};
    use serde_json::json;

    async fn create(server: &TestServer, token: &str, body: serde_json::Value) -> reqwest::Response {
        server
            .client
            .post(server.url("/api/patient"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(server: &TestServer, token: &str, path: &str) -> reqwest::Response {
        server
            .client
            .get(server.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    #[test]
    fn date_of_birth_formats() {
        let expected = NaiveDate::from_ymd_opt(1984, 3, 7).unwrap();
        assert_eq!(parse_date_of_birth("1984-03-07"), Some(expected));
        assert_eq!(parse_date_of_birth("1984-03-07T00:00:00.000Z"), Some(expected));
        assert_eq!(parse_date_of_birth("07/03/1984"), None);
    }

    #[tokio::test]
    async fn create_requires_all_fields() {
        let server = TestServer::start(vec![]).await;
        for body in [
            json!({"dateOfBirth": "1984-03-07", "gender": "female"}),
            json!({"name": "Ada", "gender": "female"}),
            json!({"name": "Ada", "dateOfBirth": "1984-03-07", "gender": "  "}),
        ] {
            let resp = create(&server, TOKEN_A, body).await;
            assert_eq!(resp.status(), 400);
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["message"], MISSING_FIELDS);
        }
        let resp = create(&server, TOKEN_A, json!({"name": "Ada", "dateOfBirth": "soon", "gender": "f"})).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn create_then_fetch_with_ownership() {
        let server = TestServer::start(vec![]).await;
        let resp = create(
            &server,
            TOKEN_A,
            json!({"name": "Ada Lovelace", "dateOfBirth": "1984-03-07", "gender": "female"}),
        )
        .await;
        assert_eq!(resp.status(), 201);
        let created: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(created["ownerId"], USER_A);
        assert_eq!(created["dateOfBirth"], "1984-03-07");
        let id = created["id"].as_str().unwrap().to_string();

        let resp = get(&server, TOKEN_A, &format!("/api/patient/{id}")).await;
        assert_eq!(resp.status(), 200);
        let resp = get(&server, TOKEN_A, &format!("/api/patient?id={id}")).await;
        assert_eq!(resp.status(), 200);

        let resp = get(&server, TOKEN_B, &format!("/api/patient/{id}")).await;
        assert_eq!(resp.status(), 403);
        let resp = get(&server, TOKEN_B, &format!("/api/patient?id={id}")).await;
        assert_eq!(resp.status(), 403);

        let resp = get(&server, TOKEN_A, "/api/patient/pat_missing").await;
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Patient not found");
    }

    #[tokio::test]
    async fn list_is_scoped_to_caller() {
        let server = TestServer::start(vec![]).await;
        create(&server, TOKEN_A, json!({"name": "A1", "dateOfBirth": "1990-01-01", "gender": "m"})).await;
        create(&server, TOKEN_A, json!({"name": "A2", "dateOfBirth": "1991-01-01", "gender": "f"})).await;
        create(&server, TOKEN_B, json!({"name": "B1", "dateOfBirth": "1992-01-01", "gender": "f"})).await;

        let list: Vec<serde_json::Value> = get(&server, TOKEN_A, "/api/patient").await.json().await.unwrap();
        let names: Vec<&str> = list.iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["A1", "A2"]);
    }

    #[tokio::test]
    async fn patient_routes_require_auth() {
        let server = TestServer::start(vec![]).await;
        let resp = server.client.get(server.url("/api/patient")).send().await.unwrap();
        assert_eq!(resp.status(), 401);
    }
}
