use std::collections::BTreeSet;

use sqlx::Row;
use trust_core::model::{
    CourseId, MinisterStatus, StepData, StepNumber, UserId, UserProgress,
};
use url::Url;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn version_to_i64(v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization("version overflow".into()))
}

pub(crate) fn version_from_i64(v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid version: {v}")))
}

pub(crate) fn step_from_i64(v: i64) -> Result<StepNumber, StorageError> {
    let raw = u32::try_from(v)
        .map_err(|_| StorageError::Serialization(format!("invalid current_step: {v}")))?;
    StepNumber::new(raw).map_err(ser)
}

/// `completed_steps` is stored as a JSON integer array.
pub(crate) fn encode_completed(steps: &BTreeSet<StepNumber>) -> Result<String, StorageError> {
    serde_json::to_string(steps).map_err(ser)
}

pub(crate) fn decode_completed(raw: &str) -> Result<BTreeSet<StepNumber>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

/// `step_data` is stored as a JSON object keyed by step key.
pub(crate) fn encode_step_data(data: &StepData) -> Result<String, StorageError> {
    serde_json::to_string(&data.to_json()).map_err(ser)
}

pub(crate) fn decode_step_data(raw: &str) -> Result<StepData, StorageError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(ser)?;
    StepData::from_json(value).map_err(ser)
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<UserProgress, StorageError> {
    let user_id: UserId = row
        .try_get::<String, _>("user_id")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let course_id = CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?)
        .map_err(ser)?;
    let current_step = step_from_i64(row.try_get::<i64, _>("current_step").map_err(ser)?)?;
    let completed_steps =
        decode_completed(&row.try_get::<String, _>("completed_steps").map_err(ser)?)?;
    let step_data = decode_step_data(&row.try_get::<String, _>("step_data").map_err(ser)?)?;
    let is_complete: bool = row.try_get("is_complete").map_err(ser)?;
    let version = version_from_i64(row.try_get::<i64, _>("version").map_err(ser)?)?;
    let updated_at: Option<chrono::DateTime<chrono::Utc>> =
        row.try_get("updated_at").map_err(ser)?;

    Ok(UserProgress::from_persisted(
        user_id,
        course_id,
        current_step,
        completed_steps,
        step_data,
        is_complete,
        version,
        updated_at,
    ))
}

pub(crate) fn map_minister_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<MinisterStatus, StorageError> {
    let certificate_url = row
        .try_get::<Option<String>, _>("certificate_url")
        .map_err(ser)?
        .map(|raw| Url::parse(&raw).map_err(ser))
        .transpose()?;

    Ok(MinisterStatus {
        is_minister: row.try_get("is_minister").map_err(ser)?,
        minister_name: row.try_get("minister_name").map_err(ser)?,
        certificate_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_steps_encode_as_integer_array() {
        let steps: BTreeSet<StepNumber> = [3, 1, 2]
            .into_iter()
            .map(|n| StepNumber::new(n).unwrap())
            .collect();
        let raw = encode_completed(&steps).unwrap();
        assert_eq!(raw, "[1,2,3]");
        assert_eq!(decode_completed(&raw).unwrap(), steps);
    }

    #[test]
    fn decode_rejects_step_zero_and_non_object_data() {
        assert!(decode_completed("[0]").is_err());
        assert!(decode_step_data("[]").is_err());
        assert!(step_from_i64(0).is_err());
        assert!(version_from_i64(-1).is_err());
    }
}
