use scanmatrix_core::{CoreError, ErrorResponse};
use scanmatrix_jobs::JobError;
use thiserror::Error;

/// Control plane specific errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Assignment not found: {0}")]
    AssignmentNotFound(u32),
    #[error("Geofence not found: {0}")]
    GeofenceNotFound(String),
    #[error("IV list not found: {0}")]
    IvListNotFound(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error(transparent)]
    JobError(#[from] JobError),
    #[error(transparent)]
    CoreError(#[from] CoreError),
}

impl From<ControlPlaneError> for ErrorResponse {
    fn from(err: ControlPlaneError) -> Self {
        let code = match &err {
            ControlPlaneError::InvalidRequest(_) => "INVALID_REQUEST",
            ControlPlaneError::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            ControlPlaneError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            ControlPlaneError::AssignmentNotFound(_) => "ASSIGNMENT_NOT_FOUND",
            ControlPlaneError::GeofenceNotFound(_) => "GEOFENCE_NOT_FOUND",
            ControlPlaneError::IvListNotFound(_) => "IV_LIST_NOT_FOUND",
            ControlPlaneError::StorageError(_) => "STORAGE_ERROR",
            ControlPlaneError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            ControlPlaneError::JobError(_) => "JOB_ERROR",
            ControlPlaneError::CoreError(_) => "INVALID_DATA",
        };
        let message = match err {
            ControlPlaneError::InvalidRequest(msg)
            | ControlPlaneError::InstanceNotFound(msg)
            | ControlPlaneError::DeviceNotFound(msg)
            | ControlPlaneError::GeofenceNotFound(msg)
            | ControlPlaneError::IvListNotFound(msg)
            | ControlPlaneError::StorageError(msg)
            | ControlPlaneError::ConfigurationError(msg) => msg,
            other => other.to_string(),
        };

        ErrorResponse::new(code, message)
    }
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
