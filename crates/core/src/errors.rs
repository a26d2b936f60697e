use thiserror::Error;

use crate::domain::action::{ActionType, CategoryKey, LocationRef, TagNumber};
use crate::domain::inventory::TagState;

/// Rejections that are the user's to fix. Never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("insufficient stock of {category} at {location}: requested {requested}, available {available}")]
    InsufficientStock {
        location: LocationRef,
        category: CategoryKey,
        requested: i64,
        available: i64,
    },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("pending action is {pending}, confirmation targeted {requested}")]
    ActionTypeMismatch { pending: ActionType, requested: ActionType },
    #[error("tag {tag} already exists in state {state:?}")]
    TagAlreadyRegistered { tag: TagNumber, state: TagState },
    #[error("tag {tag} is not registered on this farm")]
    UnknownTag { tag: TagNumber },
    #[error("tag {tag} is {state:?} at {location}, not available for this action")]
    TagUnavailable { tag: TagNumber, state: TagState, location: LocationRef },
}

impl ValidationError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientStock { location, category, requested, available } => format!(
                "Not enough {category} at {location}: you asked for {requested} but only {available} are available. Nothing was changed."
            ),
            Self::MalformedInput(detail) => {
                format!("I couldn't use that: {detail}. Please check it and send it again.")
            }
            Self::ActionTypeMismatch { pending, requested } => format!(
                "Your pending action is a {} but you confirmed a {}. I discarded it; please send the original request again.",
                pending.as_str().replace('_', " "),
                requested.as_str().replace('_', " ")
            ),
            Self::TagAlreadyRegistered { tag, .. } => {
                format!("Tag {tag} is already registered. Nothing was changed.")
            }
            Self::UnknownTag { tag } => {
                format!("Tag {tag} is not registered on this farm. Nothing was changed.")
            }
            Self::TagUnavailable { tag, location, .. } => format!(
                "Tag {tag} is not an active animal at {location}. Nothing was changed."
            ),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// Stored state the service cannot read back; retrying will not help.
    #[error("internal failure: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::Validation(error)) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Internal(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::action::{ActionType, CategoryKey, LocationRef};
    use crate::errors::{ApplicationError, DomainError, InterfaceError, ValidationError};

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::from(ValidationError::malformed(
            "sender_key is required",
        )))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database is locked".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn internal_error_maps_to_internal() {
        let interface = ApplicationError::Internal("unreadable queue row".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn insufficient_stock_message_states_nothing_changed() {
        let message = ValidationError::InsufficientStock {
            location: LocationRef("paddock-1".to_owned()),
            category: CategoryKey("steers".to_owned()),
            requested: 6,
            available: 5,
        }
        .user_message();

        assert!(message.contains("only 5 are available"));
        assert!(message.contains("Nothing was changed"));
    }

    #[test]
    fn mismatch_message_asks_for_the_original_request() {
        let message = ValidationError::ActionTypeMismatch {
            pending: ActionType::StockMovement,
            requested: ActionType::LivestockTag,
        }
        .user_message();

        assert!(message.contains("stock movement"));
        assert!(message.contains("livestock tag"));
    }
}
