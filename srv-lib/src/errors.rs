use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("secret not found or already accessed")]
    NotFound,
    #[error("Payload must not be empty")]
    EmptyPayload,
    #[error("Payload too large. Max size is {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Database error: {0}")]
    DatabaseError(String),
}
