use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::{AppError, FieldError};
use validator::Validate;

/// `Json<T>` that also runs `validator` rules, rejecting with a 400 envelope.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            AppError::ValidationError(vec![FieldError::new("body", e.body_text())])
        })?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}
