//! Mapping from transport outcomes to [`ClientError`]
//!
//! Pure functions with no I/O so every branch can be tested in isolation.

use super::transport::{Exchange, HttpResponse, TransportError};
use crate::error::ClientError;
use crate::models::AuthToken;

/// Map a transport failure that produced no usable response
pub fn classify_transport_error(error: TransportError) -> ClientError {
    if error.is_no_connectivity() {
        ClientError::Unreachable(error)
    } else {
        ClientError::Other(error)
    }
}

/// Interpret the outcome of a sign-in request.
///
/// Checks run in order: transport error, missing response, 502, then the
/// `token` field of the body.
pub fn classify_sign_in(exchange: Exchange) -> Result<AuthToken, ClientError> {
    if let Some(error) = exchange.error {
        return Err(classify_transport_error(error));
    }

    let response = exchange
        .response
        .ok_or(ClientError::MalformedResponse { body: None })?;

    if response.status == 502 {
        return Err(ClientError::BadGateway);
    }

    extract_token(&response).ok_or_else(|| ClientError::MalformedResponse {
        body: Some(response.body_text()),
    })
}

fn extract_token(response: &HttpResponse) -> Option<AuthToken> {
    let body = response.body_json()?;
    body.as_object()?
        .get("token")?
        .as_str()
        .map(AuthToken::new)
}

/// Upload outcome for a status code, or `None` if the status is not in the table
pub fn classify_upload_status(status: u16) -> Option<Result<(), ClientError>> {
    let outcome = match status {
        201 => Ok(()),
        400 => Err(ClientError::InvalidDataPoint),
        401 => Err(ClientError::InvalidAuthToken),
        409 => Err(ClientError::DataPointConflict),
        500 => Err(ClientError::ServerError),
        502 => Err(ClientError::BadGateway),
        _ => return None,
    };
    Some(outcome)
}

/// Interpret the outcome of a data point upload.
///
/// A response, when present, is classified by status first. An unlisted
/// status yields the transport error if one accompanied the response, else
/// `MalformedResponse`.
pub fn classify_upload(exchange: Exchange) -> Result<(), ClientError> {
    match (exchange.response, exchange.error) {
        (Some(response), error) => match classify_upload_status(response.status) {
            Some(outcome) => outcome,
            None => match error {
                Some(error) => Err(ClientError::Other(error)),
                None => Err(ClientError::MalformedResponse {
                    body: Some(response.body_text()),
                }),
            },
        },
        (None, Some(error)) => Err(classify_transport_error(error)),
        (None, None) => Err(ClientError::Unknown),
    }
}
