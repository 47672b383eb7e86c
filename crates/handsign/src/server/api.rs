//! JSON endpoints.

use serde::{Deserialize, Serialize};

use super::http::{HttpError, Method, Request, Response};
use crate::image;
use crate::recognizer::{Labeled, Outcome, Recognizer};
use crate::timer::Timer;
use crate::window::DEFAULT_SESSION;
use crate::{PREPROCESSING_VERSION, SEQ_LEN};

/// Header that names the session when the request body does not.
pub const SESSION_HEADER: &str = "X-Session-Id";

#[derive(Deserialize)]
struct PredictRequest {
    image: String,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResetRequest {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Serialize)]
struct Health<'a> {
    status: &'static str,
    model_loaded: bool,
    classes: &'a [String],
    preprocessing_version: u32,
    sessions: usize,
}

#[derive(Serialize)]
struct Classes<'a> {
    classes: &'a [String],
}

#[derive(Serialize)]
#[serde(untagged)]
enum PredictResponse<'a> {
    Pending {
        success: bool,
        message: String,
        confidence: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        buffer_size: Option<usize>,
    },
    Predicted {
        success: bool,
        prediction: &'a str,
        confidence: f32,
        top_predictions: &'a [Labeled],
        buffer_size: usize,
    },
}

#[derive(Serialize)]
struct Reset {
    success: bool,
    message: &'static str,
}

/// Routes a request to its endpoint.
///
/// Errors returned by an endpoint become a 500 response, unless they are an [`HttpError`], which
/// carries its own status code.
pub fn handle(recognizer: &Recognizer, t_decode: &Timer, request: &Request) -> Response {
    let result = match (request.method, request.path.as_str()) {
        (Method::Options, _) => Ok(Response::no_content()),
        (Method::Get, "/api/health") => Ok(health(recognizer)),
        (Method::Get, "/api/classes") => Ok(Response::json(
            200,
            &Classes {
                classes: recognizer.classes().names(),
            },
        )),
        (Method::Post, "/api/predict") => predict(recognizer, t_decode, request),
        (Method::Post, "/api/reset") => reset(recognizer, request),
        (_, "/api/health" | "/api/classes" | "/api/predict" | "/api/reset") => {
            Ok(Response::error(405, "method not allowed"))
        }
        _ => Ok(Response::error(404, "not found")),
    };

    result.unwrap_or_else(|e| match e.downcast_ref::<HttpError>() {
        Some(http) => {
            log::debug!("{} {}: {}", http.status, request.path, http.message);
            Response::error(http.status, &http.message)
        }
        None => {
            log::error!("{} failed: {e:#}", request.path);
            Response::error(500, &e.to_string())
        }
    })
}

fn health(recognizer: &Recognizer) -> Response {
    Response::json(
        200,
        &Health {
            status: "ok",
            model_loaded: true,
            classes: recognizer.classes().names(),
            preprocessing_version: PREPROCESSING_VERSION,
            sessions: recognizer.sessions().len(),
        },
    )
}

fn predict(
    recognizer: &Recognizer,
    t_decode: &Timer,
    request: &Request,
) -> anyhow::Result<Response> {
    let body: PredictRequest = serde_json::from_slice(&request.body)
        .map_err(|e| HttpError::bad_request(format!("invalid request body: {e}")))?;
    let session = session_id(body.session.as_deref(), request);

    let image = t_decode
        .time(|| image::decode_base64(&body.image))
        .map_err(|e| HttpError::bad_request(format!("invalid image: {e:#}")))?;

    let outcome = recognizer.process_image(session, &image)?;
    let response = match &outcome {
        Outcome::NoHands => PredictResponse::Pending {
            success: false,
            message: "No hands detected".into(),
            confidence: 0.0,
            buffer_size: None,
        },
        Outcome::Collecting { buffered, .. } => PredictResponse::Pending {
            success: false,
            message: format!("Collecting frames... ({buffered}/{SEQ_LEN})"),
            confidence: 0.0,
            buffer_size: Some(*buffered),
        },
        Outcome::Predicted {
            prediction,
            buffered,
        } => PredictResponse::Predicted {
            success: true,
            prediction: &prediction.label,
            confidence: prediction.confidence,
            top_predictions: &prediction.top,
            buffer_size: *buffered,
        },
    };
    Ok(Response::json(200, &response))
}

fn reset(recognizer: &Recognizer, request: &Request) -> anyhow::Result<Response> {
    let body = if request.body.iter().all(u8::is_ascii_whitespace) {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&request.body)
            .map_err(|e| HttpError::bad_request(format!("invalid request body: {e}")))?
    };
    recognizer.reset(session_id(body.session.as_deref(), request));
    Ok(Response::json(
        200,
        &Reset {
            success: true,
            message: "Buffer reset",
        },
    ))
}

fn session_id<'a>(from_body: Option<&'a str>, request: &'a Request) -> &'a str {
    let non_empty = |id: &&str| !id.is_empty();
    from_body
        .filter(non_empty)
        .or_else(|| request.header(SESSION_HEADER).filter(non_empty))
        .unwrap_or(DEFAULT_SESSION)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn request_with_header(session: Option<&str>) -> Request {
        let header = session
            .map(|id| format!("{SESSION_HEADER}: {id}\r\n"))
            .unwrap_or_default();
        let raw = format!("POST /api/predict HTTP/1.1\r\n{header}\r\n");
        Request::read(&mut Cursor::new(raw.into_bytes()), 0).unwrap()
    }

    #[test]
    fn session_resolution() {
        let with_header = request_with_header(Some("cam-2"));
        assert_eq!(session_id(Some("cam-1"), &with_header), "cam-1");
        assert_eq!(session_id(None, &with_header), "cam-2");
        assert_eq!(session_id(Some(""), &with_header), "cam-2");

        let without = request_with_header(None);
        assert_eq!(session_id(Some(""), &without), DEFAULT_SESSION);
        assert_eq!(session_id(None, &without), DEFAULT_SESSION);
        assert_eq!(session_id(None, &request_with_header(Some(""))), DEFAULT_SESSION);
    }
}
