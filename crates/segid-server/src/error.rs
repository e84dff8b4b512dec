use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Generator(#[from] segid::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Generator(segid::Error::UnknownTag { .. }) => StatusCode::NOT_FOUND,
            Self::Generator(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Generator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn generator_errors_map_to_status_codes() {
        let unknown = ApiError::from(segid::Error::UnknownTag {
            tag: "missing".to_owned(),
        });
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let drained = ApiError::from(segid::Error::SegmentsNotReady {
            tag: "bookmark".to_owned(),
            waited: Duration::from_secs(1),
        });
        assert_eq!(drained.status(), StatusCode::SERVICE_UNAVAILABLE);

        let executor = ApiError::from(segid::Error::Executor {
            reason: "closed".to_owned(),
        });
        assert_eq!(executor.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
