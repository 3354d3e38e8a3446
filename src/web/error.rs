use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failure of a single handler operation. `code` is stable and machine
/// readable; `message` is for people.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new("duplicate", message)
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::new("invalid_transition", message)
    }

    pub fn push_failed(message: impl Into<String>) -> Self {
        Self::new("push_failed", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn insert(e: rusqlite::Error, table: &str) -> Self {
        Self {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn update(e: rusqlite::Error, table: &str) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self.code {
            "bad_params" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "duplicate" | "invalid_transition" => StatusCode::CONFLICT,
            "push_failed" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for HandlerErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for HandlerErr {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        } else {
            tracing::debug!(code = self.code, message = %self.message, "request rejected");
        }
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(d) = self.details {
            error["details"] = d;
        }
        (status, Json(json!({ "ok": false, "error": error }))).into_response()
    }
}

/// The literal plain-text answers the AJAX endpoints speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ajax {
    True,
    False,
    Ok,
}

impl Ajax {
    pub fn from_bool(v: bool) -> Self {
        if v {
            Ajax::True
        } else {
            Ajax::False
        }
    }
}

impl IntoResponse for Ajax {
    fn into_response(self) -> Response {
        let body = match self {
            Ajax::True => "True",
            Ajax::False => "False",
            Ajax::Ok => "OK",
        };
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(HandlerErr::bad_params("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(HandlerErr::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(HandlerErr::duplicate("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            HandlerErr::invalid_transition("x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HandlerErr::push_failed("x").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            HandlerErr::tx(rusqlite::Error::InvalidQuery).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
