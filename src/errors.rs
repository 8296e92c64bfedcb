use custom_error::custom_error;
use twilight_http::error::ErrorType;

custom_error! {pub ConsoleError
    Forbidden{action: &'static str} = "forbidden: discord denied {action}",
    State{what: &'static str} = "session state unavailable: {what}",
    Http{source: twilight_http::Error} = "http error: {source}",
    Body{source: twilight_http::response::DeserializeBodyError} = "malformed response body: {source}",
    Request{source: twilight_validate::request::ValidationError} = "invalid request: {source}",
    MessageContent{source: twilight_validate::message::MessageValidationError} = "invalid message: {source}",
    HistoryLimit{source: twilight_validate::channel::ChannelValidationError} = "invalid history request: {source}",
    Prompt{source: rustyline::error::ReadlineError} = "prompt failed: {source}",
    Io{source: std::io::Error} = "io error: {source}",
    Json{source: serde_json::Error} = "serialization error: {source}"
}

impl ConsoleError {
    /// True for the permission-denied class, which gets its own operator
    /// message instead of the generic transport one.
    pub(crate) fn is_forbidden(&self) -> bool {
        matches!(self, ConsoleError::Forbidden { .. })
    }
}

/// Splits a REST failure into the two outcomes the console reports
/// differently: a 403 from Discord, or anything else.
pub(crate) fn classify(action: &'static str, source: twilight_http::Error) -> ConsoleError {
    if is_forbidden_response(&source) {
        ConsoleError::Forbidden { action }
    } else {
        ConsoleError::Http { source }
    }
}

fn is_forbidden_response(error: &twilight_http::Error) -> bool {
    matches!(error.kind(), ErrorType::Response { status, .. } if status.get() == 403)
}
