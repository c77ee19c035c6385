use async_openai::error::OpenAIError;
use common::error::CoreError;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// The three failure classes C1 must distinguish before deciding whether to
/// retry a batch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    InputError,
    FatalConfig,
}

impl FailureClass {
    pub fn label(self) -> &'static str {
        match self {
            FailureClass::Transient => "Transient",
            FailureClass::InputError => "InputError",
            FailureClass::FatalConfig => "FatalConfig",
        }
    }
}

/// Classify an `async-openai` error the way C1 must before retrying (§4.1):
/// 5xx/timeout/rate-limited is transient, a bad request is an input error,
/// and an auth failure is fatal.
pub fn classify_openai_error(err: &OpenAIError) -> FailureClass {
    match err {
        OpenAIError::Reqwest(reqwest_err) => {
            if reqwest_err.is_timeout() || reqwest_err.is_connect() {
                FailureClass::Transient
            } else {
                match reqwest_err.status().map(|s| s.as_u16()) {
                    Some(401) | Some(403) => FailureClass::FatalConfig,
                    Some(429) => FailureClass::Transient,
                    Some(code) if (500..600).contains(&code) => FailureClass::Transient,
                    Some(_) => FailureClass::InputError,
                    None => FailureClass::Transient,
                }
            }
        }
        OpenAIError::ApiError(api_err) => match api_err.code.as_deref() {
            Some("invalid_api_key") | Some("insufficient_quota") => FailureClass::FatalConfig,
            Some("rate_limit_exceeded") => FailureClass::Transient,
            _ => FailureClass::InputError,
        },
        OpenAIError::InvalidArgument(_) | OpenAIError::JSONDeserialize(_) => FailureClass::InputError,
        _ => FailureClass::Transient,
    }
}

pub fn classify_core_error(err: &CoreError) -> FailureClass {
    match err {
        CoreError::InvalidInput(_) => FailureClass::InputError,
        CoreError::FatalConfig(_) => FailureClass::FatalConfig,
        CoreError::Transient(_) | CoreError::Database(_) | CoreError::Embedding(_) => FailureClass::Transient,
        _ => FailureClass::Transient,
    }
}

/// Retry a fallible batch call with exponential backoff and jitter, matching
/// the teacher's `ExponentialBackoff::from_millis(100).map(jitter).take(3)`
/// idiom used for its own embedding and graph-store calls. `RetryIf`'s
/// condition stops the loop the moment a non-transient error is classified,
/// so `InvalidInput`/`FatalConfig` surface on the first attempt (§4.1).
pub async fn with_retry<F, Fut, T>(max_attempts: usize, f: F) -> Result<T, CoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(max_attempts);

    RetryIf::spawn(strategy, || f(), |err: &CoreError| classify_core_error(err) == FailureClass::Transient).await
}
