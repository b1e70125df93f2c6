use thiserror::Error;

/// An intent was parsed but carries nothing the compiler could act on.
///
/// These are the only two rejection conditions on the request path; anything
/// else that parses is accepted even when semantically odd.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("unable to determine intent type")]
    UnclassifiedIntent,
    #[error("no actionable parameters extracted")]
    NoParameters,
}

/// Failures surfaced by a backend channel. None of these are fatal to the
/// process; the router converts them into a failed enforcement result and
/// the caller decides what to do.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("publish rejected: {0}")]
    PublishRejected(String),
    #[error("rule application failed: {0}")]
    RuleFailed(String),
}

/// Failures from the metrics collaborator. An absent sample is not an
/// error; `MetricsError` covers transport and query problems only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metrics query failed: {0}")]
    Query(String),
    #[error("metrics endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Feedback operations that reference an unknown intent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("no goals registered for intent `{0}`")]
    UnknownIntent(String),
}
