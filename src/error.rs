use std::fmt;

/// Errors raised while loading, editing or writing a back-off model
#[derive(Debug)]
pub enum LmError {
    /// ARPA body line with a bad column layout or an unparseable number
    Format(String),
    /// Structurally broken ARPA content (header, section order, empty unigrams)
    CorruptedArpa(String),
    /// The requested ngram is absent from its order level
    MissingNgram(String),
    /// The model has no ngrams of the requested order at all
    TooHighOrder(usize),
    /// A probability above 1 cannot exist
    PositiveLogProbability(f64),
    /// Serialization requires every back-off to be counted first
    MissingBackoff(String),
    /// Fail-slow vocabulary check finished with violations
    CheckFailed(Vec<String>),
}

impl fmt::Display for LmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(msg) => write!(f, "bad ARPA line: {msg}"),
            Self::CorruptedArpa(msg) => write!(f, "corrupted ARPA format: {msg}"),
            Self::MissingNgram(sequence) => {
                write!(f, "no ngram found with word sequence '{sequence}'")
            }
            Self::TooHighOrder(order) => {
                write!(f, "model doesn't contain any ngram with required order '{order}'")
            }
            Self::PositiveLogProbability(value) => {
                write!(f, "can't set positive number as log probability: {value}")
            }
            Self::MissingBackoff(sequence) => {
                write!(
                    f,
                    "back-off for ngram '{sequence}' is unset, recount back-offs before write"
                )
            }
            Self::CheckFailed(violations) => {
                write!(f, "ARPA check failed with {} violation(s)", violations.len())
            }
        }
    }
}

impl std::error::Error for LmError {}
