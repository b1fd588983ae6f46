use std::fmt;
use std::hash::{Hash, Hasher};

use log::{debug, warn};

use crate::error::LmError;
use crate::prob::{linear_to_log, log_to_linear, LOG_PROB_FLOOR, SMALLEST_LOG_PROB};

/// Back-off weight of an ngram
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Not counted yet; has to be recounted before serialization
    Unset,
    /// This ngram can never carry a back-off (serialized by omitting the column)
    NotApplicable,
    /// Base-10 log back-off weight
    Value(f64),
}

impl Backoff {
    pub fn is_unset(&self) -> bool {
        matches!(self, Backoff::Unset)
    }

    /// Concrete log weight, if one is present
    pub fn value(&self) -> Option<f64> {
        match self {
            Backoff::Value(value) => Some(*value),
            _ => None,
        }
    }
}

/// One entry of a back-off language model
#[derive(Debug, Clone)]
pub struct Ngram {
    /// Predicted word
    word: String,
    /// Preceding words, oldest first (empty for unigrams)
    history: Vec<String>,
    /// Base-10 log probability, always <= 0
    log_probability: f64,
    /// Weight applied when falling back from this context to a shorter one
    backoff: Backoff,
    /// Raw observation count, while still known
    count: Option<u64>,
}

impl Ngram {
    pub fn new(history: Vec<String>, word: String, log_probability: f64) -> Result<Self, LmError> {
        let mut ngram = Ngram {
            word,
            history,
            log_probability: SMALLEST_LOG_PROB,
            backoff: Backoff::Unset,
            count: None,
        };
        ngram.set_log_probability(log_probability)?;
        Ok(ngram)
    }

    /// Parse one tab-separated ARPA body line:
    /// `<log probability>\t<history and word>[\t<log back-off>]`
    pub fn from_arpa_line(line: &str) -> Result<Self, LmError> {
        let columns: Vec<&str> = line.trim_end().split('\t').collect();
        if columns.len() != 2 && columns.len() != 3 {
            return Err(LmError::Format(format!(
                "ARPA lines have to be separated by tabulator and have to have 2 or 3 columns: '{}'",
                line.trim_end()
            )));
        }
        let log_probability: f64 = columns[0].parse().map_err(|_| {
            LmError::Format(format!(
                "first column has to be convertible to float ({})",
                columns[0]
            ))
        })?;
        let mut words: Vec<String> = columns[1].split_whitespace().map(str::to_owned).collect();
        let word = words
            .pop()
            .ok_or_else(|| LmError::Format(format!("no words in line '{}'", line.trim_end())))?;
        let mut ngram = Ngram::new(words, word, log_probability)?;
        if columns.len() == 3 {
            let backoff: f64 = columns[2].parse().map_err(|_| {
                LmError::Format(format!(
                    "last column has to be convertible to float ({})",
                    columns[2]
                ))
            })?;
            ngram.set_log_backoff(backoff);
        }
        Ok(ngram)
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn history_order(&self) -> usize {
        self.history.len()
    }

    pub fn order(&self) -> usize {
        self.history.len() + 1
    }

    pub fn log_probability(&self) -> f64 {
        self.log_probability
    }

    /// Linear probability
    pub fn probability(&self) -> f64 {
        log_to_linear(self.log_probability)
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn set_count(&mut self, count: Option<u64>) {
        self.count = count;
    }

    /// Positive values are a hard error, values below the floor are clamped
    pub fn set_log_probability(&mut self, value: f64) -> Result<(), LmError> {
        if value > 0.0 {
            return Err(LmError::PositiveLogProbability(value));
        }
        self.log_probability = if value < LOG_PROB_FLOOR {
            SMALLEST_LOG_PROB
        } else {
            value
        };
        Ok(())
    }

    pub fn set_backoff(&mut self, backoff: Backoff) {
        match backoff {
            Backoff::Value(value) => self.set_log_backoff(value),
            other => self.backoff = other,
        }
    }

    /// Positive values are tolerated with a warning (legacy models carry
    /// them), values below the floor are clamped, a NaN means "no back-off"
    pub fn set_log_backoff(&mut self, value: f64) {
        if value.is_nan() {
            self.backoff = Backoff::NotApplicable;
        } else if value < LOG_PROB_FLOOR {
            self.backoff = Backoff::Value(SMALLEST_LOG_PROB);
        } else {
            if value > 0.0 {
                warn!("can't set positive number as log back-off: {value}");
            }
            self.backoff = Backoff::Value(value);
        }
    }

    /// Merge another observation of the same (history, word) key:
    /// probabilities are summed in linear space, counts are summed only when
    /// both are known, the back-off has to be recounted separately.
    pub fn accumulate(&mut self, other: &Ngram) -> Result<(), LmError> {
        assert_eq!(self.word, other.word);
        assert_eq!(self.history, other.history);
        debug!("accumulating ngram: {self}");
        self.count = match (self.count, other.count) {
            (Some(own), Some(theirs)) => Some(own + theirs),
            _ => {
                debug!("no count for accumulation for ngram '{self}'");
                None
            }
        };
        self.set_log_probability(linear_to_log(self.probability() + other.probability()))?;
        self.backoff = Backoff::Unset;
        Ok(())
    }

    /// Substitute `old_word` wherever it appears in the history or as the
    /// predicted word. Returns whether anything changed; a change clears the
    /// back-off since the record now belongs to a different context.
    pub fn map_word(&mut self, old_word: &str, new_word: &str) -> bool {
        let mut changed = false;
        if self.history.iter().any(|w| w == old_word) {
            for w in self.history.iter_mut() {
                if w == old_word {
                    *w = new_word.to_owned();
                }
            }
            self.backoff = Backoff::Unset;
            changed = true;
        }
        if self.word == old_word {
            self.word = new_word.to_owned();
            self.backoff = Backoff::Unset;
            changed = true;
        }
        changed
    }

    /// The canonical key: history followed by the predicted word
    pub fn word_sequence(&self) -> Vec<String> {
        let mut sequence = self.history.clone();
        sequence.push(self.word.clone());
        sequence
    }
}

impl fmt::Display for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in &self.history {
            write!(f, "{word} ")?;
        }
        write!(f, "{}", self.word)
    }
}

/// Two records with the same (word, history) key are the same ngram, no
/// matter what they say about probability
impl PartialEq for Ngram {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word && self.history == other.history
    }
}

impl Eq for Ngram {}

impl Hash for Ngram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.history.hash(state);
        self.word.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ngram(history: &[&str], word: &str, probability: f64) -> Ngram {
        Ngram::new(
            history.iter().map(|w| w.to_string()).collect(),
            word.to_owned(),
            linear_to_log(probability),
        )
        .unwrap()
    }

    #[test]
    fn it_parses_a_line_with_backoff() {
        let ngram = Ngram::from_arpa_line("-1.0\tthe dog\t-0.5").unwrap();
        assert_eq!(ngram.word(), "dog");
        assert_eq!(ngram.history(), ["the".to_owned()]);
        assert_eq!(ngram.order(), 2);
        assert_abs_diff_eq!(ngram.log_probability(), -1.0);
        assert_eq!(ngram.backoff(), Backoff::Value(-0.5));
        assert_eq!(ngram.count(), None);
    }

    #[test]
    fn it_parses_a_line_without_backoff() {
        let ngram = Ngram::from_arpa_line("-0.30103\ta b c\n").unwrap();
        assert_eq!(ngram.word(), "c");
        assert_eq!(ngram.history(), ["a".to_owned(), "b".to_owned()]);
        assert_eq!(ngram.backoff(), Backoff::Unset);
    }

    #[test]
    fn it_rejects_wrong_column_counts() {
        let err = Ngram::from_arpa_line("-1.0").unwrap_err();
        assert!(matches!(err, LmError::Format(_)));
        let err = Ngram::from_arpa_line("-1.0\ta\t-0.5\textra").unwrap_err();
        assert!(matches!(err, LmError::Format(_)));
    }

    #[test]
    fn it_rejects_unparseable_probability() {
        let err = Ngram::from_arpa_line("spam\tthe dog").unwrap_err();
        assert!(matches!(err, LmError::Format(_)));
    }

    #[test]
    fn it_rejects_positive_log_probability() {
        let err = Ngram::from_arpa_line("0.5\tthe dog").unwrap_err();
        assert!(matches!(err, LmError::PositiveLogProbability(_)));
    }

    #[test]
    fn it_tolerates_positive_log_backoff() {
        let ngram = Ngram::from_arpa_line("-1.0\tthe dog\t0.25").unwrap();
        assert_eq!(ngram.backoff(), Backoff::Value(0.25));
    }

    #[test]
    fn it_clamps_below_the_floor() {
        let ngram = Ngram::from_arpa_line("-200.0\tdog\t-150.0").unwrap();
        assert_eq!(ngram.log_probability(), SMALLEST_LOG_PROB);
        assert_eq!(ngram.backoff(), Backoff::Value(SMALLEST_LOG_PROB));
    }

    #[test]
    fn it_accumulates_probabilities_in_linear_space() {
        let mut first = ngram(&[], "the", 0.1);
        first.set_count(Some(3));
        let mut second = ngram(&[], "the", 0.2);
        second.set_count(Some(4));
        first.accumulate(&second).unwrap();
        assert_abs_diff_eq!(first.probability(), 0.3, epsilon = 1e-12);
        assert_eq!(first.count(), Some(7));
        assert_eq!(first.backoff(), Backoff::Unset);
    }

    #[test]
    fn it_drops_count_when_a_partner_has_none() {
        let mut first = ngram(&[], "the", 0.1);
        first.set_count(Some(3));
        let second = ngram(&[], "the", 0.2);
        first.accumulate(&second).unwrap();
        assert_eq!(first.count(), None);
    }

    #[test]
    fn it_fails_accumulation_past_certainty() {
        let mut first = ngram(&[], "the", 1.0);
        let second = ngram(&[], "the", 1.0);
        let err = first.accumulate(&second).unwrap_err();
        assert!(matches!(err, LmError::PositiveLogProbability(_)));
    }

    #[test]
    fn it_maps_words_in_history_and_word() {
        let mut record = ngram(&["<unk>", "a"], "<unk>", 0.5);
        record.set_log_backoff(-0.1);
        assert!(record.map_word("<unk>", "<unk2>"));
        assert_eq!(record.word(), "<unk2>");
        assert_eq!(record.history(), ["<unk2>".to_owned(), "a".to_owned()]);
        assert_eq!(record.backoff(), Backoff::Unset);
    }

    #[test]
    fn it_reports_unchanged_mappings() {
        let mut record = ngram(&["a"], "b", 0.5);
        record.set_log_backoff(-0.1);
        assert!(!record.map_word("c", "d"));
        assert_eq!(record.backoff(), Backoff::Value(-0.1));
    }

    #[test]
    fn it_compares_by_key_only() {
        let one = ngram(&["a"], "b", 0.5);
        let other = ngram(&["a"], "b", 0.125);
        assert_eq!(one, other);
        assert_ne!(one, ngram(&["c"], "b", 0.5));
    }

    #[test]
    fn it_builds_the_word_sequence() {
        let record = ngram(&["a", "b"], "c", 0.5);
        assert_eq!(
            record.word_sequence(),
            ["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(record.to_string(), "a b c");
    }
}
