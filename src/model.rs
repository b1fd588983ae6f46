use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::arpa::END_OF_SENTENCE;
use crate::error::LmError;
use crate::ngram::{Backoff, Ngram};
use crate::open_reader;
use crate::prob::linear_to_log;

/// Tolerance for comparing a recounted back-off against a stored one
const BACKOFF_RECOUNT_TOLERANCE: f64 = 1e-7;

const DATA_MARKER: &str = "\\data\\";
const END_MARKER: &str = "\\end\\";

/// Words observed under one history
type WordMap = HashMap<String, Ngram>;
/// Histories of one length
type HistoryMap = HashMap<Vec<String>, WordMap>;

/// Parser position inside an ARPA stream
#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    /// Before the `\data\` marker
    Preamble,
    /// Count header, `ngram k=N` lines
    Counts,
    /// Inside a `\k-grams:` section
    Body,
}

/// Matches order section markers like `\1-grams:`
fn is_grams_marker(tag: &str) -> bool {
    tag.strip_prefix('\\')
        .and_then(|rest| rest.strip_suffix("-grams:"))
        .map_or(false, |order| {
            order.len() == 1 && order.chars().all(|c| c.is_ascii_digit())
        })
}

/// In-memory back-off language model.
///
/// Ngrams are indexed by history length, then history, then predicted word:
/// `data[history_order][history][word]`. Levels are contiguous from the
/// unigrams up; a gap means a corrupted model.
#[derive(Debug, Default)]
pub struct LanguageModel {
    /// Index k holds the (k+1)-grams
    data: Vec<HistoryMap>,
}

impl LanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest ngram length present
    pub fn order(&self) -> usize {
        self.data.len()
    }

    /// All ngrams, lowest order first
    pub fn ngrams(&self) -> impl Iterator<Item = &Ngram> + '_ {
        self.data
            .iter()
            .flat_map(|level| level.values().flat_map(|words| words.values()))
    }

    /// Load a model from a (possibly gzipped) file in ARPA format
    pub fn load_arpa(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = open_reader(path)?;
        let mut model = LanguageModel::new();
        model.parse_arpa(reader).with_context(|| {
            format!(
                "file '{}' doesn't look like LM in ARPA format",
                path.display()
            )
        })?;
        Ok(model)
    }

    fn parse_arpa(&mut self, reader: impl BufRead) -> Result<()> {
        let mut ngram_counts: Vec<usize> = Vec::new();
        let mut section = Section::Preamble;
        for line in reader.lines() {
            let line = line?;
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.is_empty() {
                continue;
            }
            if columns.len() == 1 {
                let tag = columns[0];
                if is_grams_marker(tag) {
                    if section == Section::Preamble {
                        return Err(LmError::CorruptedArpa(format!(
                            "order section '{tag}' before the \\data\\ header"
                        ))
                        .into());
                    }
                    section = Section::Body;
                } else if tag == DATA_MARKER {
                    if section == Section::Body {
                        return Err(LmError::CorruptedArpa(
                            "\\data\\ header inside the ngram body".to_owned(),
                        )
                        .into());
                    }
                    section = Section::Counts;
                } else if tag == END_MARKER {
                    break;
                } else {
                    return Err(LmError::CorruptedArpa(format!(
                        "unexpected line in ARPA: '{}'",
                        line.trim()
                    ))
                    .into());
                }
            } else if section != Section::Body && columns[0].starts_with("ngram") {
                if section != Section::Counts {
                    return Err(LmError::CorruptedArpa(format!(
                        "ngram count line '{}' before the \\data\\ header",
                        line.trim()
                    ))
                    .into());
                }
                let count = columns[1]
                    .split('=')
                    .nth(1)
                    .and_then(|value| value.parse::<usize>().ok())
                    .ok_or_else(|| {
                        LmError::CorruptedArpa(format!("bad ngram count line '{}'", line.trim()))
                    })?;
                ngram_counts.push(count);
            } else {
                if section != Section::Body {
                    return Err(LmError::CorruptedArpa(format!(
                        "ngram body line '{}' outside of an order section",
                        line.trim()
                    ))
                    .into());
                }
                self.add_ngram(Ngram::from_arpa_line(&line)?)?;
            }
        }
        if self.order() != ngram_counts.len() {
            return Err(LmError::CorruptedArpa(format!(
                "loaded LM order ({}) differs from order specified by the ARPA header ({})",
                self.order(),
                ngram_counts.len()
            ))
            .into());
        }
        if self.data.first().map_or(true, |unigrams| unigrams.is_empty()) {
            return Err(
                LmError::CorruptedArpa("unigrams are empty after loading".to_owned()).into(),
            );
        }
        Ok(())
    }

    /// Insert an ngram, accumulating into an existing record with the same
    /// key. A new order level may only be opened one past the current
    /// maximum; anything else is a structural corruption.
    fn add_ngram(&mut self, ngram: Ngram) -> Result<(), LmError> {
        if ngram.history_order() > self.order() {
            return Err(LmError::CorruptedArpa(format!(
                "unexpected ngram '{}' of order {} in a model of order {}, \
                 add ngrams from low order to high order",
                ngram,
                ngram.order(),
                self.order()
            )));
        }
        if ngram.history_order() == self.order() {
            self.data.push(HistoryMap::new());
        }
        let history = ngram.history().to_vec();
        let words = self.data[history.len()].entry(history).or_default();
        match words.entry(ngram.word().to_owned()) {
            Entry::Occupied(mut existing) => existing.get_mut().accumulate(&ngram)?,
            Entry::Vacant(slot) => {
                slot.insert(ngram);
            }
        }
        Ok(())
    }

    /// Look up by (history, word). [`LmError::TooHighOrder`] signals that no
    /// level of that order exists at all, [`LmError::MissingNgram`] that this
    /// particular ngram is absent from an existing level.
    pub fn get_ngram(&self, word_sequence: &[String]) -> Result<&Ngram, LmError> {
        let (word, history) = word_sequence
            .split_last()
            .expect("word sequence must not be empty");
        let level = self
            .data
            .get(history.len())
            .ok_or(LmError::TooHighOrder(word_sequence.len()))?;
        level
            .get(history)
            .and_then(|words| words.get(word))
            .ok_or_else(|| LmError::MissingNgram(word_sequence.join(" ")))
    }

    fn get_ngram_mut(&mut self, word_sequence: &[String]) -> Result<&mut Ngram, LmError> {
        let (word, history) = word_sequence
            .split_last()
            .expect("word sequence must not be empty");
        let level = self
            .data
            .get_mut(history.len())
            .ok_or(LmError::TooHighOrder(word_sequence.len()))?;
        level
            .get_mut(history)
            .and_then(|words| words.get_mut(word))
            .ok_or_else(|| LmError::MissingNgram(word_sequence.join(" ")))
    }

    /// Remove the exact entry, pruning a history left without words
    pub fn delete_ngram(&mut self, word_sequence: &[String]) -> Result<(), LmError> {
        self.take_ngram(word_sequence).map(|_| ())
    }

    fn take_ngram(&mut self, word_sequence: &[String]) -> Result<Ngram, LmError> {
        let missing = || LmError::MissingNgram(word_sequence.join(" "));
        let (word, history) = word_sequence
            .split_last()
            .expect("word sequence must not be empty");
        let level = self.data.get_mut(history.len()).ok_or_else(missing)?;
        let words = level.get_mut(history).ok_or_else(missing)?;
        let ngram = words.remove(word).ok_or_else(missing)?;
        if words.is_empty() {
            level.remove(history);
        }
        Ok(ngram)
    }

    /// Substitute `old_word` with `new_word` across the whole model.
    ///
    /// Rewriting happens in two phases: every touched record is pulled out
    /// first, then re-added, so that records collapsing onto the same new
    /// key accumulate instead of aliasing mid-iteration.
    pub fn map_word(
        &mut self,
        old_word: &str,
        new_word: &str,
        recount_back_offs: bool,
    ) -> Result<(), LmError> {
        let touched: Vec<Vec<String>> = self
            .ngrams()
            .filter(|n| n.word() == old_word || n.history().iter().any(|w| w == old_word))
            .map(|n| n.word_sequence())
            .collect();
        let mut rewritten = Vec::with_capacity(touched.len());
        for sequence in &touched {
            let mut ngram = self.take_ngram(sequence)?;
            ngram.map_word(old_word, new_word);
            rewritten.push(ngram);
        }
        for ngram in rewritten {
            self.add_ngram(ngram)?;
        }
        if recount_back_offs {
            self.recount_back_offs(true, false)?;
        }
        Ok(())
    }

    /// Recount back-off weights, either for every ngram or only for those
    /// whose back-off is unset or not below zero. With `check` set, a
    /// recounted value is compared against the stored one and each mismatch
    /// beyond tolerance is logged and returned, never raised.
    pub fn recount_back_offs(
        &mut self,
        only_missing: bool,
        check: bool,
    ) -> Result<Vec<String>, LmError> {
        let mut warnings = Vec::new();
        let mut updates = Vec::new();
        for ngram in self.ngrams() {
            let stale = match ngram.backoff() {
                Backoff::Unset => true,
                Backoff::Value(value) => value >= 0.0,
                Backoff::NotApplicable => false,
            };
            if only_missing && !stale {
                continue;
            }
            if stale {
                debug!("ngram '{ngram}' back-off is unset or not below zero, recounting");
            }
            let recounted = self.count_log_backoff(ngram)?;
            if check {
                if let (Backoff::Value(old), Backoff::Value(new)) = (ngram.backoff(), recounted) {
                    if (old - new).abs() > BACKOFF_RECOUNT_TOLERANCE {
                        let message = format!(
                            "counted back-off ({new}) and original back-off ({old}) \
                             differ more than tolerance for ngram '{ngram}'"
                        );
                        warn!("{message}");
                        warnings.push(message);
                    }
                }
            }
            updates.push((ngram.word_sequence(), recounted));
        }
        for (sequence, backoff) in updates {
            self.get_ngram_mut(&sequence)?.set_backoff(backoff);
        }
        Ok(warnings)
    }

    /// Back-off weight for the context this ngram opens, from probability
    /// mass conservation: the mass left over by the ngrams extending this
    /// history, over the mass those same words leave when predicted by the
    /// history with its oldest word dropped.
    pub fn count_log_backoff(&self, ngram: &Ngram) -> Result<Backoff, LmError> {
        if ngram.order() >= self.order() || ngram.word() == END_OF_SENTENCE {
            return Ok(Backoff::NotApplicable);
        }
        let sequence = ngram.word_sequence();
        let children = match self.data[ngram.order()].get(sequence.as_slice()) {
            Some(words) => words,
            None => {
                debug!("no ngrams with history '{ngram}'");
                return Ok(Backoff::NotApplicable);
            }
        };
        let mut numerator = 1.0;
        let mut denominator = 1.0;
        for child in children.values() {
            numerator -= child.probability();
            denominator -= self.get_ngram(&child.word_sequence()[1..])?.probability();
        }
        Ok(Backoff::Value(
            linear_to_log(numerator) - linear_to_log(denominator),
        ))
    }

    /// Write the model to a file in ARPA format. Every back-off has to be
    /// counted first; call [`LanguageModel::recount_back_offs`] before.
    pub fn write_arpa(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("creating parent directory of '{}'", path.display())
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("creating ARPA file '{}'", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out)?;
        writeln!(out, "{DATA_MARKER}")?;
        for order in 1..=self.order() {
            writeln!(out, "ngram {}={}", order, self.get_ngram_count(order))?;
        }
        for order in 1..=self.order() {
            writeln!(out)?;
            writeln!(out, "\\{order}-grams:")?;
            let level = &self.data[order - 1];
            let mut histories: Vec<&Vec<String>> = level.keys().collect();
            histories.sort();
            for history in histories {
                let mut ngrams: Vec<&Ngram> = level[history].values().collect();
                ngrams.sort_by(|a, b| a.word().cmp(b.word()));
                for ngram in ngrams {
                    match ngram.backoff() {
                        Backoff::Unset => {
                            return Err(LmError::MissingBackoff(ngram.to_string()).into())
                        }
                        Backoff::NotApplicable => {
                            writeln!(out, "{:?}\t{}", ngram.log_probability(), ngram)?
                        }
                        Backoff::Value(backoff) => writeln!(
                            out,
                            "{:?}\t{}\t{:?}",
                            ngram.log_probability(),
                            ngram,
                            backoff
                        )?,
                    }
                }
            }
        }
        write!(out, "\n{END_MARKER}")?;
        out.flush()?;
        Ok(())
    }

    fn get_ngram_count(&self, order: usize) -> usize {
        self.data[order - 1].values().map(|words| words.len()).sum()
    }
}
