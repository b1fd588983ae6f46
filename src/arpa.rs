use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::error;

use crate::error::LmError;
use crate::open_reader;

/// Start-of-sentence marker
pub const START_OF_SENTENCE: &str = "<s>";
/// End-of-sentence marker; ngrams predicting it never carry a back-off
pub const END_OF_SENTENCE: &str = "</s>";
/// Unknown word marker
pub const UNKNOWN_WORD: &str = "<unk>";
/// Hesitation tag
pub const HESITATION: &str = "<hes>";
/// Silence tag
pub const SILENCE: &str = "<sil>";

/// Tags every model vocabulary may use
pub const TAGS: [&str; 3] = [START_OF_SENTENCE, END_OF_SENTENCE, UNKNOWN_WORD];
/// Annotation tags allowed on demand
pub const OPTIONAL_TAGS: [&str; 2] = [HESITATION, SILENCE];

const UNIGRAM_SECTION: &str = "\\1-grams:";
const DATA_SECTION_START: &str = "\\data\\";

/// Anything able to expose its vocabulary as a set of words
pub trait Wordset {
    fn words(&self) -> Result<HashSet<String>>;
}

impl Wordset for HashSet<String> {
    fn words(&self) -> Result<HashSet<String>> {
        Ok(self.clone())
    }
}

/// Read-only view of a (possibly gzipped) file in ARPA format.
///
/// Data are not read into memory on construction; every query is a single
/// streaming pass that stops as soon as the relevant section ends, so even
/// very large models stay cheap to inspect.
pub struct Arpa {
    path: PathBuf,
}

impl Arpa {
    /// Wrap `path`, which may end in ".gz". The `\data\` marker has to show
    /// up within the first few lines for the file to count as ARPA.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            bail!("path '{}' is directory, not file", path.display());
        }
        if !path.is_file() {
            bail!("file '{}' doesn't exist", path.display());
        }
        let mut reader = open_reader(&path)?;
        let mut line = String::new();
        let mut is_arpa = false;
        for _ in 0..5 {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            if line.starts_with(DATA_SECTION_START) {
                is_arpa = true;
                break;
            }
        }
        if !is_arpa {
            bail!("input '{}' doesn't seem to be arpa", path.display());
        }
        Ok(Self { path })
    }

    /// Set of words in the unigram section
    pub fn get_words(&self, omit_tags: bool) -> Result<HashSet<String>> {
        let mut words = HashSet::new();
        let mut in_unigrams = false;
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.is_empty() {
                if in_unigrams {
                    break;
                }
                continue;
            }
            if in_unigrams {
                let word = columns
                    .get(1)
                    .ok_or_else(|| anyhow!("wrong arpa format: '{}'", line.trim()))?;
                words.insert((*word).to_owned());
            }
            if columns[0] == UNIGRAM_SECTION {
                in_unigrams = true;
            }
        }
        if omit_tags {
            for tag in TAGS.iter().chain(OPTIONAL_TAGS.iter()) {
                words.remove(*tag);
            }
        }
        Ok(words)
    }

    /// Unigram table: word to log probability
    pub fn get_unigrams(&self) -> Result<HashMap<String, f64>> {
        let mut unigrams = HashMap::new();
        let mut in_unigrams = false;
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.is_empty() {
                if in_unigrams {
                    break;
                }
                continue;
            }
            if in_unigrams {
                if columns.len() < 2 {
                    bail!("wrong arpa format: '{}'", line.trim());
                }
                let log_probability: f64 = columns[0]
                    .parse()
                    .with_context(|| format!("wrong arpa format: '{}'", line.trim()))?;
                unigrams.insert(columns[1].to_owned(), log_probability);
            }
            if columns[0] == UNIGRAM_SECTION {
                in_unigrams = true;
            }
        }
        Ok(unigrams)
    }

    /// Sum of the ngram counts declared in the header
    pub fn get_sum_ngrams(&self) -> Result<usize> {
        let mut sum = 0;
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            if line.starts_with("ngram ") {
                sum += line
                    .trim()
                    .split('=')
                    .nth(1)
                    .and_then(|count| count.parse::<usize>().ok())
                    .ok_or_else(|| {
                        anyhow!(
                            "wrong format in head of arpa file '{}': '{}'",
                            self.path.display(),
                            line.trim()
                        )
                    })?;
            }
            if line.trim() == UNIGRAM_SECTION {
                break;
            }
        }
        Ok(sum)
    }

    /// Unigram count declared in the header, which has to show up within
    /// the first 10 lines
    pub fn get_unigrams_count(&self) -> Result<usize> {
        let mut counter = 0;
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            counter += 1;
            if line.starts_with("ngram 1=") {
                return line
                    .trim()
                    .split('=')
                    .nth(1)
                    .and_then(|count| count.parse::<usize>().ok())
                    .ok_or_else(|| {
                        anyhow!(
                            "wrong format in head of arpa file '{}': '{}'",
                            self.path.display(),
                            line.trim()
                        )
                    });
            }
            if counter == 10 {
                break;
            }
        }
        bail!(
            "file '{}' does not look like LM in arpa format",
            self.path.display()
        )
    }

    /// The raw `ngram k=N` header lines
    pub fn get_ngram_counts(&self) -> Result<Vec<String>> {
        let mut counts = Vec::new();
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            if line.starts_with("ngram ") {
                counts.push(line.trim().to_owned());
            }
            if line.trim() == UNIGRAM_SECTION {
                break;
            }
        }
        Ok(counts)
    }

    /// All graphemes used by the vocabulary, tags excluded
    pub fn get_graphemes(&self) -> Result<HashSet<char>> {
        let mut graphemes = HashSet::new();
        for word in self.get_words(true)? {
            graphemes.extend(word.chars());
        }
        Ok(graphemes)
    }

    /// Check that every unigram word is lowercase and present in `wordset`
    /// (the standard tags are always allowed, the optional annotation tags
    /// only with `omit_optional_tags`). Violations are collected over the
    /// whole section and logged, then raised once.
    pub fn check(&self, wordset: &impl Wordset, omit_optional_tags: bool) -> Result<()> {
        let mut allowed = wordset.words()?;
        allowed.extend(TAGS.iter().map(|tag| tag.to_string()));
        if omit_optional_tags {
            allowed.extend(OPTIONAL_TAGS.iter().map(|tag| tag.to_string()));
        }
        let mut violations = Vec::new();
        let mut in_unigrams = false;
        let mut line_num = 0;
        for line in open_reader(&self.path)?.lines() {
            let line = line?;
            line_num += 1;
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.is_empty() {
                if in_unigrams {
                    break;
                }
                continue;
            }
            if in_unigrams {
                match columns.get(1) {
                    None => violations.push(format!(
                        "{}:{} - '{}' - missing word column",
                        self.path.display(),
                        line_num,
                        line.trim()
                    )),
                    Some(word) => {
                        if *word != word.to_lowercase() {
                            violations.push(format!(
                                "{}:{} - word '{}' is not lowercase",
                                self.path.display(),
                                line_num,
                                word
                            ));
                        }
                        if !allowed.contains(*word) {
                            violations.push(format!(
                                "{}:{} - word '{}' not present in supplied wordset",
                                self.path.display(),
                                line_num,
                                word
                            ));
                        }
                    }
                }
            }
            if columns[0] == UNIGRAM_SECTION {
                in_unigrams = true;
            }
        }
        if violations.is_empty() {
            return Ok(());
        }
        for violation in &violations {
            error!("problem in ARPA at {violation}");
        }
        Err(LmError::CheckFailed(violations).into())
    }

    /// Stream the file into `output_path` with every occurrence of `from`
    /// replaced by `to`, without materializing the model
    pub fn sub_low_memory(
        &self,
        output_path: impl AsRef<Path>,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let output_path = output_path.as_ref();
        let file = File::create(output_path)
            .with_context(|| format!("creating '{}'", output_path.display()))?;
        let mut out = BufWriter::new(file);
        let mut reader = open_reader(&self.path)?;
        let mut line = String::new();
        while reader.read_line(&mut line)? > 0 {
            out.write_all(line.replace(from, to).as_bytes())?;
            line.clear();
        }
        Ok(())
    }
}

impl Wordset for Arpa {
    fn words(&self) -> Result<HashSet<String>> {
        self.get_words(false)
    }
}
