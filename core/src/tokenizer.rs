use crate::SearchVector;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{BTreeSet, HashSet};
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 2;

/// Stopwords dropped from index tokens unless overridden by configuration.
pub const DEFAULT_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
    "of", "with", "by", "from", "up", "about", "into", "through", "during",
    "before", "after", "above", "below", "between", "among", "is", "are",
    "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "can",
];

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("valid regex");
    static ref LEXEME: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref ENGLISH_STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// NFKC-normalize, lowercase, and reduce `text` to alphanumeric words joined by
/// single spaces. Punctuation and runs of whitespace disappear.
pub fn clean_text(text: &str) -> String {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let words: Vec<&str> = WORD.find_iter(&normalized).map(|m| m.as_str()).collect();
    words.join(" ")
}

/// Stem a single lowercase word with the English stemmer.
pub fn stem(word: &str) -> String {
    STEMMER.stem(word).into_owned()
}

/// Full-text lexemes of `text`: NFKC normalization, lowercase, English stopword
/// removal and stemming. Sorted and deduplicated, so the result can be stored
/// as a lead's search vector and probed with binary search.
pub fn lexemes(text: &str) -> SearchVector {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    let mut out = BTreeSet::new();
    for mat in LEXEME.find_iter(&normalized) {
        let token = mat.as_str();
        if ENGLISH_STOPWORDS.contains(token) { continue; }
        out.insert(stem(token));
    }
    out.into_iter().collect()
}

/// Rules that turn text into inverted-index tokens.
#[derive(Debug, Clone)]
pub struct TokenRules {
    min_len: usize,
    stopwords: HashSet<String>,
}

impl Default for TokenRules {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TOKEN_LENGTH, DEFAULT_STOPWORDS.iter().copied())
    }
}

impl TokenRules {
    pub fn new<I, S>(min_len: usize, stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            min_len,
            stopwords: stopwords.into_iter().map(|s| s.into().to_lowercase()).collect(),
        }
    }

    pub fn min_len(&self) -> usize { self.min_len }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    fn keep(&self, token: &str) -> bool {
        token.chars().count() >= self.min_len && !self.is_stopword(token)
    }

    /// Sorted, deduplicated index tokens of `text`.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.token_set(text).into_iter().collect()
    }

    /// The first index token of `text` in reading order.
    pub fn first_token(&self, text: &str) -> Option<String> {
        clean_text(text).split(' ').find(|t| self.keep(t)).map(str::to_string)
    }

    pub(crate) fn token_set(&self, text: &str) -> BTreeSet<String> {
        clean_text(text)
            .split(' ')
            .filter(|t| self.keep(t))
            .map(str::to_string)
            .collect()
    }
}
