use serde::{Deserialize, Serialize};
use std::fmt;

/// Market identifier (ticker symbol) for one stock index or equity.
///
/// Index tickers carry a leading caret on most providers (e.g. "^GSPC",
/// "^N225"); the caret is accepted only in the first position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MarketKey(String);

impl MarketKey {
    /// Creates a new market key from a ticker symbol.
    ///
    /// # Arguments
    /// * `ticker` - The ticker symbol (e.g., "^GSPC", "AAPL")
    ///
    /// # Errors
    /// Returns an error if the ticker is empty or contains invalid characters.
    pub fn new(ticker: impl Into<String>) -> Result<Self, MarketKeyError> {
        let ticker = ticker.into();
        Self::validate(&ticker)?;
        Ok(MarketKey(ticker))
    }

    fn validate(ticker: &str) -> Result<(), MarketKeyError> {
        let body = ticker.strip_prefix('^').unwrap_or(ticker);
        if body.is_empty() {
            return Err(MarketKeyError::EmptyKey);
        }

        // Allow alphanumeric, dots, hyphens, underscores and '=' (futures/fx suffixes)
        if !body
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '='))
        {
            return Err(MarketKeyError::InvalidCharacters);
        }

        Ok(())
    }

    /// Returns the ticker symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a file-system friendly form of the ticker (caret stripped).
    pub fn file_stem(&self) -> String {
        self.0.trim_start_matches('^').to_string()
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MarketKey {
    type Error = MarketKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MarketKey::new(value)
    }
}

impl From<MarketKey> for String {
    fn from(key: MarketKey) -> Self {
        key.0
    }
}

/// Errors that can occur when creating or validating market keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketKeyError {
    /// The key is empty
    EmptyKey,
    /// The key contains invalid characters
    InvalidCharacters,
}

impl fmt::Display for MarketKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKeyError::EmptyKey => write!(f, "Market key cannot be empty"),
            MarketKeyError::InvalidCharacters => {
                write!(f, "Market key contains invalid characters")
            }
        }
    }
}

impl std::error::Error for MarketKeyError {}
