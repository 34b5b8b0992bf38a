//! Response types for the Finnhub REST API.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Quote from /quote.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    /// Current price
    #[serde(rename = "c")]
    pub current: Decimal,

    /// Previous close
    #[serde(rename = "pc")]
    pub previous_close: Decimal,

    /// Day high
    #[serde(rename = "h", default)]
    pub high: Option<Decimal>,

    /// Day low
    #[serde(rename = "l", default)]
    pub low: Option<Decimal>,

    /// Quote time (unix seconds)
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

/// Sentiment block inside /news-sentiment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentScores {
    #[serde(default)]
    pub bullish_percent: f64,
    #[serde(default)]
    pub bearish_percent: f64,
}

/// Response from /news-sentiment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsSentimentResponse {
    #[serde(default)]
    pub sentiment: Option<SentimentScores>,

    #[serde(default)]
    pub company_news_score: Option<f64>,
}

impl NewsSentimentResponse {
    /// `bullish - bearish`, rounded to two places. Neutral when absent.
    pub fn net_sentiment(&self) -> f64 {
        match &self.sentiment {
            Some(s) => ((s.bullish_percent - s.bearish_percent) * 100.0).round() / 100.0,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_quote() {
        let json = r#"{"c":151.2,"d":1.2,"dp":0.8,"h":152.0,"l":149.5,"o":150.0,"pc":150.0,"t":1718900000}"#;
        let quote: QuoteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(quote.current, dec!(151.2));
        assert_eq!(quote.previous_close, dec!(150));
        assert_eq!(quote.timestamp, Some(1718900000));
    }

    #[test]
    fn test_net_sentiment() {
        let json = r#"{"sentiment":{"bullishPercent":0.734,"bearishPercent":0.266},"companyNewsScore":0.6}"#;
        let resp: NewsSentimentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.net_sentiment(), 0.47);

        let empty: NewsSentimentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.net_sentiment(), 0.0);
    }
}
