//! HTTP oracle: the target model behind a JSON endpoint.
//!
//! One POST per batch. The request carries every feature of the batch and
//! the response must carry one result per feature, in order. Accepted
//! response shapes:
//!
//! ```text
//! {"predictions": [{"probs": [..], "label": 1, "answer": "..", "metrics": {..}}, ..]}
//! {"probs": [[..], ..]}
//! {"scores": [0.42, ..], "answers": [".." , ..], "metrics": [{"bleu": 0.3}, ..]}
//! ```
//!
//! A missing `label` is the argmax of `probs`. Inputs built for a generation
//! task carry the expected answer as `reference`.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Oracle, OracleError, Prediction};
use crate::feature::Feature;

/// Remote model scored over HTTP (blocking)
#[derive(Debug, Clone)]
pub struct HttpOracle {
    /// Target endpoint URL
    pub endpoint: String,
    /// Request timeout
    pub timeout: Duration,
    /// Optional API key header
    pub api_key: Option<String>,
    /// Optional model parameter (for multi-model endpoints)
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
struct HttpRequest<'a> {
    inputs: Vec<HttpInput<'a>>,
    batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct HttpInput<'a> {
    text: &'a str,
    ids: &'a [u32],
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
}

impl HttpOracle {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_secs(30),
            api_key: None,
            model: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    fn build_client(&self) -> Result<reqwest::blocking::Client, OracleError> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))
    }

    fn request_body<'a>(&'a self, batch: &'a [Feature]) -> HttpRequest<'a> {
        HttpRequest {
            inputs: batch
                .iter()
                .map(|f| HttpInput {
                    text: &f.text,
                    ids: &f.ids,
                    reference: f.reference.as_deref(),
                })
                .collect(),
            batch_size: batch.len(),
            model: self.model.as_deref(),
        }
    }

    fn send_batch(&self, batch: &[Feature]) -> Result<serde_json::Value, OracleError> {
        let client = self.build_client()?;
        let body = self.request_body(batch);

        let mut req = client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", "varflip/0.1");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
            req = req.header("x-api-key", key);
        }

        let response = req.json(&body).send().map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::Network(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(OracleError::Response(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().unwrap_or_default()
            )));
        }

        response
            .json::<serde_json::Value>()
            .map_err(|e| OracleError::Response(e.to_string()))
    }
}

/// Read predictions out of any accepted response shape
pub fn parse_predictions(json: &serde_json::Value) -> Result<Vec<Prediction>, OracleError> {
    if let Some(preds) = json.get("predictions") {
        return serde_json::from_value(preds.clone())
            .map_err(|e| OracleError::Response(format!("bad predictions: {}", e)));
    }

    if let Some(rows) = json.get("probs").and_then(|v| v.as_array()) {
        return rows
            .iter()
            .map(|row| {
                serde_json::from_value::<Vec<f64>>(row.clone())
                    .map(Prediction::classification)
                    .map_err(|e| OracleError::Response(format!("bad probs: {}", e)))
            })
            .collect();
    }

    if let Some(scores) = json.get("scores").and_then(|v| v.as_array()) {
        let answers = json.get("answers").and_then(|v| v.as_array());
        let metrics = json.get("metrics").and_then(|v| v.as_array());
        return scores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let score = s
                    .as_f64()
                    .ok_or_else(|| OracleError::Response(format!("score {} is not a number", i)))?;
                let mut pred = Prediction::quality(score);
                if let Some(a) = answers.and_then(|a| a.get(i)).and_then(|a| a.as_str()) {
                    pred = pred.with_answer(a);
                }
                if let Some(m) = metrics.and_then(|m| m.get(i)) {
                    pred.metrics = serde_json::from_value(m.clone())
                        .map_err(|e| OracleError::Response(format!("bad metrics {}: {}", i, e)))?;
                }
                Ok(pred)
            })
            .collect();
    }

    Err(OracleError::Response(
        "response has none of predictions/probs/scores".to_string(),
    ))
}

impl Oracle for HttpOracle {
    fn predict(&self, batch: &[Feature]) -> Result<Vec<Prediction>, OracleError> {
        debug!(endpoint = %self.endpoint, batch = batch.len(), "oracle request");
        let json = self.send_batch(batch)?;
        parse_predictions(&json)
    }

    fn describe(&self) -> String {
        format!("HTTP oracle: {}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_predictions_shape() {
        let preds = parse_predictions(&json!({
            "predictions": [{"probs": [0.3, 0.7], "label": 1}]
        }))
        .unwrap();
        assert_eq!(preds[0].label, 1);
    }

    #[test]
    fn test_parse_probs_shape() {
        let preds = parse_predictions(&json!({"probs": [[0.9, 0.1], [0.2, 0.8]]})).unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[1].label, 1);
    }

    #[test]
    fn test_parse_scores_shape() {
        let preds = parse_predictions(&json!({
            "scores": [0.5, 0.25],
            "answers": ["adds two numbers"]
        }))
        .unwrap();
        assert_eq!(preds[0].answer.as_deref(), Some("adds two numbers"));
        assert_eq!(preds[1].answer, None);
        assert_eq!(preds[1].score_for(0), 0.25);
    }

    #[test]
    fn test_parse_predictions_without_label() {
        let preds = parse_predictions(&json!({
            "predictions": [{"probs": [0.2, 0.8]}, {"probs": [0.6, 0.4]}]
        }))
        .unwrap();
        assert_eq!(preds[0].label, 1);
        assert_eq!(preds[0].confidence(), 0.8);
        assert_eq!(preds[1].label, 0);
    }

    #[test]
    fn test_parse_metrics() {
        let preds = parse_predictions(&json!({
            "predictions": [{"quality": 0.3, "answer": "adds", "metrics": {"bleu": 0.3, "meteor": 0.5}}]
        }))
        .unwrap();
        assert_eq!(preds[0].metrics.get("meteor"), Some(&0.5));

        let preds = parse_predictions(&json!({
            "scores": [0.5, 0.25],
            "metrics": [{"bleu": 0.5, "rouge_l": 0.6}]
        }))
        .unwrap();
        assert_eq!(preds[0].metrics.get("rouge_l"), Some(&0.6));
        assert!(preds[1].metrics.is_empty());

        assert!(parse_predictions(&json!({"scores": [0.5], "metrics": [{"bleu": "high"}]})).is_err());
    }

    #[test]
    fn test_request_carries_reference() {
        let fb = crate::feature::FeatureBuilder::new(16, crate::feature::FeatureLayout::Raw);
        let mut feature = fb.build("Code: int f ( ) ;\nSummary:", None);
        feature.reference = Some("does nothing".to_string());
        let plain = fb.build("int g ;", None);
        let batch = [feature, plain];
        let oracle = HttpOracle::new("http://localhost:9000/predict".to_string())
            .with_model("summarizer".to_string());
        let body = oracle.request_body(&batch);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["inputs"][0]["reference"], "does nothing");
        assert!(json["inputs"][1].get("reference").is_none());
        assert_eq!(json["batch_size"], 2);
        assert_eq!(json["model"], "summarizer");
    }

    #[test]
    fn test_parse_unknown_shape() {
        assert!(parse_predictions(&json!({"text": "hi"})).is_err());
    }

    #[test]
    fn test_describe() {
        let oracle = HttpOracle::new("http://localhost:9000/predict".to_string())
            .with_timeout(Duration::from_secs(5));
        assert!(oracle.describe().contains("localhost:9000"));
        assert_eq!(oracle.timeout, Duration::from_secs(5));
    }
}
