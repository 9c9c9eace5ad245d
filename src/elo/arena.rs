//! LMSYS Chatbot Arena leaderboard loading.

use std::io::Read;
use std::time::Duration;

use serde::Serialize;

use super::EloError;
use crate::util::truncate_for_log;

/// Header names accepted for the model name column, in priority order.
const NAME_COLUMNS: &[&str] = &["key", "model"];

/// Header names accepted for the rating column, in priority order.
const SCORE_COLUMNS: &[&str] = &["arena elo rating", "arena score", "elo", "rating"];

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArenaEntry {
    pub name: String,
    pub elo: f64,
}

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|wanted| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
    })
}

/// Parse a leaderboard CSV. Rows with an empty name or unparsable score are
/// skipped.
pub fn load_arena_csv<R: Read>(reader: R) -> Result<Vec<ArenaEntry>, EloError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let name_idx = find_column(&headers, NAME_COLUMNS)
        .ok_or_else(|| EloError::MissingColumn(NAME_COLUMNS.join("|")))?;
    let score_idx = find_column(&headers, SCORE_COLUMNS)
        .ok_or_else(|| EloError::MissingColumn(SCORE_COLUMNS.join("|")))?;

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for row in rdr.records() {
        let row = row?;
        let name = row.get(name_idx).unwrap_or_default();
        let score = row
            .get(score_idx)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|s| s.is_finite());
        match score {
            Some(elo) if !name.is_empty() => entries.push(ArenaEntry {
                name: name.to_string(),
                elo,
            }),
            _ => skipped += 1,
        }
    }

    tracing::debug!(
        entries = entries.len(),
        skipped,
        "Parsed arena leaderboard"
    );
    Ok(entries)
}

/// Download and parse a leaderboard CSV.
pub async fn fetch_arena(url: &str) -> Result<Vec<ArenaEntry>, EloError> {
    let response = reqwest::Client::new()
        .get(url)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| EloError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            body = truncate_for_log(&body, 200),
            "Arena leaderboard download failed"
        );
        return Err(EloError::Http {
            status: status.as_u16(),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| EloError::Network(e.to_string()))?;
    load_arena_csv(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LEADERBOARD: &str = "\
key,Model,Arena Elo rating,MT-bench (score),License
gpt-4o-2024-05-13,GPT-4o-2024-05-13,1287.1,-,Proprietary
claude-3-5-sonnet-20240620,Claude 3.5 Sonnet,1271.3,-,Proprietary
llama-3-70b-instruct,Llama-3-70b-Instruct,1206.5,-,Llama 3 Community
mystery-model,Mystery,-,-,Unknown
";

    #[test]
    fn test_load_prefers_key_column() {
        let entries = load_arena_csv(LEADERBOARD.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "gpt-4o-2024-05-13");
        assert_eq!(entries[0].elo, 1287.1);
        assert_eq!(entries[1].name, "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn test_load_alternate_headers() {
        let csv = "Rank,model,Arena Score\n1,gemini-1.5-pro,1300\n2,,1200\n";
        let entries = load_arena_csv(csv.as_bytes()).unwrap();
        assert_eq!(
            entries,
            vec![ArenaEntry {
                name: "gemini-1.5-pro".to_string(),
                elo: 1300.0
            }]
        );
    }

    #[test]
    fn test_missing_score_column() {
        let err = load_arena_csv("key,votes\ngpt-4,10\n".as_bytes()).unwrap_err();
        assert!(matches!(err, EloError::MissingColumn(_)));
    }

    #[tokio::test]
    async fn test_fetch_arena() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/leaderboard.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LEADERBOARD))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let entries = fetch_arena(&format!("{}/leaderboard.csv", server.uri()))
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);

        let err = fetch_arena(&format!("{}/missing.csv", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, EloError::Http { status: 404 }));
    }
}
