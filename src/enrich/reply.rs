use crate::db::fact::Coordinates;
use crate::error::ResolveError;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrichmentReply {
    #[serde(default)]
    pub region_coordinates: Option<Coordinates>,
    #[serde(default)]
    pub region_confidence: Option<f64>,
    #[serde(default)]
    pub targets: Vec<ReplyTarget>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyTarget {
    pub city: String,
    pub weapon_type: String,
    pub count: u32,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Strips code fences and keeps the text between the first `{` and the last `}`.
pub fn clean_reply(raw: &str) -> String {
    let unfenced = raw.replace("```json", "").replace("```", "");
    let Some(start) = unfenced.find('{') else {
        return unfenced.trim().to_string();
    };
    match unfenced.rfind('}') {
        Some(end) if end > start => unfenced[start..=end].trim().to_string(),
        _ => unfenced.trim().to_string(),
    }
}

pub fn parse_reply(cleaned: &str) -> Result<EnrichmentReply, ResolveError> {
    let reply: EnrichmentReply =
        serde_json::from_str(cleaned).map_err(|e| ResolveError::Parse(e.to_string()))?;

    let confidences = reply
        .region_confidence
        .iter()
        .chain(reply.targets.iter().filter_map(|t| t.confidence.as_ref()));
    for confidence in confidences {
        if !(0.0..=1.0).contains(confidence) {
            return Err(ResolveError::Parse(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
    }
    if let Some(target) = reply.targets.iter().find(|t| t.city.trim().is_empty()) {
        return Err(ResolveError::Parse(format!(
            "target with empty city name ({})",
            target.weapon_type
        )));
    }

    Ok(reply)
}
