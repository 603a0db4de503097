use regex::Regex;
use serde::Serialize;

/// Canonical token for cruise missiles, whether listed singly or in groups.
pub const CRUISE_MISSILE: &str = "Х101";

/// Physical units per reported group.
const GROUP_UNITS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub region: String,
    pub locality: String,
    pub category: String,
    pub count: u32,
}

/// Events grouped by region header, in first-seen order.
pub type RegionEvents = Vec<(String, Vec<Event>)>;

pub struct BulletinParser {
    grouped: Regex,
    generic: Regex,
}

impl BulletinParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            grouped: Regex::new(
                r"(?i)(?:(\d+)\s*[хx]?\s+)?(?:груп[аи]?|groups?)\s+(?:кр|kr)\s+(?:курсом\s+на|bound\s+for)\s+(.+)",
            )?,
            generic: Regex::new(
                r"(?:(\d+)\s*[хxХX]?\s+)?(\S+)\s+(?i:курсом\s+на|bound\s+for)\s+(.+)",
            )?,
        })
    }

    pub fn extract(&self, text: &str) -> RegionEvents {
        let mut regions: RegionEvents = Vec::new();
        let mut current: Option<usize> = None;

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line.ends_with(':') {
                let region = line.trim_end_matches(':').trim();
                if region.is_empty() {
                    current = None;
                    continue;
                }
                current = Some(match regions.iter().position(|(name, _)| name == region) {
                    Some(index) => index,
                    None => {
                        regions.push((region.to_string(), Vec::new()));
                        regions.len() - 1
                    }
                });
                continue;
            }

            let Some(index) = current else { continue };
            let (region, events) = &mut regions[index];
            match self.parse_line(region, line) {
                Some(event) => events.push(event),
                None => tracing::debug!("Skipping unrecognised line under {}: {}", region, line),
            }
        }

        tracing::info!(
            "Found regions: {:?}",
            regions.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>()
        );
        regions
    }

    fn parse_line(&self, region: &str, line: &str) -> Option<Event> {
        if let Some(captures) = self.grouped.captures(line) {
            let groups = parse_count(captures.get(1).map(|m| m.as_str()))?;
            return Some(Event {
                region: region.to_string(),
                locality: captures[2].trim().to_string(),
                category: CRUISE_MISSILE.to_string(),
                count: groups.checked_mul(GROUP_UNITS)?,
            });
        }

        let captures = self.generic.captures(line)?;
        let category = match &captures[2] {
            token if is_cruise_missile(token) => CRUISE_MISSILE.to_string(),
            token => token.to_string(),
        };
        Some(Event {
            region: region.to_string(),
            locality: captures[3].trim().to_string(),
            category,
            count: parse_count(captures.get(1).map(|m| m.as_str()))?,
        })
    }
}

fn is_cruise_missile(token: &str) -> bool {
    matches!(token.to_uppercase().as_str(), "КР" | "KR")
}

fn parse_count(count: Option<&str>) -> Option<u32> {
    match count {
        Some(count) => count.parse().ok(),
        None => Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> RegionEvents {
        BulletinParser::new().unwrap().extract(text)
    }

    #[test]
    fn grouped_cruise_missiles_count_two_per_group() {
        let regions = extract("Odesa Oblast:\n2 Groups KR bound for Kyiv");
        assert_eq!(
            regions,
            vec![(
                "Odesa Oblast".to_string(),
                vec![Event {
                    region: "Odesa Oblast".to_string(),
                    locality: "Kyiv".to_string(),
                    category: CRUISE_MISSILE.to_string(),
                    count: 4,
                }]
            )]
        );
    }

    #[test]
    fn ukrainian_lines() {
        let regions = extract(
            "Київщина:\n3х БпЛА курсом на Бровари\nГрупа КР курсом на Київ\nКР курсом на Фастів\n",
        );
        let events = &regions[0].1;
        assert_eq!(events.len(), 3);
        assert_eq!((events[0].category.as_str(), events[0].count), ("БпЛА", 3));
        assert_eq!(events[0].locality, "Бровари");
        assert_eq!((events[1].category.as_str(), events[1].count), (CRUISE_MISSILE, 2));
        assert_eq!((events[2].category.as_str(), events[2].count), (CRUISE_MISSILE, 1));
        assert_eq!(events[2].locality, "Фастів");
    }

    #[test]
    fn skips_unmatched_lines_and_lines_before_any_header() {
        let regions = extract(
            "БпЛА курсом на Суми\nSumy Oblast:\nall clear\n\nShahed bound for Konotop\n",
        );
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].0, "Sumy Oblast");
        assert_eq!(regions[0].1.len(), 1);
        assert_eq!(regions[0].1[0].category, "Shahed");
        assert_eq!(regions[0].1[0].count, 1);
    }

    #[test]
    fn repeated_headers_append_in_order() {
        let regions = extract(
            "Kharkiv Oblast:\nShahed bound for Kharkiv\nSumy Oblast:\nShahed bound for Sumy\nKharkiv Oblast:\n2 Shahed bound for Chuhuiv",
        );
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].0, "Kharkiv Oblast");
        let localities: Vec<_> = regions[0].1.iter().map(|e| e.locality.as_str()).collect();
        assert_eq!(localities, vec!["Kharkiv", "Chuhuiv"]);
        assert_eq!(regions[1].0, "Sumy Oblast");
    }

    #[test]
    fn header_with_only_colon_is_ignored() {
        assert!(extract(":\nShahed bound for Kyiv").is_empty());
    }
}
