use std::collections::BTreeMap;

/// Line separating messages in a multi-message bulletin file.
pub const MESSAGE_SEPARATOR: &str = "---";

pub fn split_messages(text: &str) -> Vec<&str> {
    let mut messages = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim() == MESSAGE_SEPARATOR {
            messages.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    messages.push(&text[start..]);

    messages
        .into_iter()
        .filter(|message| !message.trim().is_empty())
        .collect()
}

/// Merges messages region by region. For every header the block from the most
/// recent message wins; blocks are emitted sorted by header.
pub fn merge_latest<T: Ord + Copy>(messages: &[(T, &str)]) -> String {
    let mut latest: BTreeMap<String, (T, Vec<String>)> = BTreeMap::new();

    for (timestamp, text) in messages {
        let mut header: Option<String> = None;
        let mut content: Vec<String> = Vec::new();
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line.ends_with(':') {
                if let Some(header) = header.take() {
                    keep_latest(&mut latest, header, std::mem::take(&mut content), *timestamp);
                }
                header = Some(line.to_string());
            } else if header.is_some() {
                content.push(line.to_string());
            }
        }
        if let Some(header) = header {
            keep_latest(&mut latest, header, content, *timestamp);
        }
    }

    latest
        .into_iter()
        .map(|(header, (_, content))| format!("{}\n{}", header, content.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn keep_latest<T: Ord + Copy>(
    latest: &mut BTreeMap<String, (T, Vec<String>)>,
    header: String,
    content: Vec<String>,
    timestamp: T,
) {
    if content.is_empty() {
        return;
    }
    match latest.get(&header) {
        Some((existing, _)) if *existing >= timestamp => {}
        _ => {
            latest.insert(header, (timestamp, content));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_separator_lines() {
        let messages = split_messages("A:\nx\n---\nB:\ny\n ---\n\n");
        assert_eq!(messages, vec!["A:\nx\n", "B:\ny\n"]);
        assert_eq!(split_messages("A:\nx"), vec!["A:\nx"]);
    }

    #[test]
    fn newest_block_wins_per_region() {
        let merged = merge_latest(&[
            (1, "Sumy Oblast:\nShahed bound for Sumy\nKyiv Oblast:\nKR bound for Kyiv"),
            (2, "Sumy Oblast:\n3 Shahed bound for Konotop"),
            (0, "Sumy Oblast:\nstale line"),
        ]);
        assert_eq!(
            merged,
            "Kyiv Oblast:\nKR bound for Kyiv\n\nSumy Oblast:\n3 Shahed bound for Konotop"
        );
    }

    #[test]
    fn headers_without_content_are_dropped() {
        assert_eq!(merge_latest(&[(1, "Empty:\nFull:\nline")]), "Full:\nline");
    }
}
