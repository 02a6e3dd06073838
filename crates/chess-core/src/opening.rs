/// Opening names derived from PGN headers.

use crate::game_data::GameMetadata;

/// Best available opening name: `Opening` header, then the last path segment of
/// `ECOUrl`, then `ECO <code>`.
pub fn derive_opening_name(metadata: &GameMetadata) -> Option<String> {
    if let Some(opening) = non_blank(metadata.opening.as_deref()) {
        return Some(opening.to_string());
    }

    if let Some(name) = non_blank(metadata.eco_url.as_deref()).and_then(opening_name_from_eco_url) {
        return Some(name);
    }

    non_blank(metadata.eco.as_deref()).map(|eco| format!("ECO {eco}"))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// "https://www.chess.com/openings/Italian-Game-Two-Knights" -> "Italian Game Two Knights"
pub fn opening_name_from_eco_url(eco_url: &str) -> Option<String> {
    let without_scheme = eco_url.split_once("://").map_or(eco_url, |(_, rest)| rest);
    let path = without_scheme
        .split_once('/')
        .map_or("", |(_, path)| path)
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_matches('/');

    // Only the final path segment names the opening
    let last_segment = path.rsplit('/').next()?;
    if last_segment.is_empty() {
        return None;
    }

    let decoded = percent_decode(last_segment).replace(['-', '_'], " ");
    let normalized = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> GameMetadata {
        GameMetadata::default()
    }

    #[test]
    fn test_opening_header_wins() {
        let meta = GameMetadata {
            opening: Some("  Sicilian Defense ".into()),
            eco: Some("B20".into()),
            ..metadata()
        };
        assert_eq!(derive_opening_name(&meta).as_deref(), Some("Sicilian Defense"));
    }

    #[test]
    fn test_eco_url_fallback() {
        let meta = GameMetadata {
            eco_url: Some("https://www.chess.com/openings/Queens-Gambit_Declined%27s-Line?ref=x".into()),
            eco: Some("D30".into()),
            ..metadata()
        };
        assert_eq!(
            derive_opening_name(&meta).as_deref(),
            Some("Queens Gambit Declined's Line")
        );
    }

    #[test]
    fn test_eco_code_fallback() {
        let meta = GameMetadata {
            eco_url: Some("https://www.chess.com/".into()),
            eco: Some("C00".into()),
            ..metadata()
        };
        assert_eq!(derive_opening_name(&meta).as_deref(), Some("ECO C00"));
    }

    #[test]
    fn test_nothing_known() {
        assert_eq!(derive_opening_name(&metadata()), None);
    }
}
