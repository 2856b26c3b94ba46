use chrono::{DateTime, Utc};

/// Deterministic export name: `{sanitized_label}_{YYYYmmdd_HHMMSS}.csv`
pub fn export_file_name(label: &str, generated_at: &DateTime<Utc>) -> String {
    let stamp = generated_at.format("%Y%m%d_%H%M%S");
    format!("{}_{stamp}.csv", sanitize_label(label))
}

fn sanitize_label(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let mut cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]).to_string();
    if cleaned.is_empty() {
        cleaned = "untitled".to_string();
    }
    if cleaned.len() > 80 {
        let mut end = 80;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }
    cleaned
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | '\0'..='\u{1F}'
    )
}
