// src/features/dn.rs
// Distinguished-name string helpers.
//
// Two DN layouts occur in the PKD: slash form (`/C=KR/O=Gov/CN=Name`) and
// RFC 2253 comma form (`CN=Name, O=Gov, C=KR`). A string starting with `/`
// is slash form; everything else is treated as comma-separated.

/// Extract the two-letter country code (`C=XX`) from either DN form,
/// case-insensitively. Returns the upper-cased code or an empty string.
pub fn extract_country(dn: &str) -> String {
    if dn.is_empty() {
        return String::new();
    }
    let dn = dn.trim();
    let separator = if dn.starts_with('/') { '/' } else { ',' };

    for segment in dn.split(separator) {
        let segment = segment.trim();
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("c") {
            continue;
        }
        let letters: String = value
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .take(2)
            .collect();
        if letters.len() == 2 {
            return letters.to_ascii_uppercase();
        }
    }
    String::new()
}

/// Count `K=V` fields in a DN string.
pub fn count_fields(dn: &str) -> usize {
    if dn.is_empty() {
        return 0;
    }
    let dn = dn.trim();
    let separator = if dn.starts_with('/') { '/' } else { ',' };
    dn.split(separator).filter(|p| p.contains('=')).count()
}

/// DN format tag: 0 = RFC 2253 comma form, 1 = slash form, 2 = other.
pub fn format_tag(dn: &str) -> u8 {
    if dn.is_empty() {
        return 2;
    }
    let dn = dn.trim();
    if dn.starts_with('/') {
        return 1;
    }
    if dn.contains(',') && dn.contains('=') {
        return 0;
    }
    2
}

/// Whether the DN carries an email field (`emailAddress=`, `email=`, `E=`).
pub fn has_email(dn: &str) -> bool {
    if dn.is_empty() {
        return false;
    }
    let lower = dn.to_lowercase();
    lower.contains("emailaddress=") || lower.contains("email=") || lower.contains("e=")
}
