//! Content fingerprints for highlight units.
//!
//! A fingerprint covers every field that is visible in the destination, so an
//! unchanged unit always hashes to the same 16 hex chars across runs.

use crate::adapter::Unit;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

const FINGERPRINT_BYTES: usize = 8;

/// CRLF → LF, then trim surrounding whitespace.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

pub fn fingerprint(unit: &Unit) -> String {
    let parts = [
        normalize(&unit.text),
        unit.note.as_deref().map(normalize).unwrap_or_default(),
        unit.style.map(|s| s.to_string()).unwrap_or_default(),
        timestamp(unit.created_at),
        timestamp(unit.modified_at),
        unit.location.clone().unwrap_or_default(),
    ];

    // Length-prefixed so text can't move between fields without a change
    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn unit() -> Unit {
        Unit::new("u1", "The spice must flow")
            .with_style(2)
            .with_location("12-40")
            .with_created_at(Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap())
    }

    #[test]
    fn test_stable_and_sixteen_hex_chars() {
        let a = fingerprint(&unit());
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, fingerprint(&unit()));
    }

    #[test]
    fn test_whitespace_and_line_endings_are_normalized() {
        let mut messy = unit();
        messy.text = "  The spice must flow\r\n".to_string();
        assert_eq!(fingerprint(&messy), fingerprint(&unit()));

        let a = unit().with_note("line one\r\nline two");
        let b = unit().with_note("line one\nline two  ");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_every_visible_field_changes_the_hash() {
        let base = fingerprint(&unit());
        assert_ne!(base, fingerprint(&unit().with_note("nice")));
        assert_ne!(base, fingerprint(&unit().with_style(3)));
        assert_ne!(base, fingerprint(&unit().with_location("12-41")));
        assert_ne!(
            base,
            fingerprint(&unit().with_modified_at(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()))
        );
    }

    #[test]
    fn test_line_moved_between_text_and_note_changes_the_hash() {
        let mut a = unit().with_note("c");
        a.text = "a\nb".to_string();
        let mut b = unit().with_note("b\nc");
        b.text = "a".to_string();
        assert_ne!(fingerprint(&a), fingerprint(&b));

        let empty_note = unit().with_note("");
        assert_eq!(fingerprint(&empty_note), fingerprint(&unit()));
    }

    #[test]
    fn test_subsecond_precision_is_ignored() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        let a = unit().with_created_at(t);
        let b = unit().with_created_at(t + chrono::Duration::milliseconds(400));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
