//! Identifier helpers: opaque bech32 ids and human-readable display ids

use bech32::Bech32m;
use chrono::{DateTime, Utc};
use uuid7::uuid7;

pub const ORDER_HRP: &str = "order_";
pub const REVIEW_HRP: &str = "review_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Key of the daily display-id counter, e.g. `TX-20240615`.
pub fn display_day_key(prefix: &str, at: &DateTime<Utc>) -> String {
    format!("{}-{}", prefix, at.format("%Y%m%d"))
}

/// `TX-20240615-0001`. Sequences past 9999 simply widen.
pub fn format_display_id(day_key: &str, sequence: u32) -> String {
    format!("{day_key}-{sequence:04}")
}

/// Rework children take the parent's display id plus `-R{revision}`. Later
/// siblings from the same parent get their ordinal appended so ids stay unique.
pub fn rework_display_id(parent_display_id: &str, revision: u32, sibling: u32) -> String {
    if sibling <= 1 {
        format!("{parent_display_id}-R{revision}")
    } else {
        format!("{parent_display_id}-R{revision}-{sibling}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_ids_are_zero_padded() {
        let day = Utc.with_ymd_and_hms(2024, 6, 5, 13, 0, 0).unwrap();
        let key = display_day_key("TX", &day);

        assert_eq!(key, "TX-20240605");
        assert_eq!(format_display_id(&key, 1), "TX-20240605-0001");
        assert_eq!(format_display_id(&key, 12_345), "TX-20240605-12345");
    }

    #[test]
    fn rework_suffixes() {
        assert_eq!(rework_display_id("TX-20240605-0001", 1, 1), "TX-20240605-0001-R1");
        assert_eq!(
            rework_display_id("TX-20240605-0001", 1, 2),
            "TX-20240605-0001-R1-2"
        );
        assert_eq!(
            rework_display_id("TX-20240605-0001-R1", 2, 1),
            "TX-20240605-0001-R1-R2"
        );
    }
}
