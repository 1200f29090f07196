//! Phone number normalization
//!
//! Strict E.164 canonicalization plus calling-code extraction. All functions
//! return `Option` rather than erroring: an unparsable `to` number is routine
//! (internal extensions dial each other with short numbers), so callers try
//! extension-number lookup before treating `None` as invalid input.

/// International calling codes, digits only, one entry per code.
/// Longest-prefix matched (3 then 2 then 1 digits).
const CALLING_CODES: &[(&str, &str)] = &[
    ("1", "US"),
    ("7", "RU"),
    ("20", "EG"),
    ("27", "ZA"),
    ("30", "GR"),
    ("31", "NL"),
    ("32", "BE"),
    ("33", "FR"),
    ("34", "ES"),
    ("36", "HU"),
    ("39", "IT"),
    ("40", "RO"),
    ("41", "CH"),
    ("43", "AT"),
    ("44", "GB"),
    ("45", "DK"),
    ("46", "SE"),
    ("47", "NO"),
    ("48", "PL"),
    ("49", "DE"),
    ("51", "PE"),
    ("52", "MX"),
    ("53", "CU"),
    ("54", "AR"),
    ("55", "BR"),
    ("56", "CL"),
    ("57", "CO"),
    ("58", "VE"),
    ("60", "MY"),
    ("61", "AU"),
    ("62", "ID"),
    ("63", "PH"),
    ("64", "NZ"),
    ("65", "SG"),
    ("66", "TH"),
    ("81", "JP"),
    ("82", "KR"),
    ("84", "VN"),
    ("86", "CN"),
    ("90", "TR"),
    ("91", "IN"),
    ("92", "PK"),
    ("93", "AF"),
    ("94", "LK"),
    ("95", "MM"),
    ("98", "IR"),
    ("212", "MA"),
    ("213", "DZ"),
    ("216", "TN"),
    ("218", "LY"),
    ("220", "GM"),
    ("221", "SN"),
    ("233", "GH"),
    ("234", "NG"),
    ("250", "RW"),
    ("251", "ET"),
    ("254", "KE"),
    ("255", "TZ"),
    ("256", "UG"),
    ("260", "ZM"),
    ("263", "ZW"),
    ("351", "PT"),
    ("352", "LU"),
    ("353", "IE"),
    ("354", "IS"),
    ("358", "FI"),
    ("359", "BG"),
    ("380", "UA"),
    ("385", "HR"),
    ("386", "SI"),
    ("420", "CZ"),
    ("421", "SK"),
    ("852", "HK"),
    ("853", "MO"),
    ("880", "BD"),
    ("886", "TW"),
    ("960", "MV"),
    ("961", "LB"),
    ("962", "JO"),
    ("963", "SY"),
    ("964", "IQ"),
    ("965", "KW"),
    ("966", "SA"),
    ("967", "YE"),
    ("968", "OM"),
    ("971", "AE"),
    ("972", "IL"),
    ("973", "BH"),
    ("974", "QA"),
    ("975", "BT"),
    ("976", "MN"),
    ("977", "NP"),
    ("994", "AZ"),
    ("995", "GE"),
    ("998", "UZ"),
];

/// Keep digits; keep a single leading `+`.
fn clean(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '+' && i == 0 {
            out.push(c);
        }
    }
    out
}

fn lookup_code(digits: &str) -> Option<&'static str> {
    for len in (1..=3).rev() {
        if digits.len() >= len {
            let prefix = &digits[..len];
            if let Some((code, _)) = CALLING_CODES.iter().find(|(c, _)| *c == prefix) {
                return Some(code);
            }
        }
    }
    None
}

/// Extract the international calling code with its leading `+`.
/// `"+1 (555) 123-4567"` -> `Some("+1")`, `"3001"` -> `None`.
pub fn extract_calling_code(raw: &str) -> Option<String> {
    let cleaned = clean(raw);
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    // Without an explicit +, only long numbers can plausibly carry a code
    if !cleaned.starts_with('+') && digits.len() < 8 {
        return None;
    }
    lookup_code(digits).map(|code| format!("+{}", code))
}

/// ISO 3166 alpha-2 country for a calling code, with or without the `+`.
pub fn calling_code_to_country(code: &str) -> Option<&'static str> {
    let digits = code.strip_prefix('+').unwrap_or(code);
    CALLING_CODES
        .iter()
        .find(|(c, _)| *c == digits)
        .map(|(_, country)| *country)
}

/// Canonicalize to strict E.164 (`+<country><national>`, 8-15 digits).
/// Returns `None` on anything unparsable; never panics. Short numeric
/// strings are not forced into E.164 — they may be extension numbers, see
/// [`as_extension_number`].
pub fn normalize(raw: &str) -> Option<String> {
    let cleaned = clean(raw);

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else {
        cleaned.clone()
    };

    if digits.is_empty() || digits.starts_with('0') {
        return None;
    }
    if !(8..=15).contains(&digits.len()) {
        return None;
    }
    // A bare national number without + or 00 must still carry a recognizable
    // calling code to be trusted as E.164
    if !cleaned.starts_with('+') && !cleaned.starts_with("00") && lookup_code(&digits).is_none() {
        return None;
    }

    Some(format!("+{}", digits))
}

/// Short all-digit strings (2-6 digits) are candidate extension numbers.
pub fn as_extension_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if (2..=6).contains(&trimmed.len()) && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}
