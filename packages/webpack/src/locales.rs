// Locales
//
// Normalization of the configured i18n locale against the set of locales
// that ship locale data. Lookup is case-insensitive and falls back to the
// parent locale when a regional variant has no data of its own.

/// Locales with available locale data. The default locale needs no
/// registration and is deliberately absent.
const KNOWN_LOCALES: &[&str] = &[
    "af", "am", "ar", "ar-DZ", "ar-EG", "az", "be", "bg", "bn", "bs", "ca", "cs", "cy", "da",
    "de", "de-AT", "de-CH", "el", "en", "en-AU", "en-CA", "en-GB", "en-IE", "en-IN", "en-NZ",
    "en-SG", "en-ZA", "es", "es-AR", "es-CL", "es-CO", "es-MX", "es-US", "et", "eu", "fa", "fi",
    "fil", "fr", "fr-BE", "fr-CA", "fr-CH", "ga", "gl", "gu", "he", "hi", "hr", "hu", "hy",
    "id", "is", "it", "it-CH", "ja", "ka", "kk", "km", "kn", "ko", "ky", "lo", "lt", "lv", "mk",
    "ml", "mn", "mr", "ms", "mt", "my", "nb", "ne", "nl", "nl-BE", "pa", "pl", "ps", "pt",
    "pt-PT", "ro", "ru", "si", "sk", "sl", "sq", "sr", "sr-Latn", "sv", "sw", "ta", "te", "th",
    "tr", "uk", "ur", "uz", "vi", "zh", "zh-Hans", "zh-Hant", "zu",
];

pub const DEFAULT_LOCALE: &str = "en-US";

fn canonical_case(locale: &str) -> String {
    locale
        .replace('_', "-")
        .split('-')
        .enumerate()
        .map(|(index, segment)| {
            if index == 0 {
                segment.to_ascii_lowercase()
            } else if segment.len() == 2 {
                segment.to_ascii_uppercase()
            } else if segment.len() == 4 {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_ascii_uppercase().to_string()
                            + &chars.as_str().to_ascii_lowercase()
                    }
                    None => String::new(),
                }
            } else {
                segment.to_ascii_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Normalize a configured locale to the matching locale-data name, falling
/// back through parent locales. `None` means no locale data exists and
/// locale registration should be disabled with a warning. The default
/// locale normalizes to `None` too, as it needs no registration.
pub fn normalize_locale(locale: &str) -> Option<String> {
    let mut candidate = canonical_case(locale.trim());
    if candidate.is_empty() || candidate == canonical_case(DEFAULT_LOCALE) {
        return None;
    }
    loop {
        if KNOWN_LOCALES.iter().any(|known| *known == candidate) {
            return Some(candidate);
        }
        match candidate.rfind('-') {
            Some(idx) => candidate.truncate(idx),
            None => return None,
        }
    }
}
