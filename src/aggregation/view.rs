//! Combined view model.
//!
//! Pure functions that fold the two provider responses into one answer.

use crate::models::{CombinedAnswer, ProviderResponse, Severity};

/// Shown when neither provider produced any analysis text.
pub const DEFAULT_FALLBACK_TEXT: &str = "Analysis complete.";

/// Merge two optional provider responses.
///
/// Content is concatenated A then B. Neither side takes priority.
pub fn merge_with_fallback(
    a: Option<&ProviderResponse>,
    b: Option<&ProviderResponse>,
    fallback_text: &str,
) -> CombinedAnswer {
    let present: Vec<&ProviderResponse> = [a, b].into_iter().flatten().collect();

    let fragments: Vec<&str> = present
        .iter()
        .map(|r| r.analysis_text.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let text = if fragments.is_empty() {
        fallback_text.to_string()
    } else {
        fragments.join("\n\n")
    };

    let medicines = present
        .iter()
        .flat_map(|r| r.medicines.iter().cloned())
        .collect();

    let severity = combined_severity(a.and_then(|r| r.severity), b.and_then(|r| r.severity));

    let seek_emergency_care =
        severity == Severity::High || present.iter().any(|r| r.seek_emergency_care);

    CombinedAnswer {
        text,
        medicines,
        severity,
        seek_emergency_care,
        sources: present.iter().map(|r| r.source).collect(),
        location: present.iter().find_map(|r| r.location.clone()),
        degraded: present.iter().any(|r| r.degraded),
    }
}

/// The more urgent of two ratings; absence counts as low.
pub fn combined_severity(a: Option<Severity>, b: Option<Severity>) -> Severity {
    Severity::normalize(a).max(Severity::normalize(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MedicineRecommendation, Source};

    fn merge(a: Option<&ProviderResponse>, b: Option<&ProviderResponse>) -> CombinedAnswer {
        merge_with_fallback(a, b, DEFAULT_FALLBACK_TEXT)
    }

    fn response(source: Source, severity: Option<Severity>, text: &str, meds: &[&str]) -> ProviderResponse {
        ProviderResponse {
            medicines: meds
                .iter()
                .map(|name| MedicineRecommendation {
                    name: name.to_string(),
                    dosage: None,
                    description: None,
                    local_availability: None,
                    source,
                })
                .collect(),
            severity,
            analysis_text: text.to_string(),
            ..ProviderResponse::empty(source)
        }
    }

    #[test]
    fn test_severity_is_max_of_both() {
        let levels = [None, Some(Severity::Low), Some(Severity::Medium), Some(Severity::High)];
        for a in levels {
            for b in levels {
                let ra = response(Source::A, a, "", &[]);
                let rb = response(Source::B, b, "", &[]);
                let answer = merge(Some(&ra), Some(&rb));
                let expected = Severity::normalize(a).max(Severity::normalize(b));
                assert_eq!(answer.severity, expected, "a={:?} b={:?}", a, b);
                assert_eq!(combined_severity(a, b), expected);
            }
        }
    }

    #[test]
    fn test_absent_responses_normalize_to_low() {
        let answer = merge(None, None);
        assert_eq!(answer.severity, Severity::Low);
        assert_eq!(answer.text, DEFAULT_FALLBACK_TEXT);
        assert!(answer.sources.is_empty());
        assert!(!answer.seek_emergency_care);
    }

    #[test]
    fn test_text_and_medicines_concatenate_a_then_b() {
        let a = response(Source::A, None, "Stay hydrated.", &["Tolak Angin"]);
        let b = response(Source::B, None, "  ", &["Panadol", "Panadol"]);
        let answer = merge(Some(&a), Some(&b));

        assert_eq!(answer.text, "Stay hydrated.");
        let names: Vec<_> = answer.medicines.iter().map(|m| (m.name.as_str(), m.source)).collect();
        assert_eq!(
            names,
            vec![("Tolak Angin", Source::A), ("Panadol", Source::B), ("Panadol", Source::B)]
        );

        let b = response(Source::B, None, "Rest.", &[]);
        assert_eq!(merge(Some(&a), Some(&b)).text, "Stay hydrated.\n\nRest.");
    }

    #[test]
    fn test_emergency_flag_from_either_side() {
        let mut a = response(Source::A, Some(Severity::Low), "", &[]);
        a.seek_emergency_care = true;
        let b = response(Source::B, Some(Severity::Low), "", &[]);
        assert!(merge(Some(&a), Some(&b)).seek_emergency_care);

        let high = response(Source::B, Some(Severity::High), "", &[]);
        assert!(merge(None, Some(&high)).seek_emergency_care);
    }

    #[test]
    fn test_degraded_and_custom_fallback() {
        let a = ProviderResponse::degraded(Source::A);
        let answer = merge_with_fallback(Some(&a), None, "Done.");
        assert!(answer.degraded);
        assert!(answer.is_partial());
        assert_eq!(answer.text, "Done.");
    }
}
