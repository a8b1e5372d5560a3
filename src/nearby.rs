//! Nearby pharmacy and convenience-store search planning.
//!
//! Clinical medicines (socket provider) are looked up at pharmacies and
//! local remedies (stream provider) at convenience stores. Only the request
//! messages are built here; sending them is up to the caller.

use crate::models::{MedicineRecommendation, Source};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How the user intends to reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Walking,
    Driving,
}

/// Which kind of store a search targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    PharmacySearch,
    ConvenienceSearch,
}

impl SearchKind {
    /// Stores stocking medicines from `source`.
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::B => SearchKind::PharmacySearch,
            Source::A => SearchKind::ConvenienceSearch,
        }
    }

    fn rid_suffix(&self) -> &'static str {
        match self {
            SearchKind::PharmacySearch => "ph",
            SearchKind::ConvenienceSearch => "cv",
        }
    }
}

/// A position reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(lat: f64, lon: f64, accuracy_m: Option<f64>) -> Self {
        Self {
            lat,
            lon,
            accuracy_m,
            taken_at: Utc::now(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.taken_at <= max_age
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    /// Milliseconds since the epoch.
    pub ts: i64,
}

impl From<&LocationFix> for UserLocation {
    fn from(fix: &LocationFix) -> Self {
        Self {
            lat: fix.lat,
            lon: fix.lon,
            accuracy_m: fix.accuracy_m,
            ts: fix.taken_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMedicine {
    pub name: String,
    pub dosage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPayload {
    pub radius_km: f64,
    pub limit: usize,
    pub mode: TravelMode,
    pub medicines: Vec<SearchMedicine>,
    pub country: String,
    pub user_location: UserLocation,
}

/// Outbound search message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub rid: String,
    pub payload: SearchPayload,
}

/// Search parameters shared by both routes.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbySettings {
    pub radius_km: f64,
    pub limit: usize,
    pub mode: TravelMode,
    pub country: String,
    pub max_location_age: Duration,
}

impl Default for NearbySettings {
    fn default() -> Self {
        Self {
            radius_km: 2.0,
            limit: 4,
            mode: TravelMode::Walking,
            country: String::new(),
            max_location_age: Duration::seconds(60),
        }
    }
}

/// Build the searches worth sending for a merged medicine list.
///
/// Returns nothing without a fresh fix. Each route is planned only when it
/// has at least one medicine; pharmacy searches come first.
pub fn plan_searches(
    medicines: &[MedicineRecommendation],
    fix: Option<&LocationFix>,
    settings: &NearbySettings,
    now: DateTime<Utc>,
) -> Vec<SearchRequest> {
    let fix = match fix {
        Some(fix) if fix.is_fresh(now, settings.max_location_age) => fix,
        Some(_) => {
            debug!("Location fix is stale, skipping nearby search");
            return Vec::new();
        }
        None => return Vec::new(),
    };

    [SearchKind::PharmacySearch, SearchKind::ConvenienceSearch]
        .into_iter()
        .filter_map(|kind| {
            let routed: Vec<SearchMedicine> = medicines
                .iter()
                .filter(|m| SearchKind::for_source(m.source) == kind)
                .map(|m| SearchMedicine {
                    name: m.name.clone(),
                    dosage: m.dosage.clone().unwrap_or_default(),
                })
                .collect();

            if routed.is_empty() {
                return None;
            }

            Some(SearchRequest {
                kind,
                rid: format!("{}_{}", now.timestamp_millis(), kind.rid_suffix()),
                payload: SearchPayload {
                    radius_km: settings.radius_km,
                    limit: settings.limit,
                    mode: settings.mode,
                    medicines: routed,
                    country: settings.country.clone(),
                    user_location: UserLocation::from(fix),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn medicine(name: &str, dosage: Option<&str>, source: Source) -> MedicineRecommendation {
        MedicineRecommendation {
            name: name.to_string(),
            dosage: dosage.map(String::from),
            description: None,
            local_availability: None,
            source,
        }
    }

    fn fix_at(taken_at: DateTime<Utc>) -> LocationFix {
        LocationFix {
            lat: -8.65,
            lon: 115.21,
            accuracy_m: Some(12.0),
            taken_at,
        }
    }

    #[test]
    fn test_routes_by_source() {
        let now = Utc::now();
        let meds = vec![
            medicine("Tolak Angin", None, Source::A),
            medicine("Amoxicillin", Some("500mg"), Source::B),
        ];

        let searches = plan_searches(&meds, Some(&fix_at(now)), &NearbySettings::default(), now);
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[0].kind, SearchKind::PharmacySearch);
        assert_eq!(searches[0].payload.medicines[0].name, "Amoxicillin");
        assert_eq!(searches[1].kind, SearchKind::ConvenienceSearch);
        assert_eq!(searches[1].payload.medicines[0].dosage, "");
        assert!(searches[1].rid.ends_with("_cv"));
    }

    #[test]
    fn test_stale_or_missing_fix_plans_nothing() {
        let now = Utc::now();
        let meds = vec![medicine("Paracetamol", None, Source::A)];
        let settings = NearbySettings::default();

        assert!(plan_searches(&meds, None, &settings, now).is_empty());
        let old = fix_at(now - Duration::seconds(61));
        assert!(plan_searches(&meds, Some(&old), &settings, now).is_empty());
        let recent = fix_at(now - Duration::seconds(60));
        assert_eq!(plan_searches(&meds, Some(&recent), &settings, now).len(), 1);
    }

    #[test]
    fn test_route_without_medicines_is_skipped() {
        let now = Utc::now();
        let meds = vec![medicine("Ibuprofen", Some("200mg"), Source::B)];
        let searches = plan_searches(&meds, Some(&fix_at(now)), &NearbySettings::default(), now);
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].kind, SearchKind::PharmacySearch);
    }

    #[test]
    fn test_request_wire_shape() {
        let now = Utc::now();
        let settings = NearbySettings {
            mode: TravelMode::Driving,
            country: "ID".to_string(),
            ..NearbySettings::default()
        };
        let meds = vec![medicine("Ibuprofen", Some("200mg"), Source::B)];
        let searches = plan_searches(&meds, Some(&fix_at(now)), &settings, now);

        let value = serde_json::to_value(&searches[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "pharmacy_search",
                "rid": format!("{}_ph", now.timestamp_millis()),
                "payload": {
                    "radius_km": 2.0,
                    "limit": 4,
                    "mode": "driving",
                    "medicines": [{"name": "Ibuprofen", "dosage": "200mg"}],
                    "country": "ID",
                    "user_location": {
                        "lat": -8.65,
                        "lon": 115.21,
                        "accuracy_m": 12.0,
                        "ts": now.timestamp_millis()
                    }
                }
            })
        );
    }
}
