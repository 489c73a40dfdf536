//! Simulated geocoders for scheduler and pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use geozip_geocoder::ReverseGeocoder;
use geozip_shared::{Dataset, GeoResult, NoResultReason, Position, Record};

/// A geocoder answering from a script keyed by `"lat,lon"`, counting calls
/// and the peak number of lookups running at once.
pub(crate) struct ScriptedGeocoder {
    responses: HashMap<String, (Duration, GeoResult)>,
    default_delay: Duration,
    panic_on: Option<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGeocoder {
    pub(crate) fn new(default_delay: Duration) -> Self {
        Self {
            responses: HashMap::new(),
            default_delay,
            panic_on: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn respond(mut self, lat: f64, lon: f64, delay: Duration, result: GeoResult) -> Self {
        self.responses.insert(key(lat, lon), (delay, result));
        self
    }

    pub(crate) fn panic_on(mut self, lat: f64, lon: f64) -> Self {
        self.panic_on = Some(key(lat, lon));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the lookup is abandoned.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ReverseGeocoder for ScriptedGeocoder {
    async fn lookup(&self, latitude: Option<f64>, longitude: Option<f64>) -> GeoResult {
        let (Some(lat), Some(lon)) = (latitude, longitude) else {
            return GeoResult::no_result(NoResultReason::MissingCoordinates);
        };

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let key = key(lat, lon);
        let (delay, result) = self
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| (self.default_delay, GeoResult::found(format!("Z{lat}"))));

        tokio::time::sleep(delay).await;

        if self.panic_on.as_deref() == Some(key.as_str()) {
            panic!("simulated provider crash for {key}");
        }

        result
    }
}

fn key(lat: f64, lon: f64) -> String {
    format!("{lat},{lon}")
}

/// A dataset of `n` records at latitudes `0..n`, longitude `-77`.
pub(crate) fn grid_dataset(n: usize) -> Dataset {
    Dataset {
        headers: vec!["id".into(), "latitude".into(), "longitude".into()],
        records: (0..n)
            .map(|i| {
                Record::new(
                    Position(i),
                    vec![i.to_string(), i.to_string(), "-77".into()],
                    Some(i as f64),
                    Some(-77.0),
                )
            })
            .collect(),
    }
}
