use crate::analyzers::types::HourlyAggregate;
use crate::ping::EnrichedPing;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
struct Bucket {
    speed_sum: f64,
    speed_count: usize,
    velocity_sum: f64,
    velocity_count: usize,
    lat_sum: f64,
    lon_sum: f64,
    position_count: usize,
}

impl Bucket {
    fn merge(&mut self, other: &Bucket) {
        self.speed_sum += other.speed_sum;
        self.speed_count += other.speed_count;
        self.velocity_sum += other.velocity_sum;
        self.velocity_count += other.velocity_count;
        self.lat_sum += other.lat_sum;
        self.lon_sum += other.lon_sum;
        self.position_count += other.position_count;
    }
}

fn ratio(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

/// Running per-`(line, hour)` sums. Memory is bounded by lines × 24.
///
/// Buckets without a reported speed produce no row, so hours a line was
/// never observed are absent rather than zero.
#[derive(Debug, Default, Clone)]
pub struct HourlyAggregator {
    buckets: BTreeMap<(String, u8), Bucket>,
}

impl HourlyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one ping. Pings without an hour are ignored.
    pub fn observe(&mut self, enriched: &EnrichedPing) {
        let Some(hour) = enriched.hour_of_day else {
            return;
        };
        let ping = &enriched.ping;
        let bucket = self
            .buckets
            .entry((ping.line_id.clone(), hour))
            .or_default();

        if let Some(speed) = ping.speed.filter(|s| s.is_finite()) {
            bucket.speed_sum += speed;
            bucket.speed_count += 1;
        }
        if let Some(v) = enriched.real_velocity_kmh.filter(|v| v.is_finite()) {
            bucket.velocity_sum += v;
            bucket.velocity_count += 1;
        }
        if let Ok((lat, lon)) = ping.position() {
            bucket.lat_sum += lat;
            bucket.lon_sum += lon;
            bucket.position_count += 1;
        }
    }

    /// Folds another aggregator's sums into this one.
    pub fn merge(&mut self, other: &HourlyAggregator) {
        for (key, bucket) in &other.buckets {
            self.buckets.entry(key.clone()).or_default().merge(bucket);
        }
    }

    /// Rows ordered by line, then hour.
    pub fn rows(&self) -> Vec<HourlyAggregate> {
        self.buckets
            .iter()
            .filter(|(_, b)| b.speed_count > 0)
            .map(|((line_id, hour), b)| HourlyAggregate {
                line_id: line_id.clone(),
                hour_of_day: *hour,
                observations: b.speed_count,
                mean_speed: b.speed_sum / b.speed_count as f64,
                mean_real_velocity_kmh: ratio(b.velocity_sum, b.velocity_count),
                mean_latitude: ratio(b.lat_sum, b.position_count),
                mean_longitude: ratio(b.lon_sum, b.position_count),
            })
            .collect()
    }
}

/// Aggregates a batch of enriched pings in one call.
pub fn aggregate_hourly<'a, I>(pings: I) -> Vec<HourlyAggregate>
where
    I: IntoIterator<Item = &'a EnrichedPing>,
{
    let mut aggregator = HourlyAggregator::new();
    for ping in pings {
        aggregator.observe(ping);
    }
    aggregator.rows()
}
