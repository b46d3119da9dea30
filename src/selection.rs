// Region-fair server selection. Four passes, each walking groups in
// priority order:
// 1. coverage: one server per group (best latency, else a failed candidate
//    carrying the placeholder latency)
// 2. round-robin: one more measured server per group per sweep, up to the cap
// 3. backfill by latency, still capped
// 4. backfill by latency, uncapped

use crate::types::{LatencyMeasurement, SelectedServer};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const MAX_PER_GROUP: usize = 4;

/// Per-group limit for passes 1-3.
pub fn group_cap(max_servers: usize, available_groups: usize) -> usize {
    if available_groups == 0 {
        return 0;
    }
    MAX_PER_GROUP.min(max_servers.div_ceil(available_groups).saturating_add(1))
}

/// Position of `group` in the priority list; unknown groups sort last.
fn rank(priority: &[String], group: &str) -> usize {
    priority
        .iter()
        .position(|g| g == group)
        .unwrap_or(priority.len())
}

fn by_latency(a: &LatencyMeasurement, b: &LatencyMeasurement) -> Ordering {
    let la = a.latency_ms.unwrap_or(f64::INFINITY);
    let lb = b.latency_ms.unwrap_or(f64::INFINITY);
    la.total_cmp(&lb)
}

/// Local bookkeeping for one selection run
struct Picker<'a> {
    max: usize,
    cap: usize,
    selected: Vec<SelectedServer>,
    taken: HashSet<&'a str>,
    per_group: HashMap<&'a str, usize>,
}

impl<'a> Picker<'a> {
    fn full(&self) -> bool {
        self.selected.len() >= self.max
    }

    fn count(&self, group: &str) -> usize {
        self.per_group.get(group).copied().unwrap_or(0)
    }

    fn under_cap(&self, group: &str) -> bool {
        self.count(group) < self.cap
    }

    fn is_taken(&self, m: &LatencyMeasurement) -> bool {
        self.taken.contains(m.server.id.as_str())
    }

    fn take(&mut self, m: &'a LatencyMeasurement, latency_ms: f64, measured: bool) {
        self.taken.insert(m.server.id.as_str());
        *self.per_group.entry(m.server.group.as_str()).or_insert(0) += 1;
        self.selected.push(SelectedServer {
            server: m.server.clone(),
            latency_ms,
            measured,
        });
    }
}

/// Pick at most `max_servers` servers, spreading them over groups.
///
/// `priority` is the group visiting order; groups that appear in the
/// measurements but not in `priority` are visited after the listed ones,
/// in order of first appearance.
pub fn select_servers(
    measurements: &[LatencyMeasurement],
    max_servers: usize,
    priority: &[String],
    failed_latency_ms: f64,
) -> Vec<SelectedServer> {
    // Groups present, in priority order
    let mut groups: Vec<&str> = Vec::new();
    for m in measurements {
        if !groups.contains(&m.server.group.as_str()) {
            groups.push(m.server.group.as_str());
        }
    }
    // Stable sort keeps first-appearance order among unknown groups
    groups.sort_by_key(|g| rank(priority, g));

    // Measured servers per group, fastest first; failed ones in probe order
    let mut measured: HashMap<&str, Vec<&LatencyMeasurement>> = HashMap::new();
    let mut failed: HashMap<&str, Vec<&LatencyMeasurement>> = HashMap::new();
    for m in measurements {
        let bucket = if m.is_success() { &mut measured } else { &mut failed };
        bucket.entry(m.server.group.as_str()).or_default().push(m);
    }
    for list in measured.values_mut() {
        list.sort_by(|a, b| by_latency(a, b));
    }

    let cap = group_cap(max_servers, groups.len());
    let mut picker = Picker {
        max: max_servers,
        cap,
        selected: Vec::with_capacity(max_servers.min(measurements.len())),
        taken: HashSet::new(),
        per_group: HashMap::new(),
    };

    // Pass 1: coverage
    for group in &groups {
        if picker.full() {
            break;
        }
        let best = measured.get(group).and_then(|l| l.iter().find(|m| !picker.is_taken(m)));
        if let Some(m) = best {
            picker.take(*m, m.latency_ms.unwrap_or(failed_latency_ms), true);
        } else if let Some(m) = failed.get(group).and_then(|l| l.iter().find(|m| !picker.is_taken(m))) {
            picker.take(*m, failed_latency_ms, false);
        }
    }
    debug!(selected = picker.selected.len(), groups = groups.len(), cap, "coverage pass");

    // Pass 2: round-robin
    loop {
        let mut progressed = false;
        for group in &groups {
            if picker.full() {
                break;
            }
            if !picker.under_cap(group) {
                continue;
            }
            let next = measured.get(group).and_then(|l| l.iter().find(|m| !picker.is_taken(m)));
            if let Some(m) = next {
                picker.take(*m, m.latency_ms.unwrap_or(failed_latency_ms), true);
                progressed = true;
            }
        }
        if picker.full() || !progressed {
            break;
        }
    }
    debug!(selected = picker.selected.len(), "round-robin pass");

    // Remaining measured servers, fastest first across all groups
    let mut rest: Vec<&LatencyMeasurement> = measurements.iter().filter(|m| m.is_success()).collect();
    rest.sort_by(|a, b| by_latency(a, b));

    // Pass 3: capped backfill
    for m in &rest {
        if picker.full() {
            break;
        }
        if !picker.is_taken(m) && picker.under_cap(&m.server.group) {
            picker.take(*m, m.latency_ms.unwrap_or(failed_latency_ms), true);
        }
    }

    // Pass 4: uncapped backfill
    for m in &rest {
        if picker.full() {
            break;
        }
        if !picker.is_taken(m) {
            picker.take(*m, m.latency_ms.unwrap_or(failed_latency_ms), true);
        }
    }
    debug!(selected = picker.selected.len(), max_servers, "selection finished");

    picker.selected
}

/// Display/test order: group priority, then country, then latency.
pub fn presentation_order(mut selected: Vec<SelectedServer>, priority: &[String]) -> Vec<SelectedServer> {
    selected.sort_by(|a, b| {
        rank(priority, &a.server.group)
            .cmp(&rank(priority, &b.server.group))
            .then_with(|| a.server.country.cmp(&b.server.country))
            .then_with(|| a.latency_ms.total_cmp(&b.latency_ms))
    });
    selected
}
