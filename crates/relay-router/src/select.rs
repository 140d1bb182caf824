use crate::config::{ConfigSnapshot, ProviderDefinition};
use crate::health::{EndpointKey, HealthBoard, HealthStatus};
use crate::ratelimit::RateLimitTracker;

/// Produce the ordered list of (provider, endpoint) pairs to attempt for a
/// request in `mode`. Deterministic given its inputs: providers are walked
/// in ascending (priority, id) order and every reordering below is a stable
/// partition.
///
/// An endpoint is eligible when its provider is enabled, it has a resolved
/// credential, its health status is not down, and it has rate-limit
/// headroom. Specialty matches for the mode move to the front when the mode
/// lists preferred specialties (listing them is an explicit requirement) or
/// the global preference is set; otherwise free-tier endpoints move to the
/// front when that preference is set.
pub fn select_candidates(
    snapshot: &ConfigSnapshot,
    mode: &str,
    health: &HealthBoard,
    limits: &RateLimitTracker,
) -> Vec<EndpointKey> {
    let settings = &snapshot.settings;
    let profile = snapshot.mode(mode);
    let prefs = &profile.preferred_specialties;
    let specialty_active = settings.prefer_specialty_match || !prefs.is_empty();

    let mut providers: Vec<(&String, &ProviderDefinition)> = snapshot
        .providers
        .iter()
        .filter(|(_, p)| p.enabled)
        .collect();
    providers.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then_with(|| a.0.cmp(b.0)));

    let mut pool: Vec<(EndpointKey, bool, bool)> = Vec::new();
    for (id, provider) in providers {
        for endpoint in &provider.endpoints {
            if !endpoint.credentialed() {
                continue;
            }
            let key = EndpointKey::new(id, &endpoint.name);
            if health.status(&key) == Some(HealthStatus::Down) {
                continue;
            }
            if !limits.available_now(&key, endpoint.rate_limit, settings.rate_limit_buffer) {
                continue;
            }
            let specialty_match = endpoint
                .specialty
                .as_deref()
                .is_some_and(|tag| prefs.iter().any(|p| p == tag));
            pool.push((key, specialty_match, endpoint.free_tier));
        }
    }

    let ordered = if specialty_active {
        stable_front(pool, |(_, specialty_match, _)| *specialty_match)
    } else if settings.prefer_free_tier {
        stable_front(pool, |(_, _, free_tier)| *free_tier)
    } else {
        pool
    };

    ordered.into_iter().map(|(key, _, _)| key).collect()
}

/// Move matching items to the front, preserving relative order in both
/// groups.
fn stable_front<T, F>(items: Vec<T>, pred: F) -> Vec<T>
where
    F: Fn(&T) -> bool,
{
    let (mut front, back): (Vec<T>, Vec<T>) = items.into_iter().partition(pred);
    front.extend(back);
    front
}
