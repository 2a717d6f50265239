use anyhow::{anyhow, Result};
use axum::Router;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

/// Wrap the router in a per-client-IP rate limit. Requires the server to be
/// started with connect info so the peer address is extractable.
pub fn apply_rate_limit(router: Router, per_second: u64, burst: u32) -> Result<Router> {
    let config = GovernorConfigBuilder::default()
        .per_second(per_second)
        .burst_size(burst)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit configuration"))?;

    // The governor config must outlive every request; the layer borrows it
    // for 'static.
    Ok(router.layer(GovernorLayer {
        config: Box::leak(Box::new(config)),
    }))
}
