//! Platform selection for multi-platform images.

use std::cmp::Ordering;

pub use content::Platform;

/// Decides which entries of an image index to use, and in what order.
pub trait PlatformMatcher: Send + Sync {
    /// Whether `platform` is acceptable.
    fn matches(&self, platform: &Platform) -> bool;

    /// Whether `a` is preferred over `b`.
    fn less(&self, a: &Platform, b: &Platform) -> bool;
}

fn same_target(want: &Platform, have: &Platform) -> bool {
    want.os == have.os && want.architecture == have.architecture
}

/// Rank of a variant that only loosely matches, because one side omits it.
const LOOSE: u32 = u32::MAX;

fn arm_level(variant: &str) -> Option<u32> {
    variant.strip_prefix('v')?.parse().ok()
}

/// How well `have` satisfies the variant of `want`, lower is better. `None`
/// when it cannot run there.
///
/// 32-bit arm cores run code built for older variants, so `arm/v7` also
/// accepts `v6` and then `v5`.
fn variant_rank(want: &Platform, have: &Platform) -> Option<u32> {
    match (&want.variant, &have.variant) {
        (Some(w), Some(h)) if w == h => Some(0),
        (Some(w), Some(h)) if want.architecture == "arm" => {
            let (w, h) = (arm_level(w)?, arm_level(h)?);
            (5..w).contains(&h).then(|| w - h)
        }
        (Some(_), Some(_)) => None,
        (None, None) => Some(0),
        _ => Some(LOOSE),
    }
}

/// Accepts a single os/architecture.
///
/// A missing variant on either side matches any variant, and `arm` falls back
/// to older variants. Exact variants sort first, then older arm variants
/// newest first, then entries without a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Only(pub Platform);

impl Only {
    /// Accept only the platform this process runs on.
    pub fn host() -> Self {
        Only(Platform::host())
    }

    fn rank(&self, platform: &Platform) -> Option<u32> {
        if !same_target(&self.0, platform) {
            return None;
        }
        variant_rank(&self.0, platform)
    }
}

impl PlatformMatcher for Only {
    fn matches(&self, platform: &Platform) -> bool {
        self.rank(platform).is_some()
    }

    fn less(&self, a: &Platform, b: &Platform) -> bool {
        match (self.rank(a), self.rank(b)) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Accepts any of a list of platforms, preferring earlier entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ordered(pub Vec<Platform>);

impl Ordered {
    fn rank(&self, platform: &Platform) -> Option<usize> {
        self.0
            .iter()
            .position(|want| Only(want.clone()).matches(platform))
    }
}

impl PlatformMatcher for Ordered {
    fn matches(&self, platform: &Platform) -> bool {
        self.rank(platform).is_some()
    }

    fn less(&self, a: &Platform, b: &Platform) -> bool {
        match (self.rank(a), self.rank(b)) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Accepts every platform without preference.
#[derive(Debug, Clone, Copy, Default)]
pub struct All;

impl PlatformMatcher for All {
    fn matches(&self, _platform: &Platform) -> bool {
        true
    }

    fn less(&self, _a: &Platform, _b: &Platform) -> bool {
        false
    }
}

/// Sort order for `matcher`, usable with `sort_by`.
pub(crate) fn ordering(matcher: &dyn PlatformMatcher, a: &Platform, b: &Platform) -> Ordering {
    if matcher.less(a, b) {
        Ordering::Less
    } else if matcher.less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}
