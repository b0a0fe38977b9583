//! Field-level trust merge.

use opportunity_common::TrustFields;

/// Merge freshly computed trust fields over the persisted snapshot.
///
/// Each field independently takes the fresh value when it is non-empty, else
/// the snapshot value when that is non-empty, else nothing. A populated field
/// can therefore never be replaced by an empty one.
pub fn merge(fresh: &TrustFields, snapshot: &TrustFields) -> TrustFields {
    TrustFields {
        trust_score: prefer(fresh, snapshot, TrustFields::has_trust_score, |t| t.trust_score),
        trust_level: prefer(fresh, snapshot, TrustFields::has_trust_level, |t| {
            t.trust_level.clone()
        }),
        activity_score: prefer(fresh, snapshot, TrustFields::has_activity_score, |t| {
            t.activity_score
        }),
        badges: prefer(fresh, snapshot, TrustFields::has_badges, |t| Some(t.badges.clone()))
            .unwrap_or_default(),
    }
}

fn prefer<T>(
    fresh: &TrustFields,
    snapshot: &TrustFields,
    populated: fn(&TrustFields) -> bool,
    get: impl Fn(&TrustFields) -> Option<T>,
) -> Option<T> {
    if populated(fresh) {
        get(fresh)
    } else if populated(snapshot) {
        get(snapshot)
    } else {
        None
    }
}
